//! Node agent: one ring member's protocol state and tasks.
//!
//! A `Node` owns the membership ring, failure detector, file catalog and the
//! set of locally stored files behind a single lock. Every handler follows
//! the same shape:
//! 1. Take the lock, mutate state, and collect the resulting work
//! 2. Release the lock
//! 3. Perform the sends, copies and deletes, logging each failure
//!
//! The Gateway is an ordinary member that additionally admits joiners and
//! owns the authoritative catalog.

use crate::catalog::{placement, FileCatalog, FileRecord, ReplicationOrder};
use crate::config::NodeConfig;
use crate::detector::{FailureDetector, Verdict};
use crate::dissemination::{
    apply_join, apply_removal, apply_ring_update, ForwardLog, JoinDecision, RemovalOutcome,
};
use crate::events::{ClusterEvent, EventBus, RemovalReason};
use crate::file_transport::{FileTransport, FileTransportError};
use crate::protocol::{CatalogSnapshot, Envelope, EnvelopeKind, Packet, RingUpdate};
use crate::ring::{Member, MembershipRing, MONITORED_SUCCESSORS};
use crate::store::{self, FileStore, StoreError};
use crate::transport::{Inbox, Transport, TransportError};
use crate::Timestamp;
use futures::future::join_all;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("File transport error: {0}")]
    FileTransport(#[from] FileTransportError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Unknown file: {0}")]
    UnknownFile(String),

    #[error("No reachable replica holds {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, NodeError>;

/// Result of adding a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    /// Stored locally; `pushed` lists successors that received a copy
    Stored { pushed: Vec<String> },
    /// The catalog already has a file by this name
    Duplicate,
}

/// Everything guarded by the node lock.
struct NodeState {
    ring: MembershipRing,
    detector: FailureDetector,
    catalog: FileCatalog,
    local_files: BTreeSet<String>,
    forwarded: ForwardLog,
    joined: bool,
}

/// Work collected under the lock, performed after it is released.
#[derive(Default)]
struct Outbound {
    packets: Vec<(String, Packet)>,
    /// (file, source) replicas to fetch into the local store
    pulls: Vec<(String, String)>,
    removals: Vec<String>,
    events: Vec<ClusterEvent>,
    wake_watches: bool,
    reconcile: bool,
}

impl Outbound {
    fn send(&mut self, host: impl Into<String>, packet: impl Into<Packet>) {
        self.packets.push((host.into(), packet.into()));
    }
}

/// A ring member.
pub struct Node<T, F, S> {
    host: String,
    config: NodeConfig,
    state: Mutex<NodeState>,
    transport: T,
    files: F,
    store: S,
    events: Arc<EventBus>,
    wakeups: [Notify; MONITORED_SUCCESSORS],
}

impl<T, F, S> Node<T, F, S>
where
    T: Transport + 'static,
    F: FileTransport + 'static,
    S: FileStore + 'static,
{
    /// Create a node. The Gateway starts as a one-member ring; everyone
    /// else starts alone and unjoined.
    pub fn new(host: impl Into<String>, config: NodeConfig, transport: T, files: F, store: S) -> Self {
        let host = host.into();
        let is_gateway = host == config.gateway;
        let state = NodeState {
            ring: MembershipRing::with_member(Member::new(host.clone(), Timestamp::now())),
            detector: FailureDetector::new(config.detector()),
            catalog: FileCatalog::new(),
            local_files: BTreeSet::new(),
            forwarded: ForwardLog::new(),
            joined: is_gateway,
        };

        Self {
            host,
            config,
            state: Mutex::new(state),
            transport,
            files,
            store,
            events: Arc::new(EventBus::new()),
            wakeups: std::array::from_fn(|_| Notify::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, NodeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ==================== Read-only views ====================

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn gateway(&self) -> &str {
        &self.config.gateway
    }

    pub fn is_gateway(&self) -> bool {
        self.host == self.config.gateway
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn is_joined(&self) -> bool {
        self.lock().joined
    }

    /// Members in ring order.
    pub fn ring_members(&self) -> Vec<Member> {
        self.lock().ring.members().to_vec()
    }

    /// Copy of the catalog (authoritative on the Gateway, cached elsewhere).
    pub fn catalog(&self) -> FileCatalog {
        self.lock().catalog.clone()
    }

    /// Replica hosts for a file, per this node's catalog.
    pub fn locate(&self, name: &str) -> Option<Vec<String>> {
        self.lock().catalog.get(name).map(|r| r.replicas.clone())
    }

    /// All file names in the catalog.
    pub fn list_catalog(&self) -> Vec<String> {
        self.lock().catalog.names()
    }

    /// Files physically stored on this node.
    pub fn local_files(&self) -> Vec<String> {
        self.lock().local_files.iter().cloned().collect()
    }

    // ==================== Inbound packets ====================

    /// Handle packets from an in-memory inbox until it closes.
    pub async fn serve(self: Arc<Self>, mut inbox: Inbox) {
        while let Some(packet) = inbox.recv().await {
            self.handle_packet(packet).await;
        }
        tracing::debug!("{}: inbox closed", self.host);
    }

    /// Dispatch one received packet.
    pub async fn handle_packet(&self, packet: Packet) {
        let out = match packet {
            Packet::Peer(envelope) => {
                tracing::debug!("{}: received {}", self.host, envelope);
                self.on_envelope(envelope)
            }
            Packet::Ring(update) => self.on_ring_update(update),
            Packet::Catalog(snapshot) => self.on_catalog(snapshot),
        };
        self.flush(out).await;
    }

    fn on_envelope(&self, envelope: Envelope) -> Outbound {
        let mut out = Outbound::default();
        match envelope.kind {
            EnvelopeKind::Join => {
                if self.is_gateway() {
                    let mut state = self.lock();
                    self.admit(&mut state, &envelope.host, &mut out);
                } else {
                    tracing::warn!("{}: Join from {} but not the Gateway", self.host, envelope.host);
                }
            }
            EnvelopeKind::Syn => {
                out.send(envelope.host, Envelope::new(self.host.clone(), EnvelopeKind::Ack));
            }
            EnvelopeKind::Ack => {
                self.lock().detector.ack(&envelope.host, Instant::now());
            }
            EnvelopeKind::Leave | EnvelopeKind::Failed => {
                let mut state = self.lock();
                self.remove_member(&mut state, &envelope, &mut out);
            }
            EnvelopeKind::AddFile { ref file_name } => {
                if self.is_gateway() {
                    let mut state = self.lock();
                    self.record_file(&mut state, &envelope.host, file_name, &mut out);
                } else {
                    tracing::warn!("{}: AddFile from {} but not the Gateway", self.host, envelope.host);
                }
            }
            EnvelopeKind::DelFile { ref file_name } => {
                if self.is_gateway() {
                    let mut state = self.lock();
                    if !self.forget_file(&mut state, file_name, &mut out) {
                        tracing::warn!("{}: DelFile for unknown file {}", self.host, file_name);
                    }
                } else {
                    tracing::warn!("{}: DelFile from {} but not the Gateway", self.host, envelope.host);
                }
            }
            EnvelopeKind::RemoveFile { file_name } => {
                out.removals.push(file_name);
            }
            EnvelopeKind::ReplicateFile { file_name, source } => {
                out.pulls.push((file_name, source));
            }
        }
        out
    }

    fn on_ring_update(&self, update: RingUpdate) -> Outbound {
        let mut out = Outbound::default();
        if self.is_gateway() {
            tracing::warn!("{}: Gateway ignoring ring update", self.host);
            return out;
        }

        let mut state = self.lock();
        let before: BTreeSet<String> = state.ring.hosts().into_iter().collect();
        let state = &mut *state;
        if let RingUpdate::Snapshot(members) = &update {
            if members.iter().any(|m| m.host == self.host) {
                state.joined = true;
            }
        }

        if apply_ring_update(&mut state.ring, &mut state.detector, update) {
            out.wake_watches = true;
            for host in state.ring.hosts() {
                if !before.contains(&host) {
                    tracing::info!("{}: {} joined the ring", self.host, host);
                    out.events.push(ClusterEvent::MemberAdded { host });
                }
            }
        }
        out
    }

    fn on_catalog(&self, snapshot: CatalogSnapshot) -> Outbound {
        let mut out = Outbound::default();
        if self.is_gateway() {
            tracing::warn!("{}: Gateway ignoring catalog snapshot", self.host);
            return out;
        }

        let mut state = self.lock();
        state.catalog.replace(snapshot);
        tracing::debug!("{}: catalog now has {} files", self.host, state.catalog.len());
        out.events.push(ClusterEvent::CatalogReplaced {
            files: state.catalog.len(),
        });
        out.reconcile = true;
        out
    }

    // ==================== State transitions (lock held) ====================

    /// Gateway: admit a joiner and push ring updates.
    fn admit(&self, state: &mut NodeState, joiner: &str, out: &mut Outbound) {
        let decision = apply_join(
            &mut state.ring,
            &mut state.detector,
            &self.host,
            joiner,
            Timestamp::now(),
        );

        match decision {
            JoinDecision::Skipped => {
                tracing::debug!("{}: duplicate Join from {}", self.host, joiner);
            }
            JoinDecision::Admitted {
                member,
                notify,
                snapshot,
            } => {
                tracing::info!("{}: admitted {} ({} members)", self.host, joiner, snapshot.len());
                for host in notify {
                    out.send(host, RingUpdate::Added(member.clone()));
                }
                out.send(joiner, RingUpdate::Snapshot(snapshot));
                out.send(joiner, state.catalog.snapshot());
                out.events.push(ClusterEvent::MemberAdded {
                    host: joiner.to_string(),
                });
                out.wake_watches = true;
            }
        }
    }

    /// Apply a Leave/Failed and, on the Gateway, repair the catalog.
    fn remove_member(&self, state: &mut NodeState, envelope: &Envelope, out: &mut Outbound) {
        let subject = envelope.host.as_str();
        let decision = apply_removal(
            &mut state.ring,
            &mut state.detector,
            &mut state.forwarded,
            &self.host,
            envelope,
        );

        let reason = match envelope.kind {
            EnvelopeKind::Leave => RemovalReason::Left,
            _ => RemovalReason::Failed,
        };

        match &decision.outcome {
            RemovalOutcome::Applied(_) => {
                tracing::info!(
                    "{}: removed {} ({}), {} members left",
                    self.host,
                    subject,
                    envelope.kind.name(),
                    state.ring.len()
                );
                out.events.push(ClusterEvent::MemberRemoved {
                    host: subject.to_string(),
                    reason,
                });
                out.wake_watches = true;
                if self.is_gateway() {
                    self.rereplicate(state, subject, out);
                }
            }
            RemovalOutcome::Stale => {
                tracing::debug!(
                    "{}: stale {} for {} (rejoined after {})",
                    self.host,
                    envelope.kind.name(),
                    subject,
                    envelope.timestamp
                );
            }
            RemovalOutcome::Absent => {
                tracing::debug!("{}: {} for absent host {}", self.host, envelope.kind.name(), subject);
            }
            RemovalOutcome::SelfTarget => {
                tracing::warn!("{}: received {} about itself", self.host, envelope.kind.name());
            }
        }

        for host in decision.forward_to {
            out.send(host, envelope.clone());
        }
    }

    /// Gateway: replace replicas lost with `removed`.
    fn rereplicate(&self, state: &mut NodeState, removed: &str, out: &mut Outbound) {
        if state.catalog.held_by(removed).is_empty() {
            return;
        }

        let orders = state.catalog.rereplicate(removed, &state.ring);
        for ReplicationOrder {
            file,
            source,
            target,
        } in orders
        {
            tracing::info!("{}: re-replicating {} from {} to {}", self.host, file, source, target);
            out.events.push(ClusterEvent::ReplicationOrdered {
                file: file.clone(),
                source: source.clone(),
                target: target.clone(),
            });
            if target == self.host {
                out.pulls.push((file, source));
            } else {
                out.send(
                    target,
                    Envelope::new(
                        self.host.clone(),
                        EnvelopeKind::ReplicateFile {
                            file_name: file,
                            source,
                        },
                    ),
                );
            }
        }
        self.broadcast_catalog(state, out);
    }

    /// Gateway: record a file added on `owner`.
    fn record_file(&self, state: &mut NodeState, owner: &str, name: &str, out: &mut Outbound) {
        if state.catalog.contains(name) {
            tracing::warn!("{}: {} already in catalog, ignoring AddFile from {}", self.host, name, owner);
            return;
        }

        let replicas = placement(&state.ring, owner);
        tracing::info!("{}: {} placed on {:?}", self.host, name, replicas);
        state.catalog.insert(FileRecord::new(name, replicas));
        self.broadcast_catalog(state, out);
    }

    /// Gateway: delete a file everywhere. Returns false if it was unknown.
    fn forget_file(&self, state: &mut NodeState, name: &str, out: &mut Outbound) -> bool {
        let Some(record) = state.catalog.remove(name) else {
            return false;
        };

        tracing::info!("{}: deleting {} from {:?}", self.host, name, record.replicas);
        for host in record.replicas {
            if host == self.host {
                out.removals.push(name.to_string());
            } else {
                out.send(
                    host,
                    Envelope::new(
                        self.host.clone(),
                        EnvelopeKind::RemoveFile {
                            file_name: name.to_string(),
                        },
                    ),
                );
            }
        }
        self.broadcast_catalog(state, out);
        true
    }

    fn broadcast_catalog(&self, state: &NodeState, out: &mut Outbound) {
        let snapshot = state.catalog.snapshot();
        for member in state.ring.members() {
            if member.host != self.host {
                out.send(member.host.clone(), snapshot.clone());
            }
        }
        out.events.push(ClusterEvent::CatalogReplaced {
            files: state.catalog.len(),
        });
        out.reconcile = true;
    }

    // ==================== Performing work (lock released) ====================

    async fn flush(&self, out: Outbound) {
        if out.wake_watches {
            for notify in &self.wakeups {
                notify.notify_one();
            }
        }
        self.events.emit_all(out.events);

        let sends = out.packets.into_iter().map(|(host, packet)| async move {
            if let Err(e) = self.transport.send(&host, packet).await {
                tracing::warn!("{}: send to {} failed: {}", self.host, host, e);
            }
        });
        join_all(sends).await;

        for (name, source) in out.pulls {
            self.pull(&name, &source).await;
        }

        for name in out.removals {
            self.remove_local(&name).await;
        }

        if out.reconcile {
            self.reconcile().await;
        }
    }

    /// Fetch a replica from `source` straight into the store.
    async fn pull(&self, name: &str, source: &str) {
        let dest = self.store.path_of(name);
        if let Err(e) = self.files.fetch(source, name, &dest).await {
            tracing::error!("{}: pull of {} from {} failed: {}", self.host, name, source, e);
            return;
        }

        tracing::info!("{}: pulled {} from {}", self.host, name, source);
        if self.lock().local_files.insert(name.to_string()) {
            self.events.emit(ClusterEvent::FileStored {
                file: name.to_string(),
            });
        }
    }

    async fn remove_local(&self, name: &str) {
        match self.store.remove(name).await {
            Ok(true) => tracing::info!("{}: removed local copy of {}", self.host, name),
            Ok(false) => tracing::warn!("{}: no local copy of {} to remove", self.host, name),
            Err(e) => {
                tracing::error!("{}: failed to remove {}: {}", self.host, name, e);
                return;
            }
        }
        if self.lock().local_files.remove(name) {
            self.events.emit(ClusterEvent::FileRemoved {
                file: name.to_string(),
            });
        }
    }

    /// Adopt files the catalog says this node holds and the store has.
    async fn reconcile(&self) {
        let stored: BTreeSet<String> = match self.store.list().await {
            Ok(names) => names.into_iter().collect(),
            Err(e) => {
                tracing::warn!("{}: cannot list store: {}", self.host, e);
                return;
            }
        };

        let mut added = Vec::new();
        {
            let mut state = self.lock();
            for name in state.catalog.held_by(&self.host) {
                if !stored.contains(&name) {
                    tracing::debug!("{}: {} not yet in store", self.host, name);
                } else if state.local_files.insert(name.clone()) {
                    added.push(ClusterEvent::FileStored { file: name });
                }
            }
        }
        self.events.emit_all(added);
    }

    // ==================== Membership operations ====================

    /// Ask the Gateway for admission. Returns false if already joined.
    pub async fn join(&self) -> Result<bool> {
        if self.is_joined() {
            return Ok(false);
        }
        let envelope = Envelope::new(self.host.clone(), EnvelopeKind::Join);
        self.transport
            .send(&self.config.gateway, envelope.into())
            .await?;
        tracing::info!("{}: sent Join to {}", self.host, self.config.gateway);
        Ok(true)
    }

    /// Announce departure to up to three predecessors and reset to a
    /// one-member ring.
    pub async fn leave(&self) {
        if self.is_gateway() {
            tracing::warn!("{}: the Gateway is leaving; joins and catalog updates will stall", self.host);
        }

        let predecessors = {
            let mut state = self.lock();
            let predecessors = state.ring.predecessors(&self.host, MONITORED_SUCCESSORS);
            let me = state
                .ring
                .get(&self.host)
                .cloned()
                .unwrap_or_else(|| Member::new(self.host.clone(), Timestamp::now()));
            state.ring = MembershipRing::with_member(me);
            state.detector.suppress_all();
            state.joined = false;
            predecessors
        };

        let envelope = Envelope::new(self.host.clone(), EnvelopeKind::Leave);
        let mut out = Outbound {
            wake_watches: true,
            ..Outbound::default()
        };
        for host in predecessors {
            out.send(host, envelope.clone());
        }
        tracing::info!("{}: leaving the ring", self.host);
        self.flush(out).await;
    }

    // ==================== File operations ====================

    /// Store a local file under `name` and replicate it.
    pub async fn add_file(&self, source: &str, name: &str) -> Result<AddOutcome> {
        store::validate_name(name)?;
        if self.lock().catalog.contains(name) {
            tracing::warn!("{}: {} already exists", self.host, name);
            return Ok(AddOutcome::Duplicate);
        }

        self.store.import(source, name).await?;

        let successors = self.lock().ring.successors(&self.host, 2);
        let mut pushed = Vec::new();
        for target in successors {
            match self.files.copy(name, &target).await {
                Ok(()) => pushed.push(target),
                Err(e) => tracing::error!("{}: copy of {} to {} failed: {}", self.host, name, target, e),
            }
        }

        if self.lock().local_files.insert(name.to_string()) {
            self.events.emit(ClusterEvent::FileStored {
                file: name.to_string(),
            });
        }

        if self.is_gateway() {
            let mut out = Outbound::default();
            {
                let mut state = self.lock();
                self.record_file(&mut state, &self.host, name, &mut out);
            }
            self.flush(out).await;
        } else {
            let envelope = Envelope::new(
                self.host.clone(),
                EnvelopeKind::AddFile {
                    file_name: name.to_string(),
                },
            );
            self.transport
                .send(&self.config.gateway, envelope.into())
                .await?;
        }

        Ok(AddOutcome::Stored { pushed })
    }

    /// Delete a file from every replica.
    pub async fn delete_file(&self, name: &str) -> Result<()> {
        if self.is_gateway() {
            let mut out = Outbound::default();
            let known = {
                let mut state = self.lock();
                self.forget_file(&mut state, name, &mut out)
            };
            if !known {
                return Err(NodeError::UnknownFile(name.to_string()));
            }
            self.flush(out).await;
        } else {
            let envelope = Envelope::new(
                self.host.clone(),
                EnvelopeKind::DelFile {
                    file_name: name.to_string(),
                },
            );
            self.transport
                .send(&self.config.gateway, envelope.into())
                .await?;
        }
        Ok(())
    }

    /// Copy a file to `dest`, from the local store or else from a replica.
    ///
    /// Returns the host the file came from.
    pub async fn get_file(&self, name: &str, dest: &str) -> Result<String> {
        if self.store.contains(name).await? {
            self.store.export(name, dest).await?;
            return Ok(self.host.clone());
        }

        let replicas = self
            .locate(name)
            .ok_or_else(|| NodeError::UnknownFile(name.to_string()))?;

        for source in replicas.iter().filter(|h| **h != self.host) {
            match self.files.fetch(source, name, dest).await {
                Ok(()) => return Ok(source.clone()),
                Err(e) => tracing::warn!("{}: fetch of {} from {} failed: {}", self.host, name, source, e),
            }
        }
        Err(NodeError::Unavailable(name.to_string()))
    }

    // ==================== Background tasks ====================

    /// Start the heartbeat task and one watch per monitored offset.
    pub fn spawn_background(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let mut handles = vec![tokio::spawn(Arc::clone(self).heartbeat())];
        for offset in 1..=MONITORED_SUCCESSORS {
            handles.push(tokio::spawn(Arc::clone(self).watch(offset)));
        }
        handles
    }

    async fn heartbeat(self: Arc<Self>) {
        let mut interval = time::interval(self.config.detector().heartbeat_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            let targets = {
                let state = self.lock();
                if state.detector.is_active(&state.ring) {
                    state.ring.successors(&self.host, MONITORED_SUCCESSORS)
                } else {
                    Vec::new()
                }
            };

            let mut out = Outbound::default();
            for host in targets {
                out.send(host, Envelope::new(self.host.clone(), EnvelopeKind::Syn));
            }
            self.flush(out).await;
        }
    }

    async fn watch(self: Arc<Self>, offset: usize) {
        let idle_poll = self.config.detector().idle_poll;

        loop {
            let armed = {
                let mut state = self.lock();
                let state = &mut *state;
                let target = if state.detector.is_active(&state.ring) {
                    state.ring.successor(&self.host, offset).map(str::to_string)
                } else {
                    None
                };
                if let Some(host) = &target {
                    state.detector.arm(offset, host.clone(), Instant::now());
                }
                target
            };

            let Some(host) = armed else {
                time::sleep(idle_poll).await;
                continue;
            };
            tracing::trace!("{}: watch {} armed for {}", self.host, offset, host);

            loop {
                let deadline = self.lock().detector.deadline(offset);
                if let Some(deadline) = deadline {
                    tokio::select! {
                        _ = time::sleep_until(deadline) => {}
                        _ = self.wakeups[offset - 1].notified() => {}
                    }
                }

                let mut out = Outbound::default();
                let verdict = {
                    let mut state = self.lock();
                    let state = &mut *state;
                    let verdict =
                        state
                            .detector
                            .settle(offset, Instant::now(), &state.ring, &self.host);
                    if let Verdict::Failed(failed) = &verdict {
                        self.declare_failed(state, failed, &mut out);
                    }
                    verdict
                };
                self.flush(out).await;

                if verdict != Verdict::Pending {
                    break;
                }
            }
        }
    }

    /// A watch expired: remove the host locally and start the flood.
    fn declare_failed(&self, state: &mut NodeState, host: &str, out: &mut Outbound) {
        tracing::warn!("{}: no ACK from {}, declaring it failed", self.host, host);
        out.events.push(ClusterEvent::FailureDeclared {
            host: host.to_string(),
        });
        let envelope = Envelope::new(host, EnvelopeKind::Failed);
        self.remove_member(state, &envelope, out);
    }
}
