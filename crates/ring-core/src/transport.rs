//! Transport trait for sending packets between ring nodes.
//!
//! Implementations:
//! - `UdpTransport` (in ring-daemon) - One datagram per packet, one port per channel
//! - `MemoryTransport` - In-process network for tests, with host isolation
//! - `LossyTransport` - Wraps any transport and drops heartbeat/membership packets
//!
//! Sends are fire-and-forget: success means the packet left this node, not
//! that anyone received it.

use crate::protocol::{self, CodecError, Packet};
use async_trait::async_trait;
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Unknown host: {0}")]
    UnknownHost(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Outbound side of the node's network.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a packet to `host` on the packet's channel.
    async fn send(&self, host: &str, packet: Packet) -> Result<()>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send(&self, host: &str, packet: Packet) -> Result<()> {
        (**self).send(host, packet).await
    }
}

// ==================== Loss injection ====================

/// Shared, runtime-adjustable loss percentage (0-100).
#[derive(Debug, Clone, Default)]
pub struct LossControl(Arc<AtomicU8>);

impl LossControl {
    /// Create a control starting at `percent` (clamped to 100).
    pub fn new(percent: u8) -> Self {
        Self(Arc::new(AtomicU8::new(percent.min(100))))
    }

    /// Current loss percentage.
    pub fn percent(&self) -> u8 {
        self.0.load(Ordering::Relaxed)
    }

    /// Change the loss percentage (clamped to 100).
    pub fn set(&self, percent: u8) {
        self.0.store(percent.min(100), Ordering::Relaxed);
    }

    /// Roll the dice for one packet.
    pub fn should_drop(&self) -> bool {
        match self.percent() {
            0 => false,
            pct if pct >= 100 => true,
            pct => rand::rng().random_range(0..100u8) < pct,
        }
    }
}

/// Drops SYN, ACK, Leave and Failed packets with the configured probability.
///
/// Join, file commands, ring updates and catalog snapshots always go through.
/// A dropped packet still reports success, as a lost datagram would.
pub struct LossyTransport<T> {
    inner: T,
    loss: LossControl,
}

impl<T: Transport> LossyTransport<T> {
    pub fn new(inner: T, loss: LossControl) -> Self {
        Self { inner, loss }
    }

    /// Handle for changing the loss rate while running.
    pub fn loss(&self) -> &LossControl {
        &self.loss
    }
}

#[async_trait]
impl<T: Transport> Transport for LossyTransport<T> {
    async fn send(&self, host: &str, packet: Packet) -> Result<()> {
        if packet.is_lossy() && self.loss.should_drop() {
            tracing::debug!("Dropped packet to {} ({}% loss)", host, self.loss.percent());
            return Ok(());
        }
        self.inner.send(host, packet).await
    }
}

// ==================== In-memory network ====================

/// Receiving end handed to a node attached to a [`MemoryNetwork`].
pub type Inbox = mpsc::UnboundedReceiver<Packet>;

#[derive(Default)]
struct NetworkState {
    inboxes: HashMap<String, mpsc::UnboundedSender<Packet>>,
    isolated: HashSet<String>,
}

/// In-process network connecting [`MemoryTransport`]s.
///
/// Every packet is encoded and decoded on the way through, so size limits
/// and channel checks behave as they do on UDP.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a host, returning its transport and inbox.
    ///
    /// Re-attaching an existing host replaces its inbox.
    pub fn attach(&self, host: impl Into<String>) -> (MemoryTransport, Inbox) {
        let host = host.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.inboxes.insert(host.clone(), tx);
        state.isolated.remove(&host);
        drop(state);

        let transport = MemoryTransport {
            host,
            network: self.clone(),
        };
        (transport, rx)
    }

    /// Cut a host off: nothing it sends or is sent arrives.
    pub fn isolate(&self, host: &str) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.isolated.insert(host.to_string());
    }

    /// Reconnect an isolated host.
    pub fn heal(&self, host: &str) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.isolated.remove(host);
    }

    fn deliver(&self, from: &str, to: &str, packet: Packet) -> Result<()> {
        let bytes = protocol::encode(&packet)?;
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        let inbox = state
            .inboxes
            .get(to)
            .ok_or_else(|| TransportError::UnknownHost(to.to_string()))?;

        if state.isolated.contains(from) || state.isolated.contains(to) {
            tracing::trace!("Network partition: {} -> {} dropped", from, to);
            return Ok(());
        }

        let decoded = protocol::decode(packet.channel(), &bytes)?;
        if inbox.send(decoded).is_err() {
            tracing::trace!("Inbox for {} closed", to);
        }
        Ok(())
    }
}

/// One host's view of a [`MemoryNetwork`].
#[derive(Clone)]
pub struct MemoryTransport {
    host: String,
    network: MemoryNetwork,
}

impl MemoryTransport {
    /// Host this transport sends from.
    pub fn host(&self) -> &str {
        &self.host
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, host: &str, packet: Packet) -> Result<()> {
        self.network.deliver(&self.host, host, packet)
    }
}
