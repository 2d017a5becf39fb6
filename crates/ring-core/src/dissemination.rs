//! Flood dissemination of membership events.
//!
//! Join is handled only by the Gateway, which pushes ring updates out
//! directly. Leave and Failed flood hop by hop: every node that knows the
//! subject host applies the event (if it is newer than the recorded join)
//! and forwards it unchanged to its three successors.
//!
//! A flood stops at nodes where the subject is absent. Stale events, which
//! never remove anything, stop at nodes that already forwarded the identical
//! event, so every flood terminates.
//!
//! Everything here runs under the node lock and returns the sends to make
//! once the lock is released.

use crate::detector::FailureDetector;
use crate::protocol::{Envelope, EnvelopeKind, RingUpdate};
use crate::ring::{InsertOutcome, Member, MembershipRing, MONITORED_SUCCESSORS};
use crate::Timestamp;
use std::collections::{HashSet, VecDeque};

/// How many forwarded events a node remembers.
pub const FORWARD_LOG_CAPACITY: usize = 1024;

/// Identity of a forwarded Leave/Failed event.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct EventKey {
    failed: bool,
    host: String,
    timestamp: Timestamp,
}

impl EventKey {
    fn of(envelope: &Envelope) -> Self {
        Self {
            failed: matches!(envelope.kind, EnvelopeKind::Failed),
            host: envelope.host.clone(),
            timestamp: envelope.timestamp,
        }
    }
}

/// Bounded set of recently forwarded removal events.
#[derive(Debug)]
pub struct ForwardLog {
    order: VecDeque<EventKey>,
    seen: HashSet<EventKey>,
    capacity: usize,
}

impl Default for ForwardLog {
    fn default() -> Self {
        Self::with_capacity(FORWARD_LOG_CAPACITY)
    }
}

impl ForwardLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            order: VecDeque::new(),
            seen: HashSet::new(),
            capacity: capacity.max(1),
        }
    }

    /// Record an event. Returns false if it was already recorded.
    fn record(&mut self, key: EventKey) -> bool {
        if self.seen.contains(&key) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.seen.insert(key.clone());
        self.order.push_back(key);
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// What a Join did at the Gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinDecision {
    /// The host already has an equal or newer join on record
    Skipped,
    /// The host was admitted; push the ring updates
    Admitted {
        member: Member,
        /// Existing members to send `RingUpdate::Added` to
        notify: Vec<String>,
        /// Full ring to send to the joiner
        snapshot: Vec<Member>,
    },
}

/// Admit `joiner` at the Gateway.
pub fn apply_join(
    ring: &mut MembershipRing,
    detector: &mut FailureDetector,
    self_host: &str,
    joiner: &str,
    timestamp: Timestamp,
) -> JoinDecision {
    if ring.get(joiner).is_some_and(|m| m.joined_at >= timestamp) {
        return JoinDecision::Skipped;
    }

    let member = Member::new(joiner, timestamp);
    if ring.insert(member.clone()) == InsertOutcome::Stale {
        return JoinDecision::Skipped;
    }
    detector.suppress_all();

    let notify = ring
        .members()
        .iter()
        .filter(|m| m.host != self_host && m.host != joiner)
        .map(|m| m.host.clone())
        .collect();

    JoinDecision::Admitted {
        member,
        notify,
        snapshot: ring.members().to_vec(),
    }
}

/// Apply a ring update pushed by the Gateway. Returns whether the ring changed.
pub fn apply_ring_update(
    ring: &mut MembershipRing,
    detector: &mut FailureDetector,
    update: RingUpdate,
) -> bool {
    let changed = match update {
        RingUpdate::Added(member) => ring.insert(member) != InsertOutcome::Stale,
        RingUpdate::Snapshot(members) => {
            let before = ring.clone();
            ring.replace(members);
            *ring != before
        }
    };
    if changed {
        detector.suppress_all();
    }
    changed
}

/// Local effect of a Leave/Failed event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemovalOutcome {
    /// The subject was removed from the ring
    Applied(Member),
    /// The subject is present with a join at or after the event
    Stale,
    /// The subject is not in the ring
    Absent,
    /// The event names this node; nodes never remove themselves
    SelfTarget,
}

/// What to do with a Leave/Failed event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovalDecision {
    pub outcome: RemovalOutcome,
    /// Successors to forward the envelope to (empty: flood stops here)
    pub forward_to: Vec<String>,
}

/// Apply a Leave/Failed envelope and decide where to forward it.
pub fn apply_removal(
    ring: &mut MembershipRing,
    detector: &mut FailureDetector,
    log: &mut ForwardLog,
    self_host: &str,
    envelope: &Envelope,
) -> RemovalDecision {
    let subject = envelope.host.as_str();

    let outcome = if subject == self_host {
        RemovalOutcome::SelfTarget
    } else {
        match ring.get(subject).map(|m| m.joined_at) {
            None => RemovalOutcome::Absent,
            Some(joined_at) if envelope.timestamp <= joined_at => RemovalOutcome::Stale,
            Some(_) => match ring.remove(subject) {
                Some(member) => {
                    detector.suppress_all();
                    RemovalOutcome::Applied(member)
                }
                None => RemovalOutcome::Absent,
            },
        }
    };

    let forward_to = match outcome {
        RemovalOutcome::Absent => Vec::new(),
        _ if !log.record(EventKey::of(envelope)) => Vec::new(),
        _ => ring
            .successors(self_host, MONITORED_SUCCESSORS)
            .into_iter()
            .filter(|host| host != subject)
            .collect(),
    };

    RemovalDecision {
        outcome,
        forward_to,
    }
}
