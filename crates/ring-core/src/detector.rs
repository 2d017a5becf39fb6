//! Successor-based failure detection.
//!
//! Each node watches its three ring successors, one slot per offset:
//! 1. The slot is armed for whichever host currently sits at its offset
//! 2. Every ACK from that host pushes the slot's deadline forward
//! 3. If the deadline passes, the slot fires and the host is declared failed
//!
//! Only one slot fires per incident. A genuine expiry suppresses the sibling
//! slots, and any ring change suppresses every armed slot so it re-arms
//! against the new successor list.
//!
//! The detector is a pure state machine. The node's watch tasks call into it
//! under the node lock and do the sleeping themselves.

use crate::ring::{MembershipRing, MONITORED_SUCCESSORS};
use std::time::Duration;
use tokio::time::Instant;

/// Configuration for failure detection.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Silence after which an armed successor is declared failed (default: 2.5s)
    pub ack_timeout: Duration,
    /// How often SYNs go out to the successors (default: 1s)
    pub heartbeat_interval: Duration,
    /// Below this many members no probing happens (default: 4)
    pub min_ring_size: usize,
    /// How often an idle watch re-checks the ring size (default: 100ms)
    pub idle_poll: Duration,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_millis(2500),
            heartbeat_interval: Duration::from_secs(1),
            min_ring_size: 4,
            idle_poll: Duration::from_millis(100),
        }
    }
}

/// State of one monitored offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotState {
    /// Not watching anyone
    Idle,
    /// Waiting for `host` to prove it is alive before `deadline`
    Armed { host: String, deadline: Instant },
    /// `host` was declared failed by this slot
    Fired { host: String },
    /// Armed, then cancelled by a ring change or a sibling firing
    Suppressed,
}

/// Outcome of settling a slot after its watch wakes up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Deadline not reached yet (an ACK moved it)
    Pending,
    /// The slot was cancelled; re-arm
    Suppressed,
    /// The deadline passed but the ring no longer matches; re-arm
    Stale,
    /// Declare this host failed
    Failed(String),
}

/// Per-offset failure detector for the three monitored successors.
#[derive(Debug)]
pub struct FailureDetector {
    config: DetectorConfig,
    slots: [SlotState; MONITORED_SUCCESSORS],
}

impl FailureDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            slots: std::array::from_fn(|_| SlotState::Idle),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(DetectorConfig::default())
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Current state of the slot for `offset` (1-based).
    pub fn slot(&self, offset: usize) -> Option<&SlotState> {
        offset.checked_sub(1).and_then(|ix| self.slots.get(ix))
    }

    fn slot_mut(&mut self, offset: usize) -> Option<&mut SlotState> {
        offset.checked_sub(1).and_then(|ix| self.slots.get_mut(ix))
    }

    /// Whether the ring is large enough to probe.
    pub fn is_active(&self, ring: &MembershipRing) -> bool {
        ring.len() >= self.config.min_ring_size
    }

    /// Arm `offset` to watch `host`, replacing whatever the slot held.
    pub fn arm(&mut self, offset: usize, host: impl Into<String>, now: Instant) {
        let deadline = now + self.config.ack_timeout;
        if let Some(slot) = self.slot_mut(offset) {
            *slot = SlotState::Armed {
                host: host.into(),
                deadline,
            };
        }
    }

    /// Deadline of an armed slot.
    pub fn deadline(&self, offset: usize) -> Option<Instant> {
        match self.slot(offset)? {
            SlotState::Armed { deadline, .. } => Some(*deadline),
            _ => None,
        }
    }

    /// Record an ACK from `host`: every slot armed for it gets a fresh deadline.
    ///
    /// Returns whether any slot was watching `host`.
    pub fn ack(&mut self, host: &str, now: Instant) -> bool {
        let fresh = now + self.config.ack_timeout;
        let mut matched = false;
        for slot in &mut self.slots {
            if let SlotState::Armed {
                host: armed,
                deadline,
            } = slot
            {
                if armed == host {
                    *deadline = fresh;
                    matched = true;
                }
            }
        }
        matched
    }

    /// Cancel every armed slot. Returns the offsets that changed.
    pub fn suppress_all(&mut self) -> Vec<usize> {
        self.suppress_where(|_| true)
    }

    fn suppress_where(&mut self, pick: impl Fn(usize) -> bool) -> Vec<usize> {
        let mut changed = Vec::new();
        for (ix, slot) in self.slots.iter_mut().enumerate() {
            let offset = ix + 1;
            if pick(offset) && matches!(slot, SlotState::Armed { .. }) {
                *slot = SlotState::Suppressed;
                changed.push(offset);
            }
        }
        changed
    }

    /// Decide what a woken watch should do.
    ///
    /// A genuine expiry suppresses every sibling slot, whether or not the
    /// armed host is still the successor at this offset.
    pub fn settle(
        &mut self,
        offset: usize,
        now: Instant,
        ring: &MembershipRing,
        self_host: &str,
    ) -> Verdict {
        let active = self.is_active(ring);
        let Some(slot) = self.slot_mut(offset) else {
            return Verdict::Stale;
        };

        match slot {
            SlotState::Suppressed => {
                *slot = SlotState::Idle;
                Verdict::Suppressed
            }
            SlotState::Armed { deadline, .. } if *deadline > now => Verdict::Pending,
            SlotState::Armed { host, .. } => {
                let host = std::mem::take(host);
                let still_there = active && ring.successor(self_host, offset) == Some(host.as_str());
                *slot = if still_there {
                    SlotState::Fired { host: host.clone() }
                } else {
                    SlotState::Idle
                };
                self.suppress_where(|other| other != offset);
                if still_there {
                    Verdict::Failed(host)
                } else {
                    Verdict::Stale
                }
            }
            SlotState::Idle | SlotState::Fired { .. } => Verdict::Stale,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Member, Timestamp};

    fn ring_of(hosts: &[&str]) -> MembershipRing {
        MembershipRing::from_members(
            hosts
                .iter()
                .enumerate()
                .map(|(i, h)| Member::new(*h, Timestamp::from_micros(i as u64 + 1)))
                .collect(),
        )
    }

    fn timeout() -> Duration {
        DetectorConfig::default().ack_timeout
    }

    // ==================== Arming and ACKs ====================

    #[test]
    fn test_arm_sets_deadline() {
        let mut det = FailureDetector::with_defaults();
        let now = Instant::now();

        det.arm(1, "b", now);

        assert_eq!(det.deadline(1), Some(now + timeout()));
        assert_eq!(det.deadline(2), None);
    }

    #[test]
    fn test_ack_extends_matching_slot() {
        let mut det = FailureDetector::with_defaults();
        let start = Instant::now();
        det.arm(1, "b", start);
        det.arm(2, "c", start);

        let later = start + Duration::from_secs(1);
        assert!(det.ack("b", later));
        assert!(!det.ack("zz", later));

        assert_eq!(det.deadline(1), Some(later + timeout()));
        assert_eq!(det.deadline(2), Some(start + timeout()));
    }

    #[test]
    fn test_out_of_range_offset_ignored() {
        let mut det = FailureDetector::with_defaults();
        det.arm(0, "x", Instant::now());
        det.arm(4, "x", Instant::now());
        assert!(det.slot(0).is_none());
        assert!(det.slot(4).is_none());
    }

    // ==================== Settling ====================

    #[test]
    fn test_expiry_fires_once_and_suppresses_siblings() {
        let ring = ring_of(&["a", "b", "c", "d"]);
        let mut det = FailureDetector::with_defaults();
        let start = Instant::now();
        det.arm(1, "b", start);
        det.arm(2, "c", start);
        det.arm(3, "d", start);

        let expired = start + timeout() + Duration::from_millis(1);
        assert_eq!(
            det.settle(1, expired, &ring, "a"),
            Verdict::Failed("b".into())
        );
        assert_eq!(det.slot(1), Some(&SlotState::Fired { host: "b".into() }));

        // Siblings expired at the same instant, but they lost the race
        assert_eq!(det.settle(2, expired, &ring, "a"), Verdict::Suppressed);
        assert_eq!(det.settle(3, expired, &ring, "a"), Verdict::Suppressed);
        assert_eq!(det.slot(2), Some(&SlotState::Idle));

        // Settling the fired slot again never yields a second declaration
        assert_eq!(det.settle(1, expired, &ring, "a"), Verdict::Stale);
    }

    #[test]
    fn test_pending_before_deadline() {
        let ring = ring_of(&["a", "b", "c", "d"]);
        let mut det = FailureDetector::with_defaults();
        let start = Instant::now();
        det.arm(1, "b", start);

        let early = start + Duration::from_millis(100);
        assert_eq!(det.settle(1, early, &ring, "a"), Verdict::Pending);
    }

    #[test]
    fn test_expiry_after_ring_shift_is_stale() {
        let mut ring = ring_of(&["a", "b", "c", "d", "e"]);
        let mut det = FailureDetector::with_defaults();
        let start = Instant::now();
        det.arm(2, "c", start);

        // b leaves; c is now at offset 1, not 2
        ring.remove("b");

        let expired = start + timeout() * 2;
        assert_eq!(det.settle(2, expired, &ring, "a"), Verdict::Stale);
        assert_eq!(det.slot(2), Some(&SlotState::Idle));
    }

    #[test]
    fn test_expiry_below_min_ring_size_is_stale() {
        let ring = ring_of(&["a", "b", "c"]);
        let mut det = FailureDetector::with_defaults();
        let start = Instant::now();
        det.arm(1, "b", start);

        let expired = start + timeout() * 2;
        assert_eq!(det.settle(1, expired, &ring, "a"), Verdict::Stale);
    }

    #[test]
    fn test_suppress_all_only_touches_armed() {
        let ring = ring_of(&["a", "b", "c", "d"]);
        let mut det = FailureDetector::with_defaults();
        let start = Instant::now();
        det.arm(1, "b", start);
        det.arm(3, "d", start);

        assert_eq!(det.suppress_all(), vec![1, 3]);
        assert_eq!(det.slot(2), Some(&SlotState::Idle));
        assert_eq!(det.settle(1, start, &ring, "a"), Verdict::Suppressed);
    }

    #[test]
    fn test_rearm_clears_fired() {
        let ring = ring_of(&["a", "b", "c", "d"]);
        let mut det = FailureDetector::with_defaults();
        let start = Instant::now();
        det.arm(1, "b", start);
        let expired = start + timeout() * 2;
        assert!(matches!(det.settle(1, expired, &ring, "a"), Verdict::Failed(_)));

        det.arm(1, "c", expired);
        assert!(matches!(det.slot(1), Some(SlotState::Armed { host, .. }) if host == "c"));
    }
}
