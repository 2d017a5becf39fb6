//! Membership ring: the ordered list of cluster members.
//!
//! Ring order is insertion order as observed by the Gateway. Every node
//! derives its failure-detection targets, its forwarding targets, and file
//! replica placement from its position in this list:
//! - `successor(self, k)` is the member `k` places ahead, modulo ring length
//! - Removing a member compacts the list, shifting later members down
//!
//! The ring is a plain value. Callers own it inside the node's locked state.

use crate::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// Number of successors each node monitors and forwards to.
pub const MONITORED_SUCCESSORS: usize = 3;

/// A member of the ring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    /// Host identifier (address other nodes use to reach this member)
    pub host: String,
    /// When the Gateway admitted this member
    pub joined_at: Timestamp,
}

impl Member {
    /// Create a new member.
    pub fn new(host: impl Into<String>, joined_at: Timestamp) -> Self {
        Self {
            host: host.into(),
            joined_at,
        }
    }
}

impl Display for Member {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} (joined {})", self.host, self.joined_at)
    }
}

/// Result of inserting a member into the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Appended at the end of the ring
    Inserted,
    /// Host already present; its timestamp was refreshed in place
    Refreshed,
    /// Host already present with a newer-or-equal timestamp; nothing changed
    Stale,
}

/// Ordered membership list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipRing {
    members: Vec<Member>,
}

impl MembershipRing {
    /// Create an empty ring.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a ring containing only the given member.
    pub fn with_member(member: Member) -> Self {
        Self {
            members: vec![member],
        }
    }

    /// Create a ring from an ordered member list, dropping duplicate hosts.
    pub fn from_members(members: Vec<Member>) -> Self {
        let mut ring = Self::new();
        for member in members {
            if !ring.contains(&member.host) {
                ring.members.push(member);
            }
        }
        ring
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Check if the ring is empty.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Members in ring order.
    pub fn members(&self) -> &[Member] {
        &self.members
    }

    /// Hosts in ring order.
    pub fn hosts(&self) -> Vec<String> {
        self.members.iter().map(|m| m.host.clone()).collect()
    }

    /// Ring position of a host.
    pub fn index_of(&self, host: &str) -> Option<usize> {
        self.members.iter().position(|m| m.host == host)
    }

    /// Check if a host is in the ring.
    pub fn contains(&self, host: &str) -> bool {
        self.index_of(host).is_some()
    }

    /// Get a member by host.
    pub fn get(&self, host: &str) -> Option<&Member> {
        self.members.iter().find(|m| m.host == host)
    }

    /// Host at ring-relative offset `k` from `self_host`.
    ///
    /// Returns None when `self_host` is not in the ring or when the ring is
    /// too small for offset `k` to name a member other than `self_host`.
    pub fn successor(&self, self_host: &str, k: usize) -> Option<&str> {
        let len = self.members.len();
        if k == 0 || len <= k {
            return None;
        }
        let ix = self.index_of(self_host)?;
        Some(self.members[(ix + k) % len].host.as_str())
    }

    /// Up to `n` distinct successors of `self_host`, nearest first.
    pub fn successors(&self, self_host: &str, n: usize) -> Vec<String> {
        (1..=n)
            .filter_map(|k| self.successor(self_host, k))
            .map(str::to_string)
            .collect()
    }

    /// Up to `n` distinct predecessors of `self_host`, nearest first.
    pub fn predecessors(&self, self_host: &str, n: usize) -> Vec<String> {
        let len = self.members.len();
        let Some(ix) = self.index_of(self_host) else {
            return Vec::new();
        };
        (1..=n.min(len.saturating_sub(1)))
            .map(|k| self.members[(ix + len - k) % len].host.clone())
            .collect()
    }

    /// First ring successor of `from` that is not in `exclude`.
    ///
    /// Walks the whole ring at most once. Returns None if every other member
    /// is excluded or `from` is not in the ring.
    pub fn next_excluding(&self, from: &str, exclude: &[String]) -> Option<&str> {
        let len = self.members.len();
        let ix = self.index_of(from)?;
        (1..len)
            .map(|k| self.members[(ix + k) % len].host.as_str())
            .find(|host| !exclude.iter().any(|e| e == host))
    }

    /// Insert a member, appending if its host is new.
    ///
    /// An existing host keeps its ring position; its timestamp is replaced
    /// only if the new one is strictly newer.
    pub fn insert(&mut self, member: Member) -> InsertOutcome {
        if let Some(existing) = self.members.iter_mut().find(|m| m.host == member.host) {
            if member.joined_at > existing.joined_at {
                existing.joined_at = member.joined_at;
                InsertOutcome::Refreshed
            } else {
                InsertOutcome::Stale
            }
        } else {
            self.members.push(member);
            InsertOutcome::Inserted
        }
    }

    /// Remove the first member whose host matches.
    ///
    /// Returns the removed member if it existed.
    pub fn remove(&mut self, host: &str) -> Option<Member> {
        let ix = self.index_of(host)?;
        Some(self.members.remove(ix))
    }

    /// Replace the whole ring with a snapshot.
    pub fn replace(&mut self, members: Vec<Member>) {
        *self = Self::from_members(members);
    }
}

impl Display for MembershipRing {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for (ix, member) in self.members.iter().enumerate() {
            writeln!(f, "{:>3}  {}", ix, member)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(micros: u64) -> Timestamp {
        Timestamp::from_micros(micros)
    }

    fn ring_of(hosts: &[&str]) -> MembershipRing {
        MembershipRing::from_members(
            hosts
                .iter()
                .enumerate()
                .map(|(i, h)| Member::new(*h, ts(i as u64 + 1)))
                .collect(),
        )
    }

    // ==================== Successor lookup ====================

    #[test]
    fn test_successor_wraps() {
        let ring = ring_of(&["a", "b", "c", "d"]);

        assert_eq!(ring.successor("a", 1), Some("b"));
        assert_eq!(ring.successor("c", 1), Some("d"));
        assert_eq!(ring.successor("c", 2), Some("a"));
        assert_eq!(ring.successor("d", 3), Some("c"));
    }

    #[test]
    fn test_successor_undefined_for_small_ring() {
        let ring = ring_of(&["a", "b", "c"]);

        assert_eq!(ring.successor("a", 2), Some("c"));
        assert_eq!(ring.successor("a", 3), None);
        assert_eq!(ring.successor("a", 0), None);
    }

    #[test]
    fn test_successor_of_unknown_host() {
        let ring = ring_of(&["a", "b", "c", "d"]);
        assert_eq!(ring.successor("z", 1), None);
    }

    #[test]
    fn test_successors_distinct() {
        let ring = ring_of(&["a", "b"]);
        assert_eq!(ring.successors("a", 3), vec!["b".to_string()]);

        let ring = ring_of(&["a", "b", "c", "d", "e"]);
        assert_eq!(ring.successors("d", 3), vec!["e", "a", "b"]);
    }

    #[test]
    fn test_predecessors() {
        let ring = ring_of(&["a", "b", "c", "d", "e"]);
        assert_eq!(ring.predecessors("b", 3), vec!["a", "e", "d"]);

        let ring = ring_of(&["a", "b"]);
        assert_eq!(ring.predecessors("a", 3), vec!["b"]);

        let ring = ring_of(&["a"]);
        assert!(ring.predecessors("a", 3).is_empty());
    }

    #[test]
    fn test_next_excluding() {
        let ring = ring_of(&["h", "c", "d"]);
        let set = vec!["h".to_string(), "c".to_string()];

        assert_eq!(ring.next_excluding("c", &set), Some("d"));

        let everyone = ring.hosts();
        assert_eq!(ring.next_excluding("c", &everyone), None);
    }

    // ==================== Mutation ====================

    #[test]
    fn test_insert_appends() {
        let mut ring = ring_of(&["a"]);
        let outcome = ring.insert(Member::new("b", ts(10)));

        assert_eq!(outcome, InsertOutcome::Inserted);
        assert_eq!(ring.hosts(), vec!["a", "b"]);
    }

    #[test]
    fn test_insert_existing_keeps_position() {
        let mut ring = ring_of(&["a", "b", "c"]);

        assert_eq!(ring.insert(Member::new("a", ts(100))), InsertOutcome::Refreshed);
        assert_eq!(ring.hosts(), vec!["a", "b", "c"]);
        assert_eq!(ring.get("a").unwrap().joined_at, ts(100));

        assert_eq!(ring.insert(Member::new("a", ts(100))), InsertOutcome::Stale);
        assert_eq!(ring.insert(Member::new("a", ts(50))), InsertOutcome::Stale);
        assert_eq!(ring.len(), 3);
    }

    #[test]
    fn test_remove_shifts_later_members() {
        let mut ring = ring_of(&["a", "b", "c", "d"]);

        let removed = ring.remove("b").unwrap();
        assert_eq!(removed.host, "b");
        assert_eq!(ring.hosts(), vec!["a", "c", "d"]);
        assert_eq!(ring.successor("a", 1), Some("c"));

        assert!(ring.remove("b").is_none());
        assert_eq!(ring.len(), 3);
    }

    #[test]
    fn test_from_members_drops_duplicates() {
        let ring = MembershipRing::from_members(vec![
            Member::new("a", ts(1)),
            Member::new("b", ts(2)),
            Member::new("a", ts(3)),
        ]);
        assert_eq!(ring.hosts(), vec!["a", "b"]);
        assert_eq!(ring.get("a").unwrap().joined_at, ts(1));
    }

    #[test]
    fn test_replace() {
        let mut ring = ring_of(&["x"]);
        ring.replace(vec![Member::new("a", ts(1)), Member::new("x", ts(2))]);
        assert_eq!(ring.hosts(), vec!["a", "x"]);
    }
}
