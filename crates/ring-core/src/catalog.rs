//! File catalog: which hosts hold a replica of each file.
//!
//! The Gateway owns the authoritative catalog and pushes a full snapshot to
//! every member after each change. Other nodes keep the last snapshot as a
//! read-only cache.
//!
//! Placement is fixed at write time: the adding node plus its two ring
//! successors. When a replica holder leaves or fails, the Gateway picks the
//! next host along the ring and orders a surviving holder to copy the file
//! there.

use crate::protocol::CatalogSnapshot;
use crate::ring::MembershipRing;
use std::collections::BTreeMap;

/// Number of hosts holding each file.
pub const REPLICA_COUNT: usize = 3;

/// Replica placement for one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub name: String,
    /// Replica hosts, owner first
    pub replicas: Vec<String>,
}

impl FileRecord {
    pub fn new(name: impl Into<String>, replicas: Vec<String>) -> Self {
        Self {
            name: name.into(),
            replicas,
        }
    }

    /// Check if `host` holds a replica.
    pub fn is_held_by(&self, host: &str) -> bool {
        self.replicas.iter().any(|h| h == host)
    }
}

/// An instruction for `target` to fetch `file` from `source`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationOrder {
    pub file: String,
    pub source: String,
    pub target: String,
}

/// Replica hosts for a file added by `owner`: the owner and its two successors.
///
/// Returns just the owner if it is not in the ring.
pub fn placement(ring: &MembershipRing, owner: &str) -> Vec<String> {
    let mut replicas = vec![owner.to_string()];
    replicas.extend(ring.successors(owner, REPLICA_COUNT - 1));
    replicas
}

/// Map of file name to replica record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileCatalog {
    records: BTreeMap<String, FileRecord>,
}

impl FileCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&FileRecord> {
        self.records.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.records.contains_key(name)
    }

    /// All file names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.records.keys().cloned().collect()
    }

    /// Records, sorted by name.
    pub fn records(&self) -> impl Iterator<Item = &FileRecord> {
        self.records.values()
    }

    /// Insert a record. Returns false (and changes nothing) if the name exists.
    pub fn insert(&mut self, record: FileRecord) -> bool {
        if self.records.contains_key(&record.name) {
            return false;
        }
        self.records.insert(record.name.clone(), record);
        true
    }

    pub fn remove(&mut self, name: &str) -> Option<FileRecord> {
        self.records.remove(name)
    }

    /// Names of files `host` is listed as holding.
    pub fn held_by(&self, host: &str) -> Vec<String> {
        self.records
            .values()
            .filter(|r| r.is_held_by(host))
            .map(|r| r.name.clone())
            .collect()
    }

    /// Drop `removed` from every record and pick a replacement replica.
    ///
    /// For each affected record the walk starts at the last surviving replica
    /// that is still in the ring and takes the first ring successor not
    /// already holding the file. The first surviving replica is told to copy.
    /// Records with no surviving replica are dropped, since no copy is left.
    pub fn rereplicate(&mut self, removed: &str, ring: &MembershipRing) -> Vec<ReplicationOrder> {
        let mut orders = Vec::new();
        let mut lost = Vec::new();

        for record in self.records.values_mut() {
            if !record.is_held_by(removed) {
                continue;
            }
            record.replicas.retain(|h| h != removed);

            let Some(source) = record.replicas.first().cloned() else {
                lost.push(record.name.clone());
                continue;
            };

            let target = record
                .replicas
                .iter()
                .rev()
                .find(|h| ring.contains(h))
                .and_then(|start| ring.next_excluding(start, &record.replicas))
                .map(str::to_string);

            match target {
                Some(target) => {
                    record.replicas.push(target.clone());
                    orders.push(ReplicationOrder {
                        file: record.name.clone(),
                        source,
                        target,
                    });
                }
                None => {
                    tracing::warn!(
                        "No replacement replica for {} (ring has {} members)",
                        record.name,
                        ring.len()
                    );
                }
            }
        }

        for name in lost {
            tracing::error!("Lost last replica of {} with {}", name, removed);
            self.records.remove(&name);
        }

        orders
    }

    /// Build the wire snapshot.
    pub fn snapshot(&self) -> CatalogSnapshot {
        CatalogSnapshot {
            files: self
                .records
                .values()
                .map(|r| (r.name.clone(), r.replicas.clone()))
                .collect(),
        }
    }

    /// Replace the whole catalog with a received snapshot.
    pub fn replace(&mut self, snapshot: CatalogSnapshot) {
        self.records = snapshot
            .files
            .into_iter()
            .map(|(name, replicas)| (name.clone(), FileRecord::new(name, replicas)))
            .collect();
    }
}

impl From<CatalogSnapshot> for FileCatalog {
    fn from(snapshot: CatalogSnapshot) -> Self {
        let mut catalog = Self::new();
        catalog.replace(snapshot);
        catalog
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

    fn hosts(list: &[&str]) -> Vec<String> {
        list.iter().map(|h| h.to_string()).collect()
    }

    // ==================== Placement ====================

    #[test]
    fn test_placement_owner_and_two_successors() {
        let ring = ring_of(&["h", "b", "c", "d"]);
        assert_eq!(placement(&ring, "h"), hosts(&["h", "b", "c"]));
        assert_eq!(placement(&ring, "c"), hosts(&["c", "d", "h"]));
    }

    #[test]
    fn test_placement_small_ring() {
        let ring = ring_of(&["h", "b"]);
        assert_eq!(placement(&ring, "h"), hosts(&["h", "b"]));

        let ring = ring_of(&["h"]);
        assert_eq!(placement(&ring, "h"), hosts(&["h"]));
    }

    #[test]
    fn test_insert_rejects_duplicate() {
        let mut catalog = FileCatalog::new();
        assert!(catalog.insert(FileRecord::new("f1", hosts(&["a"]))));
        assert!(!catalog.insert(FileRecord::new("f1", hosts(&["b"]))));
        assert_eq!(catalog.get("f1").unwrap().replicas, hosts(&["a"]));
    }

    // ==================== Re-replication ====================

    #[test]
    fn test_rereplicate_after_failure() {
        let mut ring = ring_of(&["h", "b", "c", "d"]);
        let mut catalog = FileCatalog::new();
        catalog.insert(FileRecord::new("f1", placement(&ring, "h")));

        ring.remove("b");
        let orders = catalog.rereplicate("b", &ring);

        assert_eq!(catalog.get("f1").unwrap().replicas, hosts(&["h", "c", "d"]));
        assert_eq!(
            orders,
            vec![ReplicationOrder {
                file: "f1".into(),
                source: "h".into(),
                target: "d".into(),
            }]
        );
    }

    #[test]
    fn test_rereplicate_wraps_around() {
        let mut ring = ring_of(&["a", "b", "c", "d", "e"]);
        let mut catalog = FileCatalog::new();
        catalog.insert(FileRecord::new("f", hosts(&["d", "e", "a"])));

        ring.remove("e");
        let orders = catalog.rereplicate("e", &ring);

        assert_eq!(catalog.get("f").unwrap().replicas, hosts(&["d", "a", "b"]));
        assert_eq!(orders[0].source, "d");
        assert_eq!(orders[0].target, "b");
    }

    #[test]
    fn test_rereplicate_untouched_records() {
        let ring = ring_of(&["a", "b", "c", "d"]);
        let mut catalog = FileCatalog::new();
        catalog.insert(FileRecord::new("f", hosts(&["a", "b", "c"])));

        assert!(catalog.rereplicate("d", &ring).is_empty());
        assert_eq!(catalog.get("f").unwrap().replicas, hosts(&["a", "b", "c"]));
    }

    #[test]
    fn test_rereplicate_no_candidate() {
        let mut ring = ring_of(&["a", "b", "c"]);
        let mut catalog = FileCatalog::new();
        catalog.insert(FileRecord::new("f", hosts(&["a", "b", "c"])));

        ring.remove("c");
        let orders = catalog.rereplicate("c", &ring);

        assert!(orders.is_empty());
        assert_eq!(catalog.get("f").unwrap().replicas, hosts(&["a", "b"]));
    }

    #[test]
    fn test_rereplicate_drops_lost_file() {
        let ring = ring_of(&["b", "c"]);
        let mut catalog = FileCatalog::new();
        catalog.insert(FileRecord::new("f", hosts(&["a"])));

        assert!(catalog.rereplicate("a", &ring).is_empty());
        assert!(!catalog.contains("f"));
    }

    // ==================== Snapshots ====================

    #[test]
    fn test_snapshot_replaces_cache() {
        let mut gateway = FileCatalog::new();
        gateway.insert(FileRecord::new("x", hosts(&["a", "b", "c"])));
        gateway.insert(FileRecord::new("y", hosts(&["b", "c", "d"])));

        let mut cache = FileCatalog::new();
        cache.insert(FileRecord::new("stale", hosts(&["z"])));
        cache.replace(gateway.snapshot());

        assert_eq!(cache, gateway);
        assert_eq!(cache.names(), vec!["x", "y"]);
        assert_eq!(cache.held_by("d"), vec!["y"]);
        assert_eq!(cache.held_by("b"), vec!["x", "y"]);
    }
}
