//! ring-core: Ring membership and replicated file catalog.
//!
//! This crate provides the core functionality for:
//! - Maintaining a ring-ordered membership list under churn
//! - Detecting failed successors with heartbeats and timeouts
//! - Flooding Join/Leave/Failed events with deduplication
//! - Placing and re-replicating files on owner + two successors
//! - Transport, FileTransport and FileStore trait abstractions

pub mod catalog;
pub mod config;
pub mod detector;
pub mod dissemination;
pub mod events;
pub mod file_transport;
pub mod node;
pub mod protocol;
pub mod ring;
pub mod store;
pub mod timestamp;
pub mod transport;

pub use catalog::{FileCatalog, FileRecord, ReplicationOrder, REPLICA_COUNT};
pub use config::{ConfigError, NodeConfig, PortConfig};
pub use detector::{DetectorConfig, FailureDetector, SlotState, Verdict};
pub use events::{ClusterEvent, EventBus, RemovalReason, Subscription};
pub use file_transport::{FileTransport, FileTransportError, MemoryFileNetwork, MemoryFileTransport};
pub use node::{AddOutcome, Node, NodeError};
pub use protocol::{CatalogSnapshot, Channel, Envelope, EnvelopeKind, Packet, RingUpdate};
pub use ring::{InsertOutcome, Member, MembershipRing, MONITORED_SUCCESSORS};
pub use store::{FileStore, InMemoryStore, StoreError};
pub use timestamp::{Timestamp, TimestampError};
pub use transport::{
    Inbox, LossControl, LossyTransport, MemoryNetwork, MemoryTransport, Transport, TransportError,
};
