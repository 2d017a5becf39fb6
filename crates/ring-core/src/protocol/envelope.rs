//! Wire types exchanged between nodes.
//!
//! Three message classes travel on three separate channels (one listening
//! port each):
//! - **Peer**: [`Envelope`] — membership events, heartbeats, file commands
//! - **Ring**: [`RingUpdate`] — Gateway pushes after a Join
//! - **Catalog**: [`CatalogSnapshot`] — Gateway pushes after any catalog change

use crate::{Member, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};

/// Listening channel a packet is delivered on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    /// Peer-to-peer envelopes
    Peer,
    /// Gateway ring updates
    Ring,
    /// Gateway catalog snapshots
    Catalog,
}

impl Channel {
    /// All channels, in listener start-up order.
    pub const ALL: [Channel; 3] = [Channel::Peer, Channel::Ring, Channel::Catalog];
}

impl Display for Channel {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Peer => "peer",
            Self::Ring => "ring",
            Self::Catalog => "catalog",
        };
        f.write_str(name)
    }
}

/// What an envelope asks the receiver to do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnvelopeKind {
    /// Request admission to the ring (sent to the Gateway)
    Join,
    /// Heartbeat probe; receiver replies [`EnvelopeKind::Ack`]
    Syn,
    /// Heartbeat reply
    Ack,
    /// Subject host left voluntarily
    Leave,
    /// Subject host was declared failed
    Failed,
    /// Sender stored a new file (sent to the Gateway)
    AddFile { file_name: String },
    /// Sender asks for a file to be deleted cluster-wide (sent to the Gateway)
    DelFile { file_name: String },
    /// Receiver must delete its local copy
    RemoveFile { file_name: String },
    /// Receiver must pull a copy of the file from `source` into its store
    ReplicateFile { file_name: String, source: String },
}

impl EnvelopeKind {
    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Join => "Join",
            Self::Syn => "SYN",
            Self::Ack => "ACK",
            Self::Leave => "Leave",
            Self::Failed => "Failed",
            Self::AddFile { .. } => "AddFile",
            Self::DelFile { .. } => "DelFile",
            Self::RemoveFile { .. } => "RemoveFile",
            Self::ReplicateFile { .. } => "ReplicateFile",
        }
    }

    /// Whether loss injection applies to this kind.
    pub fn is_lossy(&self) -> bool {
        matches!(self, Self::Syn | Self::Ack | Self::Leave | Self::Failed)
    }
}

/// Peer channel message.
///
/// `host` is the sender for every kind except Leave and Failed, where it is
/// the subject host. Leave/Failed envelopes are forwarded unchanged, so the
/// subject travels with the flood.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub host: String,
    pub timestamp: Timestamp,
    pub kind: EnvelopeKind,
}

impl Envelope {
    /// Create an envelope stamped with the current time.
    pub fn new(host: impl Into<String>, kind: EnvelopeKind) -> Self {
        Self::at(host, Timestamp::now(), kind)
    }

    /// Create an envelope with an explicit timestamp.
    pub fn at(host: impl Into<String>, timestamp: Timestamp, kind: EnvelopeKind) -> Self {
        Self {
            host: host.into(),
            timestamp,
            kind,
        }
    }

    /// File name carried by file commands.
    pub fn file_name(&self) -> Option<&str> {
        match &self.kind {
            EnvelopeKind::AddFile { file_name }
            | EnvelopeKind::DelFile { file_name }
            | EnvelopeKind::RemoveFile { file_name }
            | EnvelopeKind::ReplicateFile { file_name, .. } => Some(file_name),
            _ => None,
        }
    }
}

impl Display for Envelope {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} @ {}", self.kind.name(), self.host, self.timestamp)?;
        if let Some(name) = self.file_name() {
            write!(f, " file={}", name)?;
        }
        Ok(())
    }
}

/// Ring channel message pushed by the Gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RingUpdate {
    /// A single newly admitted member (sent to existing members)
    Added(Member),
    /// The full ring in Gateway order (sent to the joiner)
    Snapshot(Vec<Member>),
}

/// Catalog channel message: the Gateway's full file catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    /// File name → replica hosts, in placement order
    pub files: BTreeMap<String, Vec<String>>,
}

/// Anything that travels between nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Packet {
    Peer(Envelope),
    Ring(RingUpdate),
    Catalog(CatalogSnapshot),
}

impl Packet {
    /// Channel this packet is delivered on.
    pub fn channel(&self) -> Channel {
        match self {
            Self::Peer(_) => Channel::Peer,
            Self::Ring(_) => Channel::Ring,
            Self::Catalog(_) => Channel::Catalog,
        }
    }

    /// Whether loss injection applies to this packet.
    pub fn is_lossy(&self) -> bool {
        match self {
            Self::Peer(envelope) => envelope.kind.is_lossy(),
            Self::Ring(_) | Self::Catalog(_) => false,
        }
    }
}

impl From<Envelope> for Packet {
    fn from(envelope: Envelope) -> Self {
        Self::Peer(envelope)
    }
}

impl From<RingUpdate> for Packet {
    fn from(update: RingUpdate) -> Self {
        Self::Ring(update)
    }
}

impl From<CatalogSnapshot> for Packet {
    fn from(snapshot: CatalogSnapshot) -> Self {
        Self::Catalog(snapshot)
    }
}
