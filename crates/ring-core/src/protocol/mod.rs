//! Wire protocol for ring nodes.
//!
//! - Envelope, ring update and catalog snapshot types
//! - Bincode codec bounded by the UDP datagram size

pub mod codec;
pub mod envelope;

pub use codec::{decode, encode, CodecError, MAX_DATAGRAM_SIZE};
pub use envelope::{CatalogSnapshot, Channel, Envelope, EnvelopeKind, Packet, RingUpdate};
