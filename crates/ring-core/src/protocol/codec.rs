//! Bincode codec for [`Packet`]s.
//!
//! Every packet travels as one datagram, so an encoded packet must fit in a
//! single UDP payload. The decoder checks the packet arrived on the channel
//! its variant belongs to.

use super::envelope::{Channel, Packet};
use thiserror::Error;

/// Largest payload a single UDP datagram can carry over IPv4.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Encode failed: {0}")]
    Encode(String),

    #[error("Decode failed: {0}")]
    Decode(String),

    #[error("Packet too large: {size} bytes (max {MAX_DATAGRAM_SIZE})")]
    TooLarge { size: usize },

    #[error("Packet for {actual} channel received on {expected} channel")]
    WrongChannel { expected: Channel, actual: Channel },
}

pub type Result<T> = std::result::Result<T, CodecError>;

/// Encode a packet into a single datagram.
pub fn encode(packet: &Packet) -> Result<Vec<u8>> {
    let bytes = bincode::serialize(packet).map_err(|e| CodecError::Encode(e.to_string()))?;
    if bytes.len() > MAX_DATAGRAM_SIZE {
        return Err(CodecError::TooLarge { size: bytes.len() });
    }
    Ok(bytes)
}

/// Decode a datagram received on `channel`.
pub fn decode(channel: Channel, data: &[u8]) -> Result<Packet> {
    if data.len() > MAX_DATAGRAM_SIZE {
        return Err(CodecError::TooLarge { size: data.len() });
    }
    let packet: Packet =
        bincode::deserialize(data).map_err(|e| CodecError::Decode(e.to_string()))?;
    if packet.channel() != channel {
        return Err(CodecError::WrongChannel {
            expected: channel,
            actual: packet.channel(),
        });
    }
    Ok(packet)
}
