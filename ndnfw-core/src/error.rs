//! Error types for packet and name primitives.

use thiserror::Error;

/// Errors raised while building, encoding or decoding packets.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Malformed TLV structure.
    #[error("TLV error: {0}")]
    Tlv(String),

    /// Well-formed TLV that is not a valid NDN packet.
    #[error("NDN packet error: {0}")]
    NdnPacket(String),

    /// Name exceeds the component count or octet limit.
    #[error("name too long: {components} components, {octets} octets")]
    NameTooLong { components: usize, octets: usize },

    /// The packet buffer pool has no free buffer.
    #[error("packet buffer pool exhausted")]
    PoolExhausted,

    /// Not enough headroom or tailroom in a packet buffer.
    #[error("no room in packet buffer: need {need}, have {have}")]
    NoRoom { need: usize, have: usize },
}
