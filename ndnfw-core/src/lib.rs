//! Packet and name primitives shared by every part of the forwarder.
//!
//! This crate provides hierarchical [`Name`]s with cheap prefixes and stable
//! prefix hashes, the NDN-TLV codec, Interest/Data/Nack packets with their
//! NDNLPv2 framing, and the pooled packet buffers used on the data path.

pub mod error;
pub mod mbuf;
pub mod name;
pub mod packet;
pub mod tlv;

pub use error::Error;
pub use mbuf::{Mbuf, PktPool};
pub use name::{Name, MAX_NAME_COMPONENTS, MAX_NAME_LENGTH};
pub use packet::{Data, Interest, LpPacket, Nack, NackReason, Packet};

pub type Result<T> = std::result::Result<T, Error>;

/// Face identifier.
pub type FaceId = u16;
