//! Wire protocol for the COINjecture consensus core.
//!
//! Only the byte format is consensus: the envelope, the message taxonomy,
//! and the rule that hashes are computed on decompressed canonical bytes.
//! Transport (sockets, peer discovery, gossip fabric) lives outside this
//! workspace.

pub mod wire;

pub use wire::{decode_message, encode_message, Message, WireError};
