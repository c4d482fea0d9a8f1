//! # Shardlink Protocol Library
//!
//! Wire-level building blocks of the shard protocol, independent of any socket.
//!
//! ## Architecture
//!
//! ### 1. Codecs Layer ([`codecs`])
//! Big-endian integer and fixed-width string encoding, plus [`PacketReader`],
//! the cursor packet decoders advance through one frame.
//!
//! ### 2. Packet Traits ([`packet`])
//! [`Packet`] is the inbound decoder contract (size, variable-size flag,
//! decode); [`OutboundPacket`] encodes client packets.
//!
//! ### 3. Packet Types ([`packets`])
//! Concrete server-to-client and client-to-server packets.
//!
//! ### 4. Registry ([`registry`])
//! [`PacketRegistry`] maps identifiers to fresh decoders, falling back to
//! [`Unknown`].
//!
//! ### 5. Transforms ([`encryption`], [`compression`])
//! In-place stream decryption and streaming decompression applied to every
//! received chunk before framing.
//!
//! ## Frame Layout
//!
//! ```text
//! fixed-size:    {u8 id}{body}
//! variable-size: {u8 id}{u16 total length}{body}
//! ```
//!
//! The total length of a variable-size frame counts the identifier and the
//! length field.

pub mod codecs;
pub mod compression;
pub mod encryption;
pub mod packet;
pub mod packets;
pub mod registry;

// Re-export commonly used items
pub use codecs::{LengthOrder, PacketReader};
pub use compression::{new_decompressor, Bzip2Stream, Decompressor, Passthrough, ZlibStream};
pub use encryption::{Decryptor, XorCipher};
pub use packet::{OutboundPacket, Packet, FIXED_HEADER_LEN, VARIABLE_HEADER_LEN};
pub use packets::*;
pub use registry::{PacketConstructor, PacketFactory, PacketRegistry};
pub use shardlink_core::CompressionType;
