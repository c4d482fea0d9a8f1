//! Packet traits
//!
//! Every inbound packet type implements [`Packet`]: it knows whether it carries a
//! length field, how large its frame is, and how to decode its own body. Outbound
//! packets implement [`OutboundPacket`].

use crate::codecs::PacketReader;
use bytes::BytesMut;
use shardlink_core::Result;
use std::any::Any;
use std::fmt;

/// Frame header length of a fixed-size packet (identifier only)
pub const FIXED_HEADER_LEN: usize = 1;

/// Frame header length of a variable-size packet (identifier + u16 length)
pub const VARIABLE_HEADER_LEN: usize = 3;

/// An inbound packet decoder
///
/// # Contract
/// - `size()` is the total frame length including the header. For fixed-size
///   types it is known up front; variable-size types learn it via `set_size()`
///   before `decode()` is called.
/// - `decode()` receives a reader over exactly one frame, positioned after the
///   header, and must advance it by exactly the bytes it consumed.
pub trait Packet: Any + Send + fmt::Debug {
    /// Packet identifier
    fn id(&self) -> u8;

    /// Whether the frame carries a 2-byte length after the identifier
    fn has_variable_size(&self) -> bool;

    /// Total frame length in bytes
    fn size(&self) -> usize;

    /// Record the declared frame length of a variable-size packet
    fn set_size(&mut self, size: usize);

    /// Decode the body of the frame
    fn decode(&mut self, reader: &mut PacketReader<'_>) -> Result<()>;

    /// Human-readable packet name for logs
    fn name(&self) -> &'static str;

    fn as_any(&self) -> &dyn Any;

    fn into_any(self: Box<Self>) -> Box<dyn Any>;

    /// Length of the frame header for this packet type
    fn header_len(&self) -> usize {
        if self.has_variable_size() {
            VARIABLE_HEADER_LEN
        } else {
            FIXED_HEADER_LEN
        }
    }
}

impl dyn Packet {
    /// Borrow the concrete packet type
    pub fn downcast_ref<T: Packet>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    /// Take ownership of the concrete packet type
    pub fn downcast<T: Packet>(self: Box<Self>) -> std::result::Result<Box<T>, Box<dyn Any>> {
        self.into_any().downcast::<T>()
    }
}

/// A packet the client sends
pub trait OutboundPacket {
    /// Packet identifier
    fn id(&self) -> u8;

    /// Number of bytes `encode()` will append
    fn encoded_len(&self) -> usize;

    /// Append the full frame (identifier included) to `buf`
    fn encode(&self, buf: &mut BytesMut);
}

/// Append a variable-size frame `{id}{u16 total length}{body}` to `buf`
#[cfg(test)]
pub(crate) fn encode_variable_frame(
    buf: &mut BytesMut,
    id: u8,
    body: &[u8],
    order: crate::codecs::LengthOrder,
) -> Result<()> {
    use bytes::BufMut;
    use shardlink_core::ShardError;

    let total = VARIABLE_HEADER_LEN + body.len();
    let total = u16::try_from(total).map_err(|_| {
        ShardError::InvalidData(format!("Frame of {} bytes exceeds the u16 length field", total))
    })?;
    buf.reserve(total as usize);
    buf.put_u8(id);
    buf.put_slice(&order.encode(total));
    buf.put_slice(body);
    Ok(())
}
