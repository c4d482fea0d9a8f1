//! # Frame Reassembler
//!
//! Splits the staging buffer into complete frames and hands each one to a
//! decoder created by the packet registry.
//!
//! # Frame Layout
//!
//! ```text
//! fixed-size:    {u8 id}{body}                      size known from the packet type
//! variable-size: {u8 id}{u16 total length}{body}    length counts id and length field
//! ```
//!
//! # Parse Pass
//!
//! 1. Starting at offset 0, read the identifier and create a decoder
//! 2. Determine the frame length (fixed, or the declared length once staged)
//! 3. Stop if the frame is not complete yet; nothing is consumed
//! 4. Decode over exactly the frame bytes and enqueue the packet
//! 5. A decoder that fails or consumes a different number of bytes than the
//!    frame holds is logged and the frame is skipped by its declared length
//!
//! After the pass the unconsumed tail is moved to the front of the buffer.

use crate::config::ConnectionConfig;
use crate::queue::{Inbound, PacketQueue};
use shardlink_core::{PacketId, Result, ShardError};
use shardlink_protocol::{LengthOrder, PacketReader, PacketRegistry, VARIABLE_HEADER_LEN};
use std::sync::Arc;

/// Fixed-capacity buffer of decrypted, decompressed bytes awaiting framing
///
/// `[0, len)` is valid data in arrival order; `[len, capacity)` is free.
#[derive(Debug)]
pub struct StagingBuffer {
    buf: Box<[u8]>,
    len: usize,
}

impl StagingBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
            len: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Free bytes after the staged data
    #[inline]
    pub fn spare_len(&self) -> usize {
        self.buf.len() - self.len
    }

    /// Staged bytes
    pub fn as_slice(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// Free region to fill; follow with [`commit`](Self::commit)
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.len..]
    }

    /// Mark `n` bytes of the spare region as staged
    pub fn commit(&mut self, n: usize) {
        debug_assert!(n <= self.spare_len());
        self.len = (self.len + n).min(self.buf.len());
    }

    /// Copy as much of `data` as fits, returning the number of bytes taken
    pub fn extend(&mut self, data: &[u8]) -> usize {
        let n = data.len().min(self.spare_len());
        self.buf[self.len..self.len + n].copy_from_slice(&data[..n]);
        self.len += n;
        n
    }

    /// Drop the first `n` staged bytes, moving the tail to the front
    pub fn consume(&mut self, n: usize) {
        if n == 0 {
            return;
        }
        if n >= self.len {
            self.len = 0;
            return;
        }
        self.buf.copy_within(n..self.len, 0);
        self.len -= n;
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }
}

/// Turns staged bytes into decoded packets
///
/// Owned by the receive task; nothing else touches the staging buffer.
pub struct FrameReassembler {
    staging: StagingBuffer,
    registry: Arc<dyn PacketRegistry>,
    length_order: LengthOrder,
    deliver_unknown: bool,
    frames_delivered: u64,
    frames_skipped: u64,
}

impl FrameReassembler {
    /// Reassembler with a staging buffer of `capacity` bytes
    pub fn new(registry: Arc<dyn PacketRegistry>, capacity: usize) -> Self {
        Self {
            staging: StagingBuffer::with_capacity(capacity),
            registry,
            length_order: LengthOrder::default(),
            deliver_unknown: false,
            frames_delivered: 0,
            frames_skipped: 0,
        }
    }

    /// Reassembler set up from a connection configuration
    pub fn from_config(registry: Arc<dyn PacketRegistry>, config: &ConnectionConfig) -> Self {
        Self::new(registry, config.staging_capacity)
            .with_length_order(config.length_order)
            .with_deliver_unknown(config.deliver_unknown)
    }

    pub fn with_length_order(mut self, order: LengthOrder) -> Self {
        self.length_order = order;
        self
    }

    pub fn with_deliver_unknown(mut self, deliver: bool) -> Self {
        self.deliver_unknown = deliver;
        self
    }

    pub fn staging(&self) -> &StagingBuffer {
        &self.staging
    }

    pub fn staging_mut(&mut self) -> &mut StagingBuffer {
        &mut self.staging
    }

    /// Packets handed to the queue so far
    pub fn frames_delivered(&self) -> u64 {
        self.frames_delivered
    }

    /// Frames stepped over (unknown identifiers, failed decodes)
    pub fn frames_skipped(&self) -> u64 {
        self.frames_skipped
    }

    /// Run one parse pass over the staged bytes
    ///
    /// Returns the number of bytes consumed. Incomplete frames stay staged.
    ///
    /// # Errors
    /// - `FrameOverflow` if a frame can never fit the staging buffer
    /// - `InvalidData` if a declared length is shorter than its own header
    ///
    /// Both leave the stream unrecoverable.
    pub fn parse(&mut self, queue: &PacketQueue) -> Result<usize> {
        let data = self.staging.as_slice();
        let staged = data.len();
        let capacity = self.staging.capacity();
        let mut cursor = 0;

        while cursor < staged {
            let available = staged - cursor;
            let id = data[cursor];
            let packet_id = PacketId(id);
            let mut packet = self.registry.create(id);
            let header_len = packet.header_len();

            let frame_len = if packet.has_variable_size() {
                if available < VARIABLE_HEADER_LEN {
                    tracing::trace!("Waiting for length field of packet {}", packet_id);
                    break;
                }
                let declared = self
                    .length_order
                    .decode([data[cursor + 1], data[cursor + 2]]) as usize;
                packet.set_size(declared);
                declared
            } else {
                packet.size()
            };

            if frame_len < header_len {
                return Err(ShardError::InvalidData(format!(
                    "Packet {} declares {} bytes, shorter than its {}-byte header",
                    packet_id, frame_len, header_len
                )));
            }

            if frame_len > capacity {
                return Err(ShardError::FrameOverflow {
                    declared: frame_len,
                    capacity,
                });
            }

            if available < frame_len {
                tracing::trace!(
                    "Incomplete packet {}: have {} of {} bytes",
                    packet_id,
                    available,
                    frame_len
                );
                break;
            }

            let frame = &data[cursor..cursor + frame_len];
            cursor += frame_len;

            if !self.registry.is_registered(id) && !self.deliver_unknown {
                tracing::debug!("Skipping unknown packet {} ({} bytes)", packet_id, frame_len);
                self.frames_skipped += 1;
                continue;
            }

            let mut reader = PacketReader::at(frame, header_len);
            match packet.decode(&mut reader) {
                Ok(()) if reader.position() == frame_len => {
                    tracing::trace!("Decoded {} ({} bytes)", packet.name(), frame_len);
                    queue.push(Inbound::new(packet, frame_len));
                    self.frames_delivered += 1;
                }
                Ok(()) => {
                    tracing::debug!(
                        "Protocol desync in {} ({}): consumed {} of {} bytes, skipping",
                        packet.name(),
                        packet_id,
                        reader.position(),
                        frame_len
                    );
                    self.frames_skipped += 1;
                }
                Err(e) => {
                    tracing::debug!(
                        "Failed to decode {} ({}, {} bytes): {}",
                        packet.name(),
                        packet_id,
                        frame_len,
                        e
                    );
                    self.frames_skipped += 1;
                }
            }
        }

        self.staging.consume(cursor);
        Ok(cursor)
    }

    /// Stage `data` and parse, repeating until all of it has been taken
    ///
    /// Returns the number of bytes consumed by parsing.
    pub fn push(&mut self, mut data: &[u8], queue: &PacketQueue) -> Result<usize> {
        let mut consumed = 0;
        while !data.is_empty() {
            let taken = self.staging.extend(data);
            data = &data[taken..];
            let parsed = self.parse(queue)?;
            consumed += parsed;
            if taken == 0 && parsed == 0 {
                return Err(ShardError::TransportFatal(format!(
                    "Staging buffer full ({} bytes) without a complete frame",
                    self.staging.capacity()
                )));
            }
        }
        Ok(consumed)
    }

    /// Drop staged bytes and counters
    pub fn reset(&mut self) {
        self.staging.clear();
        self.frames_delivered = 0;
        self.frames_skipped = 0;
    }
}

impl std::fmt::Debug for FrameReassembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameReassembler")
            .field("staged", &self.staging.len())
            .field("capacity", &self.staging.capacity())
            .field("length_order", &self.length_order)
            .field("deliver_unknown", &self.deliver_unknown)
            .finish()
    }
}
