//! # Packet Queue
//!
//! FIFO handing decoded packets from the receive task to the application loop.
//!
//! # Thread Safety
//!
//! One `parking_lot::Mutex` guards the deque. `push` and `pop` hold it only long
//! enough to splice one element; neither blocks waiting for data. Consumers poll.

use crate::config::QueueLimit;
use parking_lot::Mutex;
use shardlink_protocol::Packet;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

/// A decoded packet together with its envelope
#[derive(Debug)]
pub struct Inbound {
    /// Packet identifier
    pub id: u8,

    /// Total frame length on the wire
    pub length: usize,

    /// Decoded packet object
    pub packet: Box<dyn Packet>,
}

impl Inbound {
    pub fn new(packet: Box<dyn Packet>, length: usize) -> Self {
        Self {
            id: packet.id(),
            length,
            packet,
        }
    }

    /// Packet name for logs
    pub fn name(&self) -> &'static str {
        self.packet.name()
    }

    /// Borrow the concrete packet type
    pub fn downcast_ref<T: Packet>(&self) -> Option<&T> {
        self.packet.downcast_ref::<T>()
    }
}

/// Mutex-guarded FIFO of decoded packets
#[derive(Debug)]
pub struct PacketQueue {
    packets: Mutex<VecDeque<Inbound>>,
    limit: QueueLimit,
    dropped: AtomicU64,
}

impl PacketQueue {
    pub fn new(limit: QueueLimit) -> Self {
        Self {
            packets: Mutex::new(VecDeque::new()),
            limit,
            dropped: AtomicU64::new(0),
        }
    }

    /// Unbounded queue
    pub fn unbounded() -> Self {
        Self::new(QueueLimit::Unbounded)
    }

    /// Append a packet
    ///
    /// Returns `false` if the queue limit discarded a packet (either this one
    /// or the oldest queued one).
    pub fn push(&self, packet: Inbound) -> bool {
        let mut packets = self.packets.lock();
        match self.limit {
            QueueLimit::Unbounded => {
                packets.push_back(packet);
                true
            }
            QueueLimit::DropOldest(capacity) => {
                let full = packets.len() >= capacity;
                if full {
                    if let Some(old) = packets.pop_front() {
                        tracing::warn!(
                            "Packet queue full ({}), dropping oldest packet 0x{:02X}",
                            capacity,
                            old.id
                        );
                    }
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                }
                packets.push_back(packet);
                !full
            }
            QueueLimit::DropNewest(capacity) => {
                if packets.len() >= capacity {
                    tracing::warn!(
                        "Packet queue full ({}), dropping packet 0x{:02X}",
                        capacity,
                        packet.id
                    );
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    false
                } else {
                    packets.push_back(packet);
                    true
                }
            }
        }
    }

    /// Remove the oldest packet, if any
    pub fn pop(&self) -> Option<Inbound> {
        self.packets.lock().pop_front()
    }

    /// Take every queued packet in arrival order
    pub fn drain(&self) -> Vec<Inbound> {
        self.packets.lock().drain(..).collect()
    }

    pub fn clear(&self) {
        self.packets.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.packets.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.lock().is_empty()
    }

    /// Packets discarded because of the queue limit
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for PacketQueue {
    fn default() -> Self {
        Self::unbounded()
    }
}
