//! # Connection Configuration
//!
//! Configuration options for a client connection.
//!
//! # Example
//!
//! ```rust
//! use shardlink_network::{ConnectionConfig, QueueLimit};
//! use std::time::Duration;
//!
//! let config = ConnectionConfig {
//!     queue_limit: QueueLimit::DropOldest(4096),
//!     connect_timeout: Some(Duration::from_secs(10)),
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```

use shardlink_protocol::LengthOrder;
use std::time::Duration;

/// Capacity policy of the packet queue
///
/// # Notes
/// - `Unbounded` never drops but grows without limit if the consumer stalls
/// - The bounded variants log a warning for every dropped packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueLimit {
    /// No limit
    #[default]
    Unbounded,

    /// Keep at most `n` packets, discarding the oldest on overflow
    DropOldest(usize),

    /// Keep at most `n` packets, discarding arriving packets on overflow
    DropNewest(usize),
}

/// Connection configuration options
///
/// # Default Values
///
/// - 16 KiB raw receive buffer (one socket read)
/// - 64 KiB staging buffer (decrypted/decompressed bytes awaiting framing)
/// - 64 KiB send buffer
/// - Big-endian frame length field
/// - Unbounded packet queue
/// - No connect timeout
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Maximum bytes taken from the socket per read
    ///
    /// # Default
    /// 16384 bytes
    pub raw_buffer_size: usize,

    /// Capacity of the staging buffer
    ///
    /// # Notes
    /// - A frame longer than this can never complete and kills the connection
    /// - Variable-size frames are at most 65535 bytes, so the default fits all of them
    pub staging_capacity: usize,

    /// Capacity of the outbound send buffer
    ///
    /// # Default
    /// 65536 bytes
    pub send_buffer_capacity: usize,

    /// Byte order of the 2-byte length field of variable-size frames
    pub length_order: LengthOrder,

    /// Packet queue policy
    pub queue_limit: QueueLimit,

    /// Deliver frames with unregistered identifiers as `Unknown` packets
    ///
    /// # Default
    /// `false` (unknown frames are skipped and logged)
    pub deliver_unknown: bool,

    /// Disable Nagle's algorithm
    ///
    /// # Default
    /// `true`
    pub nodelay: bool,

    /// Upper bound on the TCP connect
    ///
    /// # Default
    /// `None`: a connect that never completes keeps waiting
    pub connect_timeout: Option<Duration>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            raw_buffer_size: 0x4000,
            staging_capacity: 0x10000,
            send_buffer_capacity: 0x10000,
            length_order: LengthOrder::BigEndian,
            queue_limit: QueueLimit::Unbounded,
            deliver_unknown: false,
            nodelay: true,
            connect_timeout: None,
        }
    }
}

impl ConnectionConfig {
    /// Validate the configuration
    ///
    /// # Checks
    /// - Buffer sizes must be >= 1024
    /// - Bounded queues must hold at least one packet
    /// - A connect timeout must be non-zero
    pub fn validate(&self) -> Result<(), String> {
        if self.raw_buffer_size < 1024 {
            return Err("raw_buffer_size must be >= 1024".to_string());
        }

        if self.staging_capacity < 1024 {
            return Err("staging_capacity must be >= 1024".to_string());
        }

        if self.send_buffer_capacity < 1024 {
            return Err("send_buffer_capacity must be >= 1024".to_string());
        }

        match self.queue_limit {
            QueueLimit::DropOldest(0) | QueueLimit::DropNewest(0) => {
                return Err("queue capacity must be > 0".to_string());
            }
            _ => {}
        }

        if self.connect_timeout == Some(Duration::ZERO) {
            return Err("connect_timeout must be > 0".to_string());
        }

        if self.staging_capacity <= u16::MAX as usize {
            tracing::warn!(
                "staging_capacity {} is smaller than the largest variable-size frame",
                self.staging_capacity
            );
        }

        Ok(())
    }
}
