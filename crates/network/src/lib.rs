//! # Shardlink Networking Layer
//!
//! Tokio-based transport for a single connection to a shard server.
//!
//! ## Modules
//!
//! - [`config`] - Connection configuration options
//! - [`connection`] - Socket ownership, receive task, send buffer
//! - [`pipeline`] - Per-chunk decryption and decompression
//! - [`reassembler`] - Staging buffer and frame splitting
//! - [`queue`] - Packet queue between the receive task and the application
//!
//! ## Data Flow
//!
//! ```text
//! socket → raw buffer → decrypt → decompress → staging → frames → queue → next_packet()
//! ```

pub mod config;
pub mod connection;
pub mod pipeline;
pub mod queue;
pub mod reassembler;

// Re-export commonly used items
pub use config::{ConnectionConfig, QueueLimit};
pub use connection::{Connection, ConnectionState, ConnectionStats};
pub use pipeline::ReceivePipeline;
pub use queue::{Inbound, PacketQueue};
pub use reassembler::{FrameReassembler, StagingBuffer};
