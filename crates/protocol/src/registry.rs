//! # Packet Registry
//!
//! Maps a packet identifier to a fresh decoder instance.
//!
//! # Architecture
//!
//! The registry is a plain value constructed by the caller and handed to the
//! connection (`Arc<dyn PacketRegistry>`); there is no process-wide instance.
//! Lookups are a single `HashMap` probe per frame.
//!
//! # Example
//!
//! ```
//! use shardlink_protocol::{PacketFactory, PacketRegistry, RawPacket};
//!
//! let mut registry = PacketFactory::with_defaults();
//! registry.register(0x1B, || Box::new(RawPacket::fixed(0x1B, 37)));
//!
//! assert!(registry.is_registered(0xA8));
//! assert_eq!(registry.create(0x1B).size(), 37);
//! assert_eq!(registry.create(0xFE).name(), "Unknown");
//! ```

use crate::packet::Packet;
use crate::packets::{ids, LoginRejected, RawPacket, ServerList, ServerRelay, Unknown};
use std::collections::HashMap;
use std::sync::Arc;

/// Creates decoders for packet identifiers
///
/// `create` never fails: unrecognized identifiers yield an [`Unknown`] decoder.
pub trait PacketRegistry: Send + Sync {
    fn create(&self, id: u8) -> Box<dyn Packet>;

    /// Whether `id` maps to a dedicated decoder
    fn is_registered(&self, id: u8) -> bool;
}

/// Constructor for one packet type
pub type PacketConstructor = Arc<dyn Fn() -> Box<dyn Packet> + Send + Sync>;

/// Table-driven [`PacketRegistry`]
#[derive(Clone, Default)]
pub struct PacketFactory {
    constructors: HashMap<u8, PacketConstructor>,
}

impl PacketFactory {
    /// Empty registry: every identifier decodes as [`Unknown`]
    pub fn new() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Registry with every server-to-client packet this crate implements
    pub fn with_defaults() -> Self {
        let mut factory = Self::new();
        factory.register(ids::SERVER_LIST, || Box::new(ServerList::new()));
        factory.register(ids::SERVER_RELAY, || Box::new(ServerRelay::new()));
        factory.register(ids::LOGIN_REJECTED, || Box::new(LoginRejected::new()));
        factory
    }

    /// Register a constructor, replacing any previous one for `id`
    pub fn register<F>(&mut self, id: u8, constructor: F)
    where
        F: Fn() -> Box<dyn Packet> + Send + Sync + 'static,
    {
        tracing::debug!("Registered decoder for packet 0x{:02X}", id);
        self.constructors.insert(id, Arc::new(constructor));
    }

    /// Register `id` as an opaque variable-size packet
    pub fn register_variable(&mut self, id: u8) {
        self.register(id, move || Box::new(RawPacket::variable(id)));
    }

    /// Register `id` as an opaque packet with a fixed frame size
    pub fn register_fixed(&mut self, id: u8, size: usize) {
        self.register(id, move || Box::new(RawPacket::fixed(id, size)));
    }

    /// Number of registered identifiers
    pub fn len(&self) -> usize {
        self.constructors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constructors.is_empty()
    }
}

impl PacketRegistry for PacketFactory {
    fn create(&self, id: u8) -> Box<dyn Packet> {
        match self.constructors.get(&id) {
            Some(constructor) => constructor(),
            None => Box::new(Unknown::new(id)),
        }
    }

    fn is_registered(&self, id: u8) -> bool {
        self.constructors.contains_key(&id)
    }
}

impl std::fmt::Debug for PacketFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<_> = self.constructors.keys().copied().collect();
        ids.sort_unstable();
        f.debug_struct("PacketFactory").field("ids", &ids).finish()
    }
}
