//! Core type definitions

use std::fmt;

/// Packet identifier (first byte of every frame)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PacketId(pub u8);

impl PacketId {
    pub const fn new(id: u8) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u8 {
        self.0
    }
}

impl From<u8> for PacketId {
    fn from(id: u8) -> Self {
        Self(id)
    }
}

impl fmt::Display for PacketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X}", self.0)
    }
}

/// Stream compression applied by the server after the handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionType {
    None = 0,
    Zlib = 1,
    Bzip2 = 2,
}

impl CompressionType {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "none" | "off" => Some(Self::None),
            "zlib" => Some(Self::Zlib),
            "bzip2" | "bz2" => Some(Self::Bzip2),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Zlib => "zlib",
            Self::Bzip2 => "bzip2",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_id_display() {
        assert_eq!(PacketId::new(0xA8).to_string(), "0xA8");
        assert_eq!(PacketId::from(0x0B).get(), 0x0B);
    }

    #[test]
    fn test_compression_from_name() {
        assert_eq!(CompressionType::from_name("ZLIB"), Some(CompressionType::Zlib));
        assert_eq!(CompressionType::from_name("bz2"), Some(CompressionType::Bzip2));
        assert_eq!(CompressionType::from_name("off"), Some(CompressionType::None));
        assert_eq!(CompressionType::from_name("huffman"), None);
    }
}
