//! # Shard Protocol Packet Definitions
//!
//! Concrete packet types understood by the client.
//!
//! ## Packet Organization
//!
//! - **Server-to-Client**: decoded by the receive task through the registry
//!   ([`ServerList`], [`ServerRelay`], [`LoginRejected`], fallbacks [`Unknown`]
//!   and [`RawPacket`])
//! - **Client-to-Server**: encoded into the connection's send buffer
//!   ([`LoginRequest`], [`ServerSelect`])
//!
//! Integers are big-endian. Frame sizes below always include the identifier byte
//! (and the length field for variable-size packets).

use crate::codecs::{write_fixed_string, write_u16, write_u8, PacketReader};
use crate::packet::{OutboundPacket, Packet};
use bytes::{Bytes, BytesMut};
use shardlink_core::{Result, ShardError};
use std::any::Any;
use std::net::Ipv4Addr;

/// Known packet identifiers
pub mod ids {
    pub const LOGIN_REQUEST: u8 = 0x80;
    pub const LOGIN_REJECTED: u8 = 0x82;
    pub const SERVER_RELAY: u8 = 0x8C;
    pub const SERVER_SELECT: u8 = 0xA0;
    pub const SERVER_LIST: u8 = 0xA8;
}

/// Implements the bookkeeping half of [`Packet`] for a struct with a `size` field
macro_rules! packet_common {
    ($name:literal) => {
        fn size(&self) -> usize {
            self.size
        }

        fn set_size(&mut self, size: usize) {
            self.size = size;
        }

        fn name(&self) -> &'static str {
            $name
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn into_any(self: Box<Self>) -> Box<dyn Any> {
            self
        }
    };
}

//=== Server-to-Client ===//

/// One game shard advertised in the server list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerEntry {
    pub index: u16,
    pub name: String,
    pub percent_full: u8,
    pub timezone: u8,
    pub address: Ipv4Addr,
}

impl ServerEntry {
    /// Encoded size of one entry
    pub const WIRE_LEN: usize = 40;

    const NAME_LEN: usize = 32;

    fn decode(reader: &mut PacketReader<'_>) -> Result<Self> {
        let index = reader.read_u16()?;
        let name = reader.read_fixed_string(Self::NAME_LEN)?;
        let percent_full = reader.read_u8()?;
        let timezone = reader.read_u8()?;
        // Sent least-significant octet first
        let raw = reader.read_bytes(4)?;
        let address = Ipv4Addr::new(raw[3], raw[2], raw[1], raw[0]);

        Ok(Self { index, name, percent_full, timezone, address })
    }
}

/// List of shards offered after login (0xA8)
///
/// # Packet Format
/// ```text
/// {0xA8}{u16 length}{u8 flags}{u16 count}{ServerEntry * count}
/// ```
///
/// Entries are read while whole 40-byte records remain, so a short list with a
/// generous `count` still decodes what is present.
#[derive(Debug, Default)]
pub struct ServerList {
    size: usize,
    pub flags: u8,
    pub count: u16,
    pub servers: Vec<ServerEntry>,
}

impl ServerList {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Packet for ServerList {
    fn id(&self) -> u8 {
        ids::SERVER_LIST
    }

    fn has_variable_size(&self) -> bool {
        true
    }

    fn decode(&mut self, reader: &mut PacketReader<'_>) -> Result<()> {
        self.flags = reader.read_u8()?;
        self.count = reader.read_u16()?;

        self.servers.clear();
        while self.servers.len() < self.count as usize
            && reader.remaining() >= ServerEntry::WIRE_LEN
        {
            self.servers.push(ServerEntry::decode(reader)?);
        }

        if self.servers.len() < self.count as usize {
            tracing::trace!(
                "Server list announced {} entries, {} present",
                self.count,
                self.servers.len()
            );
        }
        Ok(())
    }

    packet_common!("ServerList");
}

/// Redirect to the selected game server (0x8C)
///
/// # Packet Format
/// ```text
/// {0x8C}{u8[4] ip}{u16 port}{u32 key}
/// ```
///
/// The key becomes the seed of the follow-up connection.
#[derive(Debug)]
pub struct ServerRelay {
    size: usize,
    pub address: Ipv4Addr,
    pub port: u16,
    pub key: u32,
}

impl ServerRelay {
    pub const SIZE: usize = 11;

    pub fn new() -> Self {
        Self {
            size: Self::SIZE,
            address: Ipv4Addr::UNSPECIFIED,
            port: 0,
            key: 0,
        }
    }
}

impl Default for ServerRelay {
    fn default() -> Self {
        Self::new()
    }
}

impl Packet for ServerRelay {
    fn id(&self) -> u8 {
        ids::SERVER_RELAY
    }

    fn has_variable_size(&self) -> bool {
        false
    }

    fn decode(&mut self, reader: &mut PacketReader<'_>) -> Result<()> {
        let ip = reader.read_bytes(4)?;
        self.address = Ipv4Addr::new(ip[0], ip[1], ip[2], ip[3]);
        self.port = reader.read_u16()?;
        self.key = reader.read_u32()?;
        Ok(())
    }

    packet_common!("ServerRelay");
}

/// Why the login server refused the account
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    InvalidCredentials,
    AccountInUse,
    AccountBlocked,
    BadPassword,
    Other(u8),
}

impl RejectReason {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x00 => Self::InvalidCredentials,
            0x01 => Self::AccountInUse,
            0x02 => Self::AccountBlocked,
            0x03 => Self::BadPassword,
            other => Self::Other(other),
        }
    }
}

/// Login refused (0x82)
///
/// # Packet Format
/// ```text
/// {0x82}{u8 reason}
/// ```
#[derive(Debug)]
pub struct LoginRejected {
    size: usize,
    pub reason: RejectReason,
}

impl LoginRejected {
    pub const SIZE: usize = 2;

    pub fn new() -> Self {
        Self {
            size: Self::SIZE,
            reason: RejectReason::Other(0xFF),
        }
    }
}

impl Default for LoginRejected {
    fn default() -> Self {
        Self::new()
    }
}

impl Packet for LoginRejected {
    fn id(&self) -> u8 {
        ids::LOGIN_REJECTED
    }

    fn has_variable_size(&self) -> bool {
        false
    }

    fn decode(&mut self, reader: &mut PacketReader<'_>) -> Result<()> {
        self.reason = RejectReason::from_u8(reader.read_u8()?);
        Ok(())
    }

    packet_common!("LoginRejected");
}

/// Fallback for identifiers the registry does not know
///
/// Treated as variable-size: the declared length is the only way to step over
/// the frame. The body is kept so it can be inspected when unknown packets are
/// delivered.
#[derive(Debug)]
pub struct Unknown {
    id: u8,
    size: usize,
    pub body: Bytes,
}

impl Unknown {
    pub fn new(id: u8) -> Self {
        Self { id, size: 0, body: Bytes::new() }
    }
}

impl Packet for Unknown {
    fn id(&self) -> u8 {
        self.id
    }

    fn has_variable_size(&self) -> bool {
        true
    }

    fn decode(&mut self, reader: &mut PacketReader<'_>) -> Result<()> {
        self.body = Bytes::copy_from_slice(reader.read_rest());
        Ok(())
    }

    packet_common!("Unknown");
}

/// Opaque packet whose body is kept as raw bytes
///
/// Lets callers register identifiers they want delivered without writing a
/// dedicated decoder.
#[derive(Debug)]
pub struct RawPacket {
    id: u8,
    variable: bool,
    size: usize,
    pub body: Bytes,
}

impl RawPacket {
    /// Raw packet with a 2-byte length field
    pub fn variable(id: u8) -> Self {
        Self { id, variable: true, size: 0, body: Bytes::new() }
    }

    /// Raw packet with a fixed frame size (identifier included)
    pub fn fixed(id: u8, size: usize) -> Self {
        Self { id, variable: false, size, body: Bytes::new() }
    }
}

impl Packet for RawPacket {
    fn id(&self) -> u8 {
        self.id
    }

    fn has_variable_size(&self) -> bool {
        self.variable
    }

    fn decode(&mut self, reader: &mut PacketReader<'_>) -> Result<()> {
        if reader.limit() != self.size {
            return Err(ShardError::InvalidData(format!(
                "Raw packet 0x{:02X} expects {} bytes, frame has {}",
                self.id,
                self.size,
                reader.limit()
            )));
        }
        self.body = Bytes::copy_from_slice(reader.read_rest());
        Ok(())
    }

    packet_common!("Raw");
}

//=== Client-to-Server ===//

/// Account login (0x80)
///
/// # Packet Format
/// ```text
/// {0x80}{char[30] account}{char[30] password}{u8 next_login_key}
/// ```
#[derive(Debug, Clone)]
pub struct LoginRequest {
    pub account: String,
    pub password: String,
    pub next_login_key: u8,
}

impl LoginRequest {
    pub const SIZE: usize = 62;
    const FIELD_LEN: usize = 30;

    pub fn new(account: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            password: password.into(),
            next_login_key: 0,
        }
    }
}

impl OutboundPacket for LoginRequest {
    fn id(&self) -> u8 {
        ids::LOGIN_REQUEST
    }

    fn encoded_len(&self) -> usize {
        Self::SIZE
    }

    fn encode(&self, buf: &mut BytesMut) {
        write_u8(buf, ids::LOGIN_REQUEST);
        write_fixed_string(buf, &self.account, Self::FIELD_LEN);
        write_fixed_string(buf, &self.password, Self::FIELD_LEN);
        write_u8(buf, self.next_login_key);
    }
}

/// Pick a shard from the server list (0xA0)
///
/// # Packet Format
/// ```text
/// {0xA0}{u16 index}
/// ```
#[derive(Debug, Clone, Copy)]
pub struct ServerSelect {
    pub index: u16,
}

impl ServerSelect {
    pub const SIZE: usize = 3;

    pub fn new(index: u16) -> Self {
        Self { index }
    }
}

impl OutboundPacket for ServerSelect {
    fn id(&self) -> u8 {
        ids::SERVER_SELECT
    }

    fn encoded_len(&self) -> usize {
        Self::SIZE
    }

    fn encode(&self, buf: &mut BytesMut) {
        write_u8(buf, ids::SERVER_SELECT);
        write_u16(buf, self.index);
    }
}

/// Decode a complete frame, returning the packet and the bytes consumed
#[cfg(test)]
pub(crate) fn decode_frame(mut packet: Box<dyn Packet>, frame: &[u8]) -> Result<(Box<dyn Packet>, usize)> {
    let header = packet.header_len();
    if packet.has_variable_size() {
        packet.set_size(frame.len());
    }
    let mut reader = PacketReader::at(frame, header);
    packet.decode(&mut reader)?;
    Ok((packet, reader.position()))
}
