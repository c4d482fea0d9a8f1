//! # Client Connection
//!
//! Owns the TCP connection to a shard server.
//!
//! # Architecture
//!
//! Each connected `Connection` runs one receive task that:
//! - Waits for socket readability (or cancellation)
//! - Reads up to `raw_buffer_size` bytes without blocking
//! - Decrypts and decompresses the chunk into the staging buffer
//! - Splits complete frames into packets and pushes them onto the queue
//!
//! The application loop owns the `Connection` itself: it writes outbound
//! packets into the send buffer, flushes them with [`Connection::send_all`] and
//! polls decoded packets with [`Connection::next_packet`].
//!
//! # Lifecycle
//!
//! ```text
//! Disconnected → Connecting → Connected → Closing → Disconnected
//!                    ↓            ↓
//!               (connect error)  (peer close / fatal error)
//! ```
//!
//! # Thread Safety
//!
//! Reads and writes on the socket go through one `parking_lot::Mutex<()>`,
//! held only around the non-blocking `try_read`/`try_write` call. The packet
//! queue is the only data handed between the two sides.

use crate::config::ConnectionConfig;
use crate::pipeline::ReceivePipeline;
use crate::queue::{Inbound, PacketQueue};
use crate::reassembler::FrameReassembler;
use bytes::{Buf, BufMut, BytesMut};
use parking_lot::Mutex;
use shardlink_core::{CompressionType, Result, ShardError};
use shardlink_protocol::{Decryptor, OutboundPacket, PacketRegistry};
use socket2::{Domain, Protocol, SockRef, Socket, Type};
use std::io::ErrorKind;
use std::net::{Shutdown, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{TcpSocket, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// State of the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket
    Disconnected,

    /// Resolving and connecting
    Connecting,

    /// Socket open, receive task running
    Connected,

    /// `close()` in progress
    Closing,
}

/// Traffic counters of the current connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub packets_queued: usize,
    pub packets_dropped: u64,
}

/// State shared between the connection and its receive task
struct Shared {
    state: Mutex<ConnectionState>,
    running: AtomicBool,
    fatal: AtomicBool,
    queue: PacketQueue,
    pipeline: Mutex<ReceivePipeline>,
    socket_lock: Mutex<()>,
    bytes_received: AtomicU64,
    bytes_sent: AtomicU64,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
    }

    fn set_fatal(&self) {
        self.fatal.store(true, Ordering::Release);
        self.running.store(false, Ordering::Release);
    }
}

/// Connection to a shard server
///
/// # Example
///
/// ```rust,no_run
/// use shardlink_network::{Connection, ConnectionConfig};
/// use shardlink_protocol::{LoginRequest, PacketFactory};
/// use std::sync::Arc;
///
/// # async fn run() -> shardlink_core::Result<()> {
/// let mut conn = Connection::new(
///     ConnectionConfig::default(),
///     Arc::new(PacketFactory::with_defaults()),
/// );
/// conn.connect("login.example.com", 2593).await?;
/// conn.write_seed(0x7F00_0001)?;
/// conn.write_packet(&LoginRequest::new("account", "password"))?;
/// conn.send_all().await?;
///
/// while let Some(packet) = conn.next_packet() {
///     println!("{} ({} bytes)", packet.name(), packet.length);
/// }
/// conn.close().await;
/// # Ok(())
/// # }
/// ```
pub struct Connection {
    config: ConnectionConfig,
    registry: Arc<dyn PacketRegistry>,
    shared: Arc<Shared>,
    stream: Option<Arc<TcpStream>>,
    peer_addr: Option<SocketAddr>,
    send_buf: BytesMut,
    seed: Option<u32>,
    cancel: CancellationToken,
    recv_task: Option<JoinHandle<()>>,
}

impl Connection {
    /// Create a disconnected connection
    pub fn new(config: ConnectionConfig, registry: Arc<dyn PacketRegistry>) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(ConnectionState::Disconnected),
            running: AtomicBool::new(false),
            fatal: AtomicBool::new(false),
            queue: PacketQueue::new(config.queue_limit),
            pipeline: Mutex::new(ReceivePipeline::new()),
            socket_lock: Mutex::new(()),
            bytes_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
        });

        Self {
            send_buf: BytesMut::with_capacity(config.send_buffer_capacity),
            config,
            registry,
            shared,
            stream: None,
            peer_addr: None,
            seed: None,
            cancel: CancellationToken::new(),
            recv_task: None,
        }
    }

    /// Connect to `host:port` and start the receive task
    ///
    /// `host` may be a hostname or an IP literal; IPv4 results are preferred.
    /// Per-connection state (send buffer, seed, fatal flag, decompression,
    /// queued packets) is reset. A decryptor set beforehand stays in place and
    /// applies from the first received byte.
    ///
    /// # Errors
    /// - `AlreadyConnected` if a connection is live; it is left untouched
    /// - `Connect` if resolution or the TCP connect fails
    pub async fn connect(&mut self, host: &str, port: u16) -> Result<()> {
        if self.is_connected() {
            tracing::warn!("Connect to {}:{} refused: already connected", host, port);
            return Err(ShardError::AlreadyConnected);
        }

        // Reap a connection that ended on its own
        if self.stream.is_some() || self.recv_task.is_some() {
            self.close().await;
        }

        self.config.validate().map_err(ShardError::Config)?;
        self.shared.set_state(ConnectionState::Connecting);

        let stream = match self.open(host, port).await {
            Ok(stream) => Arc::new(stream),
            Err(e) => {
                tracing::error!("Failed to connect to {}:{}: {}", host, port, e);
                self.close().await;
                return Err(e);
            }
        };

        self.peer_addr = stream.peer_addr().ok();
        self.send_buf.clear();
        self.seed = None;
        self.shared.pipeline.lock().reset_decompression();
        self.shared.queue.clear();
        self.shared.bytes_received.store(0, Ordering::Relaxed);
        self.shared.bytes_sent.store(0, Ordering::Relaxed);
        self.shared.fatal.store(false, Ordering::Release);
        self.shared.running.store(true, Ordering::Release);
        self.shared.set_state(ConnectionState::Connected);

        self.cancel = CancellationToken::new();
        let reassembler = FrameReassembler::from_config(Arc::clone(&self.registry), &self.config);
        self.recv_task = Some(tokio::spawn(receive_loop(
            Arc::clone(&stream),
            Arc::clone(&self.shared),
            reassembler,
            self.cancel.clone(),
            self.config.raw_buffer_size,
        )));
        self.stream = Some(stream);

        match self.peer_addr {
            Some(addr) => tracing::info!("Connected to {}:{} ({})", host, port, addr),
            None => tracing::info!("Connected to {}:{}", host, port),
        }
        Ok(())
    }

    /// Resolve, create the socket and connect
    async fn open(&self, host: &str, port: u16) -> Result<TcpStream> {
        let addr = resolve(host, port).await?;
        tracing::debug!("Connecting to {} ({}:{})", addr, host, port);

        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
            .map_err(|e| ShardError::Connect(format!("Failed to create socket: {}", e)))?;
        socket
            .set_nonblocking(true)
            .map_err(|e| ShardError::Connect(format!("Failed to set non-blocking: {}", e)))?;
        if self.config.nodelay {
            // Small packets go out immediately
            socket
                .set_nodelay(true)
                .map_err(|e| ShardError::Connect(format!("Failed to set TCP_NODELAY: {}", e)))?;
        }

        let std_stream: std::net::TcpStream = socket.into();
        let connect = TcpSocket::from_std_stream(std_stream).connect(addr);

        let result = match self.config.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, connect).await.map_err(|_| {
                ShardError::Connect(format!("Connect to {} timed out after {:?}", addr, limit))
            })?,
            None => connect.await,
        };

        result.map_err(|e| ShardError::Connect(format!("Connect to {} failed: {}", addr, e)))
    }

    /// Shut the connection down
    ///
    /// Stops the receive task and waits for it to exit, then drops the socket.
    /// No packet is enqueued after this returns. Packets already queued stay
    /// available. Calling `close` again is a no-op.
    pub async fn close(&mut self) {
        if self.stream.is_none() && self.recv_task.is_none() {
            self.shared.set_state(ConnectionState::Disconnected);
            return;
        }

        self.shared.set_state(ConnectionState::Closing);
        self.shared.running.store(false, Ordering::Release);

        if let Some(stream) = &self.stream {
            if let Err(e) = SockRef::from(&**stream).shutdown(Shutdown::Both) {
                tracing::debug!("Socket shutdown: {}", e);
            }
        }

        self.cancel.cancel();
        if let Some(task) = self.recv_task.take() {
            if let Err(e) = task.await {
                tracing::warn!("Receive task ended abnormally: {}", e);
            }
        }

        self.stream = None;
        self.send_buf.clear();
        self.shared.set_state(ConnectionState::Disconnected);

        match self.peer_addr.take() {
            Some(addr) => tracing::info!("Connection to {} closed", addr),
            None => tracing::info!("Connection closed"),
        }
    }

    /// Whether the socket is open and the receive task is running
    pub fn is_connected(&self) -> bool {
        *self.shared.state.lock() == ConnectionState::Connected
            && self.shared.running.load(Ordering::Acquire)
            && !self.shared.fatal.load(Ordering::Acquire)
    }

    /// Whether a transport error has disabled the connection
    ///
    /// Cleared by the next successful `connect`.
    pub fn is_fatal(&self) -> bool {
        self.shared.fatal.load(Ordering::Acquire)
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.lock()
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Handshake seed written on this connection
    pub fn seed(&self) -> Option<u32> {
        self.seed
    }

    /// Append the 4-byte handshake seed (network order, no framing)
    pub fn write_seed(&mut self, seed: u32) -> Result<()> {
        self.reserve(4)?;
        self.send_buf.put_u32(seed);
        self.seed = Some(seed);
        tracing::debug!("Queued handshake seed 0x{:08X}", seed);
        Ok(())
    }

    /// Encode a packet into the send buffer
    pub fn write_packet<P: OutboundPacket>(&mut self, packet: &P) -> Result<()> {
        self.reserve(packet.encoded_len())?;
        packet.encode(&mut self.send_buf);
        tracing::trace!(
            "Queued packet 0x{:02X} ({} bytes)",
            packet.id(),
            packet.encoded_len()
        );
        Ok(())
    }

    /// Append already-encoded bytes to the send buffer
    pub fn write_raw(&mut self, data: &[u8]) -> Result<()> {
        self.reserve(data.len())?;
        self.send_buf.put_slice(data);
        Ok(())
    }

    /// Bytes waiting in the send buffer
    pub fn pending_send(&self) -> usize {
        self.send_buf.len()
    }

    fn reserve(&self, needed: usize) -> Result<()> {
        let available = self.config.send_buffer_capacity.saturating_sub(self.send_buf.len());
        if needed > available {
            return Err(ShardError::SendBufferFull { needed, available });
        }
        Ok(())
    }

    /// Write the whole send buffer to the socket
    ///
    /// Waits for writability and retries until every byte is written. An empty
    /// buffer succeeds immediately.
    ///
    /// # Errors
    /// - `TransportFatal` once the connection has hit a fatal error; the socket
    ///   is not touched
    /// - `NotConnected` with pending data and no socket
    /// - `TransportFatal` for a write error, which also latches the fatal flag
    pub async fn send_all(&mut self) -> Result<()> {
        if self.is_fatal() {
            return Err(ShardError::TransportFatal(
                "connection is in a fatal state".to_string(),
            ));
        }
        if self.send_buf.is_empty() {
            return Ok(());
        }

        let stream = self.stream.clone().ok_or(ShardError::NotConnected)?;

        while !self.send_buf.is_empty() {
            if let Err(e) = stream.writable().await {
                return Err(self.fail_send(e));
            }

            let result = {
                let _guard = self.shared.socket_lock.lock();
                stream.try_write(&self.send_buf)
            };

            match result {
                Ok(0) => {
                    return Err(self.fail_send(std::io::Error::new(
                        ErrorKind::WriteZero,
                        "socket accepted no bytes",
                    )));
                }
                Ok(n) => {
                    self.send_buf.advance(n);
                    self.shared.bytes_sent.fetch_add(n as u64, Ordering::Relaxed);
                    tracing::trace!("Sent {} bytes, {} pending", n, self.send_buf.len());
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => continue,
                Err(e) => return Err(self.fail_send(e)),
            }
        }

        Ok(())
    }

    fn fail_send(&self, e: std::io::Error) -> ShardError {
        tracing::error!("Send failed: {}", e);
        self.shared.set_fatal();
        ShardError::TransportFatal(format!("send failed: {}", e))
    }

    /// Decrypt received bytes from the next chunk on
    pub fn set_encryption(&self, decryptor: Box<dyn Decryptor>) {
        self.shared.pipeline.lock().set_decryptor(decryptor);
    }

    pub fn clear_encryption(&self) {
        self.shared.pipeline.lock().clear_decryptor();
    }

    /// Decompress received bytes from the next chunk on
    pub fn set_use_decompression(&self, enabled: bool) {
        self.shared.pipeline.lock().set_use_decompression(enabled);
    }

    /// Select the decompression algorithm
    pub fn set_compression(&self, compression: CompressionType) {
        self.shared.pipeline.lock().set_compression(compression);
    }

    /// Oldest decoded packet, if any
    pub fn next_packet(&self) -> Option<Inbound> {
        self.shared.queue.pop()
    }

    /// Every decoded packet, in arrival order
    pub fn drain_packets(&self) -> Vec<Inbound> {
        self.shared.queue.drain()
    }

    pub fn pending_packets(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            bytes_received: self.shared.bytes_received.load(Ordering::Relaxed),
            bytes_sent: self.shared.bytes_sent.load(Ordering::Relaxed),
            packets_queued: self.shared.queue.len(),
            packets_dropped: self.shared.queue.dropped(),
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state())
            .field("peer_addr", &self.peer_addr)
            .field("fatal", &self.is_fatal())
            .field("pending_send", &self.send_buf.len())
            .field("pending_packets", &self.pending_packets())
            .finish()
    }
}

/// Resolve `host`, preferring an IPv4 address
async fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| ShardError::Connect(format!("Failed to resolve {}: {}", host, e)))?
        .collect();

    addrs
        .iter()
        .find(|addr| addr.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| ShardError::Connect(format!("No addresses found for {}", host)))
}

/// Receive task body
async fn receive_loop(
    stream: Arc<TcpStream>,
    shared: Arc<Shared>,
    mut reassembler: FrameReassembler,
    cancel: CancellationToken,
    raw_buffer_size: usize,
) {
    let mut raw = vec![0u8; raw_buffer_size];

    while shared.running.load(Ordering::Acquire) && !shared.fatal.load(Ordering::Acquire) {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("Receive task cancelled");
                break;
            }
            ready = stream.readable() => {
                if let Err(e) = ready {
                    tracing::error!("Socket readiness failed: {}", e);
                    shared.set_fatal();
                    break;
                }
            }
        }

        let read = {
            let _guard = shared.socket_lock.lock();
            stream.try_read(&mut raw)
        };

        match read {
            Ok(0) => {
                if shared.running.load(Ordering::Acquire) {
                    tracing::info!("Peer closed the connection");
                }
                break;
            }
            Ok(n) => {
                shared.bytes_received.fetch_add(n as u64, Ordering::Relaxed);
                tracing::trace!("Received {} bytes", n);

                let result =
                    shared
                        .pipeline
                        .lock()
                        .process(&mut raw[..n], &mut reassembler, &shared.queue);

                if let Err(e) = result {
                    tracing::error!("Receive failed, connection disabled: {}", e);
                    shared.set_fatal();
                    break;
                }

                tokio::task::yield_now().await;
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => continue,
            Err(e) => {
                if shared.running.load(Ordering::Acquire) {
                    tracing::error!("Socket read failed: {}", e);
                    shared.set_fatal();
                }
                break;
            }
        }
    }

    shared.running.store(false, Ordering::Release);
    let mut state = shared.state.lock();
    if *state == ConnectionState::Connected {
        *state = ConnectionState::Disconnected;
    }
    tracing::debug!(
        "Receive task stopped ({} packets delivered, {} skipped)",
        reassembler.frames_delivered(),
        reassembler.frames_skipped()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueLimit;
    use shardlink_protocol::compression::compress;
    use shardlink_protocol::{
        LoginRequest, PacketFactory, ServerList, ServerRelay, XorCipher,
    };
    use std::time::{Duration, Instant};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const EXAMPLE: [u8; 6] = [0xA8, 0x00, 0x06, 0x01, 0x02, 0x03];

    fn connection(config: ConnectionConfig) -> Connection {
        Connection::new(config, Arc::new(PacketFactory::with_defaults()))
    }

    async fn listener() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    async fn wait_for_packets(conn: &Connection, count: usize) -> Vec<Inbound> {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut packets = Vec::new();
        while packets.len() < count {
            match conn.next_packet() {
                Some(packet) => packets.push(packet),
                None => {
                    assert!(Instant::now() < deadline, "timed out waiting for packets");
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            }
        }
        packets
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "timed out waiting for condition");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_receive_packets() {
        let (listener, port) = listener().await;
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            // Split one frame across writes
            socket.write_all(&EXAMPLE[..1]).await.unwrap();
            socket.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            socket.write_all(&EXAMPLE[1..3]).await.unwrap();
            socket.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            socket.write_all(&EXAMPLE[3..]).await.unwrap();
            socket.write_all(&[0x82, 0x03]).await.unwrap();
            socket
        });

        let mut conn = connection(ConnectionConfig::default());
        conn.connect("127.0.0.1", port).await.unwrap();
        assert!(conn.is_connected());
        assert_eq!(conn.state(), ConnectionState::Connected);

        let packets = wait_for_packets(&conn, 2).await;
        assert_eq!(packets[0].id, 0xA8);
        assert_eq!(packets[0].length, 6);
        assert_eq!(packets[0].downcast_ref::<ServerList>().unwrap().flags, 0x01);
        assert_eq!(packets[1].id, 0x82);

        let _socket = server.await.unwrap();
        conn.close().await;
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_handshake_and_login_bytes() {
        let (listener, port) = listener().await;
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4 + LoginRequest::SIZE];
            socket.read_exact(&mut buf).await.unwrap();
            buf
        });

        let mut conn = connection(ConnectionConfig::default());
        conn.connect("localhost", port).await.unwrap();
        assert_eq!(conn.seed(), None);

        conn.write_seed(0x0A0B0C0D).unwrap();
        conn.write_packet(&LoginRequest::new("lord", "british")).unwrap();
        assert_eq!(conn.pending_send(), 4 + LoginRequest::SIZE);
        conn.send_all().await.unwrap();
        assert_eq!(conn.pending_send(), 0);
        assert_eq!(conn.seed(), Some(0x0A0B0C0D));

        let received = server.await.unwrap();
        assert_eq!(&received[..4], &[0x0A, 0x0B, 0x0C, 0x0D]);
        assert_eq!(received[4], 0x80);
        assert_eq!(&received[5..9], b"lord");
        assert_eq!(conn.stats().bytes_sent, (4 + LoginRequest::SIZE) as u64);

        conn.close().await;
    }

    #[tokio::test]
    async fn test_send_all_empty_buffer() {
        let mut conn = connection(ConnectionConfig::default());
        conn.send_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_send_without_connection() {
        let mut conn = connection(ConnectionConfig::default());
        conn.write_raw(&[1, 2, 3]).unwrap();
        assert!(matches!(conn.send_all().await, Err(ShardError::NotConnected)));
    }

    #[tokio::test]
    async fn test_already_connected() {
        let (listener, port) = listener().await;
        let _server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(2)).await;
            drop(socket);
        });

        let mut conn = connection(ConnectionConfig::default());
        conn.connect("127.0.0.1", port).await.unwrap();

        let err = conn.connect("127.0.0.1", port).await.unwrap_err();
        assert!(matches!(err, ShardError::AlreadyConnected));
        assert!(conn.is_connected());

        conn.close().await;
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let mut conn = connection(ConnectionConfig::default());
        conn.close().await;
        conn.close().await;
        assert_eq!(conn.state(), ConnectionState::Disconnected);

        let (listener, port) = listener().await;
        let _server = tokio::spawn(async move { listener.accept().await.unwrap() });

        conn.connect("127.0.0.1", port).await.unwrap();
        conn.close().await;
        conn.close().await;
        assert!(!conn.is_connected());
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_peer_close() {
        let (listener, port) = listener().await;
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(&EXAMPLE).await.unwrap();
        });

        let mut conn = connection(ConnectionConfig::default());
        conn.connect("127.0.0.1", port).await.unwrap();
        server.await.unwrap();

        let packets = wait_for_packets(&conn, 1).await;
        assert_eq!(packets[0].id, 0xA8);

        wait_until(|| !conn.is_connected()).await;
        assert!(!conn.is_fatal());
        assert_eq!(conn.state(), ConnectionState::Disconnected);

        conn.close().await;
        conn.close().await;
    }

    #[tokio::test]
    async fn test_reconnect_after_peer_close() {
        let (listener, port) = listener().await;
        let server = tokio::spawn(async move {
            let (first, _) = listener.accept().await.unwrap();
            drop(first);
            let (mut second, _) = listener.accept().await.unwrap();
            second.write_all(&[0x82, 0x01]).await.unwrap();
            second
        });

        let mut conn = connection(ConnectionConfig::default());
        conn.connect("127.0.0.1", port).await.unwrap();
        wait_until(|| !conn.is_connected()).await;

        conn.connect("127.0.0.1", port).await.unwrap();
        let packets = wait_for_packets(&conn, 1).await;
        assert_eq!(packets[0].id, 0x82);

        let _second = server.await.unwrap();
        conn.close().await;
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let (listener, port) = listener().await;
        drop(listener);

        let mut conn = connection(ConnectionConfig::default());
        let err = conn.connect("127.0.0.1", port).await.unwrap_err();
        assert!(matches!(err, ShardError::Connect(_)));
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(!conn.is_connected());
    }

    #[tokio::test]
    async fn test_connect_unresolvable_host() {
        let mut conn = connection(ConnectionConfig::default());
        let err = conn.connect("shard.invalid", 2593).await.unwrap_err();
        assert!(matches!(err, ShardError::Connect(_)));
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let config = ConnectionConfig {
            queue_limit: QueueLimit::DropOldest(0),
            ..Default::default()
        };
        let mut conn = connection(config);
        let err = conn.connect("127.0.0.1", 1).await.unwrap_err();
        assert!(matches!(err, ShardError::Config(_)));
    }

    #[tokio::test]
    async fn test_compressed_stream() {
        let mut plain = Vec::new();
        for key in 0..100u32 {
            plain.extend_from_slice(&[0x8C, 127, 0, 0, 1, 0x0A, 0x21]);
            plain.extend_from_slice(&key.to_be_bytes());
        }
        let compressed = compress(&plain, CompressionType::Zlib).unwrap();

        let (listener, port) = listener().await;
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut seed = [0u8; 4];
            socket.read_exact(&mut seed).await.unwrap();
            for piece in compressed.chunks(50) {
                socket.write_all(piece).await.unwrap();
                socket.flush().await.unwrap();
            }
            socket
        });

        let mut conn = connection(ConnectionConfig::default());
        conn.connect("127.0.0.1", port).await.unwrap();
        conn.set_compression(CompressionType::Zlib);
        conn.set_use_decompression(true);
        conn.write_seed(1).unwrap();
        conn.send_all().await.unwrap();

        let packets = wait_for_packets(&conn, 100).await;
        let keys: Vec<u32> = packets
            .iter()
            .map(|p| p.downcast_ref::<ServerRelay>().unwrap().key)
            .collect();
        assert_eq!(keys, (0..100).collect::<Vec<_>>());

        let _socket = server.await.unwrap();
        conn.close().await;
    }

    #[tokio::test]
    async fn test_encrypted_stream() {
        let mut payload = EXAMPLE.to_vec();
        payload.extend_from_slice(&[0x82, 0x00]);
        XorCipher::new(0x21).apply(&mut payload);

        let (listener, port) = listener().await;
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut seed = [0u8; 4];
            socket.read_exact(&mut seed).await.unwrap();
            socket.write_all(&payload).await.unwrap();
            socket
        });

        let mut conn = connection(ConnectionConfig::default());
        conn.connect("127.0.0.1", port).await.unwrap();
        conn.set_encryption(Box::new(XorCipher::new(0x21)));
        conn.write_seed(7).unwrap();
        conn.send_all().await.unwrap();

        let packets = wait_for_packets(&conn, 2).await;
        assert_eq!(packets[0].id, 0xA8);
        assert_eq!(packets[1].id, 0x82);

        let _socket = server.await.unwrap();
        conn.close().await;
    }

    #[tokio::test]
    async fn test_encryption_survives_connect() {
        let mut payload = vec![0x82, 0x01];
        XorCipher::new(0x21).apply(&mut payload);

        let (listener, port) = listener().await;
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            // Sent before the client writes anything
            socket.write_all(&payload).await.unwrap();
            socket
        });

        let mut conn = connection(ConnectionConfig::default());
        conn.set_encryption(Box::new(XorCipher::new(0x21)));
        // Decompression does not carry over into a new connection
        conn.set_use_decompression(true);
        conn.connect("127.0.0.1", port).await.unwrap();

        let packets = wait_for_packets(&conn, 1).await;
        assert_eq!(packets[0].id, 0x82);
        assert_eq!(packets[0].length, 2);

        let _socket = server.await.unwrap();
        conn.close().await;
    }

    #[tokio::test]
    async fn test_connection_reset_is_fatal() {
        let (listener, port) = listener().await;
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            // Zero linger turns the close into a reset
            SockRef::from(&socket)
                .set_linger(Some(Duration::ZERO))
                .unwrap();
            drop(socket);
        });

        let mut conn = connection(ConnectionConfig::default());
        conn.connect("127.0.0.1", port).await.unwrap();
        server.await.unwrap();

        wait_until(|| conn.is_fatal()).await;
        assert!(!conn.is_connected());

        for _ in 0..3 {
            conn.write_raw(&[0x01]).unwrap();
            assert!(matches!(
                conn.send_all().await,
                Err(ShardError::TransportFatal(_))
            ));
        }
        assert!(conn.is_fatal());

        conn.close().await;
        assert!(conn.is_fatal());
    }

    #[tokio::test]
    async fn test_overflow_is_fatal() {
        let (listener, port) = listener().await;
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(&[0xA8, 0xFF, 0xFF]).await.unwrap();
            socket
        });

        let config = ConnectionConfig {
            staging_capacity: 4096,
            ..Default::default()
        };
        let mut conn = connection(config);
        conn.connect("127.0.0.1", port).await.unwrap();

        wait_until(|| conn.is_fatal()).await;
        assert!(!conn.is_connected());

        conn.write_raw(&[0x01]).unwrap();
        assert!(matches!(
            conn.send_all().await,
            Err(ShardError::TransportFatal(_))
        ));

        let _socket = server.await.unwrap();
        conn.close().await;
        assert!(conn.is_fatal());
    }

    #[tokio::test]
    async fn test_send_buffer_full() {
        let config = ConnectionConfig {
            send_buffer_capacity: 1024,
            ..Default::default()
        };
        let mut conn = connection(config);
        conn.write_raw(&[0u8; 1000]).unwrap();

        let err = conn.write_raw(&[0u8; 100]).unwrap_err();
        assert!(matches!(
            err,
            ShardError::SendBufferFull { needed: 100, available: 24 }
        ));
        assert!(conn.write_packet(&LoginRequest::new("a", "b")).is_err());
        assert_eq!(conn.pending_send(), 1000);
    }

    #[tokio::test]
    async fn test_no_packets_after_close() {
        let (listener, port) = listener().await;
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            for _ in 0..50 {
                if socket.write_all(&EXAMPLE).await.is_err() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        });

        let mut conn = connection(ConnectionConfig::default());
        conn.connect("127.0.0.1", port).await.unwrap();
        wait_for_packets(&conn, 1).await;

        conn.close().await;
        let queued = conn.pending_packets();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(conn.pending_packets(), queued);

        server.await.unwrap();
    }
}
