//! Shardlink - shard protocol client
//!
//! Connects to a login server, performs the seed handshake, logs in and
//! reports every packet the server sends until the connection ends or Ctrl-C.
//!
//! Usage: `shardlink [options-file]` (default `shardlink.cfg`)

use anyhow::Context;
use shardlink_config::{ClientConfig, DEFAULT_CONFIG_PATH};
use shardlink_core::{CompressionType, PacketId, SeedGenerator};
use shardlink_network::{Connection, ConnectionConfig, Inbound, QueueLimit};
use shardlink_protocol::{
    LoginRejected, LoginRequest, PacketFactory, ServerList, ServerRelay, ServerSelect,
    XorCipher,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// How often the packet queue is polled
const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let loaded = ClientConfig::load_from_file(&path);

    let log_level = loaded
        .as_ref()
        .map(|config| config.log_level.clone())
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)),
        )
        .init();

    info!("Shardlink client starting up...");

    let config = match loaded {
        Ok(config) => {
            info!("Configuration loaded from {}", path);
            config
        }
        Err(e) => {
            warn!("Failed to load {}: {}", path, e);
            warn!("Using default configuration");
            ClientConfig::default()
        }
    };
    config.display();

    let registry = Arc::new(PacketFactory::with_defaults());
    let mut conn = Connection::new(connection_config(&config), registry);

    let seeds = SeedGenerator::new();
    let seed = config.seed.unwrap_or_else(|| seeds.next_seed());
    login(&mut conn, &config, &config.host, config.port, seed).await?;

    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, closing connection");
                break;
            }
            _ = ticker.tick() => {}
        }

        let mut relay = None;
        for packet in conn.drain_packets() {
            match handle_packet(&packet) {
                Next::Continue => {}
                Next::Stop => {
                    conn.close().await;
                    return Ok(());
                }
                Next::Select(index) => {
                    info!("Selecting shard {}", index);
                    conn.write_packet(&ServerSelect::new(index))?;
                    conn.send_all().await.context("failed to select shard")?;
                }
                Next::Relay(target) => relay = Some(target),
            }
        }

        if let Some((host, port, key)) = relay {
            conn.close().await;
            info!("Relaying to game server {}:{}", host, port);
            login(&mut conn, &config, &host, port, key).await?;
            continue;
        }

        if !conn.is_connected() {
            if conn.is_fatal() {
                error!("Connection failed");
            } else {
                info!("Server closed the connection");
            }
            break;
        }
    }

    let stats = conn.stats();
    info!(
        "Received {} bytes, sent {} bytes, dropped {} packets",
        stats.bytes_received, stats.bytes_sent, stats.packets_dropped
    );
    conn.close().await;
    Ok(())
}

fn connection_config(config: &ClientConfig) -> ConnectionConfig {
    ConnectionConfig {
        queue_limit: match config.queue_capacity {
            0 => QueueLimit::Unbounded,
            capacity => QueueLimit::DropOldest(capacity),
        },
        deliver_unknown: config.deliver_unknown,
        connect_timeout: match config.connect_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        },
        ..Default::default()
    }
}

/// Connect, configure the stream and send the handshake seed plus login
async fn login(
    conn: &mut Connection,
    config: &ClientConfig,
    host: &str,
    port: u16,
    seed: u32,
) -> anyhow::Result<()> {
    // Before connecting, so the first bytes the server sends are decrypted
    match config.encryption_key {
        Some(key) => conn.set_encryption(Box::new(XorCipher::new(key))),
        None => conn.clear_encryption(),
    }

    conn.connect(host, port)
        .await
        .with_context(|| format!("failed to connect to {}:{}", host, port))?;

    if config.compression != CompressionType::None {
        conn.set_compression(config.compression);
        conn.set_use_decompression(true);
    }

    conn.write_seed(seed)?;
    if !config.account.is_empty() {
        conn.write_packet(&LoginRequest::new(&config.account, &config.password))?;
    }
    conn.send_all().await.context("failed to send login")?;

    info!("Sent seed 0x{:08X} to {}:{}", seed, host, port);
    Ok(())
}

enum Next {
    Continue,
    Stop,
    Select(u16),
    Relay((String, u16, u32)),
}

fn handle_packet(packet: &Inbound) -> Next {
    if let Some(list) = packet.downcast_ref::<ServerList>() {
        info!("Server list ({} of {} entries):", list.servers.len(), list.count);
        for server in &list.servers {
            info!(
                "    [{}] {} {} ({}% full)",
                server.index, server.name, server.address, server.percent_full
            );
        }
        if let Some(first) = list.servers.first() {
            return Next::Select(first.index);
        }
    } else if let Some(relay) = packet.downcast_ref::<ServerRelay>() {
        return Next::Relay((relay.address.to_string(), relay.port, relay.key));
    } else if let Some(rejected) = packet.downcast_ref::<LoginRejected>() {
        error!("Login rejected: {:?}", rejected.reason);
        return Next::Stop;
    } else {
        info!("Packet {} {} ({} bytes)", PacketId(packet.id), packet.name(), packet.length);
    }
    Next::Continue
}
