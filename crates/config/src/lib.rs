//! Shardlink Configuration Management
//!
//! Loads the client's options file (`shardlink.cfg`).
//!
//! # Format
//!
//! One `key = value` option per line. Blank lines and lines starting with `#`
//! are ignored. Unknown keys are logged and skipped; a malformed value keeps
//! the default and logs a warning.
//!
//! ```text
//! # Login server
//! host = login.example.com
//! port = 2593
//! account = lordbritish
//! password = secret
//! compression = zlib
//! ```

use shardlink_core::{CompressionType, Result, ShardError};
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// Default options file in the working directory
pub const DEFAULT_CONFIG_PATH: &str = "shardlink.cfg";

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server hostname or IP (from "host" option)
    pub host: String,
    /// Server port (from "port" option, default: 2593)
    pub port: u16,
    /// Account name (from "account" option)
    pub account: String,
    /// Account password (from "password" option)
    pub password: String,
    /// Handshake seed (from "seed" option, decimal or 0x-prefixed hex)
    ///
    /// `None` picks a random seed at connect time.
    pub seed: Option<u32>,
    /// Stream compression (from "compression" option: none, zlib, bzip2)
    pub compression: CompressionType,
    /// Stream decryption key (from "encryption_key" option)
    ///
    /// `None` leaves the stream unencrypted.
    pub encryption_key: Option<u8>,
    /// Packet queue limit (from "queue_capacity" option, 0 = unbounded)
    pub queue_capacity: usize,
    /// Deliver packets with unknown identifiers (from "deliver_unknown" option)
    pub deliver_unknown: bool,
    /// Connect timeout in seconds (from "connect_timeout" option, 0 = none)
    pub connect_timeout_secs: u64,
    /// Log filter used when `RUST_LOG` is unset (from "log_level" option)
    pub log_level: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 2593,
            account: String::new(),
            password: String::new(),
            seed: None,
            compression: CompressionType::None,
            encryption_key: None,
            queue_capacity: 0,
            deliver_unknown: false,
            connect_timeout_secs: 0,
            log_level: "info".into(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from an options file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            ShardError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
    }

    /// Load `shardlink.cfg` from the working directory
    pub fn load_default() -> Result<Self> {
        Self::load_from_file(DEFAULT_CONFIG_PATH)
    }

    /// Parse options file content
    pub fn parse(content: &str) -> Result<Self> {
        let mut config = Self::default();

        for (number, line) in content.lines().enumerate() {
            let line = line.trim();

            // Skip comments and empty lines
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            match line.split_once('=') {
                Some((key, value)) => config.parse_option(key.trim(), value.trim()),
                None => tracing::warn!("Ignoring line {} without '=': {}", number + 1, line),
            }
        }

        if config.host.is_empty() {
            return Err(ShardError::Config("host must not be empty".to_string()));
        }

        Ok(config)
    }

    fn parse_option(&mut self, key: &str, value: &str) {
        match key {
            "host" => self.host = value.into(),
            "port" => self.port = parse_or(key, value, self.port),
            "account" => self.account = value.into(),
            "password" => self.password = value.into(),
            "seed" => {
                self.seed = match parse_u32(value) {
                    Some(seed) => Some(seed),
                    None => {
                        tracing::warn!("Invalid seed '{}', a random one will be used", value);
                        None
                    }
                };
            }
            "compression" => match CompressionType::from_name(value) {
                Some(compression) => self.compression = compression,
                None => tracing::warn!(
                    "Unknown compression '{}', keeping {}",
                    value,
                    self.compression.as_str()
                ),
            },
            "encryption_key" => {
                self.encryption_key = if value.is_empty() {
                    None
                } else {
                    match parse_u32(value).and_then(|key| u8::try_from(key).ok()) {
                        Some(key) => Some(key),
                        None => {
                            tracing::warn!("Invalid encryption_key '{}', encryption disabled", value);
                            None
                        }
                    }
                };
            }
            "queue_capacity" => self.queue_capacity = parse_or(key, value, self.queue_capacity),
            "deliver_unknown" => self.deliver_unknown = parse_or(key, value, self.deliver_unknown),
            "connect_timeout" => {
                self.connect_timeout_secs = parse_or(key, value, self.connect_timeout_secs)
            }
            "log_level" => self.log_level = value.into(),
            _ => {
                tracing::debug!("Unknown config option: {} = {}", key, value);
            }
        }
    }

    /// Display configuration summary
    pub fn display(&self) {
        tracing::info!("Client configuration:");
        tracing::info!("    Server: {}:{}", self.host, self.port);
        if self.account.is_empty() {
            tracing::info!("    Account: (none)");
        } else {
            tracing::info!("    Account: {}", self.account);
        }
        match self.seed {
            Some(seed) => tracing::info!("    Seed: 0x{:08X}", seed),
            None => tracing::info!("    Seed: random"),
        }
        tracing::info!("    Compression: {}", self.compression.as_str());
        tracing::info!(
            "    Encryption: {}",
            if self.encryption_key.is_some() { "xor" } else { "off" }
        );
        if self.queue_capacity == 0 {
            tracing::info!("    Queue: unbounded");
        } else {
            tracing::info!("    Queue: {} packets", self.queue_capacity);
        }
        tracing::info!("    Deliver unknown: {}", self.deliver_unknown);
    }
}

/// Parse `value`, keeping `current` (with a warning) when it is malformed
fn parse_or<T: FromStr + Copy>(key: &str, value: &str, current: T) -> T {
    match value.parse() {
        Ok(parsed) => parsed,
        Err(_) => {
            tracing::warn!("Invalid value for {}: '{}'", key, value);
            current
        }
    }
}

/// Decimal or `0x`-prefixed hexadecimal
fn parse_u32(value: &str) -> Option<u32> {
    match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => value.parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.port, 2593);
        assert_eq!(config.compression, CompressionType::None);
        assert!(config.seed.is_none());
        assert_eq!(config.queue_capacity, 0);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_parse_simple_config() {
        let config_text = r#"
# login server
host = login.example.com
port = 7775
account = lordbritish
password = secret word
seed = 0xC0A80001
compression = zlib
encryption_key = 42
queue_capacity = 512
deliver_unknown = true
connect_timeout = 10
log_level = debug
"#;
        let config = ClientConfig::parse(config_text).unwrap();
        assert_eq!(config.host, "login.example.com");
        assert_eq!(config.port, 7775);
        assert_eq!(config.account, "lordbritish");
        assert_eq!(config.password, "secret word");
        assert_eq!(config.seed, Some(0xC0A8_0001));
        assert_eq!(config.compression, CompressionType::Zlib);
        assert_eq!(config.encryption_key, Some(42));
        assert_eq!(config.queue_capacity, 512);
        assert!(config.deliver_unknown);
        assert_eq!(config.connect_timeout_secs, 10);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_malformed_values_keep_defaults() {
        let config_text = "port = lots\nseed = nope\ncompression = lzma\nencryption_key = 300\nmystery = 1\n";
        let config = ClientConfig::parse(config_text).unwrap();
        assert_eq!(config.port, 2593);
        assert!(config.seed.is_none());
        assert_eq!(config.compression, CompressionType::None);
        assert!(config.encryption_key.is_none());
    }

    #[test]
    fn test_empty_host_rejected() {
        assert!(ClientConfig::parse("host =\n").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "host = 10.0.0.5").unwrap();
        writeln!(file, "compression = bzip2").unwrap();

        let config = ClientConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.host, "10.0.0.5");
        assert_eq!(config.compression, CompressionType::Bzip2);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = ClientConfig::load_from_file(dir.path().join("missing.cfg")).unwrap_err();
        assert!(matches!(err, ShardError::Config(_)));
    }
}
