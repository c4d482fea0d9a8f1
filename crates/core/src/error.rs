//! Core error types for Shardlink

#[derive(thiserror::Error, Debug)]
pub enum ShardError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connect failed: {0}")]
    Connect(String),

    #[error("Connection is already established")]
    AlreadyConnected,

    #[error("Connection is not established")]
    NotConnected,

    #[error("Fatal transport error: {0}")]
    TransportFatal(String),

    #[error("Frame of {declared} bytes exceeds staging capacity of {capacity} bytes")]
    FrameOverflow { declared: usize, capacity: usize },

    #[error("Send buffer full: need {needed} bytes, {available} available")]
    SendBufferFull { needed: usize, available: usize },

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

impl ShardError {
    /// Whether this error permanently disables the connection it came from
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Io(_)
                | Self::TransportFatal(_)
                | Self::FrameOverflow { .. }
                | Self::Compression(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ShardError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overflow_is_fatal() {
        let err = ShardError::FrameOverflow { declared: 70000, capacity: 65536 };
        assert!(err.is_fatal());
        assert_eq!(
            err.to_string(),
            "Frame of 70000 bytes exceeds staging capacity of 65536 bytes"
        );
    }

    #[test]
    fn test_desync_is_not_fatal() {
        assert!(!ShardError::InvalidData("short body".into()).is_fatal());
        assert!(!ShardError::AlreadyConnected.is_fatal());
    }
}
