//! # Receive Pipeline
//!
//! Per-chunk transforms between the socket and the frame reassembler:
//!
//! ```text
//! raw chunk → decrypt (in place) → decompress or copy into staging → parse
//! ```
//!
//! Settings changed through the connection take effect from the next chunk.

use crate::queue::PacketQueue;
use crate::reassembler::FrameReassembler;
use shardlink_core::{CompressionType, Result, ShardError};
use shardlink_protocol::{new_decompressor, Decompressor, Decryptor, Passthrough};

/// Decryption and decompression state of one connection
pub struct ReceivePipeline {
    decryptor: Option<Box<dyn Decryptor>>,
    compression: CompressionType,
    /// Present while decompression is enabled
    decompressor: Option<Box<dyn Decompressor>>,
}

impl ReceivePipeline {
    pub fn new() -> Self {
        Self {
            decryptor: None,
            compression: CompressionType::Zlib,
            decompressor: None,
        }
    }

    pub fn set_decryptor(&mut self, decryptor: Box<dyn Decryptor>) {
        self.decryptor = Some(decryptor);
    }

    pub fn clear_decryptor(&mut self) {
        self.decryptor = None;
    }

    pub fn has_decryptor(&self) -> bool {
        self.decryptor.is_some()
    }

    /// Algorithm used once decompression is enabled
    ///
    /// Restarts the stream if decompression is already on.
    pub fn set_compression(&mut self, compression: CompressionType) {
        self.compression = compression;
        if self.decompressor.is_some() {
            self.decompressor = Some(new_decompressor(compression));
        }
    }

    pub fn compression(&self) -> CompressionType {
        self.compression
    }

    /// Turn stream decompression on or off
    ///
    /// Enabling starts a fresh stream; enabling again while on keeps the
    /// current stream state.
    pub fn set_use_decompression(&mut self, enabled: bool) {
        match (enabled, self.decompressor.is_some()) {
            (true, false) => {
                tracing::debug!("Decompression enabled ({})", self.compression.as_str());
                self.decompressor = Some(new_decompressor(self.compression));
            }
            (false, true) => {
                tracing::debug!("Decompression disabled");
                self.decompressor = None;
            }
            _ => {}
        }
    }

    pub fn uses_decompression(&self) -> bool {
        self.decompressor.is_some()
    }

    /// Turn decompression off; the decryptor and the selected algorithm stay
    pub fn reset_decompression(&mut self) {
        self.decompressor = None;
    }

    /// Run one received chunk through the transforms and the reassembler
    ///
    /// `chunk` is decrypted in place. Returns the number of staged bytes the
    /// reassembler consumed.
    ///
    /// # Errors
    /// Decompression failures, frame errors from the reassembler, and a staging
    /// buffer that is full while no frame in it can complete.
    pub fn process(
        &mut self,
        chunk: &mut [u8],
        reassembler: &mut FrameReassembler,
        queue: &PacketQueue,
    ) -> Result<usize> {
        if chunk.is_empty() {
            return Ok(0);
        }

        if let Some(decryptor) = self.decryptor.as_mut() {
            decryptor.decrypt(chunk);
        }

        let mut passthrough = Passthrough;
        let stream: &mut dyn Decompressor = match self.decompressor.as_deref_mut() {
            Some(decompressor) => decompressor,
            None => &mut passthrough,
        };

        let mut input: &[u8] = chunk;
        let mut parsed_total = 0;

        loop {
            let spare = reassembler.staging().spare_len();
            let (consumed, written) = if spare == 0 {
                (0, 0)
            } else {
                stream.decompress(input, reassembler.staging_mut().spare_mut())?
            };
            reassembler.staging_mut().commit(written);
            input = &input[consumed..];

            let parsed = reassembler.parse(queue)?;
            parsed_total += parsed;

            // Output space left over means the stream has nothing more buffered
            if input.is_empty() && written < spare {
                break;
            }

            if consumed == 0 && written == 0 && parsed == 0 {
                return Err(ShardError::TransportFatal(format!(
                    "Staging buffer full ({} bytes) without a complete frame",
                    reassembler.staging().capacity()
                )));
            }
        }

        Ok(parsed_total)
    }
}

impl Default for ReceivePipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ReceivePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReceivePipeline")
            .field("decryption", &self.decryptor.is_some())
            .field("compression", &self.compression)
            .field("decompression", &self.decompressor.is_some())
            .finish()
    }
}
