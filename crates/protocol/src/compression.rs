//! Compression layer for the inbound stream
//!
//! Servers compress the whole byte stream after the handshake, not individual
//! packets, so decompression must be streaming: a [`Decompressor`] keeps its
//! state between chunks and may stop early when the output buffer is full.

use flate2::write::ZlibEncoder;
use flate2::{Compression, Decompress, FlushDecompress, Status};
use shardlink_core::{CompressionType, Result, ShardError};
use std::io::{Read, Write};

/// Stateful streaming decompressor
pub trait Decompressor: Send {
    /// Decompress as much of `input` as fits into `output`
    ///
    /// Returns `(consumed, written)`. `consumed < input.len()` means the output
    /// was filled; the caller must drain it and call again with the rest.
    fn decompress(&mut self, input: &[u8], output: &mut [u8]) -> Result<(usize, usize)>;

    /// Algorithm name for logs
    fn name(&self) -> &'static str;
}

/// Copies bytes through unchanged
#[derive(Debug, Default, Clone, Copy)]
pub struct Passthrough;

impl Decompressor for Passthrough {
    fn decompress(&mut self, input: &[u8], output: &mut [u8]) -> Result<(usize, usize)> {
        let n = input.len().min(output.len());
        output[..n].copy_from_slice(&input[..n]);
        Ok((n, n))
    }

    fn name(&self) -> &'static str {
        "none"
    }
}

/// Streaming zlib inflater
pub struct ZlibStream {
    inner: Decompress,
    finished: bool,
}

impl ZlibStream {
    pub fn new() -> Self {
        Self {
            inner: Decompress::new(true),
            finished: false,
        }
    }
}

impl Default for ZlibStream {
    fn default() -> Self {
        Self::new()
    }
}

impl Decompressor for ZlibStream {
    fn decompress(&mut self, input: &[u8], output: &mut [u8]) -> Result<(usize, usize)> {
        if self.finished {
            return finished_stream(input, "Zlib");
        }

        let in_before = self.inner.total_in();
        let out_before = self.inner.total_out();

        let status = self
            .inner
            .decompress(input, output, FlushDecompress::Sync)
            .map_err(|e| ShardError::Compression(format!("Zlib decompression failed: {}", e)))?;

        if status == Status::StreamEnd {
            tracing::debug!("Zlib stream ended");
            self.finished = true;
        }

        let consumed = (self.inner.total_in() - in_before) as usize;
        let written = (self.inner.total_out() - out_before) as usize;
        Ok((consumed, written))
    }

    fn name(&self) -> &'static str {
        "zlib"
    }
}

/// Streaming bzip2 decoder
pub struct Bzip2Stream {
    inner: bzip2::Decompress,
    finished: bool,
}

impl Bzip2Stream {
    pub fn new() -> Self {
        Self {
            inner: bzip2::Decompress::new(false),
            finished: false,
        }
    }
}

impl Default for Bzip2Stream {
    fn default() -> Self {
        Self::new()
    }
}

impl Decompressor for Bzip2Stream {
    fn decompress(&mut self, input: &[u8], output: &mut [u8]) -> Result<(usize, usize)> {
        if self.finished {
            return finished_stream(input, "BZ2");
        }

        let in_before = self.inner.total_in();
        let out_before = self.inner.total_out();

        let status = self
            .inner
            .decompress(input, output)
            .map_err(|e| ShardError::Compression(format!("BZ2 decompression failed: {}", e)))?;

        if status == bzip2::Status::StreamEnd {
            tracing::debug!("BZ2 stream ended");
            self.finished = true;
        }

        let consumed = (self.inner.total_in() - in_before) as usize;
        let written = (self.inner.total_out() - out_before) as usize;
        Ok((consumed, written))
    }

    fn name(&self) -> &'static str {
        "bzip2"
    }
}

/// Nothing more can come out of an ended stream; more input is corruption
fn finished_stream(input: &[u8], algorithm: &str) -> Result<(usize, usize)> {
    if input.is_empty() {
        Ok((0, 0))
    } else {
        Err(ShardError::Compression(format!(
            "{} stream already ended, {} trailing bytes",
            algorithm,
            input.len()
        )))
    }
}

/// Fresh streaming decompressor for `method`
pub fn new_decompressor(method: CompressionType) -> Box<dyn Decompressor> {
    match method {
        CompressionType::None => Box::new(Passthrough),
        CompressionType::Zlib => Box::new(ZlibStream::new()),
        CompressionType::Bzip2 => Box::new(Bzip2Stream::new()),
    }
}

/// Compress a whole buffer (server-side counterpart, used by tooling and tests)
pub fn compress(data: &[u8], method: CompressionType) -> Result<Vec<u8>> {
    let map_err = |e: std::io::Error| ShardError::Compression(e.to_string());
    match method {
        CompressionType::None => Ok(data.to_vec()),
        CompressionType::Zlib => {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(data).map_err(map_err)?;
            encoder.finish().map_err(map_err)
        }
        CompressionType::Bzip2 => {
            let mut encoder =
                bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default());
            encoder.write_all(data).map_err(map_err)?;
            encoder.finish().map_err(map_err)
        }
    }
}

/// Decompress a whole buffer in one go
pub fn decompress(data: &[u8], method: CompressionType) -> Result<Vec<u8>> {
    let map_err = |e: std::io::Error| ShardError::Compression(e.to_string());
    let mut decompressed = Vec::new();
    match method {
        CompressionType::None => decompressed.extend_from_slice(data),
        CompressionType::Zlib => {
            flate2::read::ZlibDecoder::new(data)
                .read_to_end(&mut decompressed)
                .map_err(map_err)?;
        }
        CompressionType::Bzip2 => {
            bzip2::read::BzDecoder::new(data)
                .read_to_end(&mut decompressed)
                .map_err(map_err)?;
        }
    }
    Ok(decompressed)
}
