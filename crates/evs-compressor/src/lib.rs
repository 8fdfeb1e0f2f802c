#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **evs-compressor** – optional, symmetric byte-size reduction stage.
//!
//! Selected by configuration (`COMPRESSOR_TOPIC`); absence means identity.
//! Every implementation must be lossless: `decompress(compress(b)) == b`.

use evs_types::EventSourcingError;
use flate2::read::{ZlibDecoder, ZlibEncoder};
use flate2::Compression;
use std::io::Read;

/// Topic under which [`DeflateCompressor`] registers itself.
pub const DEFLATE_TOPIC: &str = "compressor:deflate";

/// Symmetric, lossless byte-size reduction.
pub trait Compressor: Send + Sync {
    /// Stable topic identifying this compressor implementation.
    fn topic(&self) -> &'static str;

    /// Compress `bytes`. Must be reversible by [`Compressor::decompress`].
    fn compress(&self, bytes: &[u8]) -> Result<Vec<u8>, EventSourcingError>;

    /// Reverse a prior [`Compressor::compress`] call.
    fn decompress(&self, bytes: &[u8]) -> Result<Vec<u8>, EventSourcingError>;
}

/// Identity compressor, used when no `COMPRESSOR_TOPIC` is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCompressor;

impl Compressor for NoopCompressor {
    fn topic(&self) -> &'static str {
        "compressor:noop"
    }

    fn compress(&self, bytes: &[u8]) -> Result<Vec<u8>, EventSourcingError> {
        Ok(bytes.to_vec())
    }

    fn decompress(&self, bytes: &[u8]) -> Result<Vec<u8>, EventSourcingError> {
        Ok(bytes.to_vec())
    }
}

/// DEFLATE compressor at the default compression level.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeflateCompressor;

impl Compressor for DeflateCompressor {
    fn topic(&self) -> &'static str {
        DEFLATE_TOPIC
    }

    fn compress(&self, bytes: &[u8]) -> Result<Vec<u8>, EventSourcingError> {
        let mut encoder = ZlibEncoder::new(bytes, Compression::default());
        let mut out = Vec::new();
        encoder
            .read_to_end(&mut out)
            .map_err(|e| EventSourcingError::Integrity(format!("compression failed: {e}")))?;
        Ok(out)
    }

    fn decompress(&self, bytes: &[u8]) -> Result<Vec<u8>, EventSourcingError> {
        let mut decoder = ZlibDecoder::new(bytes);
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .map_err(|e| EventSourcingError::Integrity(format!("decompression failed: {e}")))?;
        Ok(out)
    }
}

/// Resolve a compressor by its `COMPRESSOR_TOPIC` configuration value.
/// Unknown topics are a [`EventSourcingError::Programming`] error, not a
/// silent fallback to identity.
pub fn resolve(topic: Option<&str>) -> Result<Box<dyn Compressor>, EventSourcingError> {
    match topic {
        None => Ok(Box::new(NoopCompressor)),
        Some(DEFLATE_TOPIC) => Ok(Box::new(DeflateCompressor)),
        Some(other) => Err(EventSourcingError::Programming(format!(
            "unknown compressor topic {other:?}"
        ))),
    }
}
