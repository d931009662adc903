//! Packed observation support
//!
//! Observations may be stored as LZ4 or Zstd compressed JSON. Packed
//! payloads are recognised by their frame magic number, either as raw
//! bytes or base64 encoded so they survive text formats like JSON lines.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use std::io::{Read, Write};

use crate::batch::Value;
use crate::error::{PrelearnerError, Result};

const LZ4_MAGIC: [u8; 4] = [0x04, 0x22, 0x4D, 0x18];
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

/// Leading base64 characters fixed by each magic number
const ENCODED_PREFIXES: [&str; 2] = ["BCJNG", "KLUv/"];

/// Compression algorithm selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionAlgorithm {
    /// LZ4 frame, fast
    #[default]
    Lz4,
    /// Zstd, high compression ratio
    Zstd,
}

/// Compression configuration
#[derive(Debug, Clone)]
pub struct CompressionConfig {
    /// Algorithm to use
    pub algorithm: CompressionAlgorithm,
    /// Zstd level (ignored for LZ4)
    pub level: i32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            algorithm: CompressionAlgorithm::Lz4,
            level: 3,
        }
    }
}

/// Returns the algorithm a payload was packed with, if any
pub fn detect(data: &[u8]) -> Option<CompressionAlgorithm> {
    match data.get(0..4) {
        Some(magic) if magic == LZ4_MAGIC => Some(CompressionAlgorithm::Lz4),
        Some(magic) if magic == ZSTD_MAGIC => Some(CompressionAlgorithm::Zstd),
        _ => None,
    }
}

/// Pack a value into a base64 encoded compressed payload
pub fn pack(value: &Value, config: &CompressionConfig) -> Result<Value> {
    let packed = pack_bytes(value, config)?;
    Ok(Value::Str(STANDARD.encode(&packed)))
}

/// Pack a value into a raw compressed payload
pub fn pack_bytes(value: &Value, config: &CompressionConfig) -> Result<Bytes> {
    let encoded = serde_json::to_vec(value).map_err(|e| PrelearnerError::Compression {
        reason: format!("failed to encode value: {}", e),
    })?;

    let packed = match config.algorithm {
        CompressionAlgorithm::Lz4 => compress_lz4(&encoded)?,
        CompressionAlgorithm::Zstd => compress_zstd(&encoded, config.level)?,
    };
    Ok(packed)
}

/// Unpack `value` if it is a packed payload, otherwise return it unchanged
pub fn unpack_if_needed(value: &Value) -> Result<Value> {
    match value {
        Value::Bytes(data) => unpack_bytes(data).map(|v| v.unwrap_or_else(|| value.clone())),
        Value::Str(text) if ENCODED_PREFIXES.iter().any(|p| text.starts_with(p)) => {
            // Strings that merely look encoded are ordinary values
            match STANDARD.decode(text) {
                Ok(data) => unpack_bytes(&data).map(|v| v.unwrap_or_else(|| value.clone())),
                Err(_) => Ok(value.clone()),
            }
        }
        _ => Ok(value.clone()),
    }
}

fn unpack_bytes(data: &[u8]) -> Result<Option<Value>> {
    let decompressed = match detect(data) {
        Some(CompressionAlgorithm::Lz4) => decompress_lz4(data)?,
        Some(CompressionAlgorithm::Zstd) => decompress_zstd(data)?,
        None => return Ok(None),
    };

    serde_json::from_slice(&decompressed)
        .map(Some)
        .map_err(|e| PrelearnerError::Compression {
            reason: format!("packed payload is not a valid value: {}", e),
        })
}

fn compress_lz4(data: &[u8]) -> Result<Bytes> {
    let mut encoder = lz4_flex::frame::FrameEncoder::new(Vec::new());
    encoder.write_all(data).map_err(|e| PrelearnerError::Compression {
        reason: format!("lz4 encode: {}", e),
    })?;
    let output = encoder.finish().map_err(|e| PrelearnerError::Compression {
        reason: format!("lz4 encode: {}", e),
    })?;
    Ok(Bytes::from(output))
}

fn decompress_lz4(data: &[u8]) -> Result<Vec<u8>> {
    let mut output = Vec::new();
    lz4_flex::frame::FrameDecoder::new(data)
        .read_to_end(&mut output)
        .map_err(|e| PrelearnerError::Compression {
            reason: format!("invalid LZ4 data: {}", e),
        })?;
    Ok(output)
}

fn compress_zstd(data: &[u8], level: i32) -> Result<Bytes> {
    zstd::encode_all(data, level)
        .map(Bytes::from)
        .map_err(|e| PrelearnerError::Compression {
            reason: format!("zstd encode: {}", e),
        })
}

fn decompress_zstd(data: &[u8]) -> Result<Vec<u8>> {
    zstd::decode_all(data).map_err(|e| PrelearnerError::Compression {
        reason: format!("invalid Zstd data: {}", e),
    })
}
