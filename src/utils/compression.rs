//! Field compression.
//!
//! Both codecs emit self-checking frames: LZ4 uses the frame format with a content
//! checksum and Zstd sets the frame checksum flag. Input that was never compressed by
//! these encoders fails the magic, header or checksum test instead of decoding into
//! garbage.

use crate::error::{ProtocolError, Result};
use lz4_flex::frame::{FrameDecoder, FrameEncoder, FrameInfo};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionKind {
    #[default]
    Lz4,
    Zstd,
}

const ZSTD_LEVEL: i32 = 1;

/// Compresses data using the specified compression algorithm
///
/// # Errors
/// Returns `ProtocolError::CompressionFailed` if compression fails
pub fn compress(data: &[u8], kind: &CompressionKind) -> Result<Vec<u8>> {
    match kind {
        CompressionKind::Lz4 => {
            let mut info = FrameInfo::new();
            info.content_checksum = true;
            let mut encoder = FrameEncoder::with_frame_info(info, Vec::new());
            encoder
                .write_all(data)
                .map_err(|_| ProtocolError::CompressionFailed)?;
            encoder.finish().map_err(|_| ProtocolError::CompressionFailed)
        }
        CompressionKind::Zstd => {
            let mut encoder = zstd::stream::Encoder::new(Vec::new(), ZSTD_LEVEL)
                .map_err(|_| ProtocolError::CompressionFailed)?;
            encoder
                .include_checksum(true)
                .map_err(|_| ProtocolError::CompressionFailed)?;
            encoder
                .write_all(data)
                .map_err(|_| ProtocolError::CompressionFailed)?;
            encoder.finish().map_err(|_| ProtocolError::CompressionFailed)
        }
    }
}

/// Decompresses data that was compressed with the specified algorithm
///
/// `max_output` bounds the decompressed size; output is read in chunks and rejected as
/// soon as it passes the bound, so a tiny payload cannot expand into a memory bomb.
///
/// # Errors
/// Returns `ProtocolError::CompressionFailed` if:
/// - The frame magic, header or content checksum does not verify
/// - Output size exceeds `max_output`
pub fn decompress(data: &[u8], kind: &CompressionKind, max_output: usize) -> Result<Vec<u8>> {
    match *kind {
        CompressionKind::Lz4 => read_bounded(FrameDecoder::new(data), max_output),
        CompressionKind::Zstd => {
            let decoder = zstd::stream::Decoder::new(data)
                .map_err(|_| ProtocolError::CompressionFailed)?;
            read_bounded(decoder, max_output)
        }
    }
}

fn read_bounded<R: Read>(mut reader: R, max_output: usize) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut buffer = [0u8; 4096];
    loop {
        match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => {
                out.extend_from_slice(&buffer[..n]);
                if out.len() > max_output {
                    return Err(ProtocolError::CompressionFailed);
                }
            }
            Err(_) => return Err(ProtocolError::CompressionFailed),
        }
    }
    Ok(out)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const LIMIT: usize = 4096;

    #[test]
    fn test_lz4_compression_roundtrip() {
        let original = b"Hello, World! This is a test of LZ4 compression.";
        let compressed = compress(original, &CompressionKind::Lz4).unwrap();
        let decompressed = decompress(&compressed, &CompressionKind::Lz4, LIMIT).unwrap();
        assert_eq!(original.as_slice(), decompressed.as_slice());
    }

    #[test]
    fn test_zstd_compression_roundtrip() {
        let original = b"Hello, World! This is a test of Zstd compression.";
        let compressed = compress(original, &CompressionKind::Zstd).unwrap();
        let decompressed = decompress(&compressed, &CompressionKind::Zstd, LIMIT).unwrap();
        assert_eq!(original.as_slice(), decompressed.as_slice());
    }

    #[test]
    fn test_empty_input_roundtrip() {
        for kind in [CompressionKind::Lz4, CompressionKind::Zstd] {
            let compressed = compress(&[], &kind).unwrap();
            assert!(!compressed.is_empty());
            assert!(decompress(&compressed, &kind, LIMIT).unwrap().is_empty());
        }
    }

    #[test]
    fn test_output_limit_enforced() {
        let big = vec![0u8; LIMIT * 8];
        for kind in [CompressionKind::Lz4, CompressionKind::Zstd] {
            let compressed = compress(&big, &kind).unwrap();
            assert!(compressed.len() < LIMIT);
            assert!(matches!(
                decompress(&compressed, &kind, LIMIT),
                Err(ProtocolError::CompressionFailed)
            ));
        }
    }

    #[test]
    fn test_raw_lz4_block_rejected() {
        // A valid size-prepended block for "a"; not a frame
        let block = lz4_flex::compress_prepend_size(b"a");
        assert!(matches!(
            decompress(&block, &CompressionKind::Lz4, LIMIT),
            Err(ProtocolError::CompressionFailed)
        ));
    }

    #[test]
    fn test_corrupted_checksum_rejected() {
        for kind in [CompressionKind::Lz4, CompressionKind::Zstd] {
            let mut compressed = compress(b"checksummed content", &kind).unwrap();
            let last = compressed.len() - 1;
            compressed[last] ^= 0xFF;
            assert!(
                decompress(&compressed, &kind, LIMIT).is_err(),
                "{kind:?} accepted a bad checksum"
            );
        }
    }

    #[test]
    fn test_short_input_rejection() {
        let result = decompress(&[0x04, 0x22], &CompressionKind::Lz4, LIMIT);
        assert!(result.is_err(), "Should reject input shorter than a frame header");
    }

    #[test]
    fn test_zstd_garbage_rejected() {
        let result = decompress(b"definitely not zstd", &CompressionKind::Zstd, LIMIT);
        assert!(matches!(result, Err(ProtocolError::CompressionFailed)));
    }
}
