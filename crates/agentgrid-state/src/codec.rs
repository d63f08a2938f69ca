//! Gzip framing for persisted values.

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

use crate::error::{StateError, StateResult};

pub fn compress(raw: &[u8]) -> StateResult<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(raw.len() / 2), Compression::default());
    encoder
        .write_all(raw)
        .map_err(|e| StateError::Compress(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| StateError::Compress(e.to_string()))
}

pub fn decompress(compressed: &[u8]) -> StateResult<Vec<u8>> {
    let mut decoder = GzDecoder::new(compressed);
    let mut raw = Vec::new();
    decoder
        .read_to_end(&mut raw)
        .map_err(|e| StateError::Decompress(e.to_string()))?;
    Ok(raw)
}
