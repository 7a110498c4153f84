//! DCX zlib envelope

use std::cmp::Ordering;
use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;

use super::DCX_MAGIC;
use crate::error::{Error, Result};

/// Upper bound on the declared uncompressed size (1 GiB)
const MAX_UNCOMPRESSED_SIZE: u32 = 1 << 30;

/// Decode an envelope body. `reader` is positioned just after the magic.
pub(crate) fn unwrap<R: Read>(reader: &mut R) -> Result<Vec<u8>> {
    let uncompressed_size = reader.read_u32::<LittleEndian>()?;
    let compressed_size = reader.read_u32::<LittleEndian>()?;

    if uncompressed_size > MAX_UNCOMPRESSED_SIZE {
        return Err(Error::Envelope(format!(
            "declared size too large: {uncompressed_size} bytes"
        )));
    }

    // Neither buffer is sized from the header
    let mut compressed = Vec::new();
    reader
        .by_ref()
        .take(u64::from(compressed_size))
        .read_to_end(&mut compressed)
        .map_err(|e| Error::Envelope(format!("failed to read stream: {e}")))?;
    if compressed.len() != compressed_size as usize {
        return Err(Error::Envelope(format!(
            "truncated stream: header says {compressed_size} bytes, got {}",
            compressed.len()
        )));
    }

    // One byte past the declared size is enough to detect an oversized body
    let mut body = Vec::new();
    ZlibDecoder::new(compressed.as_slice())
        .take(u64::from(uncompressed_size) + 1)
        .read_to_end(&mut body)
        .map_err(|e| Error::Envelope(format!("failed to decompress: {e}")))?;

    match body.len().cmp(&(uncompressed_size as usize)) {
        Ordering::Equal => Ok(body),
        Ordering::Greater => Err(Error::Envelope(format!(
            "size mismatch: body exceeds the declared {uncompressed_size} bytes"
        ))),
        Ordering::Less => Err(Error::Envelope(format!(
            "size mismatch: header says {uncompressed_size}, got {}",
            body.len()
        ))),
    }
}

/// Wrap a bare pack in an envelope.
pub(crate) fn wrap(body: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(body)
        .map_err(|e| Error::Envelope(format!("failed to compress: {e}")))?;
    let compressed = encoder
        .finish()
        .map_err(|e| Error::Envelope(format!("failed to compress: {e}")))?;

    let mut out = Vec::with_capacity(12 + compressed.len());
    out.extend_from_slice(&DCX_MAGIC);
    out.write_u32::<LittleEndian>(body.len() as u32)?;
    out.write_u32::<LittleEndian>(compressed.len() as u32)?;
    out.extend_from_slice(&compressed);
    Ok(out)
}
