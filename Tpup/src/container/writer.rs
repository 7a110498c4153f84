//! Texture pack writer

use std::collections::HashSet;
use std::fs;
use std::io::{self, Write};
use std::path::Path;

use byteorder::{LittleEndian, WriteBytesExt};
use tempfile::Builder;

use super::envelope;
use super::{DATA_ALIGNMENT, Envelope, HEADER_SIZE, TABLE_ENTRY_SIZE, TEMP_PREFIX, TPF_MAGIC, TexturePack};
use crate::error::{Error, Result};

fn align(value: usize) -> usize {
    value.div_ceil(DATA_ALIGNMENT) * DATA_ALIGNMENT
}

/// Serialize a pack, applying its envelope
///
/// # Errors
/// Returns [`Error::InvalidContainer`] for duplicate or NUL-containing names
/// and packs that do not fit 32-bit offsets.
pub fn encode_pack(pack: &TexturePack) -> Result<Vec<u8>> {
    let mut seen = HashSet::with_capacity(pack.entries.len());
    for entry in &pack.entries {
        if entry.name.contains('\0') {
            return Err(Error::InvalidContainer(format!(
                "entry name {:?} contains NUL",
                entry.name
            )));
        }
        if !seen.insert(entry.name.as_str()) {
            return Err(Error::InvalidContainer(format!(
                "duplicate entry name '{}'",
                entry.name
            )));
        }
    }

    // Lay out names, then aligned payloads
    let table_end = HEADER_SIZE + pack.entries.len() * TABLE_ENTRY_SIZE;
    let mut name_offsets = Vec::with_capacity(pack.entries.len());
    let mut cursor = table_end;
    for entry in &pack.entries {
        name_offsets.push(cursor);
        cursor += entry.name.len() + 1;
    }

    let data_start = align(cursor);
    let mut data_offsets = Vec::with_capacity(pack.entries.len());
    let mut cursor = data_start;
    for entry in &pack.entries {
        data_offsets.push(cursor);
        cursor = align(cursor + entry.data.len());
    }
    let total = cursor;

    if u32::try_from(total).is_err() {
        return Err(Error::InvalidContainer(format!(
            "pack of {total} bytes exceeds 32-bit offsets"
        )));
    }

    let mut out = Vec::with_capacity(total);
    out.write_all(&TPF_MAGIC)?;
    out.write_u32::<LittleEndian>((total - data_start) as u32)?;
    out.write_u32::<LittleEndian>(pack.entries.len() as u32)?;
    out.write_u32::<LittleEndian>(pack.version)?;

    for (i, entry) in pack.entries.iter().enumerate() {
        out.write_u32::<LittleEndian>(data_offsets[i] as u32)?;
        out.write_u32::<LittleEndian>(entry.data.len() as u32)?;
        out.write_u8(entry.format)?;
        out.write_u8(entry.flags)?;
        out.write_u8(entry.mipmaps)?;
        out.write_u8(0)?;
        out.write_u32::<LittleEndian>(name_offsets[i] as u32)?;
        out.write_u32::<LittleEndian>(0)?;
    }

    for entry in &pack.entries {
        out.write_all(entry.name.as_bytes())?;
        out.write_u8(0)?;
    }

    for (i, entry) in pack.entries.iter().enumerate() {
        out.resize(data_offsets[i], 0);
        out.write_all(&entry.data)?;
    }
    out.resize(total, 0);

    match pack.envelope {
        Envelope::Plain => Ok(out),
        Envelope::Dcx => envelope::wrap(&out),
    }
}

/// Write a pack to disk atomically.
///
/// The bytes go to a temporary sibling first and are renamed over `path`
/// only once fully written and synced, so `path` is never half-written.
pub fn write_pack(path: &Path, pack: &TexturePack) -> Result<()> {
    let bytes = encode_pack(pack)?;
    write_atomic(path, &bytes)
}

/// Replace `path` with `bytes` via temp file + rename.
///
/// An existing file's permissions carry over to the replacement.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut temp = Builder::new()
        .prefix(TEMP_PREFIX)
        .tempfile_in(dir)
        .map_err(|e| Error::io_at(dir, e))?;
    temp.write_all(bytes).map_err(|e| Error::io_at(temp.path(), e))?;
    match fs::metadata(path) {
        Ok(meta) => temp
            .as_file()
            .set_permissions(meta.permissions())
            .map_err(|e| Error::io_at(temp.path(), e))?,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(Error::io_at(path, e)),
    }
    temp.as_file()
        .sync_all()
        .map_err(|e| Error::io_at(temp.path(), e))?;
    temp.persist(path).map_err(|e| Error::io_at(path, e.error))?;
    Ok(())
}
