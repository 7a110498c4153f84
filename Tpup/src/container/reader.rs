//! Texture pack reader

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek, SeekFrom};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt};

use super::envelope;
use super::{
    DCX_MAGIC, EntryInfo, Envelope, HEADER_SIZE, MAX_NAME_LENGTH, TABLE_ENTRY_SIZE, TPF_MAGIC,
    TextureEntry, TexturePack, TpfHeader,
};
use crate::error::{Error, Result};

/// Trait for types that can Read and Seek
pub trait ReadSeek: Read + Seek + Send {}
impl<T: Read + Seek + Send> ReadSeek for T {}

/// Texture pack reader over an unwrapped pack stream
pub struct TpfReader<R: Read + Seek> {
    reader: R,
    header: Option<TpfHeader>,
    index: Vec<EntryInfo>,
}

impl<R: Read + Seek> TpfReader<R> {
    /// Create a new reader from a Read + Seek source positioned anywhere
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            header: None,
            index: Vec::new(),
        }
    }

    /// Version word from the header, once read
    pub fn version(&self) -> Option<u32> {
        self.header.as_ref().map(|h| h.version)
    }

    fn read_header(&mut self) -> Result<TpfHeader> {
        self.reader.seek(SeekFrom::Start(0))?;

        let mut magic = [0u8; 4];
        self.reader
            .read_exact(&mut magic)
            .map_err(|_| Error::InvalidContainer("truncated header".to_string()))?;
        if magic != TPF_MAGIC {
            return Err(Error::InvalidContainer(format!(
                "bad magic {magic:?}, expected TPF"
            )));
        }

        let data_size = self.reader.read_u32::<LittleEndian>()?;
        let entry_count = self.reader.read_u32::<LittleEndian>()?;
        let version = self.reader.read_u32::<LittleEndian>()?;

        Ok(TpfHeader {
            data_size,
            entry_count,
            version,
        })
    }

    /// Read the header and entry table
    ///
    /// # Errors
    /// Returns [`Error::InvalidContainer`] if the table is truncated, points
    /// outside the stream, or names an entry twice.
    pub fn read_index(&mut self) -> Result<&[EntryInfo]> {
        if self.header.is_some() {
            return Ok(&self.index);
        }

        let header = self.read_header()?;
        let stream_len = self.reader.seek(SeekFrom::End(0))?;

        let table_end = HEADER_SIZE as u64 + u64::from(header.entry_count) * TABLE_ENTRY_SIZE as u64;
        if table_end > stream_len {
            return Err(Error::InvalidContainer(format!(
                "entry table for {} entries exceeds pack size {stream_len}",
                header.entry_count
            )));
        }

        self.reader.seek(SeekFrom::Start(HEADER_SIZE as u64))?;
        let mut raw = Vec::with_capacity(header.entry_count as usize);
        for _ in 0..header.entry_count {
            let offset = self.reader.read_u32::<LittleEndian>()?;
            let size = self.reader.read_u32::<LittleEndian>()?;
            let format = self.reader.read_u8()?;
            let flags = self.reader.read_u8()?;
            let mipmaps = self.reader.read_u8()?;
            let _reserved = self.reader.read_u8()?;
            let name_offset = self.reader.read_u32::<LittleEndian>()?;
            let _reserved = self.reader.read_u32::<LittleEndian>()?;
            raw.push((offset, size, format, flags, mipmaps, name_offset));
        }

        let mut seen = HashSet::with_capacity(raw.len());
        let mut index = Vec::with_capacity(raw.len());
        for (offset, size, format, flags, mipmaps, name_offset) in raw {
            if u64::from(offset) + u64::from(size) > stream_len {
                return Err(Error::InvalidContainer(format!(
                    "entry data {offset}+{size} exceeds pack size {stream_len}"
                )));
            }
            let name = self.read_name(name_offset, stream_len)?;
            if !seen.insert(name.clone()) {
                return Err(Error::InvalidContainer(format!("duplicate entry name '{name}'")));
            }
            index.push(EntryInfo {
                name,
                format,
                flags,
                mipmaps,
                offset,
                size,
            });
        }

        self.header = Some(header);
        self.index = index;
        Ok(&self.index)
    }

    /// Read a NUL-terminated name
    fn read_name(&mut self, offset: u32, stream_len: u64) -> Result<String> {
        if u64::from(offset) >= stream_len {
            return Err(Error::InvalidContainer(format!(
                "name offset {offset} exceeds pack size {stream_len}"
            )));
        }
        self.reader.seek(SeekFrom::Start(u64::from(offset)))?;

        let mut bytes = Vec::new();
        loop {
            let mut byte = [0u8; 1];
            if self.reader.read(&mut byte)? == 0 {
                return Err(Error::InvalidContainer(format!(
                    "unterminated name at offset {offset}"
                )));
            }
            if byte[0] == 0 {
                break;
            }
            bytes.push(byte[0]);
            if bytes.len() > MAX_NAME_LENGTH {
                return Err(Error::InvalidContainer(format!(
                    "name at offset {offset} is too long"
                )));
            }
        }

        String::from_utf8(bytes)
            .map_err(|_| Error::InvalidContainer(format!("name at offset {offset} is not UTF-8")))
    }

    /// Read one entry's payload
    pub fn read_data(&mut self, entry: &EntryInfo) -> Result<Vec<u8>> {
        self.reader.seek(SeekFrom::Start(u64::from(entry.offset)))?;
        let mut data = vec![0u8; entry.size as usize];
        self.reader.read_exact(&mut data)?;
        Ok(data)
    }

    /// Load every entry with its payload
    pub fn read_all(&mut self) -> Result<Vec<TextureEntry>> {
        let index = self.read_index()?.to_vec();
        index
            .into_iter()
            .map(|info| {
                let data = self.read_data(&info)?;
                Ok(TextureEntry {
                    name: info.name,
                    format: info.format,
                    flags: info.flags,
                    mipmaps: info.mipmaps,
                    data,
                })
            })
            .collect()
    }
}

/// Open a container, unwrapping the envelope if present
///
/// # Errors
/// Returns [`Error::NotAContainer`] if the file has neither magic.
pub fn open_reader(path: &Path) -> Result<(Envelope, TpfReader<Box<dyn ReadSeek>>)> {
    let mut file = File::open(path).map_err(|e| Error::io_at(path, e))?;

    let mut magic = [0u8; 4];
    if file.read_exact(&mut magic).is_err() {
        return Err(Error::NotAContainer(path.to_path_buf()));
    }

    if magic == TPF_MAGIC {
        let source: Box<dyn ReadSeek> = Box::new(BufReader::new(file));
        Ok((Envelope::Plain, TpfReader::new(source)))
    } else if magic == DCX_MAGIC {
        let body = envelope::unwrap(&mut BufReader::new(file))?;
        let source: Box<dyn ReadSeek> = Box::new(Cursor::new(body));
        Ok((Envelope::Dcx, TpfReader::new(source)))
    } else {
        Err(Error::NotAContainer(path.to_path_buf()))
    }
}

/// Check the magic bytes of a file without parsing it
pub fn is_container(path: &Path) -> bool {
    let Ok(mut file) = File::open(path) else {
        return false;
    };
    let mut magic = [0u8; 4];
    file.read_exact(&mut magic).is_ok() && (magic == TPF_MAGIC || magic == DCX_MAGIC)
}

/// List the entries of a container without loading payloads
pub fn list_entries(path: &Path) -> Result<Vec<EntryInfo>> {
    let (_, mut reader) = open_reader(path)?;
    Ok(reader.read_index()?.to_vec())
}

/// Read a single entry's payload by exact name
pub fn read_entry(path: &Path, name: &str) -> Result<Vec<u8>> {
    let (_, mut reader) = open_reader(path)?;
    let info = reader
        .read_index()?
        .iter()
        .find(|e| e.name == name)
        .cloned()
        .ok_or_else(|| Error::EntryNotFound {
            container: path.to_path_buf(),
            entry: name.to_string(),
        })?;
    reader.read_data(&info)
}

/// Load a whole container into memory
pub fn read_pack(path: &Path) -> Result<TexturePack> {
    let (envelope, mut reader) = open_reader(path)?;
    let entries = reader.read_all()?;
    Ok(TexturePack {
        version: reader.version().unwrap_or(super::DEFAULT_VERSION),
        envelope,
        entries,
    })
}
