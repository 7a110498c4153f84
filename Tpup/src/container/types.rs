//! Types for texture pack handling

use serde::Serialize;

use super::DEFAULT_VERSION;
use crate::error::{Error, Result};
use crate::format::PixelFormat;

/// Whether a pack on disk is wrapped in the zlib envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum Envelope {
    /// Bare `TPF\0` pack
    #[default]
    Plain,
    /// `DCX\0` zlib-wrapped pack
    Dcx,
}

/// Fixed header of a texture pack
#[derive(Debug, Clone)]
pub(crate) struct TpfHeader {
    /// Total size of the payload region
    ///
    /// Validated loosely; kept for format completeness.
    #[allow(dead_code)]
    pub data_size: u32,
    /// Number of entries
    pub entry_count: u32,
    /// Version/flags word, preserved on rewrite
    pub version: u32,
}

/// Index record of one entry, without its payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryInfo {
    /// Entry name, unique within the pack
    pub name: String,
    /// Raw pixel-format tag
    pub format: u8,
    /// Opaque flags byte
    pub flags: u8,
    /// Mipmap count
    pub mipmaps: u8,
    /// Offset of the payload from the start of the (unwrapped) pack
    pub offset: u32,
    /// Payload size in bytes
    pub size: u32,
}

impl EntryInfo {
    /// Decoded pixel format, if the tag is known
    #[must_use]
    pub fn pixel_format(&self) -> Option<PixelFormat> {
        PixelFormat::from_code(self.format)
    }
}

/// One texture payload inside a pack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureEntry {
    /// Entry name, unique within the pack
    pub name: String,
    /// Raw pixel-format tag
    pub format: u8,
    /// Opaque flags byte, preserved verbatim
    pub flags: u8,
    /// Mipmap count, preserved verbatim
    pub mipmaps: u8,
    /// DDS file contents
    pub data: Vec<u8>,
}

impl TextureEntry {
    /// Create an entry with default flags
    pub fn new(name: impl Into<String>, format: PixelFormat, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            format: format.code(),
            flags: 0,
            mipmaps: 1,
            data,
        }
    }

    /// Decoded pixel format, if the tag is known
    #[must_use]
    pub fn pixel_format(&self) -> Option<PixelFormat> {
        PixelFormat::from_code(self.format)
    }
}

/// A fully loaded texture pack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TexturePack {
    /// Version/flags word from the header
    pub version: u32,
    /// Envelope the pack was read from (and will be written with)
    pub envelope: Envelope,
    /// Entries in on-disk order
    pub entries: Vec<TextureEntry>,
}

impl Default for TexturePack {
    fn default() -> Self {
        Self::new()
    }
}

impl TexturePack {
    #[must_use]
    pub fn new() -> Self {
        Self {
            version: DEFAULT_VERSION,
            envelope: Envelope::Plain,
            entries: Vec::new(),
        }
    }

    /// Set the envelope used when writing
    #[must_use]
    pub fn with_envelope(mut self, envelope: Envelope) -> Self {
        self.envelope = envelope;
        self
    }

    /// Append an entry
    ///
    /// # Errors
    /// Returns [`Error::InvalidContainer`] if an entry with the same name exists.
    pub fn push(&mut self, entry: TextureEntry) -> Result<()> {
        if self.entry(&entry.name).is_some() {
            return Err(Error::InvalidContainer(format!(
                "duplicate entry name '{}'",
                entry.name
            )));
        }
        self.entries.push(entry);
        Ok(())
    }

    /// Look up an entry by exact name
    #[must_use]
    pub fn entry(&self, name: &str) -> Option<&TextureEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Replace an entry's payload wholesale, keeping its format tag and flags.
    ///
    /// # Errors
    /// Returns [`Error::InvalidContainer`] if no entry has this name.
    pub fn replace_entry(&mut self, name: &str, data: Vec<u8>) -> Result<()> {
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.name == name)
            .ok_or_else(|| Error::InvalidContainer(format!("no entry named '{name}'")))?;
        entry.data = data;
        Ok(())
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
