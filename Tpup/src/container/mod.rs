//! Texture pack (TPF) container reader/writer
//!
//! A texture pack is a flat list of named DDS payloads. Layout, little-endian:
//!
//! ```text
//! header (16 bytes)   magic "TPF\0" | data_size u32 | entry_count u32 | version u32
//! entry table         entry_count x 20 bytes:
//!                     data_offset u32 | data_size u32 | format u8 | flags u8 |
//!                     mipmaps u8 | reserved u8 | name_offset u32 | reserved u32
//! name table          NUL-terminated UTF-8 names
//! payloads            16-byte aligned
//! ```
//!
//! A pack may be wrapped whole in a zlib envelope
//! (`"DCX\0" | uncompressed_size u32 | compressed_size u32 | zlib stream`).
//! The envelope is kept when a pack is written back.

mod envelope;
mod reader;
mod types;
mod writer;

pub use reader::{
    ReadSeek, TpfReader, is_container, list_entries, open_reader, read_entry, read_pack,
};
pub use types::*;
pub use writer::{encode_pack, write_pack};

/// Magic bytes of a bare texture pack
pub const TPF_MAGIC: [u8; 4] = [b'T', b'P', b'F', 0];

/// Magic bytes of a zlib-enveloped texture pack
pub const DCX_MAGIC: [u8; 4] = [b'D', b'C', b'X', 0];

/// Version written into new packs
pub const DEFAULT_VERSION: u32 = 0x0002_0300;

/// Size of the fixed header
pub const HEADER_SIZE: usize = 16;

/// Size of one entry table record
pub const TABLE_ENTRY_SIZE: usize = 20;

/// Payload alignment
pub const DATA_ALIGNMENT: usize = 16;

/// Longest entry name accepted when reading
pub const MAX_NAME_LENGTH: usize = 1024;

/// File name prefix of temporary files created next to containers.
///
/// The scanner never treats such files as containers.
pub const TEMP_PREFIX: &str = ".tpup-";
