//! # TPUP
//!
//! Texture pack unpacker and repacker.
//!
//! TPUP extracts every texture of every texture-pack container under a game
//! install into plain DDS files, and splices edited DDS files back into the
//! containers. Before a container is rewritten for the first time, its
//! pristine bytes are saved next to it as `<container>.tpupbak`, so any
//! number of repack runs can be undone with [`backup::restore`].
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::path::Path;
//! use tpup::Tpup;
//!
//! let tpup = Tpup::unpack(Path::new("game"), Path::new("textures"), 0)?;
//! let summary = tpup.start()?;
//! for line in tpup.drain_errors() {
//!     eprintln!("{line}");
//! }
//! println!("{summary}");
//! # Ok::<(), tpup::Error>(())
//! ```
//!
//! Runs block the calling thread. To poll progress while a run is in flight,
//! share the engine behind an `Arc` and call [`Tpup::start`] from a worker
//! thread:
//!
//! ```no_run
//! use std::sync::Arc;
//! use tpup::prelude::*;
//!
//! let tpup = Arc::new(Tpup::new(TpupConfig::repack("game", "overrides")));
//! let runner = Arc::clone(&tpup);
//! let handle = std::thread::spawn(move || runner.start());
//! while !handle.is_finished() {
//!     if let Some(max) = tpup.progress_max() {
//!         println!("{}/{max}", tpup.progress_current());
//!     }
//!     std::thread::sleep(std::time::Duration::from_millis(100));
//! }
//! # Ok::<(), tpup::Error>(())
//! ```
//!
//! ## Feature Flags
//!
//! - `cli` - Enables the `tpup` command-line binary

pub mod backup;
pub mod config;
pub mod container;
mod dispatch;
pub mod engine;
pub mod error;
pub mod format;
pub mod reencode;
pub mod scan;
pub mod status;

// Re-exports for convenience
pub use config::{Mode, TpupConfig};
pub use engine::{RunSummary, Tpup};
pub use error::{Error, Result};

/// Prelude module for common imports
pub mod prelude {
    pub use crate::backup::{BACKUP_SUFFIX, BackupManager, backup_path, restore};
    pub use crate::config::{Mode, TpupConfig, resolve_threads};
    pub use crate::container::{
        EntryInfo, Envelope, TextureEntry, TexturePack, list_entries, read_entry, read_pack,
        write_pack,
    };
    pub use crate::engine::{RunSummary, Tpup};
    pub use crate::error::{Error, Result};
    pub use crate::format::{PixelFormat, detect_dds_format};
    pub use crate::reencode::{Reencoder, Texconv, convert};
    pub use crate::scan::{WorkItem, match_override};
    pub use crate::status::{CancelHandle, RunPhase, Termination};
}

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// CLI module (feature-gated)
#[cfg(feature = "cli")]
pub mod cli;
