//! Run configuration

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Direction of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Extract every entry of every container under the game directory
    Unpack,
    /// Inject overrides into the containers under the game directory
    Repack,
}

/// Everything an engine needs to run.
///
/// Serializable so front ends can persist the user's last settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TpupConfig {
    pub mode: Mode,
    /// Install root containing the containers
    pub game_dir: PathBuf,
    /// Output root (unpack) or override root (repack)
    pub target_dir: PathBuf,
    /// Keep re-encoded intermediates next to their overrides
    #[serde(default)]
    pub preserve_converted: bool,
    /// Worker count; 0 means one per available core
    #[serde(default)]
    pub threads: usize,
    /// Explicit `texconv` executable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub texconv: Option<PathBuf>,
}

impl TpupConfig {
    pub fn new(mode: Mode, game_dir: impl Into<PathBuf>, target_dir: impl Into<PathBuf>) -> Self {
        Self {
            mode,
            game_dir: game_dir.into(),
            target_dir: target_dir.into(),
            preserve_converted: false,
            threads: 0,
            texconv: None,
        }
    }

    pub fn unpack(game_dir: impl Into<PathBuf>, out_dir: impl Into<PathBuf>) -> Self {
        Self::new(Mode::Unpack, game_dir, out_dir)
    }

    pub fn repack(game_dir: impl Into<PathBuf>, override_dir: impl Into<PathBuf>) -> Self {
        Self::new(Mode::Repack, game_dir, override_dir)
    }

    #[must_use]
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    #[must_use]
    pub fn with_preserve_converted(mut self, preserve: bool) -> Self {
        self.preserve_converted = preserve;
        self
    }

    #[must_use]
    pub fn with_texconv(mut self, program: impl Into<PathBuf>) -> Self {
        self.texconv = Some(program.into());
        self
    }

    /// Worker count after clamping to the machine
    #[must_use]
    pub fn worker_count(&self) -> usize {
        resolve_threads(self.threads)
    }

    /// Load a configuration saved with [`TpupConfig::save`]
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::io_at(path, e))?;
        serde_json::from_str(&text).map_err(|e| {
            Error::io_at(path, std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })
    }

    /// Save as pretty-printed JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, text).map_err(|e| Error::io_at(path, e))
    }
}

/// Number of CPUs available, at least 1
#[must_use]
pub fn available_threads() -> usize {
    std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
}

/// Clamp a requested worker count to `[1, available]`; 0 means all.
#[must_use]
pub fn resolve_threads(requested: usize) -> usize {
    let available = available_threads();
    if requested == 0 || requested > available {
        available
    } else {
        requested
    }
}
