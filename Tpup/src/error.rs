//! Error types for TPUP

use std::path::PathBuf;

use thiserror::Error;

use crate::format::PixelFormat;

/// The error type for TPUP operations.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum Error {
    // ==================== IO Errors ====================
    /// IO error from file operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// IO error with the path that caused it.
    #[error("{path}: {source}")]
    IoAt {
        /// The file or directory being accessed.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    // ==================== Scan Errors (fatal) ====================
    /// A root directory does not exist.
    #[error("directory not found: {0}")]
    RootNotFound(PathBuf),

    /// A root directory exists but could not be enumerated.
    #[error("directory could not be read: {path}: {reason}")]
    RootUnreadable {
        /// The root being scanned.
        path: PathBuf,
        /// Description of the underlying failure.
        reason: String,
    },

    /// A root directory disappeared while the run was in progress.
    #[error("directory vanished during the run: {0}")]
    RootVanished(PathBuf),

    // ==================== Container Errors ====================
    /// The file is not a texture pack (missing `TPF\0` or `DCX\0` magic).
    #[error("not a texture pack: {0}")]
    NotAContainer(PathBuf),

    /// The texture pack is structurally invalid.
    #[error("invalid texture pack: {0}")]
    InvalidContainer(String),

    /// The requested entry does not exist in the container.
    #[error("entry '{entry}' not found in {container}")]
    EntryNotFound {
        /// Container path.
        container: PathBuf,
        /// Requested entry name.
        entry: String,
    },

    /// An entry name that cannot be mapped to an output file name.
    #[error("invalid entry name: {0:?}")]
    InvalidEntryName(String),

    /// Failed to compress or decompress the DCX envelope.
    #[error("DCX envelope error: {0}")]
    Envelope(String),

    // ==================== Texture Errors ====================
    /// The file is not a readable DDS texture.
    #[error("invalid DDS texture: {0}")]
    InvalidTexture(String),

    /// The DDS texture uses a pixel format TPUP does not know.
    #[error("unsupported DDS pixel format: {0}")]
    UnsupportedFormat(String),

    /// The re-encoded texture still does not match the required format.
    #[error("re-encoded texture is {actual}, expected {expected}")]
    FormatMismatch {
        /// Format the entry requires.
        expected: PixelFormat,
        /// Format the re-encoder produced.
        actual: PixelFormat,
    },

    // ==================== Re-encode Errors ====================
    /// The re-encoder executable could not be started.
    #[error("texture converter not found: {0}")]
    ReencoderNotFound(String),

    /// The re-encoder exited with a non-zero status.
    #[error("conversion failed with code {code}")]
    ReencodeFailed {
        /// Process exit code (-1 if terminated by a signal).
        code: i32,
    },

    // ==================== Backup Errors ====================
    /// The pristine backup of a container could not be created.
    #[error("backup of {path} could not be created: {reason}")]
    BackupFailed {
        /// Container being protected.
        path: PathBuf,
        /// Description of the underlying failure.
        reason: String,
    },

    // ==================== Engine Errors ====================
    /// `start()` was called on an engine that has already run.
    #[error("engine has already been started")]
    AlreadyStarted,

    /// The worker thread pool could not be created.
    #[error("failed to build worker pool: {0}")]
    ThreadPool(String),
}

impl Error {
    /// Attach a path to an IO error.
    pub(crate) fn io_at(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::IoAt {
            path: path.into(),
            source,
        }
    }

    /// Returns true for scan-time conditions that abort a whole run.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::RootNotFound(_) | Error::RootUnreadable { .. } | Error::RootVanished(_)
        )
    }
}

impl From<rayon::ThreadPoolBuildError> for Error {
    fn from(err: rayon::ThreadPoolBuildError) -> Self {
        Error::ThreadPool(err.to_string())
    }
}

/// Result type for TPUP operations.
pub type Result<T> = std::result::Result<T, Error>;
