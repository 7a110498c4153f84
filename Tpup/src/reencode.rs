//! Pixel-format re-encoding through an external `texconv` process

use std::ffi::OsStr;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::format::PixelFormat;

/// Suffix `texconv` appends to the stem of re-encoded overrides
pub const CONVERTED_SUFFIX: &str = "_tpupconv";

/// Environment variable naming the `texconv` executable
pub const TEXCONV_ENV: &str = "TPUP_TEXCONV";

/// Produces a copy of a DDS file in a different pixel format.
pub trait Reencoder: Send + Sync {
    /// Re-encode `input` to `target`, returning the path of the new file.
    ///
    /// The input file is left untouched. The returned file is an
    /// intermediate the caller may delete.
    fn reencode(&self, input: &Path, target: PixelFormat) -> Result<PathBuf>;
}

/// Path of the intermediate written for `input`
#[must_use]
pub fn converted_path(input: &Path) -> PathBuf {
    let stem = input.file_stem().unwrap_or_default().to_string_lossy();
    input.with_file_name(format!("{stem}{CONVERTED_SUFFIX}.dds"))
}

/// Whether `path` is an intermediate left by an earlier re-encode
#[must_use]
pub fn is_intermediate(path: &Path) -> bool {
    path.file_stem()
        .and_then(OsStr::to_str)
        .is_some_and(|stem| stem.ends_with(CONVERTED_SUFFIX))
}

/// `texconv` invoked as a one-shot subprocess
#[derive(Debug, Clone)]
pub struct Texconv {
    program: PathBuf,
}

impl Default for Texconv {
    fn default() -> Self {
        Self::locate(None)
    }
}

impl Texconv {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Resolve the executable: explicit path, then `TPUP_TEXCONV`, then `PATH`
    #[must_use]
    pub fn locate(configured: Option<&Path>) -> Self {
        if let Some(path) = configured {
            return Self::new(path);
        }
        match std::env::var_os(TEXCONV_ENV) {
            Some(path) if !path.is_empty() => Self::new(path),
            _ => Self::new("texconv"),
        }
    }

    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Run texconv on `input`, writing into the input's directory
    fn run(&self, input: &Path, target: PixelFormat, suffix: Option<&str>) -> Result<()> {
        let dir = match input.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let mut cmd = Command::new(&self.program);
        cmd.arg("-f").arg(target.texconv_name());
        if let Some(suffix) = suffix {
            cmd.arg("-sx").arg(suffix);
        }
        cmd.arg("-o")
            .arg(dir)
            .arg("-y")
            .arg(input)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        debug!("Running {:?}", cmd);
        let output = cmd.output().map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                Error::ReencoderNotFound(self.program.display().to_string())
            } else {
                Error::io_at(&self.program, e)
            }
        })?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            warn!("texconv: {}", stderr.trim());
        }
        Err(Error::ReencodeFailed {
            code: output.status.code().unwrap_or(-1),
        })
    }

    /// Convert `input` in place: the output is `<stem>.dds` in the same
    /// directory, replacing `input` itself when it is already a DDS file.
    pub fn convert_in_place(&self, input: &Path, target: PixelFormat) -> Result<PathBuf> {
        self.run(input, target, None)?;
        Ok(input.with_extension("dds"))
    }
}

impl Reencoder for Texconv {
    fn reencode(&self, input: &Path, target: PixelFormat) -> Result<PathBuf> {
        self.run(input, target, Some(CONVERTED_SUFFIX))?;
        let output = converted_path(input);
        if !output.is_file() {
            return Err(Error::io_at(
                &output,
                io::Error::new(io::ErrorKind::NotFound, "texconv produced no output"),
            ));
        }
        Ok(output)
    }
}

/// Path of the safety copy `convert` makes of a DDS file
#[must_use]
pub fn convert_backup_path(file: &Path) -> PathBuf {
    let mut name = file.as_os_str().to_os_string();
    name.push(".bak");
    PathBuf::from(name)
}

/// Convert a single file to `format` in place.
///
/// A `.dds` input is copied to `<file>.bak` first (unless that copy already
/// exists) and moved back if the conversion fails.
///
/// # Errors
/// Returns [`Error::IoAt`] if `file` does not exist, and the re-encoder's
/// error if conversion fails.
pub fn convert(texconv: &Texconv, file: &Path, format: PixelFormat) -> Result<PathBuf> {
    if !file.is_file() {
        return Err(Error::io_at(
            file,
            io::Error::new(io::ErrorKind::NotFound, "file to be converted does not exist"),
        ));
    }

    let is_dds = file
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("dds"));
    let backup = convert_backup_path(file);
    let backed_up = if is_dds && !backup.exists() {
        std::fs::copy(file, &backup).map_err(|e| Error::io_at(&backup, e))?;
        true
    } else {
        false
    };

    match texconv.convert_in_place(file, format) {
        Ok(output) => {
            info!("Converted {} to {}", file.display(), format);
            Ok(output)
        }
        Err(e) => {
            if backed_up {
                std::fs::rename(&backup, file).map_err(|e| Error::io_at(file, e))?;
            }
            Err(e)
        }
    }
}
