//! CLI command for single-file pixel format conversion

use std::path::Path;

use anyhow::Context;

use crate::cli::progress::{PICTURE, print_step};
use crate::format::PixelFormat;
use crate::reencode::{Texconv, convert};

pub fn execute(file: &Path, format: PixelFormat, texconv: Option<&Path>) -> anyhow::Result<bool> {
    let texconv = Texconv::locate(texconv);
    print_step(
        1,
        1,
        PICTURE,
        &format!("Converting {} to {format}...", file.display()),
    );
    let output = convert(&texconv, file, format)
        .with_context(|| format!("Failed to convert {}", file.display()))?;
    println!("Wrote {}", output.display());
    Ok(true)
}
