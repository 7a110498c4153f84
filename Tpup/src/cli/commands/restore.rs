//! CLI command for restoring container backups

use std::path::Path;

use anyhow::Context;

use crate::backup::restore;

pub fn execute(game_dir: &Path) -> anyhow::Result<bool> {
    let found = restore(game_dir)
        .with_context(|| format!("Failed to restore backups in {}", game_dir.display()))?;
    if found > 0 {
        println!("{found} backups restored.");
    } else {
        println!("No backups found.");
    }
    Ok(true)
}
