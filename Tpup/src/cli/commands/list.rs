//! CLI command for listing texture pack contents

use std::path::Path;

use crate::container::{EntryInfo, list_entries};

/// Format byte size for human-readable output
fn format_size(bytes: u32) -> String {
    if bytes >= 1_048_576 {
        format!("{:.1}M", f64::from(bytes) / 1_048_576.0)
    } else if bytes >= 1024 {
        format!("{:.1}K", f64::from(bytes) / 1024.0)
    } else {
        format!("{bytes}")
    }
}

fn format_name(entry: &EntryInfo) -> String {
    entry
        .pixel_format()
        .map_or_else(|| format!("tag {}", entry.format), |f| f.as_str().to_string())
}

pub fn execute(container: &Path, json: bool) -> anyhow::Result<bool> {
    let entries = list_entries(container)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(true);
    }

    for entry in &entries {
        println!(
            "{:>10}  {:<8} {:>3} mips  {}",
            format_size(entry.size),
            format_name(entry),
            entry.mipmaps,
            entry.name
        );
    }
    println!("{} textures", entries.len());
    Ok(true)
}
