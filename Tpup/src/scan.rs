//! Directory scanning and work-list construction
//!
//! A scan walks one root, finds containers (unpack) or overrides (repack), and
//! freezes the result into a sorted list of [`WorkItem`]s before anything
//! executes.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::ffi::OsStr;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::backup::is_backup;
use crate::container::{EntryInfo, TEMP_PREFIX, is_container, list_entries, read_entry};
use crate::error::{Error, Result};
use crate::reencode::{converted_path, is_intermediate};
use crate::status::RunStatus;

/// Extension of extracted entries and override files
pub const TEXTURE_EXTENSION: &str = "dds";

/// One independent unit of work
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkItem {
    /// Copy one entry out of a container
    Extract {
        /// Absolute container path
        container: PathBuf,
        /// Container path relative to the install root
        relative: PathBuf,
        /// Entry name
        entry: String,
        /// Destination file
        output: PathBuf,
    },
    /// Replace one entry of a container with an override file
    Inject {
        /// Absolute container path
        container: PathBuf,
        /// Container path relative to the install root
        relative: PathBuf,
        /// Entry name as stored in the container
        entry: String,
        /// Override file
        source: PathBuf,
        /// Pixel-format tag the entry requires
        format: u8,
    },
}

impl WorkItem {
    /// Absolute path of the container this item reads or mutates
    #[must_use]
    pub fn container(&self) -> &Path {
        match self {
            WorkItem::Extract { container, .. } | WorkItem::Inject { container, .. } => container,
        }
    }

    /// Container path relative to the install root
    #[must_use]
    pub fn relative(&self) -> &Path {
        match self {
            WorkItem::Extract { relative, .. } | WorkItem::Inject { relative, .. } => relative,
        }
    }

    #[must_use]
    pub fn entry(&self) -> &str {
        match self {
            WorkItem::Extract { entry, .. } | WorkItem::Inject { entry, .. } => entry,
        }
    }

    fn sort_key(&self) -> (&Path, &str) {
        (self.relative(), self.entry())
    }
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.relative().display(), self.entry())
    }
}

/// Container and entry an override file addresses
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OverrideTarget {
    /// Container path relative to the install root
    pub container: PathBuf,
    /// Requested entry name (not yet resolved against the container)
    pub entry: String,
}

/// Map an override's path, relative to the override root, to its target.
///
/// The layout is `<container relative path>/<entry name>.dds`, the extension
/// compared case-insensitively. Returns `None` for anything else.
#[must_use]
pub fn match_override(relative: &Path) -> Option<OverrideTarget> {
    let ext = relative.extension()?;
    if !ext.eq_ignore_ascii_case(TEXTURE_EXTENSION) {
        return None;
    }
    let entry = relative.file_stem()?.to_str()?;
    if entry.is_empty() {
        return None;
    }
    let container = relative.parent()?;
    if container.as_os_str().is_empty() {
        return None;
    }
    Some(OverrideTarget {
        container: container.to_path_buf(),
        entry: entry.to_string(),
    })
}

/// Find the entry an override names: exact match first, then a unique
/// ASCII-case-insensitive match.
pub fn resolve_entry_name<'a>(entries: &'a [EntryInfo], wanted: &str) -> Option<&'a EntryInfo> {
    if let Some(exact) = entries.iter().find(|e| e.name == wanted) {
        return Some(exact);
    }
    let mut folded = entries.iter().filter(|e| e.name.eq_ignore_ascii_case(wanted));
    match (folded.next(), folded.next()) {
        (Some(only), None) => Some(only),
        _ => None,
    }
}

/// File name an entry is extracted to
///
/// # Errors
/// Returns [`Error::InvalidEntryName`] for names that would escape the
/// output directory.
pub fn output_file_name(entry: &str) -> Result<String> {
    if entry.is_empty()
        || entry == "."
        || entry == ".."
        || entry.contains(['/', '\\', ':'])
    {
        return Err(Error::InvalidEntryName(entry.to_string()));
    }
    Ok(format!("{entry}.{TEXTURE_EXTENSION}"))
}

fn require_dir(root: &Path) -> Result<()> {
    if root.is_dir() {
        Ok(())
    } else {
        Err(Error::RootNotFound(root.to_path_buf()))
    }
}

fn relative_to(root: &Path, path: &Path) -> PathBuf {
    path.strip_prefix(root).unwrap_or(path).to_path_buf()
}

/// Walk `root` for regular files, sorted by name within each directory.
///
/// Failing to read the root itself is fatal; unreadable subtrees are
/// reported and skipped.
fn walk_files(
    root: &Path,
    skip: Option<&Path>,
    status: &RunStatus,
) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || skip.is_none_or(|skip| e.path() != skip));

    for entry in walker {
        match entry {
            Ok(entry) if entry.file_type().is_file() => files.push(entry.into_path()),
            Ok(_) => {}
            Err(e) if e.depth() == 0 => {
                return Err(Error::RootUnreadable {
                    path: root.to_path_buf(),
                    reason: e.to_string(),
                });
            }
            Err(e) => {
                let path = e.path().map_or_else(|| root.to_path_buf(), Path::to_path_buf);
                status.error(format!("{}: {e}", relative_to(root, &path).display()));
            }
        }
    }
    Ok(files)
}

/// Backups and in-flight temp files are never treated as containers
fn is_reserved(path: &Path) -> bool {
    let hidden_temp = path
        .file_name()
        .and_then(OsStr::to_str)
        .is_some_and(|name| name.starts_with(TEMP_PREFIX));
    hidden_temp || is_backup(path)
}

fn is_candidate_container(path: &Path) -> bool {
    !is_reserved(path) && is_container(path)
}

/// Whether the entry already holds `source`, or the preserved re-encode of it
fn already_injected(container: &Path, info: &EntryInfo, source: &Path) -> bool {
    let candidates: Vec<PathBuf> = [source.to_path_buf(), converted_path(source)]
        .into_iter()
        .filter(|c| fs::metadata(c).is_ok_and(|meta| meta.len() == u64::from(info.size)))
        .collect();
    if candidates.is_empty() {
        return false;
    }
    // Unreadable entries are left for the worker to report
    let Ok(payload) = read_entry(container, &info.name) else {
        return false;
    };
    candidates
        .iter()
        .any(|c| fs::read(c).is_ok_and(|bytes| bytes == payload))
}

fn sort_items(items: &mut [WorkItem]) {
    items.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
}

/// Build the extraction list for every container under `game_dir`.
///
/// Containers that fail to parse are reported on the error queue and
/// contribute no items.
///
/// # Errors
/// Returns a fatal scan error if `game_dir` is missing or unreadable.
pub fn scan_unpack(game_dir: &Path, out_dir: &Path, status: &RunStatus) -> Result<Vec<WorkItem>> {
    require_dir(game_dir)?;

    let mut items = Vec::new();
    let mut containers = 0usize;
    for path in walk_files(game_dir, Some(out_dir), status)? {
        if !is_candidate_container(&path) {
            continue;
        }
        let relative = relative_to(game_dir, &path);
        let entries = match list_entries(&path) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Skipping {}: {e}", relative.display());
                status.error(format!("{}: {e}", relative.display()));
                continue;
            }
        };
        containers += 1;
        debug!("{}: {} entries", relative.display(), entries.len());

        for info in entries {
            match output_file_name(&info.name) {
                Ok(file_name) => items.push(WorkItem::Extract {
                    container: path.clone(),
                    output: out_dir.join(&relative).join(file_name),
                    relative: relative.clone(),
                    entry: info.name,
                }),
                Err(e) => status.error(format!("{}: {e}", relative.display())),
            }
        }
    }

    sort_items(&mut items);
    info!("Found {} entries in {containers} containers", items.len());
    Ok(items)
}

/// Build the injection list for every override under `override_dir`.
///
/// Overrides that match no container entry are reported as warnings on the
/// log queue. Intermediates from earlier re-encodes are ignored, and so are
/// overrides the entry already holds, which makes an unchanged override tree
/// produce no work.
///
/// # Errors
/// Returns a fatal scan error if either root is missing or unreadable.
pub fn scan_repack(
    game_dir: &Path,
    override_dir: &Path,
    status: &RunStatus,
) -> Result<Vec<WorkItem>> {
    require_dir(game_dir)?;
    require_dir(override_dir)?;

    // None marks a container already reported as unreadable
    let mut indexes: HashMap<PathBuf, Option<Vec<EntryInfo>>> = HashMap::new();
    let mut claimed: HashSet<(PathBuf, String)> = HashSet::new();
    let mut items = Vec::new();
    let mut unchanged = 0usize;

    for source in walk_files(override_dir, None, status)? {
        let relative = relative_to(override_dir, &source);
        if is_intermediate(&source) {
            debug!("Ignoring intermediate {}", relative.display());
            continue;
        }

        let Some(target) = match_override(&relative) else {
            status.log(format!(
                "Warning: {}: not a texture override",
                relative.display()
            ));
            continue;
        };

        if is_reserved(&target.container) {
            status.log(format!(
                "Warning: {}: {} is not a game container",
                relative.display(),
                target.container.display()
            ));
            continue;
        }

        let container = game_dir.join(&target.container);
        let index = match indexes.entry(target.container.clone()) {
            Entry::Occupied(slot) => slot.into_mut(),
            Entry::Vacant(slot) => {
                let loaded = if container.is_file() {
                    match list_entries(&container) {
                        Ok(entries) => Some(entries),
                        Err(e) => {
                            status.error(format!("{}: {e}", target.container.display()));
                            None
                        }
                    }
                } else {
                    Some(Vec::new())
                };
                slot.insert(loaded)
            }
        };
        let Some(entries) = index else {
            continue;
        };

        let Some(info) = resolve_entry_name(entries, &target.entry) else {
            warn!("No entry for override {}", relative.display());
            status.log(format!(
                "Warning: {}: no matching entry in {}",
                relative.display(),
                target.container.display()
            ));
            continue;
        };

        if !claimed.insert((target.container.clone(), info.name.clone())) {
            status.log(format!(
                "Warning: {}: entry {} already has an override",
                relative.display(),
                info.name
            ));
            continue;
        }

        if already_injected(&container, info, &source) {
            debug!("Up to date: {}", relative.display());
            unchanged += 1;
            continue;
        }

        items.push(WorkItem::Inject {
            container,
            relative: target.container,
            entry: info.name.clone(),
            source,
            format: info.format,
        });
    }

    sort_items(&mut items);
    info!(
        "Found {} overrides to inject, {unchanged} already up to date",
        items.len()
    );
    Ok(items)
}
