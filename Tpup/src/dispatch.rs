//! Worker pool executing a frozen work list
//!
//! Exactly N workers run on a dedicated rayon pool. Each claims the next item
//! through a shared atomic cursor and checks for cancellation between items,
//! never in the middle of one.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use rayon::ThreadPoolBuilder;
use tracing::{debug, warn};

use crate::backup::BackupManager;
use crate::container::{read_entry, read_pack, write_pack};
use crate::error::{Error, Result};
use crate::format::{PixelFormat, detect_dds_format};
use crate::reencode::Reencoder;
use crate::scan::WorkItem;
use crate::status::{RunPhase, RunStatus};

/// How the workers stopped
#[derive(Debug)]
pub(crate) enum Outcome {
    /// Every item was claimed and finished
    Exhausted,
    /// Workers stopped early because `stop()` was requested, leaving items
    /// unclaimed
    Cancelled,
    /// A root vanished mid-run
    Fatal(Error),
}

pub(crate) struct Dispatcher<'a> {
    pub status: &'a RunStatus,
    pub backups: &'a BackupManager,
    pub reencoder: &'a dyn Reencoder,
    pub preserve_converted: bool,
    /// Directories that must exist for the whole run
    pub roots: Vec<PathBuf>,
}

/// State shared by the workers of one dispatch
struct Shared<'i> {
    items: &'i [WorkItem],
    cursor: AtomicUsize,
    aborted: AtomicBool,
    fatal: Mutex<Option<Error>>,
}

impl Dispatcher<'_> {
    /// Run `items` on `workers` threads, blocking until every worker exits.
    pub fn run(&self, items: &[WorkItem], workers: usize) -> Result<Outcome> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("tpup-worker-{i}"))
            .build()?;

        let shared = Shared {
            items,
            cursor: AtomicUsize::new(0),
            aborted: AtomicBool::new(false),
            fatal: Mutex::new(None),
        };

        debug!("Dispatching {} items on {workers} workers", items.len());
        pool.scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|_| self.worker(&shared));
            }
        });

        let claimed_all = shared.cursor.load(Ordering::SeqCst) >= items.len();
        let fatal = shared
            .fatal
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(if let Some(error) = fatal {
            Outcome::Fatal(error)
        } else if self.status.is_cancelled() && !claimed_all {
            Outcome::Cancelled
        } else {
            Outcome::Exhausted
        })
    }

    fn worker(&self, shared: &Shared<'_>) {
        loop {
            if self.status.is_cancelled() || shared.aborted.load(Ordering::SeqCst) {
                break;
            }
            let index = shared.cursor.fetch_add(1, Ordering::SeqCst);
            let Some(item) = shared.items.get(index) else {
                break;
            };

            match self.execute(item) {
                Ok(line) => {
                    debug!("{line}");
                    self.status.log(line);
                }
                Err(e) => {
                    if let Some(root) = self.vanished_root() {
                        self.abort(shared, Error::RootVanished(root));
                        self.status.item_finished();
                        break;
                    }
                    warn!("{item}: {e}");
                    self.status.item_error(format!("{item}: {e}"));
                }
            }
            self.status.item_finished();
        }
        self.status
            .transition(RunPhase::Dispatching, RunPhase::Draining);
    }

    fn abort(&self, shared: &Shared<'_>, error: Error) {
        shared.aborted.store(true, Ordering::SeqCst);
        let mut fatal = shared.fatal.lock().unwrap_or_else(PoisonError::into_inner);
        if fatal.is_none() {
            *fatal = Some(error);
        }
    }

    fn vanished_root(&self) -> Option<PathBuf> {
        self.roots.iter().find(|root| !root.is_dir()).cloned()
    }

    fn execute(&self, item: &WorkItem) -> Result<String> {
        match item {
            WorkItem::Extract {
                container,
                entry,
                output,
                ..
            } => {
                extract(container, entry, output)?;
                Ok(format!("Extracted: {item}"))
            }
            WorkItem::Inject {
                container,
                entry,
                source,
                format,
                ..
            } => {
                let payload = self.prepare_override(source, *format)?;
                self.backups.with_container(container, |path| {
                    let mut pack = read_pack(path)?;
                    pack.replace_entry(entry, payload)?;
                    write_pack(path, &pack)
                })?;
                Ok(format!("Repacked: {item}"))
            }
        }
    }

    /// Read an override, re-encoding it first if its format does not match
    /// the entry's tag.
    fn prepare_override(&self, source: &Path, format: u8) -> Result<Vec<u8>> {
        let data = fs::read(source).map_err(|e| Error::io_at(source, e))?;
        let Some(required) = PixelFormat::from_code(format) else {
            debug!("Unknown format tag {format}, injecting {} as-is", source.display());
            return Ok(data);
        };

        let actual = detect_dds_format(&data)?;
        if actual == required {
            return Ok(data);
        }

        debug!("Re-encoding {} from {actual} to {required}", source.display());
        let converted = self.reencoder.reencode(source, required)?;
        let result = fs::read(&converted)
            .map_err(|e| Error::io_at(&converted, e))
            .and_then(|bytes| match detect_dds_format(&bytes)? {
                produced if produced == required => Ok(bytes),
                produced => Err(Error::FormatMismatch {
                    expected: required,
                    actual: produced,
                }),
            });

        if !self.preserve_converted
            && let Err(e) = fs::remove_file(&converted)
        {
            warn!("Could not remove {}: {e}", converted.display());
        }
        result
    }
}

fn extract(container: &Path, entry: &str, output: &Path) -> Result<()> {
    let data = read_entry(container, entry)?;
    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::io_at(parent, e))?;
    }
    fs::write(output, data).map_err(|e| Error::io_at(output, e))
}
