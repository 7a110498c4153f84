//! The run controller
//!
//! A [`Tpup`] owns one run: it scans, publishes the total, dispatches the
//! frozen work list, and leaves the outcome in its [`RunStatus`] for front
//! ends to poll. Share it behind an `Arc` to call [`Tpup::start`] on one
//! thread while polling from another.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{error, info};

use crate::backup::BackupManager;
use crate::config::{Mode, TpupConfig};
use crate::dispatch::{Dispatcher, Outcome};
use crate::error::{Error, Result};
use crate::reencode::{Reencoder, Texconv};
use crate::scan::{scan_repack, scan_unpack};
use crate::status::{CancelHandle, RunPhase, RunStatus, Termination};

/// Result of a run that reached a non-fatal terminal state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub mode: Mode,
    pub termination: Termination,
    /// Items in the frozen work list
    pub total: usize,
    /// Items finished, successfully or not
    pub completed: usize,
    /// Finished items that failed
    pub items_failed: usize,
    /// Messages pushed to the error queue, scan errors included
    pub failed: usize,
    /// Containers that were backed up and rewritten
    pub containers_modified: usize,
    pub elapsed: Duration,
}

impl RunSummary {
    /// A run succeeds when it completed and reported no errors
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.termination == Termination::Completed && self.failed == 0
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self.mode {
            Mode::Unpack => "Unpacked",
            Mode::Repack => "Repacked",
        };
        write!(
            f,
            "{verb} {}/{} textures in {:.2}s",
            self.completed - self.items_failed.min(self.completed),
            self.total,
            self.elapsed.as_secs_f64()
        )?;
        if self.failed > 0 {
            write!(f, ", {} errors", self.failed)?;
        }
        if self.mode == Mode::Repack {
            write!(f, ", {} containers modified", self.containers_modified)?;
        }
        if self.termination == Termination::Cancelled {
            f.write_str(" (cancelled)")?;
        }
        Ok(())
    }
}

/// Texture pack unpack/repack engine
pub struct Tpup {
    config: TpupConfig,
    status: RunStatus,
    backups: BackupManager,
    reencoder: Arc<dyn Reencoder>,
}

impl Tpup {
    /// Create an engine without checking the directories.
    ///
    /// Missing directories surface as a fatal error from [`Tpup::start`].
    #[must_use]
    pub fn new(config: TpupConfig) -> Self {
        let reencoder = Arc::new(Texconv::locate(config.texconv.as_deref()));
        Self {
            config,
            status: RunStatus::new(),
            backups: BackupManager::new(),
            reencoder,
        }
    }

    /// Create an unpack engine, failing if either directory is missing
    pub fn unpack(game_dir: &Path, out_dir: &Path, threads: usize) -> Result<Self> {
        require_dir(game_dir)?;
        require_dir(out_dir)?;
        Ok(Self::new(
            TpupConfig::unpack(game_dir, out_dir).with_threads(threads),
        ))
    }

    /// Create a repack engine, failing if either directory is missing
    pub fn repack(
        game_dir: &Path,
        override_dir: &Path,
        threads: usize,
        preserve_converted: bool,
    ) -> Result<Self> {
        require_dir(game_dir)?;
        require_dir(override_dir)?;
        Ok(Self::new(
            TpupConfig::repack(game_dir, override_dir)
                .with_threads(threads)
                .with_preserve_converted(preserve_converted),
        ))
    }

    /// Replace the `texconv` re-encoder
    #[must_use]
    pub fn with_reencoder(mut self, reencoder: Arc<dyn Reencoder>) -> Self {
        self.reencoder = reencoder;
        self
    }

    #[must_use]
    pub fn config(&self) -> &TpupConfig {
        &self.config
    }

    /// Run to a terminal state on the calling thread.
    ///
    /// # Errors
    /// Returns a fatal scan error (also pushed to the error queue),
    /// [`Error::ThreadPool`], or [`Error::AlreadyStarted`] on a second call.
    pub fn start(&self) -> Result<RunSummary> {
        if !self.status.begin() {
            return Err(Error::AlreadyStarted);
        }
        let started = Instant::now();
        let game_dir = &self.config.game_dir;
        let target_dir = &self.config.target_dir;
        info!(
            "Starting {:?}: {} -> {}",
            self.config.mode,
            game_dir.display(),
            target_dir.display()
        );

        if self.status.is_cancelled() {
            self.status.publish_total(0);
            return Ok(self.terminate(Termination::Cancelled, started));
        }

        let scanned = match self.config.mode {
            Mode::Unpack => scan_unpack(game_dir, target_dir, &self.status),
            Mode::Repack => scan_repack(game_dir, target_dir, &self.status),
        };
        let items = match scanned {
            Ok(items) => items,
            Err(e) => return Err(self.fail(e)),
        };
        self.status.publish_total(items.len());

        let mut roots = vec![game_dir.clone()];
        if self.config.mode == Mode::Repack {
            roots.push(target_dir.clone());
        }
        let dispatcher = Dispatcher {
            status: &self.status,
            backups: &self.backups,
            reencoder: self.reencoder.as_ref(),
            preserve_converted: self.config.preserve_converted,
            roots,
        };

        self.status.set_phase(RunPhase::Dispatching);
        let outcome = match dispatcher.run(&items, self.config.worker_count()) {
            Ok(outcome) => outcome,
            Err(e) => return Err(self.fail(e)),
        };

        match outcome {
            Outcome::Exhausted => Ok(self.terminate(Termination::Completed, started)),
            Outcome::Cancelled => Ok(self.terminate(Termination::Cancelled, started)),
            Outcome::Fatal(e) => Err(self.fail(e)),
        }
    }

    fn terminate(&self, termination: Termination, started: Instant) -> RunSummary {
        self.status.set_phase(RunPhase::Terminated(termination));
        let summary = RunSummary {
            mode: self.config.mode,
            termination,
            total: self.status.progress_max().unwrap_or(0),
            completed: self.status.progress_current(),
            items_failed: self.status.items_failed(),
            failed: self.status.error_count(),
            containers_modified: self.backups.touched().len(),
            elapsed: started.elapsed(),
        };
        info!("{summary}");
        summary
    }

    fn fail(&self, e: Error) -> Error {
        error!("Run aborted: {e}");
        self.status.error(e.to_string());
        self.status
            .set_phase(RunPhase::Terminated(Termination::FatalError));
        e
    }

    /// Request cancellation; workers finish their current item and exit
    pub fn stop(&self) {
        self.status.stop();
    }

    /// Cancellation handle for signal handlers and other threads
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        self.status.cancel_handle()
    }

    /// `None` until the scan finishes
    #[must_use]
    pub fn progress_max(&self) -> Option<usize> {
        self.status.progress_max()
    }

    #[must_use]
    pub fn progress_current(&self) -> usize {
        self.status.progress_current()
    }

    /// Errors reported so far; any error marks the run as failed
    #[must_use]
    pub fn error_count(&self) -> usize {
        self.status.error_count()
    }

    pub fn drain_log(&self) -> Vec<String> {
        self.status.drain_log()
    }

    pub fn drain_errors(&self) -> Vec<String> {
        self.status.drain_errors()
    }

    #[must_use]
    pub fn phase(&self) -> RunPhase {
        self.status.phase()
    }
}

fn require_dir(dir: &Path) -> Result<()> {
    if dir.is_dir() {
        Ok(())
    } else {
        Err(Error::RootNotFound(dir.to_path_buf()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_second_start_is_rejected() {
        let temp = TempDir::new().unwrap();
        let tpup = Tpup::unpack(temp.path(), temp.path(), 1).unwrap();
        let summary = tpup.start().unwrap();
        assert_eq!(summary.total, 0);
        assert!(summary.is_success());
        assert!(matches!(tpup.start(), Err(Error::AlreadyStarted)));
    }

    #[test]
    fn test_stop_before_start() {
        let temp = TempDir::new().unwrap();
        let tpup = Tpup::unpack(temp.path(), temp.path(), 1).unwrap();
        tpup.stop();
        let summary = tpup.start().unwrap();
        assert_eq!(summary.termination, Termination::Cancelled);
        assert_eq!(tpup.phase(), RunPhase::Terminated(Termination::Cancelled));
        assert_eq!(tpup.progress_current(), 0);
    }

    #[test]
    fn test_missing_root_is_fatal() {
        let temp = TempDir::new().unwrap();
        let tpup = Tpup::new(TpupConfig::repack(temp.path().join("game"), temp.path()));
        assert_eq!(tpup.progress_max(), None);

        let err = tpup.start().unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(tpup.phase(), RunPhase::Terminated(Termination::FatalError));
        assert_eq!(tpup.drain_errors().len(), 1);
        assert_eq!(tpup.progress_max(), None);
    }

    #[test]
    fn test_summary_counts_scan_errors_apart_from_items() {
        let summary = RunSummary {
            mode: Mode::Unpack,
            termination: Termination::Completed,
            total: 3,
            completed: 3,
            items_failed: 0,
            failed: 1,
            containers_modified: 0,
            elapsed: Duration::from_millis(250),
        };
        assert_eq!(summary.to_string(), "Unpacked 3/3 textures in 0.25s, 1 errors");
        assert!(!summary.is_success());
    }

    #[test]
    fn test_validating_constructors() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("missing");
        assert!(Tpup::unpack(&missing, temp.path(), 0).is_err());
        assert!(Tpup::repack(temp.path(), &missing, 0, false).is_err());
    }
}
