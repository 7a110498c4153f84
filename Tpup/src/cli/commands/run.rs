//! CLI commands for unpack and repack runs

use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, bail};
use console::Emoji;
use indicatif::ProgressBar;

use crate::cli::progress::{
    DISK, LOOKING_GLASS, PACKAGE, bar_style, print_done, print_error, print_step, print_warning,
    scan_spinner,
};
use crate::engine::Tpup;
use crate::reencode::Texconv;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

pub fn unpack(
    game_dir: &Path,
    output_dir: &Path,
    confirm_delete: bool,
    jobs: usize,
    quiet: bool,
) -> anyhow::Result<bool> {
    if !game_dir.is_dir() {
        bail!("Game directory not found: {}", game_dir.display());
    }

    if output_dir.exists() {
        let game = fs::canonicalize(game_dir)?;
        let output = fs::canonicalize(output_dir)?;
        if game.starts_with(&output) {
            bail!(
                "Refusing to delete {}: it contains the game directory",
                output_dir.display()
            );
        }
        if !confirm_delete {
            bail!(
                "Output directory already exists: {}\nPass -y to delete its contents",
                output_dir.display()
            );
        }
        println!("Deleting unpack directory...");
        fs::remove_dir_all(output_dir).with_context(|| {
            format!("Unpack directory could not be deleted: {}", output_dir.display())
        })?;
    }

    fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;
    check_writable(output_dir)?;

    let tpup = Tpup::unpack(game_dir, output_dir, jobs)?;
    drive(tpup, "Unpacking", PACKAGE, quiet)
}

pub fn repack(
    game_dir: &Path,
    override_dir: &Path,
    preserve_converted: bool,
    jobs: usize,
    texconv: Option<&Path>,
    quiet: bool,
) -> anyhow::Result<bool> {
    if !game_dir.is_dir() {
        bail!("Game directory not found: {}", game_dir.display());
    }
    if !override_dir.is_dir() {
        bail!("Override directory not found: {}", override_dir.display());
    }
    check_writable(override_dir)?;

    let tpup = Tpup::repack(game_dir, override_dir, jobs, preserve_converted)?
        .with_reencoder(Arc::new(Texconv::locate(texconv)));
    drive(tpup, "Repacking", DISK, quiet)
}

/// Make sure files can be created in `dir`
fn check_writable(dir: &Path) -> anyhow::Result<()> {
    let mut scratch = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("Directory could not be written to: {}", dir.display()))?;
    scratch
        .write_all(b"Test file to see if TPUP can write to this directory.")
        .with_context(|| format!("Directory could not be written to: {}", dir.display()))?;
    Ok(())
}

/// Run the engine on a worker thread, rendering progress and messages until
/// it terminates.
fn drive(tpup: Tpup, label: &str, emoji: Emoji, quiet: bool) -> anyhow::Result<bool> {
    let tpup = Arc::new(tpup);
    let started = Instant::now();

    let cancel = tpup.cancel_handle();
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupt received, finishing current textures...");
        cancel.cancel();
    })
    .context("Failed to set signal handler")?;

    if !quiet {
        print_step(1, 2, LOOKING_GLASS, "Scanning...");
    }
    let spinner = if quiet {
        ProgressBar::hidden()
    } else {
        scan_spinner("Scanning...")
    };

    let runner = Arc::clone(&tpup);
    let worker = thread::spawn(move || runner.start());

    let mut bar: Option<ProgressBar> = None;
    loop {
        let finished = worker.is_finished();

        if bar.is_none()
            && let Some(max) = tpup.progress_max()
        {
            spinner.finish_and_clear();
            let pb = if quiet {
                ProgressBar::hidden()
            } else {
                print_step(2, 2, emoji, &format!("{label} {max} textures..."));
                ProgressBar::new(max as u64)
            };
            pb.set_style(bar_style());
            pb.set_message(label.to_string());
            bar = Some(pb);
        }

        let display = bar.as_ref().unwrap_or(&spinner);
        flush_messages(&tpup, display, quiet);
        display.set_position(tpup.progress_current() as u64);

        if finished {
            break;
        }
        thread::sleep(POLL_INTERVAL);
    }

    let result = worker
        .join()
        .map_err(|_| anyhow::anyhow!("Worker thread panicked"))?;
    spinner.finish_and_clear();
    let display = bar.unwrap_or(spinner);
    flush_messages(&tpup, &display, quiet);
    display.finish_and_clear();

    match result {
        Ok(summary) => {
            println!("{summary}");
            if !quiet {
                print_done(started.elapsed());
            }
            Ok(summary.is_success())
        }
        // The fatal error has already been printed from the error queue
        Err(e) => {
            tracing::debug!("Run aborted: {e}");
            Ok(false)
        }
    }
}

/// Print everything queued so far above the progress bar
fn flush_messages(tpup: &Tpup, display: &ProgressBar, quiet: bool) {
    let log = tpup.drain_log();
    let errors = tpup.drain_errors();
    if log.is_empty() && errors.is_empty() {
        return;
    }

    display.suspend(|| {
        for line in &log {
            if line.starts_with("Warning:") {
                print_warning(line);
            } else if !quiet {
                println!("{line}");
            }
        }
        for line in &errors {
            print_error(line);
        }
    });
}
