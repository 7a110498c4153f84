use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use ddsfile::{D3DFormat, Dds, NewD3dParams};
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use tpup::prelude::*;
use tpup::reencode::converted_path;

// ==================== Fixtures ====================

fn dds_bytes(format: D3DFormat, fill: u8) -> Vec<u8> {
    let mut dds = Dds::new_d3d(NewD3dParams {
        height: 8,
        width: 8,
        depth: None,
        format,
        mipmap_levels: None,
        caps2: None,
    })
    .unwrap();
    dds.data.fill(fill);
    let mut out = Vec::new();
    dds.write(&mut out).unwrap();
    out
}

fn write_container(path: &Path, entries: &[(&str, Vec<u8>)], envelope: Envelope) {
    let mut pack = TexturePack::new().with_envelope(envelope);
    for (name, data) in entries {
        pack.push(TextureEntry::new(*name, PixelFormat::Bc1, data.clone()))
            .unwrap();
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    write_pack(path, &pack).unwrap();
}

fn write_override(root: &Path, relative: &str, data: &[u8]) -> PathBuf {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, data).unwrap();
    path
}

/// Game tree with `a.arc` {tex1, tex2} and `b.arc` {tex3}
struct Fixture {
    _temp: TempDir,
    game: PathBuf,
    mods: PathBuf,
    out: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let game = temp.path().join("game");
        let mods = temp.path().join("mods");
        let out = temp.path().join("out");
        fs::create_dir_all(&mods).unwrap();
        fs::create_dir_all(&out).unwrap();

        write_container(
            &game.join("a.arc"),
            &[
                ("tex1", dds_bytes(D3DFormat::DXT1, 1)),
                ("tex2", dds_bytes(D3DFormat::DXT1, 2)),
            ],
            Envelope::Plain,
        );
        write_container(
            &game.join("b.arc"),
            &[("tex3", dds_bytes(D3DFormat::DXT1, 3))],
            Envelope::Plain,
        );

        Self {
            _temp: temp,
            game,
            mods,
            out,
        }
    }

    fn repack(&self) -> Tpup {
        Tpup::repack(&self.game, &self.mods, 2, false)
            .unwrap()
            .with_reencoder(Arc::new(RefusingReencoder))
    }
}

/// Fails the test if a re-encode is requested
struct RefusingReencoder;

impl Reencoder for RefusingReencoder {
    fn reencode(&self, input: &Path, _target: PixelFormat) -> Result<PathBuf> {
        panic!("unexpected re-encode of {}", input.display());
    }
}

/// Writes a DXT1 texture filled with `fill` next to the input
struct FakeReencoder {
    fill: u8,
    calls: AtomicUsize,
    cancel: Mutex<Option<CancelHandle>>,
}

impl FakeReencoder {
    fn new(fill: u8) -> Self {
        Self {
            fill,
            calls: AtomicUsize::new(0),
            cancel: Mutex::new(None),
        }
    }
}

impl Reencoder for FakeReencoder {
    fn reencode(&self, input: &Path, target: PixelFormat) -> Result<PathBuf> {
        assert_eq!(target, PixelFormat::Bc1);
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(cancel) = self.cancel.lock().unwrap().as_ref() {
            cancel.cancel();
        }
        let output = converted_path(input);
        fs::write(&output, dds_bytes(D3DFormat::DXT1, self.fill)).unwrap();
        Ok(output)
    }
}

struct FailingReencoder;

impl Reencoder for FailingReencoder {
    fn reencode(&self, _input: &Path, _target: PixelFormat) -> Result<PathBuf> {
        Err(Error::ReencodeFailed { code: 1 })
    }
}

/// Deletes the override root, then fails
struct VanishingReencoder {
    root: PathBuf,
    calls: AtomicUsize,
}

impl Reencoder for VanishingReencoder {
    fn reencode(&self, _input: &Path, _target: PixelFormat) -> Result<PathBuf> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        fs::remove_dir_all(&self.root).unwrap();
        Err(Error::ReencodeFailed { code: 1 })
    }
}

fn many_mismatched_overrides(fx: &Fixture, count: usize) {
    for i in 0..count {
        write_container(
            &fx.game.join(format!("many/c{i}.arc")),
            &[("tex", dds_bytes(D3DFormat::DXT1, 0))],
            Envelope::Plain,
        );
        write_override(
            &fx.mods,
            &format!("many/c{i}.arc/tex.dds"),
            &dds_bytes(D3DFormat::DXT5, 1),
        );
    }
}

// ==================== Unpack ====================

#[test]
fn test_unpack_mirrors_containers() {
    let fx = Fixture::new();
    let tpup = Tpup::unpack(&fx.game, &fx.out, 0).unwrap();
    assert_eq!(tpup.progress_max(), None);

    let summary = tpup.start().unwrap();

    assert!(summary.is_success());
    assert_eq!(tpup.progress_max(), Some(3));
    assert_eq!(tpup.progress_current(), 3);
    assert!(tpup.drain_errors().is_empty());
    assert_eq!(
        fs::read(fx.out.join("a.arc/tex1.dds")).unwrap(),
        dds_bytes(D3DFormat::DXT1, 1)
    );
    assert_eq!(
        fs::read(fx.out.join("a.arc/tex2.dds")).unwrap(),
        dds_bytes(D3DFormat::DXT1, 2)
    );
    assert_eq!(
        fs::read(fx.out.join("b.arc/tex3.dds")).unwrap(),
        dds_bytes(D3DFormat::DXT1, 3)
    );

    let log = tpup.drain_log();
    assert_eq!(log.len(), 3);
    assert!(log.contains(&"Extracted: a.arc/tex2".to_string()));
    assert_eq!(tpup.phase(), RunPhase::Terminated(Termination::Completed));
}

#[test]
fn test_unpack_enveloped_container() {
    let fx = Fixture::new();
    write_container(
        &fx.game.join("chr/c.arc.dcx"),
        &[("tex4", dds_bytes(D3DFormat::DXT1, 4))],
        Envelope::Dcx,
    );

    let tpup = Tpup::unpack(&fx.game, &fx.out, 1).unwrap();
    tpup.start().unwrap();

    assert_eq!(tpup.progress_max(), Some(4));
    assert_eq!(
        fs::read(fx.out.join("chr/c.arc.dcx/tex4.dds")).unwrap(),
        dds_bytes(D3DFormat::DXT1, 4)
    );
}

#[test]
fn test_unpack_empty_tree_is_zero_not_unknown() {
    let temp = TempDir::new().unwrap();
    let tpup = Tpup::unpack(temp.path(), temp.path(), 0).unwrap();
    let summary = tpup.start().unwrap();
    assert_eq!(tpup.progress_max(), Some(0));
    assert_eq!(summary.total, 0);
    assert!(summary.is_success());
}

#[test]
fn test_unreadable_container_is_not_a_failed_item() {
    let fx = Fixture::new();
    fs::write(fx.game.join("bad.arc"), b"TPF\0garbage").unwrap();

    let tpup = Tpup::unpack(&fx.game, &fx.out, 2).unwrap();
    let summary = tpup.start().unwrap();

    assert_eq!(summary.total, 3);
    assert_eq!(summary.completed, 3);
    assert_eq!(summary.items_failed, 0);
    assert_eq!(summary.failed, 1);
    assert!(!summary.is_success());
    assert!(summary.to_string().starts_with("Unpacked 3/3 textures"));
}

// ==================== Repack ====================

#[test]
fn test_repack_backs_up_and_rewrites() {
    let fx = Fixture::new();
    let pristine_a = fs::read(fx.game.join("a.arc")).unwrap();
    let pristine_b = fs::read(fx.game.join("b.arc")).unwrap();
    let new_tex1 = dds_bytes(D3DFormat::DXT1, 9);
    write_override(&fx.mods, "a.arc/tex1.dds", &new_tex1);

    let tpup = fx.repack();
    let summary = tpup.start().unwrap();

    assert!(summary.is_success());
    assert_eq!(summary.containers_modified, 1);
    assert_eq!(tpup.progress_max(), Some(1));
    assert_eq!(fs::read(fx.game.join("a.arc.tpupbak")).unwrap(), pristine_a);
    assert_eq!(read_entry(&fx.game.join("a.arc"), "tex1").unwrap(), new_tex1);
    assert_eq!(
        read_entry(&fx.game.join("a.arc"), "tex2").unwrap(),
        dds_bytes(D3DFormat::DXT1, 2)
    );
    assert_eq!(fs::read(fx.game.join("b.arc")).unwrap(), pristine_b);
    assert!(!fx.game.join("b.arc.tpupbak").exists());
    assert_eq!(tpup.drain_log(), vec!["Repacked: a.arc/tex1".to_string()]);

    // Same override tree again: already injected, nothing to do
    let repacked_a = fs::read(fx.game.join("a.arc")).unwrap();
    let again = fx.repack();
    let summary = again.start().unwrap();
    assert_eq!(again.progress_max(), Some(0));
    assert!(summary.is_success());
    assert_eq!(summary.containers_modified, 0);
    assert!(again.drain_log().is_empty());
    assert_eq!(fs::read(fx.game.join("a.arc.tpupbak")).unwrap(), pristine_a);
    assert_eq!(fs::read(fx.game.join("a.arc")).unwrap(), repacked_a);

    // An edited override is picked up again
    write_override(&fx.mods, "a.arc/tex1.dds", &dds_bytes(D3DFormat::DXT1, 10));
    let edited = fx.repack();
    edited.start().unwrap();
    assert_eq!(edited.progress_max(), Some(1));
    assert_eq!(fs::read(fx.game.join("a.arc.tpupbak")).unwrap(), pristine_a);
}

#[cfg(unix)]
#[test]
fn test_repack_keeps_container_permissions() {
    use std::os::unix::fs::PermissionsExt;

    let fx = Fixture::new();
    let container = fx.game.join("a.arc");
    fs::set_permissions(&container, fs::Permissions::from_mode(0o644)).unwrap();
    write_override(&fx.mods, "a.arc/tex1.dds", &dds_bytes(D3DFormat::DXT1, 9));

    assert!(fx.repack().start().unwrap().is_success());

    let mode = |path: &Path| fs::metadata(path).unwrap().permissions().mode() & 0o777;
    assert_eq!(mode(&container), 0o644);
    assert_eq!(mode(&backup_path(&container)), 0o644);

    restore(&fx.game).unwrap();
    assert_eq!(mode(&container), 0o644);
}

#[test]
fn test_override_into_backup_is_rejected() {
    let fx = Fixture::new();
    write_override(&fx.mods, "a.arc/tex1.dds", &dds_bytes(D3DFormat::DXT1, 9));
    fx.repack().start().unwrap();
    let backup = fs::read(fx.game.join("a.arc.tpupbak")).unwrap();

    write_override(&fx.mods, "a.arc.tpupbak/tex1.dds", &dds_bytes(D3DFormat::DXT1, 11));
    let tpup = fx.repack();
    let summary = tpup.start().unwrap();

    assert!(summary.is_success());
    assert_eq!(tpup.progress_max(), Some(0));
    let log = tpup.drain_log();
    assert_eq!(log.len(), 1);
    assert!(log[0].starts_with("Warning: a.arc.tpupbak/tex1.dds"));
    assert_eq!(fs::read(fx.game.join("a.arc.tpupbak")).unwrap(), backup);
    assert!(!fx.game.join("a.arc.tpupbak.tpupbak").exists());
}

#[test]
fn test_backup_survives_repeated_repacks() {
    let fx = Fixture::new();
    let pristine_a = fs::read(fx.game.join("a.arc")).unwrap();
    write_override(&fx.mods, "a.arc/tex1.dds", &dds_bytes(D3DFormat::DXT1, 7));
    write_override(&fx.mods, "a.arc/tex2.dds", &dds_bytes(D3DFormat::DXT1, 8));

    for _ in 0..3 {
        let tpup = fx.repack();
        assert!(tpup.start().unwrap().is_success());
    }

    let backups: Vec<_> = fs::read_dir(&fx.game)
        .unwrap()
        .filter_map(std::result::Result::ok)
        .filter(|e| e.path().to_string_lossy().ends_with(".tpupbak"))
        .collect();
    assert_eq!(backups.len(), 1);
    assert_eq!(fs::read(fx.game.join("a.arc.tpupbak")).unwrap(), pristine_a);
    assert_eq!(
        read_entry(&fx.game.join("a.arc"), "tex2").unwrap(),
        dds_bytes(D3DFormat::DXT1, 8)
    );
}

#[test]
fn test_repack_then_restore() {
    let fx = Fixture::new();
    let pristine_a = fs::read(fx.game.join("a.arc")).unwrap();
    write_override(&fx.mods, "a.arc/tex1.dds", &dds_bytes(D3DFormat::DXT1, 9));
    fx.repack().start().unwrap();
    assert_ne!(fs::read(fx.game.join("a.arc")).unwrap(), pristine_a);

    assert_eq!(restore(&fx.game).unwrap(), 1);
    assert_eq!(fs::read(fx.game.join("a.arc")).unwrap(), pristine_a);
    assert_eq!(restore(&fx.game).unwrap(), 0);
}

#[test]
fn test_one_malformed_override_is_isolated() {
    let fx = Fixture::new();
    write_override(&fx.mods, "a.arc/tex1.dds", &dds_bytes(D3DFormat::DXT1, 5));
    write_override(&fx.mods, "a.arc/tex2.dds", b"definitely not a dds file");
    write_override(&fx.mods, "b.arc/tex3.dds", &dds_bytes(D3DFormat::DXT1, 6));

    let tpup = fx.repack();
    let summary = tpup.start().unwrap();

    assert!(!summary.is_success());
    assert_eq!(summary.termination, Termination::Completed);
    assert_eq!(tpup.progress_current(), 3);
    let errors = tpup.drain_errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].starts_with("a.arc/tex2: "));

    assert_eq!(
        read_entry(&fx.game.join("a.arc"), "tex1").unwrap(),
        dds_bytes(D3DFormat::DXT1, 5)
    );
    assert_eq!(
        read_entry(&fx.game.join("a.arc"), "tex2").unwrap(),
        dds_bytes(D3DFormat::DXT1, 2)
    );
    assert_eq!(
        read_entry(&fx.game.join("b.arc"), "tex3").unwrap(),
        dds_bytes(D3DFormat::DXT1, 6)
    );
}

#[test]
fn test_unmatched_override_is_a_warning() {
    let fx = Fixture::new();
    write_override(&fx.mods, "a.arc/nope.dds", &dds_bytes(D3DFormat::DXT1, 5));
    write_override(&fx.mods, "c.arc/tex1.dds", &dds_bytes(D3DFormat::DXT1, 5));

    let tpup = fx.repack();
    let summary = tpup.start().unwrap();

    assert!(summary.is_success());
    assert_eq!(tpup.progress_max(), Some(0));
    let log = tpup.drain_log();
    assert_eq!(log.len(), 2);
    assert!(log.iter().all(|line| line.starts_with("Warning:")));
    assert!(!fx.game.join("a.arc.tpupbak").exists());
}

#[test]
fn test_enveloped_container_keeps_envelope() {
    let fx = Fixture::new();
    let container = fx.game.join("c.arc.dcx");
    write_container(
        &container,
        &[("tex4", dds_bytes(D3DFormat::DXT1, 4))],
        Envelope::Dcx,
    );
    write_override(&fx.mods, "c.arc.dcx/tex4.dds", &dds_bytes(D3DFormat::DXT1, 10));

    fx.repack().start().unwrap();

    let pack = read_pack(&container).unwrap();
    assert_eq!(pack.envelope, Envelope::Dcx);
    assert_eq!(pack.entries[0].data, dds_bytes(D3DFormat::DXT1, 10));
}

// ==================== Re-encoding ====================

#[test]
fn test_mismatched_override_is_reencoded() {
    let fx = Fixture::new();
    let source = write_override(&fx.mods, "a.arc/tex1.dds", &dds_bytes(D3DFormat::DXT5, 1));
    let reencoder = Arc::new(FakeReencoder::new(42));

    let tpup = Tpup::repack(&fx.game, &fx.mods, 1, false)
        .unwrap()
        .with_reencoder(Arc::clone(&reencoder) as Arc<dyn Reencoder>);
    assert!(tpup.start().unwrap().is_success());

    assert_eq!(reencoder.calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        read_entry(&fx.game.join("a.arc"), "tex1").unwrap(),
        dds_bytes(D3DFormat::DXT1, 42)
    );
    assert!(!converted_path(&source).exists());
    assert!(source.exists());
}

#[test]
fn test_preserve_converted_keeps_intermediate() {
    let fx = Fixture::new();
    let source = write_override(&fx.mods, "a.arc/tex1.dds", &dds_bytes(D3DFormat::DXT5, 1));

    let tpup = Tpup::repack(&fx.game, &fx.mods, 1, true)
        .unwrap()
        .with_reencoder(Arc::new(FakeReencoder::new(42)));
    assert!(tpup.start().unwrap().is_success());
    assert!(converted_path(&source).exists());

    // The preserved conversion already matches the entry, so no re-encode
    let again = fx.repack();
    again.start().unwrap();
    assert_eq!(again.progress_max(), Some(0));

    // Left on its own, the intermediate is not treated as an override
    fs::remove_file(&source).unwrap();
    let again = fx.repack();
    again.start().unwrap();
    assert_eq!(again.progress_max(), Some(0));
    assert!(again.drain_log().is_empty());
}

#[test]
fn test_failed_reencode_leaves_container_untouched() {
    let fx = Fixture::new();
    let pristine_a = fs::read(fx.game.join("a.arc")).unwrap();
    write_override(&fx.mods, "a.arc/tex1.dds", &dds_bytes(D3DFormat::DXT5, 1));

    let tpup = Tpup::repack(&fx.game, &fx.mods, 1, false)
        .unwrap()
        .with_reencoder(Arc::new(FailingReencoder));
    let summary = tpup.start().unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(fs::read(fx.game.join("a.arc")).unwrap(), pristine_a);
    assert!(!fx.game.join("a.arc.tpupbak").exists());
    assert!(tpup.drain_errors()[0].contains("conversion failed with code 1"));
}

// ==================== Lifecycle ====================

#[test]
fn test_stop_mid_run_is_cancelled_and_consistent() {
    let fx = Fixture::new();
    many_mismatched_overrides(&fx, 5);

    let reencoder = Arc::new(FakeReencoder::new(42));
    let tpup = Tpup::repack(&fx.game, &fx.mods, 1, false)
        .unwrap()
        .with_reencoder(Arc::clone(&reencoder) as Arc<dyn Reencoder>);
    *reencoder.cancel.lock().unwrap() = Some(tpup.cancel_handle());

    let summary = tpup.start().unwrap();

    assert_eq!(summary.termination, Termination::Cancelled);
    assert_eq!(tpup.progress_max(), Some(5));
    // The item in flight when stop was requested still finished
    assert_eq!(tpup.progress_current(), 1);
    assert_eq!(reencoder.calls.load(Ordering::SeqCst), 1);
    assert!(!summary.is_success());

    for i in 0..5 {
        let container = fx.game.join(format!("many/c{i}.arc"));
        let pack = read_pack(&container).unwrap();
        let expected = if i == 0 { 42 } else { 0 };
        assert_eq!(pack.entries[0].data, dds_bytes(D3DFormat::DXT1, expected));
        assert_eq!(backup_path(&container).exists(), i == 0);
    }
}

#[test]
fn test_progress_is_monotonic() {
    let fx = Fixture::new();
    for i in 0..20 {
        write_container(
            &fx.game.join(format!("many/c{i:02}.arc")),
            &[
                ("t1", dds_bytes(D3DFormat::DXT1, 1)),
                ("t2", dds_bytes(D3DFormat::DXT1, 2)),
            ],
            Envelope::Plain,
        );
    }

    let tpup = Arc::new(Tpup::unpack(&fx.game, &fx.out, 4).unwrap());
    let runner = Arc::clone(&tpup);
    let handle = std::thread::spawn(move || runner.start());

    let mut samples = vec![tpup.progress_current()];
    while !handle.is_finished() {
        samples.push(tpup.progress_current());
    }
    let summary = handle.join().unwrap().unwrap();
    samples.push(tpup.progress_current());

    assert!(samples.windows(2).all(|w| w[0] <= w[1]));
    assert!(samples.iter().all(|&s| s <= summary.total));
    assert_eq!(summary.total, 43);
    assert_eq!(*samples.last().unwrap(), 43);
}

#[test]
fn test_missing_override_root_is_fatal() {
    let fx = Fixture::new();
    let config = TpupConfig::repack(&fx.game, fx.mods.join("missing"));
    let tpup = Tpup::new(config);

    let err = tpup.start().unwrap_err();
    assert!(matches!(err, Error::RootNotFound(_)));
    assert_eq!(tpup.phase(), RunPhase::Terminated(Termination::FatalError));
    assert_eq!(tpup.progress_current(), 0);
}

#[test]
fn test_override_root_vanishing_mid_run_is_fatal() {
    let fx = Fixture::new();
    many_mismatched_overrides(&fx, 4);

    let reencoder = Arc::new(VanishingReencoder {
        root: fx.mods.clone(),
        calls: AtomicUsize::new(0),
    });
    let tpup = Tpup::repack(&fx.game, &fx.mods, 1, false)
        .unwrap()
        .with_reencoder(Arc::clone(&reencoder) as Arc<dyn Reencoder>);

    let err = tpup.start().unwrap_err();

    assert!(matches!(err, Error::RootVanished(ref root) if *root == fx.mods));
    assert!(err.is_fatal());
    assert_eq!(tpup.phase(), RunPhase::Terminated(Termination::FatalError));
    // No item was claimed after the one that noticed
    assert_eq!(reencoder.calls.load(Ordering::SeqCst), 1);
    assert_eq!(tpup.progress_max(), Some(4));
    assert_eq!(tpup.progress_current(), 1);
    assert!(tpup.drain_errors().iter().any(|line| line.contains("vanished")));

    for i in 0..4 {
        let container = fx.game.join(format!("many/c{i}.arc"));
        assert_eq!(
            read_entry(&container, "tex").unwrap(),
            dds_bytes(D3DFormat::DXT1, 0)
        );
        assert!(!backup_path(&container).exists());
    }
}
