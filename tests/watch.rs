//! End-to-end tests driving a running sync engine

use emx_charsync::{ConvertConfig, Converter, ExcludeSet, SyncEngine, WatchConfig, WatchState};
use filetime::FileTime;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

const INTERVAL: Duration = Duration::from_millis(50);
const DEADLINE: Duration = Duration::from_secs(10);

const JAPANESE: &str = "吾輩は猫である。名前はまだ無い。どこで生れたかとんと見当がつかぬ。\
    何でも薄暗いじめじめした所でニャーニャー泣いていた事だけは記憶している。";

struct Fixture {
    dir: TempDir,
    src: PathBuf,
    dst: PathBuf,
}

impl Fixture {
    /// Write outside both trees, then rename into place so a scan never
    /// sees a half-written file
    fn place(&self, path: &Path, content: impl AsRef<[u8]>) {
        let staged = self.dir.path().join("staged");
        fs::write(&staged, content).unwrap();
        fs::rename(&staged, path).unwrap();
    }
}

fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let src = dir.path().join("src");
    let dst = dir.path().join("dst");
    fs::create_dir_all(&src).unwrap();
    fs::create_dir_all(&dst).unwrap();
    Fixture { dir, src, dst }
}

fn start_engine(fx: &Fixture, config: ConvertConfig) -> SyncEngine {
    let converter = Converter::new(config).unwrap();
    let engine = SyncEngine::new(&fx.src, &fx.dst, converter, WatchConfig::new(INTERVAL)).unwrap();
    engine.start().unwrap();
    engine
}

fn euc_jp(text: &str) -> Vec<u8> {
    encoding_rs::EUC_JP.encode(text).0.into_owned()
}

/// Poll until `condition` holds or the deadline passes
fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < DEADLINE {
        if condition() {
            return true;
        }
        thread::sleep(INTERVAL);
    }
    condition()
}

fn touch(path: &Path, secs: i64) {
    filetime::set_file_mtime(path, FileTime::from_unix_time(secs, 0)).unwrap();
}

#[test]
fn test_source_edit_is_pushed_to_mirror() {
    let fx = fixture();
    let engine = start_engine(&fx, ConvertConfig::new());

    fs::create_dir_all(fx.src.join("docs")).unwrap();
    fx.place(&fx.src.join("docs/neko.txt"), euc_jp(JAPANESE));

    let mirror = fx.dst.join("docs/neko.txt");
    assert!(wait_for(|| fs::read_to_string(&mirror).is_ok_and(|s| s == JAPANESE)));
    engine.stop();
}

#[test]
fn test_source_deletion_removes_mirror() {
    let fx = fixture();
    fs::write(fx.src.join("gone.txt"), "bye").unwrap();
    fs::write(fx.dst.join("gone.txt"), "bye").unwrap();
    let engine = start_engine(&fx, ConvertConfig::new());

    fs::remove_file(fx.src.join("gone.txt")).unwrap();

    assert!(wait_for(|| !fx.dst.join("gone.txt").exists()));
    engine.stop();
}

#[test]
fn test_transient_artifact_deletion_is_not_propagated() {
    let fx = fixture();
    fs::write(fx.src.join("notes.txt~"), "backup").unwrap();
    fs::write(fx.dst.join("notes.txt~"), "backup").unwrap();
    fs::write(fx.src.join("marker.txt"), "m").unwrap();
    fs::write(fx.dst.join("marker.txt"), "m").unwrap();
    let engine = start_engine(&fx, ConvertConfig::new());

    fs::remove_file(fx.src.join("notes.txt~")).unwrap();
    fs::remove_file(fx.src.join("marker.txt")).unwrap();

    // once the ordinary deletion went through, the artifact had its chance too
    assert!(wait_for(|| !fx.dst.join("marker.txt").exists()));
    assert!(fx.dst.join("notes.txt~").exists());
    engine.stop();
}

#[test]
fn test_mirror_edit_is_written_back_in_source_encoding() {
    let fx = fixture();
    fs::write(fx.src.join("neko.txt"), euc_jp(JAPANESE)).unwrap();
    fs::write(fx.dst.join("neko.txt"), JAPANESE).unwrap();
    touch(&fx.src.join("neko.txt"), 1_000);
    touch(&fx.dst.join("neko.txt"), 1_000);
    let engine = start_engine(&fx, ConvertConfig::new());

    let edited = format!("{JAPANESE}\n追記しました。");
    fx.place(&fx.dst.join("neko.txt"), &edited);

    let expected = euc_jp(&edited);
    assert!(wait_for(|| fs::read(fx.src.join("neko.txt")).is_ok_and(|b| b == expected)));
    engine.stop();
}

#[test]
fn test_excluded_paths_are_ignored_while_watching() {
    let fx = fixture();
    let config = ConvertConfig::new().with_exclude(ExcludeSet::from_comma_list(".git,*.log").unwrap());
    let engine = start_engine(&fx, config);

    fs::create_dir_all(fx.src.join(".git")).unwrap();
    fs::write(fx.src.join(".git/index"), "idx").unwrap();
    fs::write(fx.src.join("build.log"), "log").unwrap();
    fs::write(fx.src.join("kept.txt"), "kept").unwrap();

    assert!(wait_for(|| fx.dst.join("kept.txt").exists()));
    assert!(!fx.dst.join(".git").exists());
    assert!(!fx.dst.join("build.log").exists());
    engine.stop();
}

#[test]
fn test_no_mutation_after_stop() {
    let fx = fixture();
    let engine = start_engine(&fx, ConvertConfig::new());
    engine.stop();
    assert_eq!(engine.state(), WatchState::Stopped);

    fs::write(fx.src.join("late.txt"), "late").unwrap();
    thread::sleep(INTERVAL * 4);

    assert!(!fx.dst.join("late.txt").exists());
}

#[test]
fn test_restart_rebuilds_baseline() {
    let fx = fixture();
    let engine = start_engine(&fx, ConvertConfig::new());
    engine.stop();

    fs::write(fx.src.join("while_stopped.txt"), "x").unwrap();
    engine.start().unwrap();
    fs::write(fx.src.join("after_restart.txt"), "y").unwrap();

    assert!(wait_for(|| fx.dst.join("after_restart.txt").exists()));
    // present before the restart, so part of the new baseline
    assert!(!fx.dst.join("while_stopped.txt").exists());
    engine.stop();
}

#[test]
fn test_stop_interrupts_long_sleep() {
    let fx = fixture();
    let converter = Converter::new(ConvertConfig::new()).unwrap();
    let watch = WatchConfig::new(Duration::from_secs(30));
    let engine = SyncEngine::new(&fx.src, &fx.dst, converter, watch).unwrap();
    engine.start().unwrap();

    let started = Instant::now();
    engine.stop();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(engine.state(), WatchState::Stopped);
}
