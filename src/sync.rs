//! Bidirectional polling sync between a source tree and its mirror
//!
//! Every tick both trees are scanned into a fresh [`Snapshot`] of
//! modification times and diffed against the previous one:
//!
//! - a new or newer **source** file is pushed forward into the mirror
//! - a new or newer **destination** file is written back into the source
//!   tree, in the encoding the source file uses
//! - a vanished file on either side removes its counterpart
//!
//! A conversion copies metadata, so a pushed file and its mirror end up with
//! equal mtimes. Write-back only happens when the destination is *strictly*
//! newer than the source, which keeps the engine from echoing its own
//! writes back and forth. Simultaneous edits resolve last-write-wins by mtime.
//!
//! ## Fallback charset
//!
//! Pure ASCII carries no encoding signal. Files first created on the
//! destination side are written back in the configured fallback charset and
//! remembered, so that later write-backs keep using it while the source still
//! looks like plain ASCII. The tag is dropped once the source content is
//! confidently detected as something else.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use filetime::FileTime;
use tracing::{debug, error, info, warn, Dispatch};
use walkdir::WalkDir;

use crate::catalog;
use crate::classify::{is_text_file, is_transient_editor_artifact, should_exclude};
use crate::config::WatchConfig;
use crate::converter::{Converter, EncodingPlan};
use crate::detect::{detect, is_ascii};
use crate::error::{ConfigError, ConvertError, Result};

const WORKER_THREAD_NAME: &str = "charsync-watch";

/// Which tree a path was observed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Side {
    Source,
    Destination,
}

impl Side {
    pub fn prefix(self) -> &'static str {
        match self {
            Side::Source => "src",
            Side::Destination => "dst",
        }
    }

    pub fn opposite(self) -> Side {
        match self {
            Side::Source => Side::Destination,
            Side::Destination => Side::Source,
        }
    }
}

/// `{side}:{relative path}`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SnapshotKey {
    pub side: Side,
    pub path: PathBuf,
}

impl SnapshotKey {
    pub fn new(side: Side, path: impl Into<PathBuf>) -> Self {
        Self {
            side,
            path: path.into(),
        }
    }
}

impl fmt::Display for SnapshotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.side.prefix(), self.path.display())
    }
}

/// Last observed modification time of every regular file in both trees
pub type Snapshot = BTreeMap<SnapshotKey, FileTime>;

/// Lifecycle of the watch worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Stopped,
    Running,
    Stopping,
}

/// What one tick did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Source changes converted into the mirror
    pub pushed: usize,
    /// Destination changes converted back into the source tree
    pub written_back: usize,
    /// Destination changes that were echoes, directories, or excluded
    pub ignored: usize,
    /// Counterparts removed after a deletion
    pub deleted: usize,
    /// Per-file failures (logged)
    pub failed: usize,
}

/// Polls a source tree and its converted mirror and keeps them in sync
pub struct SyncEngine {
    source_root: PathBuf,
    destination_root: PathBuf,
    converter: Converter,
    watch: WatchConfig,
    dispatch: Dispatch,
    control: Mutex<Control>,
}

struct Control {
    state: WatchState,
    /// Sync state while no worker owns it
    parked: Option<SyncState>,
    stop_flag: Option<Arc<AtomicBool>>,
    // dropping the sender wakes the worker out of its sleep
    wake: Option<mpsc::Sender<()>>,
    worker: Option<JoinHandle<SyncState>>,
}

impl SyncEngine {
    /// Create a stopped engine. The source root must be an existing directory;
    /// the destination root is created on demand.
    pub fn new(
        source_root: impl Into<PathBuf>,
        destination_root: impl Into<PathBuf>,
        converter: Converter,
        watch: WatchConfig,
    ) -> Result<Self, ConfigError> {
        let source_root = source_root.into();
        let destination_root = destination_root.into();
        if !source_root.is_dir() {
            return Err(ConfigError::MissingDirectory(source_root));
        }

        let dispatch = converter.dispatch().clone();
        let parked = SyncState::new(&source_root, &destination_root, &converter);
        Ok(Self {
            source_root,
            destination_root,
            converter,
            watch,
            dispatch,
            control: Mutex::new(Control {
                state: WatchState::Stopped,
                parked: Some(parked),
                stop_flag: None,
                wake: None,
                worker: None,
            }),
        })
    }

    /// Log through `dispatch`, both here and on the worker thread
    pub fn with_dispatch(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = dispatch;
        self
    }

    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    pub fn destination_root(&self) -> &Path {
        &self.destination_root
    }

    pub fn interval(&self) -> Duration {
        self.watch.interval
    }

    pub fn state(&self) -> WatchState {
        lock_or_recover(&self.control).state
    }

    pub fn is_running(&self) -> bool {
        self.state() == WatchState::Running
    }

    /// Take the baseline snapshot and start polling on a background thread.
    ///
    /// Nothing is converted on start; files already present are the baseline.
    /// Calling `start` on a running engine does nothing.
    pub fn start(&self) -> Result<()> {
        let mut control = lock_or_recover(&self.control);
        match control.state {
            WatchState::Running => return Ok(()),
            WatchState::Stopping => return Err(ConvertError::WorkerActive),
            WatchState::Stopped => {}
        }

        let mut state = control.parked.take().unwrap_or_else(|| self.fresh_state());
        let stop_flag = Arc::new(AtomicBool::new(false));
        state.stop = Arc::clone(&stop_flag);

        tracing::dispatcher::with_default(&self.dispatch, || state.prime());

        let (wake_tx, wake_rx) = mpsc::channel::<()>();
        let dispatch = self.dispatch.clone();
        let interval = self.watch.interval;

        let worker = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || {
                tracing::dispatcher::with_default(&dispatch, || {
                    run_worker(&mut state, &wake_rx, interval);
                });
                state
            })
            .map_err(|err| {
                control.parked = Some(self.fresh_state());
                ConvertError::Spawn(err)
            })?;

        control.state = WatchState::Running;
        control.stop_flag = Some(stop_flag);
        control.wake = Some(wake_tx);
        control.worker = Some(worker);
        drop(control);

        tracing::dispatcher::with_default(&self.dispatch, || {
            info!(
                source = %self.source_root.display(),
                destination = %self.destination_root.display(),
                interval = ?self.watch.interval,
                "watching for changes"
            );
        });
        Ok(())
    }

    /// Stop polling and wait for the worker thread to exit.
    ///
    /// An in-flight conversion finishes; no further one starts. Once this
    /// returns the engine no longer touches either tree. Does nothing unless
    /// running.
    pub fn stop(&self) {
        let (stop_flag, wake, worker) = {
            let mut control = lock_or_recover(&self.control);
            if control.state != WatchState::Running {
                return;
            }
            control.state = WatchState::Stopping;
            (control.stop_flag.take(), control.wake.take(), control.worker.take())
        };

        if let Some(flag) = stop_flag {
            flag.store(true, Ordering::Release);
        }
        drop(wake);

        let state = match worker.map(JoinHandle::join) {
            Some(Ok(mut state)) => {
                state.stop = Arc::new(AtomicBool::new(false));
                state
            }
            Some(Err(_)) => {
                tracing::dispatcher::with_default(&self.dispatch, || {
                    error!("watch worker panicked; sync state was reset");
                });
                self.fresh_state()
            }
            None => self.fresh_state(),
        };

        let mut control = lock_or_recover(&self.control);
        control.parked = Some(state);
        control.state = WatchState::Stopped;
        drop(control);

        tracing::dispatcher::with_default(&self.dispatch, || info!("watching stopped"));
    }

    /// Replace the baseline with a fresh scan of both trees, without
    /// converting anything. Only while stopped.
    pub fn prime(&self) -> Result<()> {
        self.with_parked(|state| {
            state.prime();
            Ok(())
        })
    }

    /// Run a single tick on the calling thread. Only while stopped; the
    /// worker runs the same code on every interval.
    pub fn process(&self) -> Result<TickReport> {
        self.with_parked(SyncState::process)
    }

    /// Copy of the current baseline; `None` while the worker owns it
    pub fn snapshot(&self) -> Option<Snapshot> {
        let control = lock_or_recover(&self.control);
        control.parked.as_ref().map(|state| state.snapshot.clone())
    }

    /// Copy of the fallback-tagged paths; `None` while the worker owns them
    pub fn fallback_files(&self) -> Option<BTreeSet<PathBuf>> {
        let control = lock_or_recover(&self.control);
        control.parked.as_ref().map(|state| state.fallback_files.clone())
    }

    fn with_parked<T>(&self, f: impl FnOnce(&mut SyncState) -> Result<T>) -> Result<T> {
        let mut control = lock_or_recover(&self.control);
        if control.state != WatchState::Stopped {
            return Err(ConvertError::WorkerActive);
        }
        let state = control.parked.get_or_insert_with(|| self.fresh_state());
        tracing::dispatcher::with_default(&self.dispatch, || f(state))
    }

    fn fresh_state(&self) -> SyncState {
        SyncState::new(&self.source_root, &self.destination_root, &self.converter)
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncEngine")
            .field("source_root", &self.source_root)
            .field("destination_root", &self.destination_root)
            .field("interval", &self.watch.interval)
            .field("state", &self.state())
            .finish()
    }
}

fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn run_worker(state: &mut SyncState, wake: &mpsc::Receiver<()>, interval: Duration) {
    loop {
        match wake.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
        if state.stop_requested() {
            break;
        }
        if let Err(err) = state.process() {
            error!(error = %err, "error in watch loop");
        }
    }
}

/// Everything the worker owns exclusively while running
struct SyncState {
    source_root: PathBuf,
    destination_root: PathBuf,
    converter: Converter,
    snapshot: Snapshot,
    fallback_files: BTreeSet<PathBuf>,
    stop: Arc<AtomicBool>,
}

impl SyncState {
    fn new(source_root: &Path, destination_root: &Path, converter: &Converter) -> Self {
        Self {
            source_root: source_root.to_path_buf(),
            destination_root: destination_root.to_path_buf(),
            converter: converter.clone(),
            snapshot: Snapshot::new(),
            fallback_files: BTreeSet::new(),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    fn root(&self, side: Side) -> &Path {
        match side {
            Side::Source => &self.source_root,
            Side::Destination => &self.destination_root,
        }
    }

    fn prime(&mut self) {
        let mut snapshot = Snapshot::new();
        for side in [Side::Source, Side::Destination] {
            if let Err(err) = self.scan(side, &mut snapshot) {
                warn!(error = %err, "baseline scan incomplete");
            }
        }
        debug!(files = snapshot.len(), "baseline snapshot taken");
        self.snapshot = snapshot;
    }

    fn process(&mut self) -> Result<TickReport> {
        let mut current = Snapshot::new();
        self.scan(Side::Source, &mut current)?;
        self.scan(Side::Destination, &mut current)?;

        let mut report = TickReport::default();
        let mut written = Vec::new();
        let mut unhandled = Vec::new();

        for (key, mtime) in &current {
            let changed = self.snapshot.get(key).map_or(true, |previous| mtime > previous);
            if !changed {
                continue;
            }
            if self.stop_requested() {
                unhandled.push(key.clone());
                continue;
            }
            let wrote = match key.side {
                Side::Source => self.push_forward(&key.path, &mut report),
                Side::Destination => self.write_back(&key.path, &mut report),
            };
            if wrote {
                written.push(SnapshotKey::new(key.side.opposite(), key.path.clone()));
            }
        }

        // our own writes are part of the new baseline, not changes
        for key in written {
            if let Some(mtime) = file_mtime(&self.root(key.side).join(&key.path)) {
                current.insert(key, mtime);
            }
        }

        let deleted: Vec<SnapshotKey> = self
            .snapshot
            .keys()
            .filter(|key| !current.contains_key(*key))
            .cloned()
            .collect();
        for key in deleted {
            if self.stop_requested() {
                unhandled.push(key);
                continue;
            }
            self.propagate_deletion(&key, &mut report);
        }

        // anything skipped for a stop keeps its old baseline entry (or stays
        // absent) so the next tick still sees it as a change
        if !unhandled.is_empty() {
            debug!(pending = unhandled.len(), "stop requested, leaving changes for the next tick");
        }
        for key in unhandled {
            match self.snapshot.get(&key) {
                Some(previous) => current.insert(key, *previous),
                None => current.remove(&key),
            };
        }

        self.snapshot = current;
        Ok(report)
    }

    /// Collect mtimes of regular files under one root into `snapshot`.
    ///
    /// Excluded directories are not descended into. Entries that could not
    /// be read keep their previous mtime so a transient error never looks
    /// like a deletion.
    fn scan(&self, side: Side, snapshot: &mut Snapshot) -> Result<()> {
        let root = self.root(side);
        if !root.is_dir() {
            let had_files = self.snapshot.keys().any(|key| key.side == side);
            if had_files {
                return Err(ConvertError::Scan {
                    root: root.to_path_buf(),
                    reason: "tree root is missing".to_string(),
                });
            }
            return Ok(());
        }

        let exclude = &self.converter.config().exclude;
        let mut unreadable: Vec<PathBuf> = Vec::new();

        let walker = WalkDir::new(root)
            .min_depth(1)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| {
                !entry.file_type().is_dir()
                    || entry
                        .path()
                        .strip_prefix(root)
                        .map_or(true, |relative| !should_exclude(relative, exclude))
            });

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    if let Some(relative) = err.path().and_then(|p| p.strip_prefix(root).ok()) {
                        unreadable.push(relative.to_path_buf());
                    }
                    debug!(error = %err, "scan skipped an entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(root) else {
                continue;
            };
            if should_exclude(relative, exclude) || is_transient_name(relative) {
                continue;
            }
            match entry.metadata() {
                Ok(metadata) => {
                    let mtime = FileTime::from_last_modification_time(&metadata);
                    snapshot.insert(SnapshotKey::new(side, relative), mtime);
                }
                Err(_) => unreadable.push(relative.to_path_buf()),
            }
        }

        for prefix in &unreadable {
            for (key, mtime) in &self.snapshot {
                if key.side == side && key.path.starts_with(prefix) {
                    snapshot.entry(key.clone()).or_insert(*mtime);
                }
            }
        }
        Ok(())
    }

    fn push_forward(&self, relative: &Path, report: &mut TickReport) -> bool {
        let source = self.source_root.join(relative);
        let destination = self.destination_root.join(relative);

        // the mirror was edited after this source change; it wins and gets
        // written back on this same tick
        if let (Some(src_mtime), Some(dst_mtime)) = (file_mtime(&source), file_mtime(&destination)) {
            if dst_mtime > src_mtime {
                debug!(path = %relative.display(), "destination is newer, not pushing");
                report.ignored += 1;
                return false;
            }
        }

        info!(path = %relative.display(), "source file changed");
        let result = ensure_parent(&destination).and_then(|()| {
            self.converter
                .convert_file_with(&source, &destination, self.converter.forward_plan())
        });
        match result {
            Ok(_) => {
                report.pushed += 1;
                true
            }
            Err(err) => {
                error!(path = %relative.display(), error = %err, "error converting");
                report.failed += 1;
                false
            }
        }
    }

    fn write_back(&mut self, relative: &Path, report: &mut TickReport) -> bool {
        let destination = self.destination_root.join(relative);
        let source = self.source_root.join(relative);

        let Some(dst_mtime) = file_mtime(&destination) else {
            report.ignored += 1;
            return false;
        };
        if should_exclude(relative, &self.converter.config().exclude) {
            report.ignored += 1;
            return false;
        }

        let source_exists = match fs::metadata(&source) {
            Ok(metadata) if metadata.is_dir() => {
                warn!(path = %relative.display(), "source path is a directory, not writing back");
                report.ignored += 1;
                return false;
            }
            Ok(metadata) => {
                if dst_mtime <= FileTime::from_last_modification_time(&metadata) {
                    debug!(path = %relative.display(), "destination not newer than source, ignoring");
                    report.ignored += 1;
                    return false;
                }
                true
            }
            Err(_) => false,
        };

        let encoding = self.resolve_source_encoding(relative, &source, source_exists);
        info!(path = %relative.display(), encoding = %encoding, "destination file changed, writing back");

        let to_encoding = self.converter.config().to_encoding.clone();
        let plan = EncodingPlan {
            from: Some(to_encoding.as_str()),
            to: &encoding,
            max_size: None,
        };
        let result = ensure_parent(&source)
            .and_then(|()| self.converter.convert_file_with(&destination, &source, plan));
        match result {
            Ok(_) => {
                report.written_back += 1;
                true
            }
            Err(err) => {
                error!(path = %relative.display(), error = %err, "error writing back");
                report.failed += 1;
                false
            }
        }
    }

    /// Decide which encoding a written-back file gets on the source side
    fn resolve_source_encoding(&mut self, relative: &Path, source: &Path, source_exists: bool) -> String {
        let config = self.converter.config();
        if let Some(explicit) = &config.from_encoding {
            return explicit.clone();
        }

        let default = config.to_encoding.clone();
        let fallback = config.fallback_charset.clone();

        if !source_exists {
            return match fallback {
                Some(fallback) => {
                    debug!(path = %relative.display(), fallback = %fallback, "new file, using fallback charset");
                    self.fallback_files.insert(relative.to_path_buf());
                    fallback
                }
                None => default,
            };
        }

        let detect_fallback = fallback.as_deref().unwrap_or(default.as_str());
        if let Some(detected) = self.sniff_source(relative, source, detect_fallback) {
            return detected;
        }

        // no signal in the source: only tagged paths keep the fallback,
        // untagged ASCII is a subset of the destination encoding
        match fallback {
            Some(fallback) if self.fallback_files.contains(relative) => fallback,
            _ => default,
        }
    }

    /// Detect the source file's encoding. `None` means "no usable signal":
    /// unreadable, binary, pure ASCII, or a low-confidence guess on a
    /// fallback-tagged path.
    fn sniff_source(&mut self, relative: &Path, source: &Path, fallback: &str) -> Option<String> {
        if !is_text_file(source, None) {
            return None;
        }
        let content = match fs::read(source) {
            Ok(content) => content,
            Err(err) => {
                warn!(path = %source.display(), error = %err, "cannot read source for detection");
                return None;
            }
        };

        if is_ascii(&content) {
            return None;
        }

        let detection = detect(&content, fallback);
        let tagged = self.fallback_files.contains(relative);

        if detection.is_confident() {
            if tagged && !catalog::same_encoding(fallback, &detection.encoding) {
                info!(path = %relative.display(), encoding = %detection.encoding, "source no longer uses fallback charset");
                self.fallback_files.remove(relative);
            }
            return Some(detection.encoding);
        }

        warn!(
            path = %source.display(),
            encoding = %detection.encoding,
            confidence = detection.confidence,
            "low confidence in source encoding detection"
        );
        if tagged {
            None
        } else {
            Some(detection.encoding)
        }
    }

    fn propagate_deletion(&self, key: &SnapshotKey, report: &mut TickReport) {
        if is_transient_name(&key.path) {
            return;
        }
        let (opposite, label) = match key.side {
            Side::Source => (self.destination_root.join(&key.path), "source file deleted, removing destination file"),
            Side::Destination => (self.source_root.join(&key.path), "destination file deleted, removing source file"),
        };
        match fs::symlink_metadata(&opposite) {
            Ok(metadata) if !metadata.is_dir() => {}
            _ => return,
        }

        info!(path = %key.path.display(), "{label}");
        match fs::remove_file(&opposite) {
            Ok(()) => report.deleted += 1,
            Err(err) => {
                error!(path = %opposite.display(), error = %err, "error removing file");
                report.failed += 1;
            }
        }
    }
}

fn is_transient_name(relative: &Path) -> bool {
    relative
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(is_transient_editor_artifact)
}

/// Mtime of `path` if it is a regular file
fn file_mtime(path: &Path) -> Option<FileTime> {
    fs::metadata(path)
        .ok()
        .filter(|metadata| metadata.is_file())
        .map(|metadata| FileTime::from_last_modification_time(&metadata))
}

fn ensure_parent(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent)
            .map_err(|e| ConvertError::io("create directory", parent, e)),
        _ => Ok(()),
    }
}
