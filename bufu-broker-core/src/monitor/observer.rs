//! Per-run directory observer
//!
//! A [`RunObserver`] follows one run directory on a dedicated thread and hands
//! its files out to any number of concurrent callers of
//! [`RunObserver::pop_file`].
//!
//! The background thread goes through three phases:
//! 1. Startup: the watch is registered first, then the directory is listed
//!    and events already pending on the watch are merged in, so no file
//!    written in between is lost.
//! 2. Optimize: end markers found before the first index file are folded
//!    into the state instead of being queued.
//! 3. Follow: new files reported by the watch are queued until the end of
//!    run arrives or a stop is requested.
//!
//! Two state tracks progress independently: `run` is what the thread found
//! on disk, `fu` is what callers have been handed.

use crate::error::{BrokerError, Result};
use crate::monitor::stats::{Statistics, WatchCounters};
use crate::monitor::{
    DirectoryWatch, FileRecord, ObserverSettings, RunQueue, RunState, StatsSnapshot,
    WatchProvider, list_run_directory,
};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Answer to one pop request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PopResult {
    /// The delivered index file, or the empty placeholder
    pub file: FileRecord,
    pub state: RunState,
    pub last_eols: u32,
}

impl PopResult {
    fn nothing(state: RunState, last_eols: u32) -> Self {
        Self { file: FileRecord::empty(), state, last_eols }
    }
}

// Everything the background thread and callers share
#[derive(Debug, Default)]
struct Inner {
    queue: RunQueue,
    stats: Statistics,
    error_message: String,
}

impl Inner {
    fn push(&mut self, record: FileRecord) {
        self.queue.push(record);
        self.stats.files_processed += 1;
    }

    fn reached_stop_ls(&self, stop_ls: u32) -> bool {
        match self.queue.peek() {
            Some(next) => {
                (next.lumi_section == stop_ls && next.is_end_of_lumi_section())
                    || next.lumi_section > stop_ls
            }
            None => self.stats.fu.track.last_eols >= stop_ls,
        }
    }
}

/// Follows one run directory and serves its files
pub struct RunObserver {
    run_number: u32,
    directory: PathBuf,
    settings: ObserverSettings,
    inner: Mutex<Inner>,
    startup_watch: WatchCounters,
    watch: WatchCounters,
    stop_requested: AtomicBool,
    runner: Mutex<Option<JoinHandle<Result<()>>>>,
}

impl RunObserver {
    /// Create an observer in state INIT, nothing runs until [`RunObserver::start`]
    pub fn new(run_number: u32, directory: impl Into<PathBuf>, settings: ObserverSettings) -> Self {
        Self {
            run_number,
            directory: directory.into(),
            settings,
            inner: Mutex::new(Inner::default()),
            startup_watch: WatchCounters::default(),
            watch: WatchCounters::default(),
            stop_requested: AtomicBool::new(false),
            runner: Mutex::new(None),
        }
    }

    pub fn run_number(&self) -> u32 {
        self.run_number
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Spawn the background thread
    pub fn start(self: &Arc<Self>, provider: Arc<dyn WatchProvider>) -> Result<()> {
        if !self.mark_starting() {
            warn!("Observer for run {} already started", self.run_number);
            return Ok(());
        }

        let observer = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name(format!("observer-run{}", self.run_number))
            .spawn(move || observer.observe(provider.as_ref()))
            .map_err(|e| {
                let err = BrokerError::io(format!("cannot spawn observer thread: {e}"));
                self.record_failure(&err);
                err
            })?;

        *self.runner.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(())
    }

    // INIT -> STARTING on both tracks, false if already past INIT
    pub(crate) fn mark_starting(&self) -> bool {
        let mut inner = self.lock();
        if inner.stats.run.state != RunState::Init {
            return false;
        }
        inner.stats.run.state = RunState::Starting;
        inner.stats.fu.track.state = RunState::Starting;
        true
    }

    /// Ask the background thread to stop and wait for it.
    ///
    /// Returns the thread's own result, so a failure that ended it early
    /// surfaces here.
    pub fn stop_and_join(&self) -> Result<()> {
        self.request_stop();

        let handle = self.runner.lock().unwrap_or_else(PoisonError::into_inner).take();
        let Some(handle) = handle else {
            return Ok(());
        };

        debug!("Waiting for observer of run {} to stop", self.run_number);
        handle.join().unwrap_or_else(|_| {
            Err(BrokerError::io(format!("observer thread of run {} panicked", self.run_number)))
        })
    }

    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    /// Whether the background thread is still alive
    pub fn is_running(&self) -> bool {
        self.runner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Hand out the next index file.
    ///
    /// With `stop_ls`, answers EOR as soon as the stream has reached that
    /// lumisection, without consuming anything. End markers are consumed
    /// internally and never returned. An index file is held back while the
    /// end of the previous lumisection has not been handed out yet.
    pub fn pop_file(&self, stop_ls: Option<u32>) -> Result<PopResult> {
        let mut inner = self.lock();
        inner.stats.fu.requests += 1;

        let fu_state = inner.stats.fu.track.state;
        if fu_state.is_failure() {
            inner.stats.fu.empty_replies += 1;
            return Ok(PopResult::nothing(fu_state, inner.stats.fu.track.last_eols));
        }

        if let Some(stop_ls) = stop_ls {
            if inner.reached_stop_ls(stop_ls) {
                inner.stats.fu.stop_ls = Some(stop_ls);
                return Ok(PopResult::nothing(RunState::Eor, stop_ls));
            }
        }

        let mut file = FileRecord::empty();
        while let Some(&next) = inner.queue.peek() {
            if !next.is_end_of_run()
                && next.lumi_section > inner.stats.fu.track.last_eols.saturating_add(1)
            {
                inner.stats.fu.waits_for_eols += 1;
                break;
            }

            let Some(record) = inner.queue.pop() else { break };

            let last = inner.stats.fu.track.last_file;
            if !last.is_empty()
                && last.lumi_section > record.lumi_section
                && !record.is_end_of_run()
            {
                let err = BrokerError::ordering(record.file_name(), last.file_name());
                error!("Run {}: {}", self.run_number, err);
                return Err(err);
            }

            inner.stats.fu.track.advance(&record);

            if record.is_end_of_run() {
                inner.queue.release();
            }

            if record.is_index() {
                file = record;
                break;
            }
            inner.stats.files_optimized += 1;
        }

        if file.is_empty() {
            inner.stats.fu.empty_replies += 1;
        }

        Ok(PopResult {
            file,
            state: inner.stats.fu.track.state,
            last_eols: inner.stats.fu.track.last_eols,
        })
    }

    /// Current statistics
    pub fn stats(&self) -> StatsSnapshot {
        let inner = self.lock();
        let stats = &inner.stats;

        StatsSnapshot {
            run_number: self.run_number,
            file_mode: self.settings.file_mode,
            startup_files: stats.startup_files,
            startup_optimized: stats.startup_optimized,
            startup_watch: self.startup_watch.snapshot(),
            watch: self.watch.snapshot(),
            files_processed: stats.files_processed,
            files_optimized: stats.files_optimized,
            error_message: inner.error_message.clone(),
            run_state: stats.run.state,
            out_of_order_index_files: stats.out_of_order_index_files,
            last_processed_file: stats.run.last_file,
            run_last_eols: stats.run.last_eols,
            queue_size_max: inner.queue.size_max(),
            queue_size: inner.queue.len(),
            fu_state: stats.fu.track.state,
            fu_requests: stats.fu.requests,
            fu_empty_replies: stats.fu.empty_replies,
            fu_waits_for_eols: stats.fu.waits_for_eols,
            fu_last_popped_file: stats.fu.track.last_file,
            fu_last_eols: stats.fu.track.last_eols,
            fu_stop_ls: stats.fu.stop_ls,
        }
    }

    /// Message of the failure that ended the observer, empty if none
    pub fn error_message(&self) -> String {
        self.lock().error_message.clone()
    }

    pub fn run_state(&self) -> RunState {
        self.lock().stats.run.state
    }

    pub fn fu_state(&self) -> RunState {
        self.lock().stats.fu.track.state
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Body of the background thread
    pub(crate) fn observe(&self, provider: &dyn WatchProvider) -> Result<()> {
        info!("Observer for run {} watching {:?}", self.run_number, self.directory);

        let mut watch = match provider.watch(&self.directory, self.settings.mask) {
            Ok(watch) => watch,
            Err(e) => {
                self.record_failure(&e);
                info!("Observer for run {} finished", self.run_number);
                return Ok(());
            }
        };

        let result = self
            .reconcile(watch.as_mut())
            .and_then(|seen| self.follow(watch.as_mut(), seen));
        if let Err(e) = &result {
            self.record_failure(e);
        }

        info!("Observer for run {} finished", self.run_number);
        debug!("Observer statistics:\n{}", self.stats());
        result
    }

    // Startup and optimize phases, returns every record queued or folded so far
    pub(crate) fn reconcile(&self, watch: &mut dyn DirectoryWatch) -> Result<HashSet<FileRecord>> {
        let filter = self.settings.file_mode.filter();

        let mut files = list_run_directory(&self.directory, self.settings.file_mode)?;
        for record in &files {
            self.check_run(record, &record.file_name())?;
        }
        let listed = files.len();
        debug!("Found {} files in run directory {:?}", listed, self.directory);

        let mut seen: HashSet<FileRecord> = files.iter().copied().collect();
        while watch.has_pending_events()? {
            self.startup_watch.read_call();

            for event in watch.read_events(Duration::ZERO)? {
                self.startup_watch.any_file();
                if !filter.is_match(&event.name) {
                    continue;
                }
                self.startup_watch.jsn_file();

                let record = self.parse_own(&event.name)?;
                if seen.insert(record) {
                    files.push(record);
                } else {
                    self.startup_watch.duplicate();
                    debug!("Duplicate from startup watch events: {}", event.name);
                }
            }
        }
        files.sort();

        let mut inner = self.lock();
        inner.stats.startup_files = listed as u64;

        let mut saw_index = false;
        for record in files {
            if !saw_index && !record.is_index() {
                inner.stats.startup_optimized += 1;
                inner.stats.run.advance(&record);
                inner.stats.fu.track.last_eols = inner.stats.run.last_eols;
                continue;
            }
            saw_index = true;

            inner.stats.run.advance(&record);
            inner.push(record);
        }

        inner.stats.fu.track.state =
            if inner.queue.is_empty() { inner.stats.run.state } else { RunState::Ready };
        if inner.stats.run.state == RunState::Starting {
            inner.stats.run.state = RunState::Ready;
        }
        drop(inner);

        debug!("Observer statistics after startup:\n{}", self.stats());
        Ok(seen)
    }

    // Steady state, until the end of run or a stop request.
    //
    // `seen` starts as the startup snapshot and keeps every record queued
    // since, so repeated CLOSE_WRITE or MOVED_TO events for one file queue
    // it only once.
    pub(crate) fn follow(
        &self,
        watch: &mut dyn DirectoryWatch,
        mut seen: HashSet<FileRecord>,
    ) -> Result<()> {
        let filter = self.settings.file_mode.filter();

        if self.run_state() == RunState::Eor {
            debug!("Run {} already ended at startup", self.run_number);
            return Ok(());
        }

        while !self.stop_requested() {
            let events = watch.read_events(self.settings.poll_interval)?;
            if events.is_empty() {
                continue;
            }
            self.watch.read_call();

            let mut records = Vec::with_capacity(events.len());
            for event in events {
                self.watch.any_file();
                if !filter.is_match(&event.name) {
                    continue;
                }
                self.watch.jsn_file();

                let record = self.parse_own(&event.name)?;
                if !seen.insert(record) {
                    self.watch.duplicate();
                    debug!("Duplicate from watch events: {}", event.name);
                    continue;
                }
                records.push(record);
            }

            let mut inner = self.lock();
            for record in records {
                let last = inner.stats.run.last_file;
                if last.is_index() && record.is_index() && last.lumi_section > record.lumi_section {
                    inner.stats.out_of_order_index_files += 1;
                    debug!("Out of order index file {} after {}", record, last);
                }
                inner.stats.run.advance(&record);
                inner.push(record);
            }

            if inner.stats.run.state == RunState::Eor {
                debug!("End of run {} reached", self.run_number);
                break;
            }
        }

        Ok(())
    }

    fn parse_own(&self, name: &str) -> Result<FileRecord> {
        let record = FileRecord::parse(name)?;
        self.check_run(&record, name)?;
        Ok(record)
    }

    fn check_run(&self, record: &FileRecord, name: &str) -> Result<()> {
        if record.run_number != self.run_number {
            return Err(BrokerError::parse(
                name,
                format!("belongs to run {} not {}", record.run_number, self.run_number),
            ));
        }
        Ok(())
    }

    fn record_failure(&self, err: &BrokerError) {
        let state = match err {
            BrokerError::NoSuchRun { .. } => RunState::NoRun,
            _ => RunState::Error,
        };

        let mut inner = self.lock();
        inner.stats.run.state = state;
        inner.stats.fu.track.state = state;
        inner.error_message = err.to_string();

        error!("Observer for run {}: {} (state {})", self.run_number, err, state);
    }

    #[cfg(test)]
    pub(crate) fn enqueue(&self, record: FileRecord) {
        self.lock().push(record);
    }

    #[cfg(test)]
    pub(crate) fn queued(&self) -> Vec<FileRecord> {
        self.lock().queue.list_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::watcher::testing::{ScriptedProvider, ScriptedWatch};
    use std::fs;
    use tempfile::TempDir;

    const RUN: u32 = 5;

    fn observer(dir: &Path) -> RunObserver {
        RunObserver::new(RUN, dir, ObserverSettings::default())
    }

    fn touch(dir: &Path, names: &[&str]) {
        for name in names {
            fs::write(dir.join(name), b"{}").unwrap();
        }
    }

    /// Run startup only: a stop is requested up front so the follow loop exits at once
    fn started(dir: &Path, watch: ScriptedWatch) -> RunObserver {
        let observer = observer(dir);
        assert!(observer.mark_starting());
        observer.request_stop();
        observer.observe(&ScriptedProvider::ready(watch)).unwrap();
        observer
    }

    #[test]
    fn test_lumisection_barrier_passes_after_eols() {
        let temp_dir = TempDir::new().unwrap();
        let observer = observer(temp_dir.path());
        observer.enqueue(FileRecord::index(RUN, 1, 1));
        observer.enqueue(FileRecord::end_of_lumi_section(RUN, 1));
        observer.enqueue(FileRecord::index(RUN, 2, 1));

        let first = observer.pop_file(None).unwrap();
        assert_eq!(first.file, FileRecord::index(RUN, 1, 1));
        assert_eq!(first.state, RunState::Ready);
        assert_eq!(first.last_eols, 0);

        let second = observer.pop_file(None).unwrap();
        assert_eq!(second.file, FileRecord::index(RUN, 2, 1));
        assert_eq!(second.last_eols, 1);

        let stats = observer.stats();
        assert_eq!(stats.files_optimized, 1);
        assert_eq!(stats.fu_empty_replies, 0);
    }

    #[test]
    fn test_lumisection_barrier_holds_without_eols() {
        let temp_dir = TempDir::new().unwrap();
        let observer = observer(temp_dir.path());
        observer.enqueue(FileRecord::index(RUN, 1, 1));
        observer.enqueue(FileRecord::index(RUN, 2, 1));

        assert_eq!(observer.pop_file(None).unwrap().file, FileRecord::index(RUN, 1, 1));

        let held = observer.pop_file(None).unwrap();
        assert!(held.file.is_empty());
        assert_eq!(held.last_eols, 0);
        assert_eq!(observer.queued(), vec![FileRecord::index(RUN, 2, 1)]);

        let stats = observer.stats();
        assert_eq!(stats.fu_waits_for_eols, 1);
        assert_eq!(stats.fu_empty_replies, 1);

        // The missing marker shows up late
        observer.enqueue(FileRecord::end_of_lumi_section(RUN, 1));
        let released = observer.pop_file(None).unwrap();
        assert_eq!(released.file, FileRecord::index(RUN, 2, 1));
        assert_eq!(released.last_eols, 1);
    }

    #[test]
    fn test_stop_ls_on_empty_queue_synthesizes_eor() {
        let temp_dir = TempDir::new().unwrap();
        touch(
            temp_dir.path(),
            &[
                "run000005_ls0001_EoLS.jsn",
                "run000005_ls0002_EoLS.jsn",
                "run000005_ls0003_EoLS.jsn",
                "run000005_ls0004_EoLS.jsn",
                "run000005_ls0005_EoLS.jsn",
            ],
        );
        let observer = started(temp_dir.path(), ScriptedWatch::new());

        let reply = observer.pop_file(Some(5)).unwrap();
        assert!(reply.file.is_empty());
        assert_eq!(reply.state, RunState::Eor);
        assert_eq!(reply.last_eols, 5);

        let stats = observer.stats();
        assert_eq!(stats.fu_stop_ls, Some(5));
        assert_eq!(stats.fu_empty_replies, 0);
        assert_eq!(stats.fu_state, RunState::Eols);
        assert_eq!(stats.queue_size, 0);

        // Not reached yet
        let reply = observer.pop_file(Some(6)).unwrap();
        assert_eq!(reply.state, RunState::Eols);
        assert_eq!(reply.last_eols, 5);
    }

    #[test]
    fn test_stop_ls_is_inclusive_or_later() {
        let temp_dir = TempDir::new().unwrap();
        let observer = observer(temp_dir.path());
        observer.enqueue(FileRecord::end_of_lumi_section(RUN, 3));
        observer.enqueue(FileRecord::index(RUN, 4, 1));

        assert_eq!(observer.pop_file(Some(3)).unwrap().state, RunState::Eor);
        assert_eq!(observer.pop_file(Some(2)).unwrap().state, RunState::Eor);
        assert_eq!(observer.queued().len(), 2);

        // An index file of the stop lumisection is still data to deliver
        let temp_dir = TempDir::new().unwrap();
        let observer = RunObserver::new(RUN, temp_dir.path(), ObserverSettings::default());
        observer.enqueue(FileRecord::index(RUN, 1, 1));
        let reply = observer.pop_file(Some(1)).unwrap();
        assert_eq!(reply.file, FileRecord::index(RUN, 1, 1));
    }

    #[test]
    fn test_startup_folds_leading_empty_lumisections() {
        let temp_dir = TempDir::new().unwrap();
        touch(
            temp_dir.path(),
            &[
                "run000005_ls0001_EoLS.jsn",
                "run000005_ls0002_EoLS.jsn",
                "run000005_ls0003_index000001.jsn",
                "notes.txt",
            ],
        );
        let observer = started(temp_dir.path(), ScriptedWatch::new());

        assert_eq!(observer.queued(), vec![FileRecord::index(RUN, 3, 1)]);

        let stats = observer.stats();
        assert_eq!(stats.startup_files, 3);
        assert_eq!(stats.startup_optimized, 2);
        assert_eq!(stats.run_last_eols, 2);
        assert_eq!(stats.fu_last_eols, 2);
        assert_eq!(stats.run_state, RunState::Ready);
        assert_eq!(stats.fu_state, RunState::Ready);

        let reply = observer.pop_file(None).unwrap();
        assert_eq!(reply.file, FileRecord::index(RUN, 3, 1));
        assert_eq!(reply.last_eols, 2);
    }

    #[test]
    fn test_startup_queues_markers_after_first_index() {
        let temp_dir = TempDir::new().unwrap();
        touch(
            temp_dir.path(),
            &[
                "run000005_ls0001_EoLS.jsn",
                "run000005_ls0002_index000001.jsn",
                "run000005_ls0002_EoLS.jsn",
                "run000005_ls0003_EoLS.jsn",
            ],
        );
        let observer = started(temp_dir.path(), ScriptedWatch::new());

        assert_eq!(
            observer.queued(),
            vec![
                FileRecord::index(RUN, 2, 1),
                FileRecord::end_of_lumi_section(RUN, 2),
                FileRecord::end_of_lumi_section(RUN, 3),
            ]
        );
        assert_eq!(observer.stats().run_last_eols, 3);
        assert_eq!(observer.stats().fu_last_eols, 1);
    }

    #[test]
    fn test_startup_with_empty_directory_keeps_fu_starting() {
        let temp_dir = TempDir::new().unwrap();
        let observer = started(temp_dir.path(), ScriptedWatch::new());

        assert_eq!(observer.run_state(), RunState::Ready);
        assert_eq!(observer.fu_state(), RunState::Starting);

        let reply = observer.pop_file(None).unwrap();
        assert!(reply.file.is_empty());
        assert_eq!(reply.state, RunState::Starting);
    }

    #[test]
    fn test_startup_duplicates_are_queued_once() {
        let temp_dir = TempDir::new().unwrap();
        touch(temp_dir.path(), &["run000005_ls0001_index000001.jsn"]);

        let watch = ScriptedWatch::new().with_pending(&[
            "run000005_ls0001_index000001.jsn",
            "run000005_ls0001_index000002.jsn",
            "run000005_ls0001_index000002.jsn.part",
        ]);
        let observer = started(temp_dir.path(), watch);

        assert_eq!(
            observer.queued(),
            vec![FileRecord::index(RUN, 1, 1), FileRecord::index(RUN, 1, 2)]
        );

        let stats = observer.stats();
        assert_eq!(stats.startup_files, 1);
        assert_eq!(stats.startup_watch.read_calls, 1);
        assert_eq!(stats.startup_watch.all_files, 3);
        assert_eq!(stats.startup_watch.jsn_files, 2);
        assert_eq!(stats.startup_watch.duplicated, 1);
        assert_eq!(stats.files_processed, 2);
    }

    #[test]
    fn test_end_of_run_is_terminal() {
        let temp_dir = TempDir::new().unwrap();
        touch(
            temp_dir.path(),
            &[
                "run000005_ls0001_index000001.jsn",
                "run000005_ls0001_EoLS.jsn",
                "run000005_ls0001_EoR.jsn",
            ],
        );
        let observer = started(temp_dir.path(), ScriptedWatch::new());
        assert_eq!(observer.run_state(), RunState::Eor);

        assert_eq!(observer.pop_file(None).unwrap().file, FileRecord::index(RUN, 1, 1));

        let reply = observer.pop_file(None).unwrap();
        assert!(reply.file.is_empty());
        assert_eq!(reply.state, RunState::Eor);
        assert_eq!(reply.last_eols, 1);
        assert!(observer.queued().is_empty());

        for _ in 0..3 {
            let reply = observer.pop_file(None).unwrap();
            assert!(reply.file.is_empty());
            assert_eq!(reply.state, RunState::Eor);
        }

        let stats = observer.stats();
        assert_eq!(stats.files_optimized, 2);
        assert_eq!(stats.fu_requests, 5);
        assert_eq!(stats.fu_empty_replies, 4);
        assert_eq!(stats.queue_size_max, 3);
    }

    #[test]
    fn test_missing_directory_sets_norun() {
        let temp_dir = TempDir::new().unwrap();
        let observer = observer(&temp_dir.path().join("run5"));

        observer.observe(&ScriptedProvider::Missing).unwrap();

        assert_eq!(observer.run_state(), RunState::NoRun);
        assert_eq!(observer.fu_state(), RunState::NoRun);
        assert!(!observer.error_message().is_empty());
        assert_eq!(observer.stats().watch.read_calls, 0);

        let reply = observer.pop_file(None).unwrap();
        assert!(reply.file.is_empty());
        assert_eq!(reply.state, RunState::NoRun);
    }

    #[test]
    fn test_watch_setup_failure_sets_error() {
        let temp_dir = TempDir::new().unwrap();
        let observer = observer(temp_dir.path());

        observer.observe(&ScriptedProvider::Broken).unwrap();

        assert_eq!(observer.run_state(), RunState::Error);
        assert_eq!(observer.fu_state(), RunState::Error);
        assert!(observer.error_message().contains("Permission denied"));
    }

    #[test]
    fn test_follow_queues_new_files_until_end_of_run() {
        let temp_dir = TempDir::new().unwrap();
        touch(temp_dir.path(), &["run000005_ls0001_index000001.jsn"]);

        let watch = ScriptedWatch::new()
            .with_batch(&["run000005_ls0002_index000001.jsn", "run000005_ls0001_index000002.jsn"])
            .with_batch(&["run000005_ls0001_index000001.jsn", "run000005_ls0001_EoLS.jsn"])
            .with_batch(&["run000005_ls0002_EoLS.jsn", "run000005_ls0002_EoR.jsn"])
            .with_batch(&["run000005_ls0003_index000001.jsn"]);
        let observer = observer(temp_dir.path());
        observer.observe(&ScriptedProvider::ready(watch)).unwrap();

        // The batch after the end of run is never read
        assert_eq!(
            observer.queued(),
            vec![
                FileRecord::index(RUN, 1, 1),
                FileRecord::index(RUN, 1, 2),
                FileRecord::end_of_lumi_section(RUN, 1),
                FileRecord::index(RUN, 2, 1),
                FileRecord::end_of_lumi_section(RUN, 2),
                FileRecord::end_of_run(RUN, 2),
            ]
        );

        let stats = observer.stats();
        assert_eq!(stats.run_state, RunState::Eor);
        assert_eq!(stats.out_of_order_index_files, 1);
        assert_eq!(stats.watch.read_calls, 3);
        assert_eq!(stats.watch.jsn_files, 6);
        assert_eq!(stats.watch.duplicated, 1);

        let mut delivered = Vec::new();
        loop {
            let reply = observer.pop_file(None).unwrap();
            if reply.file.is_empty() {
                assert_eq!(reply.state, RunState::Eor);
                break;
            }
            delivered.push(reply.file);
        }
        assert_eq!(
            delivered,
            vec![
                FileRecord::index(RUN, 1, 1),
                FileRecord::index(RUN, 1, 2),
                FileRecord::index(RUN, 2, 1),
            ]
        );
    }

    #[test]
    fn test_unparsable_event_fails_the_observer() {
        let temp_dir = TempDir::new().unwrap();
        let watch = ScriptedWatch::new().with_batch(&["run5_ls1_index1.jsn"]);
        let observer = observer(temp_dir.path());

        let err = observer.observe(&ScriptedProvider::ready(watch)).unwrap_err();
        assert!(matches!(err, BrokerError::Parse { .. }));
        assert_eq!(observer.run_state(), RunState::Error);
        assert!(observer.error_message().contains("run5_ls1_index1.jsn"));

        let reply = observer.pop_file(None).unwrap();
        assert_eq!(reply.state, RunState::Error);
    }

    #[test]
    fn test_file_of_another_run_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        touch(temp_dir.path(), &["run000006_ls0001_index000001.jsn"]);
        let observer = observer(temp_dir.path());

        let err = observer.observe(&ScriptedProvider::ready(ScriptedWatch::new())).unwrap_err();
        assert!(matches!(err, BrokerError::Parse { .. }));
        assert_eq!(observer.fu_state(), RunState::Error);
    }

    #[test]
    fn test_regression_after_delivery_is_an_ordering_violation() {
        let temp_dir = TempDir::new().unwrap();
        let observer = observer(temp_dir.path());
        observer.enqueue(FileRecord::index(RUN, 1, 1));
        observer.enqueue(FileRecord::end_of_lumi_section(RUN, 1));
        observer.enqueue(FileRecord::index(RUN, 2, 1));

        observer.pop_file(None).unwrap();
        observer.pop_file(None).unwrap();

        // Arrives after lumisection 2 was already handed out
        observer.enqueue(FileRecord::index(RUN, 1, 7));
        let err = observer.pop_file(None).unwrap_err();
        assert!(matches!(err, BrokerError::OrderingViolation { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_start_and_stop_and_join() {
        let temp_dir = TempDir::new().unwrap();
        touch(temp_dir.path(), &["run000005_ls0001_index000001.jsn"]);
        let observer = Arc::new(RunObserver::new(
            RUN,
            temp_dir.path(),
            ObserverSettings { poll_interval: Duration::from_millis(5), ..Default::default() },
        ));

        let provider: Arc<dyn WatchProvider> =
            Arc::new(ScriptedProvider::ready(ScriptedWatch::new()));
        observer.start(provider).unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while observer.fu_state() == RunState::Starting && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(observer.fu_state(), RunState::Ready);
        assert!(observer.is_running());

        observer.stop_and_join().unwrap();
        assert!(!observer.is_running());
        assert_eq!(observer.pop_file(None).unwrap().file, FileRecord::index(RUN, 1, 1));

        // Joining twice is harmless
        observer.stop_and_join().unwrap();
    }

    #[test]
    fn test_concurrent_pops_deliver_each_file_once() {
        let temp_dir = TempDir::new().unwrap();
        let observer = Arc::new(observer(temp_dir.path()));
        for index in 1..=200 {
            observer.enqueue(FileRecord::index(RUN, 1, index));
        }
        observer.enqueue(FileRecord::end_of_lumi_section(RUN, 1));
        observer.enqueue(FileRecord::end_of_run(RUN, 1));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let observer = Arc::clone(&observer);
                std::thread::spawn(move || {
                    let mut mine = Vec::new();
                    loop {
                        let reply = observer.pop_file(None).unwrap();
                        if reply.file.is_empty() {
                            return mine;
                        }
                        mine.push(reply.file);
                    }
                })
            })
            .collect();

        let mut all: Vec<FileRecord> =
            handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        all.sort();
        all.dedup();

        assert_eq!(all.len(), 200);
        assert_eq!(observer.fu_state(), RunState::Eor);
    }
}
