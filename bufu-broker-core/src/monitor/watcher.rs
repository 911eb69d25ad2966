//! Directory change notification using the notify crate

use crate::error::{BrokerError, Result};
use notify::event::{AccessKind, AccessMode, CreateKind, ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// What happened to a directory entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// A file opened for writing was closed
    CloseWrite,
    /// A file was moved into the directory
    MovedTo,
    /// A file was created
    Create,
}

/// One change notification, reduced to the entry name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub name: String,
    pub kind: ChangeKind,
}

impl RawEvent {
    pub fn new(name: impl Into<String>, kind: ChangeKind) -> Self {
        Self { name: name.into(), kind }
    }
}

/// Which changes a watch reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchMask {
    pub close_write: bool,
    pub moved_to: bool,
    pub create: bool,
}

impl Default for WatchMask {
    /// Completed files only: closed after writing, or renamed into place
    fn default() -> Self {
        Self { close_write: true, moved_to: true, create: false }
    }
}

impl WatchMask {
    /// Map a notify event kind onto a change this mask selects
    pub fn select(&self, kind: &EventKind) -> Option<ChangeKind> {
        match kind {
            EventKind::Access(AccessKind::Close(AccessMode::Write)) if self.close_write => {
                Some(ChangeKind::CloseWrite)
            }
            // Paired renames also come as `Both`, the `To` half is enough
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) if self.moved_to => {
                Some(ChangeKind::MovedTo)
            }
            EventKind::Create(CreateKind::File) if self.create => Some(ChangeKind::Create),
            _ => None,
        }
    }
}

/// Something able to start watching a directory
pub trait WatchProvider: Send + Sync {
    /// Start watching `path`.
    ///
    /// A directory that does not exist must be reported as
    /// [`BrokerError::NoSuchRun`], every other failure as
    /// [`BrokerError::WatchSetup`].
    fn watch(&self, path: &Path, mask: WatchMask) -> Result<Box<dyn DirectoryWatch>>;
}

/// An active watch on one directory
pub trait DirectoryWatch: Send {
    /// Whether events can be read right now without blocking
    fn has_pending_events(&mut self) -> Result<bool>;

    /// Wait up to `timeout` for events.
    ///
    /// Returns an empty batch when nothing arrived in time so the caller can
    /// check for a stop request before waiting again.
    fn read_events(&mut self, timeout: Duration) -> Result<Vec<RawEvent>>;
}

/// Production provider backed by the platform's recommended notify watcher
#[derive(Debug, Default, Clone, Copy)]
pub struct NotifyWatchProvider;

impl NotifyWatchProvider {
    pub fn new() -> Self {
        Self
    }
}

impl WatchProvider for NotifyWatchProvider {
    fn watch(&self, path: &Path, mask: WatchMask) -> Result<Box<dyn DirectoryWatch>> {
        Ok(Box::new(NotifyWatch::new(path, mask)?))
    }
}

/// Watch of one directory through notify, non-recursive
pub struct NotifyWatch {
    // Dropping the watcher ends the watch
    _watcher: RecommendedWatcher,
    rx: Receiver<notify::Result<Event>>,
    pending: VecDeque<RawEvent>,
    path: PathBuf,
    mask: WatchMask,
}

impl NotifyWatch {
    /// Create a watch on `path`
    pub fn new(path: &Path, mask: WatchMask) -> Result<Self> {
        let (tx, rx) = mpsc::channel();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            // The receiver is gone once the watch is dropped
            let _ = tx.send(res);
        })
        .map_err(|e| BrokerError::watch_setup(path, e.to_string()))?;

        watcher
            .watch(path, RecursiveMode::NonRecursive)
            .map_err(|e| setup_error(path, e))?;
        info!("Watching run directory: {:?}", path);

        Ok(Self { _watcher: watcher, rx, pending: VecDeque::new(), path: path.to_path_buf(), mask })
    }

    fn accept(&mut self, res: notify::Result<Event>) {
        let event = match res {
            Ok(event) => event,
            Err(e) => {
                warn!("Watch error on {:?}: {}", self.path, e);
                return;
            }
        };

        let Some(kind) = self.mask.select(&event.kind) else {
            trace!("Ignoring {:?} on {:?}", event.kind, event.paths);
            return;
        };

        for path in &event.paths {
            match path.file_name().and_then(|name| name.to_str()) {
                Some(name) => self.pending.push_back(RawEvent::new(name, kind)),
                None => debug!("Ignoring event for unnamed path {:?}", path),
            }
        }
    }

    fn drain_channel(&mut self) -> Result<()> {
        loop {
            match self.rx.try_recv() {
                Ok(res) => self.accept(res),
                Err(TryRecvError::Empty) => return Ok(()),
                Err(TryRecvError::Disconnected) => return Err(self.closed()),
            }
        }
    }

    fn closed(&self) -> BrokerError {
        BrokerError::io(format!("notification channel for {} closed", self.path.display()))
    }
}

impl DirectoryWatch for NotifyWatch {
    fn has_pending_events(&mut self) -> Result<bool> {
        self.drain_channel()?;
        Ok(!self.pending.is_empty())
    }

    fn read_events(&mut self, timeout: Duration) -> Result<Vec<RawEvent>> {
        if self.pending.is_empty() {
            match self.rx.recv_timeout(timeout) {
                Ok(res) => self.accept(res),
                Err(RecvTimeoutError::Timeout) => return Ok(Vec::new()),
                Err(RecvTimeoutError::Disconnected) => return Err(self.closed()),
            }
        }
        self.drain_channel()?;

        Ok(self.pending.drain(..).collect())
    }
}

fn setup_error(path: &Path, err: notify::Error) -> BrokerError {
    let missing = match &err.kind {
        notify::ErrorKind::PathNotFound => true,
        notify::ErrorKind::Io(io) => io.kind() == std::io::ErrorKind::NotFound,
        _ => false,
    };

    // Backends disagree on how a missing directory is reported
    if missing || !path.exists() {
        BrokerError::no_such_run(path)
    } else {
        BrokerError::watch_setup(path, err.to_string())
    }
}

/// Scripted watch for driving observers deterministically in tests
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Events already queued at watch time, then batches returned one per read
    #[derive(Debug, Default)]
    pub(crate) struct ScriptedWatch {
        pub(crate) pending: VecDeque<RawEvent>,
        pub(crate) batches: VecDeque<Vec<RawEvent>>,
        pub(crate) read_calls: usize,
    }

    impl ScriptedWatch {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        /// Events visible to the startup drain
        pub(crate) fn with_pending(mut self, names: &[&str]) -> Self {
            self.pending.extend(names.iter().map(|n| RawEvent::new(*n, ChangeKind::CloseWrite)));
            self
        }

        /// One batch for the steady-state loop
        pub(crate) fn with_batch(mut self, names: &[&str]) -> Self {
            self.batches
                .push_back(names.iter().map(|n| RawEvent::new(*n, ChangeKind::MovedTo)).collect());
            self
        }
    }

    impl DirectoryWatch for ScriptedWatch {
        fn has_pending_events(&mut self) -> Result<bool> {
            Ok(!self.pending.is_empty())
        }

        fn read_events(&mut self, timeout: Duration) -> Result<Vec<RawEvent>> {
            self.read_calls += 1;
            if !self.pending.is_empty() {
                return Ok(self.pending.drain(..).collect());
            }
            match self.batches.pop_front() {
                Some(batch) => Ok(batch),
                None => {
                    std::thread::sleep(timeout.min(Duration::from_millis(5)));
                    Ok(Vec::new())
                }
            }
        }
    }

    /// Provider handing out one scripted watch, or failing like a real one would
    pub(crate) enum ScriptedProvider {
        Ready(Mutex<Option<ScriptedWatch>>),
        Missing,
        Broken,
    }

    impl ScriptedProvider {
        pub(crate) fn ready(watch: ScriptedWatch) -> Self {
            Self::Ready(Mutex::new(Some(watch)))
        }
    }

    impl WatchProvider for ScriptedProvider {
        fn watch(&self, path: &Path, _mask: WatchMask) -> Result<Box<dyn DirectoryWatch>> {
            match self {
                Self::Ready(slot) => {
                    let watch = slot.lock().unwrap().take().expect("scripted watch used twice");
                    Ok(Box::new(watch))
                }
                Self::Missing => Err(BrokerError::no_such_run(path)),
                Self::Broken => Err(BrokerError::watch_setup(path, "Permission denied")),
            }
        }
    }
}
