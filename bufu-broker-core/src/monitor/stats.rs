//! Observer statistics and their text rendering

use crate::monitor::{FileKind, FileMode, FileRecord, RunState};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// One of the two state tracks: what was found on disk, or what was handed out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateTrack {
    pub state: RunState,
    /// Last end-of-lumisection seen on this track, 0 before any
    pub last_eols: u32,
    /// Last record that went through [`StateTrack::advance`]
    pub last_file: FileRecord,
}

impl Default for StateTrack {
    fn default() -> Self {
        Self { state: RunState::Init, last_eols: 0, last_file: FileRecord::empty() }
    }
}

impl StateTrack {
    /// Move the track past `record`
    pub fn advance(&mut self, record: &FileRecord) {
        debug_assert!(!record.is_empty());

        self.state = match record.kind {
            FileKind::EndOfLumiSection => {
                self.last_eols = record.lumi_section;
                RunState::Eols
            }
            FileKind::EndOfRun => RunState::Eor,
            _ => RunState::Ready,
        };
        self.last_file = *record;
    }
}

/// Notification counters, written only by the observer's background task.
///
/// Read from other threads without the observer lock, so values seen by a
/// stats call may trail the task slightly.
#[derive(Debug, Default)]
pub struct WatchCounters {
    read_calls: AtomicU64,
    all_files: AtomicU64,
    jsn_files: AtomicU64,
    duplicated: AtomicU64,
}

impl WatchCounters {
    pub fn read_call(&self) {
        self.read_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn any_file(&self) {
        self.all_files.fetch_add(1, Ordering::Relaxed);
    }

    pub fn jsn_file(&self) {
        self.jsn_files.fetch_add(1, Ordering::Relaxed);
    }

    pub fn duplicate(&self) {
        self.duplicated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> WatchCountersSnapshot {
        WatchCountersSnapshot {
            read_calls: self.read_calls.load(Ordering::Relaxed),
            all_files: self.all_files.load(Ordering::Relaxed),
            jsn_files: self.jsn_files.load(Ordering::Relaxed),
            duplicated: self.duplicated.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchCountersSnapshot {
    pub read_calls: u64,
    pub all_files: u64,
    pub jsn_files: u64,
    pub duplicated: u64,
}

/// Counters guarded by the observer lock
#[derive(Debug, Default)]
pub struct Statistics {
    pub startup_files: u64,
    pub startup_optimized: u64,
    pub files_processed: u64,
    pub files_optimized: u64,
    pub out_of_order_index_files: u64,
    pub run: StateTrack,
    pub fu: FuCounters,
}

/// Consumer side: the track plus request accounting
#[derive(Debug, Default)]
pub struct FuCounters {
    pub track: StateTrack,
    pub requests: u64,
    pub empty_replies: u64,
    pub waits_for_eols: u64,
    /// Last stop lumisection a request supplied, if any did
    pub stop_ls: Option<u32>,
}

/// Point-in-time copy of everything an observer reports
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub run_number: u32,
    pub file_mode: FileMode,
    pub startup_files: u64,
    pub startup_optimized: u64,
    pub startup_watch: WatchCountersSnapshot,
    pub watch: WatchCountersSnapshot,
    pub files_processed: u64,
    pub files_optimized: u64,
    pub error_message: String,
    pub run_state: RunState,
    pub out_of_order_index_files: u64,
    pub last_processed_file: FileRecord,
    pub run_last_eols: u32,
    pub queue_size_max: usize,
    pub queue_size: usize,
    pub fu_state: RunState,
    pub fu_requests: u64,
    pub fu_empty_replies: u64,
    pub fu_waits_for_eols: u64,
    pub fu_last_popped_file: FileRecord,
    pub fu_last_eols: u32,
    pub fu_stop_ls: Option<u32>,
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const SEP: &str = "  ";

        writeln!(f, "runNumber={}", self.run_number)?;
        writeln!(f, "{SEP}startup.nbJsnFiles={}", self.startup_files)?;
        writeln!(f, "{SEP}startup.nbJsnFilesOptimized={}", self.startup_optimized)?;
        writeln!(f, "{SEP}startup.inotify.nbInotifyReadCalls={}", self.startup_watch.read_calls)?;
        writeln!(f, "{SEP}startup.inotify.nbAllFiles={}", self.startup_watch.all_files)?;
        writeln!(f, "{SEP}startup.inotify.nbJsnFiles={}", self.startup_watch.jsn_files)?;
        writeln!(f, "{SEP}startup.inotify.nbJsnFilesDuplicated={}", self.startup_watch.duplicated)?;
        writeln!(f)?;
        writeln!(f, "{SEP}inotify.nbInotifyReadCalls={}", self.watch.read_calls)?;
        writeln!(f, "{SEP}inotify.nbAllFiles={}", self.watch.all_files)?;
        writeln!(f, "{SEP}inotify.nbJsnFiles={}", self.watch.jsn_files)?;
        writeln!(f, "{SEP}inotify.nbJsnFilesDuplicated={}", self.watch.duplicated)?;
        writeln!(f)?;
        writeln!(f, "{SEP}nbJsnFilesProcessed={}", self.files_processed)?;
        writeln!(f, "{SEP}nbJsnFilesOptimized={}", self.files_optimized)?;
        writeln!(f)?;
        writeln!(f, "{SEP}errorMessage=\"{}\"", self.error_message)?;
        writeln!(f)?;
        writeln!(f, "{SEP}run.fileMode={}", self.file_mode)?;
        writeln!(f, "{SEP}run.state={}", self.run_state)?;
        writeln!(f, "{SEP}run.nbOutOfOrderIndexFiles={}", self.out_of_order_index_files)?;
        writeln!(f, "{SEP}run.lastProcessedFile=\"{}\"", self.last_processed_file)?;
        writeln!(f, "{SEP}run.lastEoLS={}", self.run_last_eols)?;
        writeln!(f)?;
        writeln!(f, "{SEP}queueSizeMax={}", self.queue_size_max)?;
        writeln!(f, "{SEP}queueSize={}", self.queue_size)?;
        writeln!(f)?;
        writeln!(f, "{SEP}fu.state={}", self.fu_state)?;
        writeln!(f, "{SEP}fu.nbRequests={}", self.fu_requests)?;
        writeln!(f, "{SEP}fu.nbEmptyReplies={}", self.fu_empty_replies)?;
        writeln!(f, "{SEP}fu.nbWaitsForEoLS={}", self.fu_waits_for_eols)?;
        writeln!(f, "{SEP}fu.lastPoppedFile=\"{}\"", self.fu_last_popped_file)?;
        writeln!(f, "{SEP}fu.lastEoLS={}", self.fu_last_eols)?;
        match self.fu_stop_ls {
            Some(ls) => writeln!(f, "{SEP}fu.stopLS={ls}")?,
            None => writeln!(f, "{SEP}fu.stopLS=-1")?,
        }
        writeln!(f)
    }
}
