//! Run directory monitoring and file queueing
//!
//! This module provides everything needed to follow a run directory written
//! by the BU and to hand its files out to the FUs:
//! - Parsing and ordering of marker files
//! - One-shot directory listing
//! - Change notification through the `notify` crate
//! - A per-run observer owning the delivery queue and statistics
//! - A registry mapping run numbers to observers

pub mod file_info;
pub mod lister;
pub mod observer;
pub mod queue;
pub mod registry;
pub mod stats;
pub mod watcher;


pub use file_info::{FileKind, FileRecord};
pub use lister::list_run_directory;
pub use observer::{PopResult, RunObserver};
pub use queue::RunQueue;
pub use registry::RunRegistry;
pub use stats::StatsSnapshot;
pub use watcher::{
    ChangeKind, DirectoryWatch, NotifyWatchProvider, RawEvent, WatchMask, WatchProvider,
};

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// State of a run as seen either from the directory or from the FUs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    Init,
    Starting,
    Ready,
    Eols,
    Eor,
    Error,
    NoRun,
}

impl RunState {
    /// Error states carry a message retrievable through the observer
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Error | Self::NoRun)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => write!(f, "INIT"),
            Self::Starting => write!(f, "STARTING"),
            Self::Ready => write!(f, "READY"),
            Self::Eols => write!(f, "EOLS"),
            Self::Eor => write!(f, "EOR"),
            Self::Error => write!(f, "ERROR"),
            Self::NoRun => write!(f, "NORUN"),
        }
    }
}

/// Extension family of index files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileMode {
    #[default]
    Jsn,
    Raw,
}

impl FileMode {
    /// Extension appended to an index file name, including the dot
    pub fn index_extension(&self) -> &'static str {
        match self {
            Self::Jsn => ".jsn",
            Self::Raw => ".raw",
        }
    }

    /// Directory filter accepting EoLS/EoR markers and index files of this family
    pub fn filter(&self) -> &'static Regex {
        match self {
            Self::Jsn => &regex_utils::marker_filter::JSN,
            Self::Raw => &regex_utils::marker_filter::RAW,
        }
    }
}

impl fmt::Display for FileMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Jsn => write!(f, "JSN"),
            Self::Raw => write!(f, "RAW"),
        }
    }
}

impl FromStr for FileMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "jsn" => Ok(Self::Jsn),
            "raw" => Ok(Self::Raw),
            other => Err(format!("unknown file mode '{other}', expected 'jsn' or 'raw'")),
        }
    }
}

/// Per-observer settings handed down by the registry
#[derive(Debug, Clone)]
pub struct ObserverSettings {
    pub file_mode: FileMode,
    pub mask: WatchMask,
    /// Longest time the background task blocks before re-checking for a stop request
    pub poll_interval: Duration,
}

impl Default for ObserverSettings {
    fn default() -> Self {
        Self {
            file_mode: FileMode::default(),
            mask: WatchMask::default(),
            poll_interval: Duration::from_millis(250),
        }
    }
}
