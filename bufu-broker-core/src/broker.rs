//! Request-facing surface of the broker
//!
//! [`FileBroker`] ties the registry to the renaming of delivered files and
//! renders replies in the line-oriented `key=value` format FUs parse.

use crate::config::BrokerConfig;
use crate::error::Result;
use crate::monitor::{
    FileMode, FileRecord, NotifyWatchProvider, RunRegistry, RunState, WatchProvider,
};
use crate::rename::{FileRenamer, PrefixRenamer};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

/// Reply to a pop request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PopReply {
    pub run_number: u32,
    pub file_mode: FileMode,
    pub state: RunState,
    /// Present for ERROR and NORUN only
    pub error_message: Option<String>,
    /// The delivered index file, or the empty placeholder
    pub file: FileRecord,
    pub file_prefix: String,
    pub file_extension: &'static str,
    pub last_eols: u32,
}

impl fmt::Display for PopReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "runnumber={}", self.run_number)?;
        writeln!(f, "filemode={}", self.file_mode)?;
        writeln!(f, "state={}", self.state)?;
        if let Some(message) = &self.error_message {
            writeln!(f, "errormessage=\"{message}\"")?;
        }

        if self.file.is_empty() {
            writeln!(f, "lumisection={}", self.last_eols)?;
        } else {
            writeln!(f, "file=\"{}\"", self.file)?;
            writeln!(f, "fileprefix=\"{}\"", self.file_prefix)?;
            writeln!(f, "fileextension=\"{}\"", self.file_extension)?;
            writeln!(f, "lumisection={}", self.file.lumi_section)?;
            writeln!(f, "index={}", self.file.index)?;
        }
        writeln!(f, "lasteols={}", self.last_eols)
    }
}

/// Serves files of any run to the FUs
pub struct FileBroker {
    registry: RunRegistry,
    renamer: Arc<dyn FileRenamer>,
    index_file_prefix: String,
}

impl FileBroker {
    /// Broker watching with notify and renaming in place
    pub fn new(config: &BrokerConfig) -> Self {
        Self::with_parts(
            config,
            Arc::new(NotifyWatchProvider::new()),
            Arc::new(PrefixRenamer::new()),
        )
    }

    pub fn with_parts(
        config: &BrokerConfig,
        provider: Arc<dyn WatchProvider>,
        renamer: Arc<dyn FileRenamer>,
    ) -> Self {
        let registry =
            RunRegistry::new(&config.base_directory, config.observer_settings(), provider);
        Self { registry, renamer, index_file_prefix: config.index_file_prefix.clone() }
    }

    pub fn registry(&self) -> &RunRegistry {
        &self.registry
    }

    pub fn file_mode(&self) -> FileMode {
        self.registry.settings().file_mode
    }

    /// Hand out the next index file of a run, renamed with the index file prefix.
    ///
    /// Errors are fatal: a broken delivery order or a failed rename.
    pub fn pop_run_file(&self, run_number: u32, stop_ls: Option<u32>) -> Result<PopReply> {
        let observer = self.registry.get(run_number)?;
        let result = observer.pop_file(stop_ls)?;

        let file_mode = self.file_mode();
        let file_extension = file_mode.index_extension();

        if !result.file.is_empty() {
            let name = format!("{}{}", result.file, file_extension);
            let prefixed = format!("{}{}", self.index_file_prefix, name);
            self.renamer.rename(observer.directory(), &name, &prefixed)?;
            debug!("Run {}: delivered {}", run_number, name);
        } else {
            trace!("Run {}: nothing to deliver ({})", run_number, result.state);
        }

        let error_message = result.state.is_failure().then(|| observer.error_message());

        Ok(PopReply {
            run_number,
            file_mode,
            state: result.state,
            error_message,
            file: result.file,
            file_prefix: self.index_file_prefix.clone(),
            file_extension,
            last_eols: result.last_eols,
        })
    }

    /// Statistics of one run, or of every run
    pub fn stats(&self, run_number: Option<u32>) -> Result<String> {
        match run_number {
            Some(run_number) => Ok(self.registry.get(run_number)?.stats().to_string()),
            None => Ok(self.registry.stats_all()),
        }
    }

    /// Message of the failure that stopped a run's observer, empty if none
    pub fn error(&self, run_number: u32) -> Result<String> {
        Ok(self.registry.get(run_number)?.error_message())
    }

    /// Replace a run's observer and return the fresh observer's statistics
    pub fn restart(&self, run_number: u32) -> Result<String> {
        Ok(self.registry.restart(run_number)?.stats().to_string())
    }

    /// Stop every observer
    pub fn shutdown(&self) {
        self.registry.shutdown();
    }
}
