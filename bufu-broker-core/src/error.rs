//! Error types for the file broker
//!
//! Environmental failures (missing run directory, watch setup) are absorbed
//! into observer state and reported through `getError`. Logic defects
//! (parse failures of filtered names, ordering violations, duplicate
//! observers, failed renames) are fatal for the operation that hit them.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for broker operations
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The run directory does not exist
    #[error("No such run directory: {}", path.display())]
    NoSuchRun { path: PathBuf },

    /// Registering the change watch failed for a reason other than a missing directory
    #[error("Failed to watch {}: {message}", path.display())]
    WatchSetup { path: PathBuf, message: String },

    /// A name accepted by the directory filter could not be parsed
    #[error("Cannot parse file name '{name}': {reason}")]
    Parse { name: String, reason: String },

    /// A popped file would go out before an already delivered one
    #[error(
        "Consistency check failed, file order is broken: going to give file '{next}' but the last file given to FU was '{last}'"
    )]
    OrderingViolation { next: String, last: String },

    /// The registry was asked to insert a run number it already holds
    #[error("Observer for run {run_number} already exists")]
    DuplicateObserver { run_number: u32 },

    /// Listing the run directory failed
    #[error("Error during directory listing '{}': {message}", path.display())]
    Listing { path: PathBuf, message: String },

    /// Renaming a delivered index file failed
    #[error("Index file rename failed ({} -> {}): {message}", from.display(), to.display())]
    Rename { from: PathBuf, to: PathBuf, message: String },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Any other I/O failure (thread spawn, filesystem)
    #[error("I/O error: {message}")]
    Io { message: String },
}

impl BrokerError {
    /// Create a missing run directory error
    pub fn no_such_run(path: impl Into<PathBuf>) -> Self {
        Self::NoSuchRun { path: path.into() }
    }

    /// Create a watch setup error
    pub fn watch_setup(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::WatchSetup { path: path.into(), message: message.into() }
    }

    /// Create a parse error
    pub fn parse(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Parse { name: name.into(), reason: reason.into() }
    }

    /// Create an ordering violation error
    pub fn ordering(next: impl Into<String>, last: impl Into<String>) -> Self {
        Self::OrderingViolation { next: next.into(), last: last.into() }
    }

    /// Create a listing error
    pub fn listing(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Listing { path: path.into(), message: message.into() }
    }

    /// Create a rename error
    pub fn rename(
        from: impl Into<PathBuf>,
        to: impl Into<PathBuf>,
        message: impl Into<String>,
    ) -> Self {
        Self::Rename { from: from.into(), to: to.into(), message: message.into() }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config { message: message.into() }
    }

    /// Create an I/O error
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io { message: message.into() }
    }

    /// Whether the error signals a defect that must stop the affected operation loudly
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Parse { .. }
                | Self::OrderingViolation { .. }
                | Self::DuplicateObserver { .. }
                | Self::Rename { .. }
        )
    }
}

/// Result type for broker operations
pub type Result<T> = std::result::Result<T, BrokerError>;

impl From<std::io::Error> for BrokerError {
    fn from(err: std::io::Error) -> Self {
        Self::Io { message: err.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BrokerError::no_such_run("/fff/ramdisk/run42");
        assert_eq!(err.to_string(), "No such run directory: /fff/ramdisk/run42");

        let err = BrokerError::parse("run1_ls1_EoLS.jsn", "not canonical");
        assert_eq!(err.to_string(), "Cannot parse file name 'run1_ls1_EoLS.jsn': not canonical");

        let err =
            BrokerError::ordering("run000001_ls0001_index000001", "run000001_ls0002_index000001");
        assert!(err.to_string().contains("file order is broken"));
    }

    #[test]
    fn test_fatal_classification() {
        assert!(BrokerError::parse("x", "y").is_fatal());
        assert!(BrokerError::ordering("a", "b").is_fatal());
        assert!(BrokerError::DuplicateObserver { run_number: 7 }.is_fatal());
        assert!(BrokerError::rename("a", "b", "c").is_fatal());

        assert!(!BrokerError::no_such_run("/nope").is_fatal());
        assert!(!BrokerError::watch_setup("/nope", "EACCES").is_fatal());
        assert!(!BrokerError::config("bad").is_fatal());
    }

    #[test]
    fn test_io_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: BrokerError = io_err.into();
        assert!(matches!(err, BrokerError::Io { .. }));
    }
}
