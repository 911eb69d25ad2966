//! Core functionality for the BUFU file broker
//!
//! This crate follows the run directories written by the BU, queues their
//! marker files in delivery order and hands index files out to the FUs,
//! one at a time and at most once.

pub mod broker;
pub mod config;
pub mod error;
pub mod monitor;
pub mod rename;

pub use broker::{FileBroker, PopReply};
pub use config::{BrokerConfig, ServerConfig};
pub use error::{BrokerError, Result};
pub use monitor::{FileMode, FileRecord, RunState};

/// Version reported in every reply
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
