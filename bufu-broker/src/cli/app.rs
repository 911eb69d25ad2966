use anyhow::Result;
use bufu_broker_core::BrokerConfig;
use bufu_broker_core::monitor::FileMode;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "bufu-broker",
    version,
    about = "BUFU File Broker - hands the files written by the BU out to the FUs",
    long_about = "BUFU File Broker follows the run directories written by the BU and serves their index files to the FUs over HTTP, in lumisection order and at most once."
)]
pub struct Cli {
    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Path to configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Bind to a specific address
    #[arg(long)]
    pub bind: Option<String>,

    /// Listen on a port
    #[arg(long)]
    pub port: Option<u16>,

    /// Number of threads serving HTTP requests
    #[arg(long)]
    pub threads: Option<usize>,

    /// Directory holding the run directories
    #[arg(long, value_name = "DIR")]
    pub docroot: Option<PathBuf>,

    /// File prefix used when index files are renamed
    #[arg(long)]
    pub index_file_prefix: Option<String>,

    /// Index file family to serve (jsn or raw)
    #[arg(long)]
    pub file_mode: Option<FileMode>,

    /// Longest wait of a run observer between stop checks
    #[arg(long)]
    pub poll_interval_ms: Option<u64>,

    /// Log every HTTP request and response
    #[arg(long)]
    pub debug_http_requests: bool,
}

impl Cli {
    /// Configuration from the file (or defaults) with command line values on top
    pub fn resolve_config(&self) -> Result<BrokerConfig> {
        let mut config = match &self.config {
            Some(path) => BrokerConfig::from_file(path)?,
            None => BrokerConfig::default(),
        };

        if let Some(bind) = &self.bind {
            config.server.bind = bind.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(threads) = self.threads {
            config.server.threads = threads;
        }
        if let Some(docroot) = &self.docroot {
            config.base_directory = docroot.clone();
        }
        if let Some(prefix) = &self.index_file_prefix {
            config.index_file_prefix = prefix.clone();
        }
        if let Some(file_mode) = self.file_mode {
            config.file_mode = file_mode;
        }
        if let Some(poll_interval_ms) = self.poll_interval_ms {
            config.poll_interval_ms = poll_interval_ms;
        }
        if self.debug_http_requests {
            config.server.debug_http_requests = true;
        }

        config.validate()?;
        Ok(config)
    }

    /// Filter used when `RUST_LOG` is not set
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}
