//! Run number to observer map

use crate::error::{BrokerError, Result};
use crate::monitor::{ObserverSettings, RunObserver, WatchProvider};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Owns one observer per run number, creating and starting them on first use
pub struct RunRegistry {
    base_directory: PathBuf,
    settings: ObserverSettings,
    provider: Arc<dyn WatchProvider>,
    observers: DashMap<u32, Arc<RunObserver>>,
}

impl RunRegistry {
    pub fn new(
        base_directory: impl Into<PathBuf>,
        settings: ObserverSettings,
        provider: Arc<dyn WatchProvider>,
    ) -> Self {
        Self {
            base_directory: base_directory.into(),
            settings,
            provider,
            observers: DashMap::new(),
        }
    }

    pub fn base_directory(&self) -> &Path {
        &self.base_directory
    }

    pub fn settings(&self) -> &ObserverSettings {
        &self.settings
    }

    /// Directory of a run, `<base>/run<N>` without zero padding
    pub fn run_directory(&self, run_number: u32) -> PathBuf {
        self.base_directory.join(format!("run{run_number}"))
    }

    /// The observer of a run, created and started if this is the first request for it
    pub fn get(&self, run_number: u32) -> Result<Arc<RunObserver>> {
        if let Some(existing) = self.observers.get(&run_number) {
            return Ok(Arc::clone(existing.value()));
        }

        let observer = Arc::new(self.build(run_number));
        match self.observers.entry(run_number) {
            Entry::Occupied(entry) => {
                // Another request created it first, ours never started
                debug!("Observer for run {} created concurrently, discarding ours", run_number);
                Ok(Arc::clone(entry.get()))
            }
            Entry::Vacant(entry) => {
                observer.start(Arc::clone(&self.provider))?;
                entry.insert(Arc::clone(&observer));
                debug!("Observer created for run {}", run_number);
                Ok(observer)
            }
        }
    }

    /// Register an observer built elsewhere, refusing to replace an existing one
    pub fn insert(&self, observer: Arc<RunObserver>) -> Result<()> {
        let run_number = observer.run_number();
        match self.observers.entry(run_number) {
            Entry::Occupied(_) => Err(BrokerError::DuplicateObserver { run_number }),
            Entry::Vacant(entry) => {
                entry.insert(observer);
                Ok(())
            }
        }
    }

    /// Replace the observer of a run with a fresh one.
    ///
    /// The replaced observer is stopped and joined once the new one is in
    /// the map, so callers are never without an observer for the run.
    pub fn restart(&self, run_number: u32) -> Result<Arc<RunObserver>> {
        let fresh = Arc::new(self.build(run_number));
        fresh.start(Arc::clone(&self.provider))?;

        let previous = self.observers.insert(run_number, Arc::clone(&fresh));
        info!("Observer for run {} restarted", run_number);

        if let Some(previous) = previous {
            if let Err(e) = previous.stop_and_join() {
                warn!("Replaced observer of run {} had failed: {}", run_number, e);
            }
        }

        Ok(fresh)
    }

    /// Statistics of every observer, newest run first
    pub fn stats_all(&self) -> String {
        let mut observers = self.observers();
        observers.sort_by(|a, b| b.run_number().cmp(&a.run_number()));

        let mut out = format!("runNumbers={}\n", observers.len());
        for observer in observers {
            out.push_str(&observer.stats().to_string());
        }
        out
    }

    /// Run numbers currently tracked, ascending
    pub fn run_numbers(&self) -> Vec<u32> {
        let mut runs: Vec<u32> = self.observers.iter().map(|entry| *entry.key()).collect();
        runs.sort_unstable();
        runs
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    /// Stop and join every observer
    pub fn shutdown(&self) {
        let observers = self.observers();
        info!("Stopping {} run observers", observers.len());

        for observer in observers {
            if let Err(e) = observer.stop_and_join() {
                warn!("Observer of run {} had failed: {}", observer.run_number(), e);
            }
        }
    }

    // Snapshot of the values, so no map guard is held while observers are used
    fn observers(&self) -> Vec<Arc<RunObserver>> {
        self.observers.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    fn build(&self, run_number: u32) -> RunObserver {
        RunObserver::new(run_number, self.run_directory(run_number), self.settings.clone())
    }
}
