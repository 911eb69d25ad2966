//! Renaming of delivered index files

use crate::error::{BrokerError, Result};
use std::io::ErrorKind;
use std::path::Path;
use tracing::{debug, error};

/// Marks an index file as taken by moving it under a new name
pub trait FileRenamer: Send + Sync {
    /// Rename `run_directory/original_name` to `run_directory/prefixed_name`.
    ///
    /// Failures are fatal for the request that triggered them.
    fn rename(&self, run_directory: &Path, original_name: &str, prefixed_name: &str) -> Result<()>;
}

/// Renames within the run directory, creating the prefix directory on demand
#[derive(Debug, Default, Clone, Copy)]
pub struct PrefixRenamer;

impl PrefixRenamer {
    pub fn new() -> Self {
        Self
    }
}

impl FileRenamer for PrefixRenamer {
    fn rename(&self, run_directory: &Path, original_name: &str, prefixed_name: &str) -> Result<()> {
        let from = run_directory.join(original_name);
        let to = run_directory.join(prefixed_name);

        let mut created = false;
        loop {
            match std::fs::rename(&from, &to) {
                Ok(()) => {
                    if created {
                        debug!("Index file rename succeeded after creating {:?}", to.parent());
                    }
                    return Ok(());
                }
                Err(e) if e.kind() == ErrorKind::NotFound && !created => {
                    let Some(target_dir) = to.parent() else {
                        return Err(fail(run_directory, &from, &to, e.to_string()));
                    };
                    debug!("Index file rename failed, creating directory {:?}", target_dir);
                    if let Err(create) = create_shared_dir(target_dir) {
                        error!("Creating directory {:?} failed: {}", target_dir, create);
                        return Err(fail(run_directory, &from, &to, e.to_string()));
                    }
                    created = true;
                }
                Err(e) => return Err(fail(run_directory, &from, &to, e.to_string())),
            }
        }
    }
}

fn create_shared_dir(dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;

    // Open to every FU account
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o777))?;
    }

    Ok(())
}

fn fail(run_directory: &Path, from: &Path, to: &Path, message: String) -> BrokerError {
    let err = BrokerError::rename(from, to, message);
    error!("{}", err);
    debug!(
        "Rename diagnosis: run directory {:?} exists={}, source exists={}, target directory exists={}",
        run_directory,
        run_directory.is_dir(),
        from.is_file(),
        to.parent().is_some_and(Path::is_dir),
    );
    err
}
