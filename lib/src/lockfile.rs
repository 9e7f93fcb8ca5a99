//! The process-wide update lock.

use std::fs::File;

use anyhow::{Context, Result};
use camino::Utf8Path;
use fn_error_context::context;
use rustix::fs::FlockOperation;

/// An exclusive advisory lock on a file, held for the lifetime of the
/// value and released when it is dropped (or the process exits).
///
/// Rebase and update hold this for their entire run; the update-check
/// daemon never takes it, it re-invokes `system update` which locks on
/// its own behalf.
#[derive(Debug)]
pub(crate) struct LockFile {
    _file: File,
}

impl LockFile {
    /// Open `path` (creating it and its parent directory if necessary)
    /// and take an exclusive lock, blocking until it is available.
    #[context("Locking {}", path)]
    pub(crate) fn acquire_exclusive(path: &Utf8Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| format!("Creating {parent}"))?;
        }
        let file = File::options()
            .create(true)
            .write(true)
            .open(path)
            .with_context(|| format!("Opening {path}"))?;
        rustix::fs::flock(&file, FlockOperation::LockExclusive)?;
        Ok(Self { _file: file })
    }
}
