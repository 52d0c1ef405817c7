use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Error;

/// Owner of every temporary file one request creates.
///
/// Paths handed out by [`TempFiles::allocate`] carry a random UUID, so
/// concurrent requests sharing the uploads directory never collide. Each
/// registered file is deleted exactly once: on [`TempFiles::release`], on
/// [`TempFiles::cleanup`], or when the owner is dropped, whichever comes
/// first. Deletion errors are logged and never returned.
#[derive(Debug)]
pub struct TempFiles {
    dir: PathBuf,
    entries: Vec<Entry>,
}

#[derive(Debug)]
struct Entry {
    path: PathBuf,
    removed: bool,
}

impl TempFiles {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            entries: Vec::new(),
        }
    }

    /// Reserve a fresh `<uuid>.<extension>` path in the scratch directory and register it.
    ///
    /// The file itself is not created.
    pub fn allocate(&mut self, extension: &str) -> PathBuf {
        let path = self.dir.join(format!("{}.{extension}", Uuid::new_v4()));
        self.register(path.clone());
        path
    }

    /// Take ownership of an existing path.
    pub fn register(&mut self, path: PathBuf) {
        if self.entries.iter().any(|e| e.path == path) {
            return;
        }
        debug!(path = %path.display(), "registered temporary file");
        self.entries.push(Entry {
            path,
            removed: false,
        });
    }

    /// Remove one registered file now. Unknown or already-removed paths are ignored.
    pub fn release(&mut self, path: &Path) {
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|e| e.path == path && !e.removed)
        {
            remove(entry);
        }
    }

    /// Remove every registered file that is still pending. Returns how many were pending.
    ///
    /// Calling this again is a no-op.
    pub fn cleanup(&mut self) -> usize {
        let mut pending = 0;
        for entry in self.entries.iter_mut().filter(|e| !e.removed) {
            remove(entry);
            pending += 1;
        }
        pending
    }

    /// Registered paths that have not been removed yet.
    pub fn pending(&self) -> impl Iterator<Item = &Path> {
        self.entries
            .iter()
            .filter(|e| !e.removed)
            .map(|e| e.path.as_path())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn remove(entry: &mut Entry) {
    entry.removed = true;
    match std::fs::remove_file(&entry.path) {
        Ok(()) => debug!(path = %entry.path.display(), "removed temporary file"),
        // Never created (e.g. download failed) or already gone.
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %entry.path.display(), "temporary file already absent");
        }
        Err(source) => {
            let err = Error::CleanupFailure {
                path: entry.path.clone(),
                source,
            };
            warn!(error = %err, "cleanup failed");
        }
    }
}

impl Drop for TempFiles {
    fn drop(&mut self) {
        self.cleanup();
    }
}
