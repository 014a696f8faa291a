use ignore::{DirEntry, WalkBuilder};
use std::borrow::Cow;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::errors::{SearchError, SearchResult};

/// The counting pass reports its running total every this many files
pub const COUNT_REPORT_INTERVAL: u64 = 1000;

/// One file to examine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTask {
    pub directory: PathBuf,
    pub file_name: OsString,
}

impl FileTask {
    pub fn new(directory: PathBuf, file_name: OsString) -> Self {
        Self {
            directory,
            file_name,
        }
    }

    fn from_entry(entry: DirEntry) -> Self {
        let directory = entry
            .path()
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Self::new(directory, entry.file_name().to_os_string())
    }

    /// Full path of the file
    pub fn path(&self) -> PathBuf {
        self.directory.join(&self.file_name)
    }

    /// File name for matching; non UTF-8 names are converted lossily
    pub fn name(&self) -> Cow<'_, str> {
        self.file_name.to_string_lossy()
    }
}

/// Recursive directory traversal for one session.
///
/// Visits every file under the root: hidden files are included and no ignore
/// rules apply. Symbolic links are not followed into directories. Entries are
/// sorted by name within each directory so repeated walks of an unchanged
/// tree produce the same order. Unreadable directories and broken links are
/// skipped.
#[derive(Debug, Clone)]
pub struct Walker {
    root: PathBuf,
    cancel: Arc<AtomicBool>,
}

impl Walker {
    pub fn new(root: impl Into<PathBuf>, cancel: Arc<AtomicBool>) -> Self {
        Self {
            root: root.into(),
            cancel,
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    fn builder(&self) -> WalkBuilder {
        let mut builder = WalkBuilder::new(&self.root);
        builder
            .standard_filters(false)
            .follow_links(false)
            .sort_by_file_name(|a, b| a.cmp(b));
        builder
    }

    /// Fails when the root itself cannot be listed.
    pub fn ensure_readable(&self) -> SearchResult<()> {
        fs::read_dir(&self.root).map(|_| ()).map_err(|e| {
            SearchError::session_failed(format!(
                "cannot enumerate {}: {}",
                self.root.display(),
                e
            ))
        })
    }

    /// Counts the files under the root without opening any of them.
    ///
    /// `on_progress` receives the running total every
    /// [`COUNT_REPORT_INTERVAL`] files. Returns `SearchError::Cancelled` if
    /// the session is stopped mid-count.
    pub fn count<F>(&self, mut on_progress: F) -> SearchResult<u64>
    where
        F: FnMut(u64),
    {
        let mut count = 0;
        for entry in self.builder().build() {
            if self.is_cancelled() {
                debug!("Counting cancelled after {} files", count);
                return Err(SearchError::Cancelled);
            }
            match entry {
                Ok(entry) if is_searchable_file(&entry) => {
                    count += 1;
                    if count % COUNT_REPORT_INTERVAL == 0 {
                        on_progress(count);
                    }
                }
                Ok(_) => {}
                Err(e) => debug!("Skipping unreadable entry while counting: {}", e),
            }
        }
        debug!("Counted {} files under {}", count, self.root.display());
        Ok(count)
    }

    /// Lazily yields one task per file, stopping once the session is
    /// cancelled.
    pub fn tasks(&self) -> impl Iterator<Item = FileTask> + '_ {
        self.builder()
            .build()
            .take_while(move |_| !self.is_cancelled())
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    debug!("Skipping unreadable entry: {}", e);
                    None
                }
            })
            .filter(is_searchable_file)
            .map(FileTask::from_entry)
    }
}

/// Regular files, and links that resolve to regular files
fn is_searchable_file(entry: &DirEntry) -> bool {
    match entry.file_type() {
        Some(ft) if ft.is_file() => true,
        Some(ft) if ft.is_symlink() => fs::metadata(entry.path())
            .map(|m| m.is_file())
            .unwrap_or(false),
        _ => false,
    }
}
