use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use dirstore_vfs::{FileChange, FileChangeKind, FileMonitor, FileMonitorError, StorageFile};
use log::debug;

use crate::directory::StorageId;

/// 歸屬於某個儲存的外部檔案變更。 / External file change attributed to the storage owning its directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageFileChange {
    pub file: StorageFile,
    pub kind: FileChangeKind,
    pub storage: StorageId,
}

/// 監看多個儲存目錄並將事件對應回儲存。 / Watches storage directories and maps events back to their storages.
///
/// Storages never block on this; callers poll it and react with
/// `DirectoryStorage::reload` or `SaveSession::analyze_external_changes`.
pub struct StorageChangeTracker {
    monitor: FileMonitor,
    directories: HashMap<PathBuf, StorageId>,
    /// Tracked directories that do not exist yet, with the ancestor watched meanwhile.
    pending: HashMap<PathBuf, Option<PathBuf>>,
}

impl StorageChangeTracker {
    pub fn new() -> Result<Self, FileMonitorError> {
        Ok(Self {
            monitor: FileMonitor::new()?,
            directories: HashMap::new(),
            pending: HashMap::new(),
        })
    }

    /// 監看目錄（不遞迴）並歸屬給 `storage`。 / Watches `dir` non-recursively on behalf of `storage`.
    ///
    /// A missing `dir` is recorded and its nearest existing ancestor watched;
    /// the directory itself is watched from the first poll after it appears.
    pub fn track(&mut self, dir: &Path, storage: StorageId) -> Result<(), FileMonitorError> {
        self.directories.insert(dir.to_path_buf(), storage);
        if dir.is_dir() {
            self.monitor.watch_directory(dir)?;
            self.insert_canonical(dir, storage);
            return Ok(());
        }

        let ancestor = dir
            .ancestors()
            .skip(1)
            .find(|candidate| candidate.is_dir())
            .map(Path::to_path_buf);
        if let Some(ancestor) = ancestor.as_ref() {
            self.monitor.watch_directory(ancestor)?;
        }
        debug!("{} does not exist yet, watching it once it appears", dir.display());
        self.pending.insert(dir.to_path_buf(), ancestor);
        Ok(())
    }

    pub fn untrack(&mut self, dir: &Path) -> Result<(), FileMonitorError> {
        self.directories.remove(dir);
        if let Ok(canonical) = dir.canonicalize() {
            self.directories.remove(&canonical);
        }
        if let Some(ancestor) = self.pending.remove(dir) {
            self.release_ancestor(ancestor);
            return Ok(());
        }
        self.monitor.unwatch(dir)
    }

    pub fn try_next(&mut self) -> Option<StorageFileChange> {
        self.arm_pending();
        loop {
            let change = self.monitor.try_next()?;
            if let Some(attributed) = self.attribute(change) {
                return Some(attributed);
            }
        }
    }

    /// 在期限內等待下一個屬於已追蹤目錄的變更。 / Waits until a change in a tracked directory arrives or the timeout expires.
    pub fn recv_timeout(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<StorageFileChange>, FileMonitorError> {
        let deadline = Instant::now() + timeout;
        loop {
            self.arm_pending();
            let remaining = deadline.saturating_duration_since(Instant::now());
            let Some(change) = self.monitor.recv_timeout(remaining)? else {
                return Ok(None);
            };
            if let Some(attributed) = self.attribute(change) {
                return Ok(Some(attributed));
            }
        }
    }

    /// 取出目前佇列中的所有變更。 / Takes every change queued so far.
    pub fn drain(&mut self) -> Vec<StorageFileChange> {
        std::iter::from_fn(|| self.try_next()).collect()
    }

    fn attribute(&self, change: FileChange) -> Option<StorageFileChange> {
        let parent = change.path.parent()?;
        let Some(storage) = self.directories.get(parent).copied() else {
            debug!("ignoring change outside tracked storages: {}", change.path.display());
            return None;
        };
        Some(StorageFileChange {
            file: StorageFile::new(change.path),
            kind: change.kind,
            storage,
        })
    }

    // Watchers may report canonical paths (e.g. resolved symlinks).
    fn insert_canonical(&mut self, dir: &Path, storage: StorageId) {
        if let Ok(canonical) = dir.canonicalize() {
            self.directories.insert(canonical, storage);
        }
    }

    fn arm_pending(&mut self) {
        let ready: Vec<PathBuf> = self
            .pending
            .keys()
            .filter(|dir| dir.is_dir())
            .cloned()
            .collect();
        for dir in ready {
            if let Err(err) = self.monitor.watch_directory(&dir) {
                debug!("cannot watch {} yet: {err}", dir.display());
                continue;
            }
            debug!("watching {} now that it exists", dir.display());
            if let Some(storage) = self.directories.get(&dir).copied() {
                self.insert_canonical(&dir, storage);
            }
            if let Some(ancestor) = self.pending.remove(&dir) {
                self.release_ancestor(ancestor);
            }
        }
    }

    fn release_ancestor(&mut self, ancestor: Option<PathBuf>) {
        let Some(ancestor) = ancestor else {
            return;
        };
        let still_needed = self
            .pending
            .values()
            .any(|other| other.as_deref() == Some(ancestor.as_path()));
        if still_needed || self.directories.contains_key(&ancestor) {
            return;
        }
        if let Err(err) = self.monitor.unwatch(&ancestor) {
            debug!("failed to unwatch {}: {err}", ancestor.display());
        }
    }
}
