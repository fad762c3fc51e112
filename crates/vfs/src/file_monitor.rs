use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver};
use std::time::Duration;

use log::warn;
use notify::event::{EventKind, ModifyKind, RemoveKind};
use notify::{Config, RecommendedWatcher, RecursiveMode, Watcher};
use thiserror::Error;

/// 監控目錄變更時可能回傳的錯誤。 / Error type for directory monitoring.
#[derive(Debug, Error)]
pub enum FileMonitorError {
    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),
    #[error("monitor channel disconnected")]
    ChannelDisconnected,
}

/// 監控到的變更種類。 / Classifies an observed change inside a watched directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileChangeKind {
    Created,
    ContentsChanged,
    Deleted,
}

/// 單一檔案的變更通知。 / Change notification for a single file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub path: PathBuf,
    pub kind: FileChangeKind,
}

/// 封裝 `notify` 監視器，於背景執行緒上遞送事件。 / Wraps a `notify` watcher; events arrive from its background thread.
pub struct FileMonitor {
    watcher: RecommendedWatcher,
    rx: Receiver<FileChange>,
}

impl FileMonitor {
    pub fn new() -> Result<Self, FileMonitorError> {
        let (tx, rx) = mpsc::channel();
        let watcher = RecommendedWatcher::new(
            move |res: notify::Result<notify::Event>| match res {
                Ok(event) => {
                    for change in map_event(event) {
                        if tx.send(change).is_err() {
                            return;
                        }
                    }
                }
                Err(err) => warn!("file watcher reported an error: {err}"),
            },
            Config::default(),
        )?;

        Ok(Self { watcher, rx })
    }

    /// 監看目錄的直接子項（不遞迴）。 / Watches the direct children of a directory.
    pub fn watch_directory(&mut self, dir: impl AsRef<Path>) -> Result<(), FileMonitorError> {
        self.watcher
            .watch(dir.as_ref(), RecursiveMode::NonRecursive)
            .map_err(FileMonitorError::from)
    }

    pub fn unwatch(&mut self, dir: impl AsRef<Path>) -> Result<(), FileMonitorError> {
        self.watcher
            .unwatch(dir.as_ref())
            .map_err(FileMonitorError::from)
    }

    /// 嘗試取得下一個事件（非阻塞）。 / Attempts to fetch the next change without blocking.
    pub fn try_next(&self) -> Option<FileChange> {
        self.rx.try_recv().ok()
    }

    /// 在期限內等待事件，逾時回傳 `None`。 / Waits for a change until the timeout, returning `None` on timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<FileChange>, FileMonitorError> {
        match self.rx.recv_timeout(timeout) {
            Ok(change) => Ok(Some(change)),
            Err(mpsc::RecvTimeoutError::Timeout) => Ok(None),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(FileMonitorError::ChannelDisconnected),
        }
    }
}

// A rename is reported as a deletion of the old name and a creation of the new one.
fn map_event(event: notify::Event) -> Vec<FileChange> {
    let change = |path: &PathBuf, kind| FileChange {
        path: path.clone(),
        kind,
    };
    match event.kind {
        EventKind::Modify(ModifyKind::Name(_)) if event.paths.len() >= 2 => vec![
            change(&event.paths[0], FileChangeKind::Deleted),
            change(&event.paths[1], FileChangeKind::Created),
        ],
        EventKind::Modify(ModifyKind::Name(_)) => event
            .paths
            .iter()
            .map(|path| {
                let kind = if path.exists() {
                    FileChangeKind::Created
                } else {
                    FileChangeKind::Deleted
                };
                change(path, kind)
            })
            .collect(),
        EventKind::Modify(ModifyKind::Data(_))
        | EventKind::Modify(ModifyKind::Metadata(_))
        | EventKind::Modify(ModifyKind::Any) => event
            .paths
            .iter()
            .map(|path| change(path, FileChangeKind::ContentsChanged))
            .collect(),
        EventKind::Create(_) => event
            .paths
            .iter()
            .map(|path| change(path, FileChangeKind::Created))
            .collect(),
        EventKind::Remove(RemoveKind::File) | EventKind::Remove(RemoveKind::Any) => event
            .paths
            .iter()
            .map(|path| change(path, FileChangeKind::Deleted))
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, RenameMode};
    use std::fs;
    use std::thread;
    use tempfile::tempdir;

    #[test]
    fn maps_rename_to_delete_and_create() {
        let event = notify::Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(PathBuf::from("/tmp/a.xml"))
            .add_path(PathBuf::from("/tmp/b.xml"));
        assert_eq!(
            map_event(event),
            vec![
                FileChange {
                    path: PathBuf::from("/tmp/a.xml"),
                    kind: FileChangeKind::Deleted,
                },
                FileChange {
                    path: PathBuf::from("/tmp/b.xml"),
                    kind: FileChangeKind::Created,
                },
            ]
        );
    }

    #[test]
    fn ignores_access_events() {
        let event = notify::Event::new(EventKind::Access(notify::event::AccessKind::Any))
            .add_path(PathBuf::from("/tmp/a.xml"));
        assert!(map_event(event).is_empty());
        let created = notify::Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("/tmp/a.xml"));
        assert_eq!(map_event(created)[0].kind, FileChangeKind::Created);
        let written = notify::Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Any)))
            .add_path(PathBuf::from("/tmp/a.xml"));
        assert_eq!(map_event(written)[0].kind, FileChangeKind::ContentsChanged);
    }

    #[test]
    fn detects_file_creation_in_watched_directory() {
        let dir = tempdir().unwrap();
        let mut monitor = FileMonitor::new().unwrap();
        monitor.watch_directory(dir.path()).unwrap();

        // 等待 watcher 啟動。 / Allow watcher to settle.
        thread::sleep(Duration::from_millis(100));

        fs::write(dir.path().join("watch.xml"), "<component />").unwrap();
        let change = monitor
            .recv_timeout(Duration::from_secs(2))
            .unwrap()
            .expect("expected a change");

        assert_eq!(change.path.file_name().unwrap(), "watch.xml");
    }
}
