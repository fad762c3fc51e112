pub mod file;
pub mod file_monitor;

pub use file::{list_children, write_atomic, StorageFile};
pub use file_monitor::{FileChange, FileChangeKind, FileMonitor, FileMonitorError};
