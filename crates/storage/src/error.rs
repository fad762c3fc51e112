use std::io;
use std::path::PathBuf;

use dirstore_dom::DomError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StorageError>;

/// 讀寫元件狀態時的失敗。 / Failure while loading or persisting component state.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: DomError,
    },
    #[error("malformed storage file {path}: {reason}")]
    MalformedDocument { path: PathBuf, reason: String },
    #[error("failed to serialize state: {0}")]
    Serialize(#[source] DomError),
    #[error("failed to deserialize state of component {component}: {source}")]
    Deserialize {
        component: String,
        #[source]
        source: DomError,
    },
    #[error("invalid storage file name {0:?}")]
    InvalidFileName(String),
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
