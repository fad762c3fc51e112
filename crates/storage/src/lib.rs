pub mod config;
mod directory;
mod error;
pub mod macros;
mod serializer;
mod session;
pub mod splitter;
mod storage_data;
pub mod tracker;

pub use config::{ConfigError, StorageConfig};
pub use directory::{DirectoryStorage, StorageId};
pub use error::{Result, StorageError};
pub use macros::{PathMacroMap, TrackingPathMacroSubstitutor};
pub use serializer::{deserialize_state, serialize_state, StorageSpec};
pub use session::{ExternalizationSession, SaveSession};
pub use splitter::{sanitize_file_name, SplitterPolicy, StateSplitter};
pub use tracker::{StorageChangeTracker, StorageFileChange};

pub use dirstore_dom::Element;
pub use dirstore_vfs::{FileChangeKind, StorageFile};
