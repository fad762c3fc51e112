use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::splitter::SplitterPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read storage config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse storage config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// 目錄儲存的設定。 / Declarative description of one directory storage.
///
/// ```json
/// {
///   "directory": "/work/app/.idea/runConfigurations",
///   "splitter": { "kind": "per_child", "name_attribute": "name" },
///   "path_macros": { "PROJECT_DIR": "/work/app" }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    pub directory: PathBuf,
    pub splitter: SplitterPolicy,
    #[serde(default)]
    pub path_macros: BTreeMap<String, String>,
}

impl StorageConfig {
    pub fn new(directory: impl Into<PathBuf>, splitter: SplitterPolicy) -> Self {
        Self {
            directory: directory.into(),
            splitter,
            path_macros: BTreeMap::new(),
        }
    }

    /// 從 JSON 檔案載入設定並整理。 / Loads a JSON config file and sanitizes it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref().to_path_buf();
        let contents = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let mut config: StorageConfig =
            serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.clone(),
                source,
            })?;
        config.sanitize();
        Ok(config)
    }

    /// Drops unusable macros and trailing separators from macro paths.
    pub fn sanitize(&mut self) {
        let macros = std::mem::take(&mut self.path_macros);
        self.path_macros = macros
            .into_iter()
            .filter_map(|(name, path)| {
                let name = name.trim().to_string();
                let trimmed = path.trim_end_matches(['/', '\\']);
                // a bare root ("/") has nothing left to trim to
                let path = if trimmed.is_empty() { path.as_str() } else { trimmed };
                (!name.is_empty() && !path.trim().is_empty()).then(|| (name, path.to_string()))
            })
            .collect();
    }
}
