use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use dirstore_dom::{parse_document, Element};
use dirstore_vfs::{list_children, FileMonitorError, StorageFile};
use log::{debug, error};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::StorageConfig;
use crate::error::{Result, StorageError};
use crate::macros::{PathMacroMap, TrackingPathMacroSubstitutor};
use crate::serializer::deserialize_state;
use crate::session::{ExternalizationSession, SaveSession, SessionPhase, SessionSlot};
use crate::splitter::{StateSplitter, FILE_EXTENSION};
use crate::storage_data::StorageData;
use crate::tracker::StorageChangeTracker;

pub(crate) const COMPONENT_TAG: &str = "component";
pub(crate) const NAME_ATTRIBUTE: &str = "name";

static NEXT_STORAGE_ID: AtomicU64 = AtomicU64::new(1);

/// 每個儲存實例的唯一識別碼，用於歸屬外部變更。 / Identifies one storage instance when attributing external changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StorageId(u64);

impl StorageId {
    fn next() -> Self {
        Self(NEXT_STORAGE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// State shared between a storage and the sessions it hands out.
pub(crate) struct StorageContext {
    pub(crate) id: StorageId,
    pub(crate) dir: PathBuf,
    pub(crate) splitter: Rc<dyn StateSplitter>,
    pub(crate) substitutor: Option<Rc<dyn TrackingPathMacroSubstitutor>>,
    pub(crate) slot: SessionSlot,
}

impl StorageContext {
    pub(crate) fn used_macros(&self) -> BTreeSet<String> {
        self.substitutor
            .as_ref()
            .map(|substitutor| substitutor.used_macros())
            .unwrap_or_default()
    }
}

/// 把一個邏輯元件狀態拆分存放於單一目錄內多個 XML 檔案的儲存。
/// Storage that keeps component states split across the XML files of one directory.
///
/// Each file holds a `<component name="...">` wrapper around exactly one
/// fragment produced by the storage's [`StateSplitter`]. Saving goes through an
/// [`ExternalizationSession`] followed by a [`SaveSession`]; only one session is
/// active at a time.
pub struct DirectoryStorage {
    context: Rc<StorageContext>,
    storage_data: Option<StorageData>,
}

impl fmt::Debug for DirectoryStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectoryStorage")
            .field("id", &self.context.id)
            .field("dir", &self.context.dir)
            .field("loaded", &self.storage_data.is_some())
            .finish()
    }
}

impl DirectoryStorage {
    /// 建立綁定至目錄的儲存。 / Creates a storage bound to `dir`.
    ///
    /// # Panics
    ///
    /// When `dir` still contains a `$` macro placeholder.
    pub fn new(
        dir: impl Into<PathBuf>,
        splitter: Rc<dyn StateSplitter>,
        substitutor: Option<Rc<dyn TrackingPathMacroSubstitutor>>,
    ) -> Self {
        let dir = dir.into();
        assert!(
            !dir.to_string_lossy().contains('$'),
            "storage directory {} still contains a path macro",
            dir.display()
        );
        Self {
            context: Rc::new(StorageContext {
                id: StorageId::next(),
                dir,
                splitter,
                substitutor,
                slot: SessionSlot::default(),
            }),
            storage_data: None,
        }
    }

    /// 依設定建立儲存。 / Builds a storage from its configuration.
    pub fn from_config(config: &StorageConfig) -> Self {
        let substitutor: Option<Rc<dyn TrackingPathMacroSubstitutor>> =
            if config.path_macros.is_empty() {
                None
            } else {
                let mut macros = PathMacroMap::new();
                for (name, path) in &config.path_macros {
                    macros.insert(name.clone(), path.clone());
                }
                Some(Rc::new(macros))
            };
        Self::new(
            config.directory.clone(),
            Rc::new(config.splitter.clone()),
            substitutor,
        )
    }

    pub fn storage_id(&self) -> StorageId {
        self.context.id
    }

    pub fn directory(&self) -> &Path {
        &self.context.dir
    }

    /// 讀取並消耗元件狀態。 / Reads a component's state, consuming it from the snapshot.
    ///
    /// An absent component yields `merge_into`, or the default state. A second
    /// call for the same component within one loaded snapshot sees it as absent.
    pub fn get_state<T>(&mut self, component_name: &str, merge_into: Option<T>) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Default,
    {
        let element = self.get_state_element(component_name)?;
        deserialize_state(component_name, &element, merge_into)
    }

    /// 取得合併後的原始元素；元件不存在時為空的包裝元素。
    /// Returns the merged state element, or an empty wrapper when the component is absent.
    pub fn get_state_element(&mut self, component_name: &str) -> Result<Element> {
        let bucket = self.loaded_data()?.take_component(component_name);
        let mut state = Element::new(COMPONENT_TAG);
        let Some(bucket) = bucket else {
            return Ok(state);
        };

        let fragments: Vec<(Element, String)> = bucket
            .into_iter()
            .flat_map(|(file, mut wrapper)| {
                let file_name = file.name();
                wrapper
                    .take_children()
                    .into_iter()
                    .map(move |fragment| (fragment, file_name.clone()))
            })
            .collect();
        self.context.splitter.merge_states_into(&mut state, fragments);
        if let Some(substitutor) = self.context.substitutor.as_ref() {
            substitutor.expand_paths(&mut state);
        }
        Ok(state)
    }

    /// 只檢查儲存目錄是否存在，不檢查個別元件。 / Checks that the storage directory exists; the component itself is not looked up.
    pub fn has_state(&self, _component_name: &str) -> bool {
        self.context.dir.exists()
    }

    /// 開始外部化工作階段。載入失敗只會記錄，工作階段仍會建立。
    /// Starts an externalization session. A load failure is logged and the
    /// session is backed by an empty snapshot instead.
    pub fn start_externalization(&mut self) -> ExternalizationSession {
        if self.storage_data.is_none() {
            match load_state(&self.context.dir) {
                Ok(data) => self.storage_data = Some(data),
                Err(err) => error!(
                    "failed to load storage {}: {err}",
                    self.context.dir.display()
                ),
            }
        }
        let data = self
            .storage_data
            .as_ref()
            .map(StorageData::shallow_clone)
            .unwrap_or_default();
        let ticket = self.context.slot.open(SessionPhase::Externalizing);
        ExternalizationSession::new(Rc::clone(&self.context), ticket, data)
    }

    /// # Panics
    ///
    /// When `session` is not the storage's active session.
    pub fn start_save(&mut self, session: ExternalizationSession) -> SaveSession {
        let (context, ticket, data) = session.into_parts();
        assert!(
            Rc::ptr_eq(&context, &self.context),
            "start_save called with a session of another storage"
        );
        self.context.slot.assert_active(ticket, "start_save");
        let ticket = self.context.slot.open(SessionPhase::Saving);
        SaveSession::new(context, ticket, data)
    }

    /// # Panics
    ///
    /// When `session` is not the storage's active session.
    pub fn finish_save(&mut self, session: SaveSession) {
        self.context.slot.close(session.ticket());
    }

    /// 丟棄快取的快照；下次存取時重新掃描整個目錄。
    /// Drops the cached snapshot; the next access rescans the whole directory.
    /// The changed component names are not used to narrow the rescan.
    pub fn reload(&mut self, _changed_components: &BTreeSet<String>) {
        debug!("reloading storage {}", self.context.dir.display());
        self.storage_data = None;
    }

    /// 向變更追蹤器註冊此儲存的目錄。 / Registers this storage's directory with the change tracker.
    ///
    /// A directory that does not exist yet is watched once it appears.
    pub fn watch(
        &self,
        tracker: &mut StorageChangeTracker,
    ) -> std::result::Result<(), FileMonitorError> {
        tracker.track(&self.context.dir, self.context.id)
    }

    fn loaded_data(&mut self) -> Result<&mut StorageData> {
        let data = match self.storage_data.take() {
            Some(data) => data,
            None => load_state(&self.context.dir)?,
        };
        Ok(self.storage_data.insert(data))
    }
}

pub(crate) fn has_storage_extension(file_name: &str) -> bool {
    file_name.to_ascii_lowercase().ends_with(FILE_EXTENSION)
}

/// 掃描目錄並建立快照。目錄不存在時回傳空快照。
/// Scans the directory into a snapshot; a missing directory yields an empty one.
pub(crate) fn load_state(dir: &Path) -> Result<StorageData> {
    let mut data = StorageData::default();
    if !dir.exists() {
        debug!("storage directory {} does not exist yet", dir.display());
        return Ok(data);
    }
    assert!(dir.is_dir(), "{} is not a directory", dir.display());

    let children = list_children(dir).map_err(|source| StorageError::io(dir, source))?;
    for file in children {
        let name = file.name();
        // skip OS noise such as .DS_Store
        if !has_storage_extension(&name) || !file.is_file() {
            debug!("skipping {} while loading storage", file.path().display());
            continue;
        }
        let bytes = file
            .load_bytes()
            .map_err(|source| StorageError::io(file.path(), source))?;
        let element = parse_document(&bytes).map_err(|source| StorageError::Parse {
            path: file.path().to_path_buf(),
            source,
        })?;
        let component_name = component_name_of(&file, &element)?;
        data.put(&component_name, file, element);
    }

    data.backup();
    debug!(
        "loaded {} component(s) from {}",
        data.component_names().len(),
        dir.display()
    );
    Ok(data)
}

fn component_name_of(file: &StorageFile, element: &Element) -> Result<String> {
    let malformed = |reason: String| StorageError::MalformedDocument {
        path: file.path().to_path_buf(),
        reason,
    };
    if element.name() != COMPONENT_TAG {
        return Err(malformed(format!(
            "root element is <{}>, expected <{COMPONENT_TAG}>",
            element.name()
        )));
    }
    let component_name = match element.attribute(NAME_ATTRIBUTE) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => {
            return Err(malformed(format!(
                "<{COMPONENT_TAG}> has no {NAME_ATTRIBUTE} attribute"
            )))
        }
    };
    if element.children().len() != 1 {
        return Err(malformed(format!(
            "<{COMPONENT_TAG}> must contain exactly one element, found {}",
            element.children().len()
        )));
    }
    Ok(component_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::splitter::SplitterPolicy;
    use dirstore_dom::print_document;
    use std::fs;
    use tempfile::tempdir;

    fn wrapper(component: &str, child: Element) -> Element {
        Element::new(COMPONENT_TAG)
            .with_attribute(NAME_ATTRIBUTE, component)
            .with_child(child)
    }

    #[test]
    fn missing_directory_loads_empty_snapshot() {
        let dir = tempdir().unwrap();
        let data = load_state(&dir.path().join("absent")).unwrap();
        assert!(data.component_names().is_empty());
        assert!(!data.existed_earlier(&StorageFile::new(dir.path().join("absent/a.xml"))));
    }

    #[test]
    fn load_groups_files_by_component() {
        let dir = tempdir().unwrap();
        let write = |name: &str, element: &Element| {
            fs::write(dir.path().join(name), print_document(element)).unwrap();
        };
        write("a.xml", &wrapper("Runs", Element::new("configuration")));
        write("B.XML", &wrapper("Runs", Element::new("configuration")));
        write("misc.xml", &wrapper("Misc", Element::new("Misc")));
        fs::write(dir.path().join(".DS_Store"), b"\0\x01binary").unwrap();
        fs::create_dir(dir.path().join("nested.xml")).unwrap();

        let data = load_state(dir.path()).unwrap();
        assert_eq!(data.component_names(), vec!["Misc", "Runs"]);
        let mut files = Vec::new();
        data.for_each(|component, file, _| files.push((component.to_string(), file.name())));
        assert_eq!(
            files,
            vec![
                ("Misc".to_string(), "misc.xml".to_string()),
                ("Runs".to_string(), "B.XML".to_string()),
                ("Runs".to_string(), "a.xml".to_string()),
            ]
        );
        assert!(data.existed_earlier(&StorageFile::new(dir.path().join("a.xml"))));
        assert!(!data.existed_earlier(&StorageFile::new(dir.path().join(".DS_Store"))));
    }

    #[test]
    fn malformed_documents_fail_the_load() {
        let cases: [(&str, &[u8]); 4] = [
            ("wrong_root.xml", b"<state name=\"Foo\"><x /></state>"),
            ("no_name.xml", b"<component><x /></component>"),
            ("two_children.xml", b"<component name=\"Foo\"><x /><y /></component>"),
            ("broken.xml", b"<component name=\"Foo\"><x></component>"),
        ];
        for (name, contents) in cases {
            let dir = tempdir().unwrap();
            fs::write(dir.path().join(name), contents).unwrap();
            let err = load_state(dir.path()).unwrap_err();
            assert!(
                matches!(
                    err,
                    StorageError::MalformedDocument { .. } | StorageError::Parse { .. }
                ),
                "{name}: unexpected error {err}"
            );
        }
    }

    #[test]
    fn has_state_only_checks_the_directory() {
        let dir = tempdir().unwrap();
        let storage = DirectoryStorage::new(
            dir.path(),
            Rc::new(SplitterPolicy::per_child()),
            None,
        );
        assert!(storage.has_state("NeverSaved"));

        let missing = DirectoryStorage::new(
            dir.path().join("missing"),
            Rc::new(SplitterPolicy::per_child()),
            None,
        );
        assert!(!missing.has_state("NeverSaved"));
    }

    #[test]
    #[should_panic(expected = "path macro")]
    fn rejects_unexpanded_directory() {
        DirectoryStorage::new(
            "$PROJECT_DIR$/.idea/runConfigurations",
            Rc::new(SplitterPolicy::per_child()),
            None,
        );
    }
}
