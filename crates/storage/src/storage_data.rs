use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

use dirstore_dom::Element;
use dirstore_vfs::StorageFile;
use log::warn;

use crate::error::Result;

type Bucket = Rc<RefCell<BTreeMap<StorageFile, Element>>>;
type Backup = Rc<RefCell<BTreeMap<StorageFile, SystemTime>>>;

/// 儲存快照：元件名稱 -> (檔案 -> 包裝元素)，以及最後觀察到的時間戳備份。
/// Storage snapshot: component name -> (file -> wrapper element), plus the
/// backup index of last observed file timestamps.
///
/// A session clone copies the component map but shares the per-component
/// buckets and the backup index with the snapshot it was cloned from.
#[derive(Debug, Default)]
pub(crate) struct StorageData {
    states: BTreeMap<String, Bucket>,
    backup: Option<Backup>,
}

impl StorageData {
    pub(crate) fn component_names(&self) -> Vec<String> {
        self.states.keys().cloned().collect()
    }

    pub(crate) fn contains_component(&self, component_name: &str) -> bool {
        self.states.contains_key(component_name)
    }

    pub(crate) fn put(&mut self, component_name: &str, file: StorageFile, element: Element) {
        for (owner, bucket) in &self.states {
            if owner != component_name && bucket.borrow_mut().remove(&file).is_some() {
                warn!(
                    "{} moved from component {owner} to {component_name}",
                    file.path().display()
                );
            }
        }
        self.states
            .entry(component_name.to_string())
            .or_default()
            .borrow_mut()
            .insert(file, element);
    }

    /// 移除元件並回傳其檔案與包裝元素。 / Removes a component, returning its files and wrapper elements.
    pub(crate) fn take_component(
        &mut self,
        component_name: &str,
    ) -> Option<BTreeMap<StorageFile, Element>> {
        let bucket = self.states.remove(component_name)?;
        Some(match Rc::try_unwrap(bucket) {
            Ok(cell) => cell.into_inner(),
            Err(shared) => shared.borrow().clone(),
        })
    }

    pub(crate) fn for_each(&self, mut visit: impl FnMut(&str, &StorageFile, &Element)) {
        for (component_name, bucket) in &self.states {
            for (file, element) in bucket.borrow().iter() {
                visit(component_name, file, element);
            }
        }
    }

    pub(crate) fn try_for_each(
        &self,
        mut visit: impl FnMut(&str, &StorageFile, &Element) -> Result<()>,
    ) -> Result<()> {
        for (component_name, bucket) in &self.states {
            for (file, element) in bucket.borrow().iter() {
                visit(component_name, file, element)?;
            }
        }
        Ok(())
    }

    /// 目前快照已知的所有檔案與其時間戳。 / Every file known to the snapshot with its current timestamp.
    pub(crate) fn all_storage_files(&self) -> BTreeMap<StorageFile, SystemTime> {
        let mut files = BTreeMap::new();
        self.for_each(|_, file, _| {
            files.insert(file.clone(), file.timestamp().unwrap_or(UNIX_EPOCH));
        });
        files
    }

    pub(crate) fn shallow_clone(&self) -> Self {
        Self {
            states: self.states.clone(),
            backup: self.backup.clone(),
        }
    }

    pub(crate) fn clear(&mut self) {
        self.states.clear();
    }

    /// 擷取所有已知檔案的時間戳作為備份。 / Captures the timestamps of every known file.
    pub(crate) fn backup(&mut self) {
        self.backup = Some(Rc::new(RefCell::new(self.all_storage_files())));
    }

    pub(crate) fn existed_earlier(&self, file: &StorageFile) -> bool {
        self.backup
            .as_ref()
            .map(|backup| backup.borrow().contains_key(file))
            .unwrap_or(false)
    }

    /// 檔案自上次載入後被刪除或時間戳前進時為 `true`。
    /// `true` when the file was deleted or its timestamp advanced since the last load.
    pub(crate) fn has_changed_since_last_access(&self, file: &StorageFile) -> bool {
        let Some(backup) = self.backup.as_ref() else {
            return false;
        };
        let Some(recorded) = backup.borrow().get(file).copied() else {
            return false;
        };
        match file.timestamp() {
            None => true,
            Some(current) => recorded < current,
        }
    }

    pub(crate) fn update_backup_timestamps(&self) {
        let Some(backup) = self.backup.as_ref() else {
            return;
        };
        for (file, recorded) in backup.borrow_mut().iter_mut() {
            if let Some(current) = file.timestamp() {
                *recorded = current;
            }
        }
    }
}
