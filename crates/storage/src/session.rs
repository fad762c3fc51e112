use std::cell::Cell;
use std::collections::BTreeSet;
use std::fs;
use std::rc::Rc;

use dirstore_dom::{print_document, Element};
use dirstore_vfs::{list_children, StorageFile};
use log::{debug, error, info};
use serde::Serialize;

use crate::directory::{
    has_storage_extension, StorageContext, COMPONENT_TAG, NAME_ATTRIBUTE,
};
use crate::error::{Result, StorageError};
use crate::serializer::{serialize_state, StorageSpec};
use crate::storage_data::StorageData;
use crate::tracker::StorageFileChange;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionPhase {
    Externalizing,
    Saving,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SessionTicket {
    id: u64,
    phase: SessionPhase,
}

/// 儲存實例唯一的作用中工作階段欄位。 / The storage's single active-session slot.
#[derive(Debug, Default)]
pub(crate) struct SessionSlot {
    active: Cell<Option<SessionTicket>>,
    next_id: Cell<u64>,
}

impl SessionSlot {
    /// Installs a new session as the sole occupant, replacing any previous one.
    pub(crate) fn open(&self, phase: SessionPhase) -> SessionTicket {
        let id = self.next_id.get() + 1;
        self.next_id.set(id);
        let ticket = SessionTicket { id, phase };
        self.active.set(Some(ticket));
        ticket
    }

    pub(crate) fn assert_active(&self, ticket: SessionTicket, operation: &str) {
        assert_eq!(
            self.active.get(),
            Some(ticket),
            "{operation} called with a session that is not the storage's active session"
        );
    }

    pub(crate) fn close(&self, ticket: SessionTicket) {
        self.assert_active(ticket, "finish_save");
        self.active.set(None);
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.active.get().is_none()
    }
}

/// 將記憶體中的元件狀態寫入快照複本的工作階段。
/// Session that records component states into a clone of the storage snapshot.
pub struct ExternalizationSession {
    context: Rc<StorageContext>,
    ticket: SessionTicket,
    storage_data: StorageData,
}

impl ExternalizationSession {
    pub(crate) fn new(
        context: Rc<StorageContext>,
        ticket: SessionTicket,
        storage_data: StorageData,
    ) -> Self {
        if let Some(substitutor) = context.substitutor.as_ref() {
            substitutor.reset();
        }
        Self {
            context,
            ticket,
            storage_data,
        }
    }

    /// 序列化、拆分並記錄元件狀態。 / Serializes, splits and records a component's state.
    pub fn set_state<T>(&mut self, component_name: &str, state: &T, spec: &StorageSpec) -> Result<()>
    where
        T: Serialize + Default,
    {
        self.context.slot.assert_active(self.ticket, "set_state");
        let element = serialize_state(state, spec)?;
        self.put_state(component_name, element)
    }

    /// 記錄已序列化的元素狀態。 / Records an already serialized state element.
    pub fn set_state_element(&mut self, component_name: &str, element: Element) -> Result<()> {
        self.context.slot.assert_active(self.ticket, "set_state_element");
        self.put_state(component_name, element)
    }

    pub fn used_macros(&self) -> BTreeSet<String> {
        self.context.used_macros()
    }

    fn put_state(&mut self, component_name: &str, mut element: Element) -> Result<()> {
        assert!(!component_name.is_empty(), "component name must not be empty");
        if let Some(substitutor) = self.context.substitutor.as_ref() {
            substitutor.collapse_paths(&mut element);
        }

        let parts = self.context.splitter.split_state(element);
        for (_, file_name) in &parts {
            validate_file_name(file_name)?;
        }
        for (fragment, file_name) in parts {
            let wrapper = Element::new(COMPONENT_TAG)
                .with_attribute(NAME_ATTRIBUTE, component_name)
                .with_child(fragment);
            let file = StorageFile::new(self.context.dir.join(file_name));
            self.storage_data.put(component_name, file, wrapper);
        }
        Ok(())
    }

    pub(crate) fn into_parts(self) -> (Rc<StorageContext>, SessionTicket, StorageData) {
        (self.context, self.ticket, self.storage_data)
    }
}

/// 將快照寫回目錄的一次性工作階段。 / Single-use session that writes a snapshot back to the directory.
pub struct SaveSession {
    context: Rc<StorageContext>,
    ticket: SessionTicket,
    storage_data: StorageData,
}

impl SaveSession {
    pub(crate) fn new(
        context: Rc<StorageContext>,
        ticket: SessionTicket,
        storage_data: StorageData,
    ) -> Self {
        Self {
            context,
            ticket,
            storage_data,
        }
    }

    pub(crate) fn ticket(&self) -> SessionTicket {
        self.ticket
    }

    pub fn used_macros(&self) -> BTreeSet<String> {
        self.context.used_macros()
    }

    /// 寫入變更、刪除不再引用的檔案並刷新時間戳備份。
    /// Writes changed files, deletes files no longer referenced and refreshes the
    /// timestamp backup. Files modified or deleted outside the storage since the
    /// last load are never overwritten; files the last load never saw are never
    /// deleted.
    pub fn save(&mut self) -> Result<()> {
        self.context.slot.assert_active(self.ticket, "save");
        let dir = self.context.dir.as_path();
        if !dir.exists() {
            fs::create_dir_all(dir).map_err(|source| StorageError::io(dir, source))?;
        }

        let mut current_names: BTreeSet<String> = list_children(dir)
            .map_err(|source| StorageError::io(dir, source))?
            .iter()
            .map(StorageFile::name)
            .collect();

        let data = &self.storage_data;
        data.try_for_each(|component_name, file, element| {
            current_names.remove(&file.name());
            if data.has_changed_since_last_access(file) {
                info!(
                    "{} was changed outside of the storage, not saving component {component_name} into it",
                    file.path().display()
                );
                return Ok(());
            }
            let written = file
                .write(&print_document(element))
                .map_err(|source| StorageError::io(file.path(), source))?;
            if written {
                debug!("saved component {component_name} to {}", file.path().display());
            }
            Ok(())
        })?;

        for name in current_names {
            let child = StorageFile::new(dir.join(&name));
            if !data.existed_earlier(&child) {
                continue;
            }
            match child.delete() {
                Ok(()) => debug!("deleted obsolete storage file {}", child.path().display()),
                Err(err) => error!("failed to delete {}: {err}", child.path().display()),
            }
        }

        data.update_backup_timestamps();
        self.storage_data.clear();
        Ok(())
    }

    /// 不寫入，只回報 `save` 會寫入或刪除的檔案。 / Dry run: files `save` would write or delete.
    pub fn storage_files_to_save(&self) -> Result<Vec<StorageFile>> {
        self.context.slot.assert_active(self.ticket, "storage_files_to_save");
        let dir = self.context.dir.as_path();
        if !dir.exists() {
            return Ok(self.all_storage_files());
        }
        assert!(dir.is_dir(), "{} is not a directory", dir.display());

        let mut current_names: BTreeSet<String> = list_children(dir)
            .map_err(|source| StorageError::io(dir, source))?
            .iter()
            .map(StorageFile::name)
            .filter(|name| has_storage_extension(name))
            .collect();

        let data = &self.storage_data;
        let mut files = Vec::new();
        data.for_each(|_, file, element| {
            let present = current_names.remove(&file.name());
            if data.has_changed_since_last_access(file) {
                return;
            }
            if !present {
                files.push(file.clone());
                return;
            }
            match file.load_bytes() {
                Ok(bytes) if bytes != print_document(element) => files.push(file.clone()),
                Ok(_) => {}
                Err(err) => debug!("cannot compare {}: {err}", file.path().display()),
            }
        });

        files.extend(
            current_names
                .into_iter()
                .map(|name| StorageFile::new(dir.join(name))),
        );
        Ok(files)
    }

    /// 快照已知的所有檔案。 / Every file known to the session's snapshot.
    pub fn all_storage_files(&self) -> Vec<StorageFile> {
        self.storage_data.all_storage_files().into_keys().collect()
    }

    /// 若本儲存出現在外部變更中，回傳所有追蹤中的元件名稱。
    /// Returns every tracked component name when one of the changes belongs to
    /// this storage, otherwise an empty set.
    pub fn analyze_external_changes(&self, changes: &[StorageFileChange]) -> BTreeSet<String> {
        if !changes
            .iter()
            .any(|change| change.storage == self.context.id)
        {
            return BTreeSet::new();
        }
        self.storage_data.component_names().into_iter().collect()
    }
}

fn validate_file_name(file_name: &str) -> Result<()> {
    let plain = !file_name.is_empty()
        && file_name != "."
        && file_name != ".."
        && !file_name.contains(['/', '\\'])
        && has_storage_extension(file_name);
    if plain {
        Ok(())
    } else {
        Err(StorageError::InvalidFileName(file_name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_tracks_single_occupant() {
        let slot = SessionSlot::default();
        assert!(slot.is_idle());
        let first = slot.open(SessionPhase::Externalizing);
        let second = slot.open(SessionPhase::Saving);
        assert_ne!(first, second);
        slot.assert_active(second, "save");
        slot.close(second);
        assert!(slot.is_idle());
    }

    #[test]
    #[should_panic(expected = "not the storage's active session")]
    fn replaced_session_is_rejected() {
        let slot = SessionSlot::default();
        let first = slot.open(SessionPhase::Externalizing);
        slot.open(SessionPhase::Externalizing);
        slot.assert_active(first, "set_state");
    }

    #[test]
    fn file_names_must_stay_inside_the_directory() {
        assert!(validate_file_name("runs.xml").is_ok());
        assert!(validate_file_name("Runs.XML").is_ok());
        for bad in ["", "..", "../up.xml", "sub\\a.xml", "notes.txt"] {
            assert!(
                matches!(validate_file_name(bad), Err(StorageError::InvalidFileName(_))),
                "{bad} should be rejected"
            );
        }
    }
}
