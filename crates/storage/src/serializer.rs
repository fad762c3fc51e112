use dirstore_dom::{from_element, to_element, Element};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Result, StorageError};

/// 元件狀態的序列化選項。 / Serialization options attached to a component's storage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageSpec {
    /// Drop child elements equal to the ones the default state would produce.
    pub skip_default_values: bool,
}

/// 將狀態序列化為元素樹。 / Serializes a state value into one element tree.
pub fn serialize_state<T>(state: &T, spec: &StorageSpec) -> Result<Element>
where
    T: Serialize + Default,
{
    let mut element = to_element(state).map_err(StorageError::Serialize)?;
    if spec.skip_default_values {
        let defaults = to_element(&T::default()).map_err(StorageError::Serialize)?;
        strip_default_children(&mut element, &defaults);
    }
    Ok(element)
}

/// 將載入的元素疊加在 `merge_into`（或預設值）上後還原。
/// Deserializes `element` layered over `merge_into`, or over the default state.
///
/// An empty element therefore yields `merge_into` (or the default) unchanged,
/// and values omitted by [`StorageSpec::skip_default_values`] come back.
pub fn deserialize_state<T>(component: &str, element: &Element, merge_into: Option<T>) -> Result<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    if element.is_empty() {
        return Ok(merge_into.unwrap_or_default());
    }
    let base = merge_into.unwrap_or_default();
    let mut layered = to_element(&base).map_err(StorageError::Serialize)?;
    layered.overlay(element);
    from_element(&layered).map_err(|source| StorageError::Deserialize {
        component: component.to_string(),
        source,
    })
}

// A child group (all children sharing a tag) is dropped when it is identical
// to the default state's group for that tag.
fn strip_default_children(element: &mut Element, defaults: &Element) {
    let group = |parent: &Element, name: &str| -> Vec<Element> {
        parent
            .children()
            .iter()
            .filter(|child| child.name() == name)
            .cloned()
            .collect()
    };
    let snapshot = element.clone();
    element
        .children_mut()
        .retain(|child| group(&snapshot, child.name()) != group(defaults, child.name()));
}
