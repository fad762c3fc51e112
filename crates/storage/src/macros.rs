use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};

use dirstore_dom::Element;

/// 路徑巨集替換服務，並追蹤寫出時用到的巨集。 / Path-macro substitution that tracks which macros a save used.
pub trait TrackingPathMacroSubstitutor {
    /// Symbolic -> concrete, applied after load.
    fn expand_paths(&self, element: &mut Element);
    /// Concrete -> symbolic, applied before save.
    fn collapse_paths(&self, element: &mut Element);
    /// Forgets the macros recorded so far.
    fn reset(&self);
    fn used_macros(&self) -> BTreeSet<String>;
}

/// 以巨集名稱對應具體路徑的替換器。 / Substitutor backed by a name -> concrete path table.
#[derive(Debug, Default)]
pub struct PathMacroMap {
    macros: BTreeMap<String, String>,
    used: RefCell<BTreeSet<String>>,
}

impl PathMacroMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_macro(mut self, name: impl Into<String>, path: impl Into<String>) -> Self {
        self.insert(name, path);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, path: impl Into<String>) {
        self.macros.insert(name.into(), path.into());
    }

    pub fn is_empty(&self) -> bool {
        self.macros.is_empty()
    }

    fn collapse_value(&self, value: &mut String) {
        // Longest paths first so `$PROJECT_DIR$/sub` is not shadowed by a parent macro.
        let mut ordered: Vec<(&String, &String)> = self
            .macros
            .iter()
            .filter(|(_, path)| !path.is_empty())
            .collect();
        ordered.sort_by(|a, b| b.1.len().cmp(&a.1.len()).then_with(|| a.0.cmp(b.0)));

        for (name, path) in ordered {
            if let Some(collapsed) = replace_at_boundaries(value, path, &format!("${name}$")) {
                *value = collapsed;
                self.used.borrow_mut().insert(name.clone());
            }
        }
    }

    fn expand_value(&self, value: &mut String) {
        if !value.contains('$') {
            return;
        }
        for (name, path) in &self.macros {
            let placeholder = format!("${name}$");
            if value.contains(&placeholder) {
                *value = value.replace(&placeholder, path);
            }
        }
    }
}

impl TrackingPathMacroSubstitutor for PathMacroMap {
    fn expand_paths(&self, element: &mut Element) {
        element.for_each_value_mut(&mut |value| self.expand_value(value));
    }

    fn collapse_paths(&self, element: &mut Element) {
        element.for_each_value_mut(&mut |value| self.collapse_value(value));
    }

    fn reset(&self) {
        self.used.borrow_mut().clear();
    }

    fn used_macros(&self) -> BTreeSet<String> {
        self.used.borrow().clone()
    }
}

/// Replaces every occurrence of `path` that ends at the end of the value or
/// at a path separator. Returns `None` when nothing was replaced.
fn replace_at_boundaries(value: &str, path: &str, replacement: &str) -> Option<String> {
    let mut result = String::with_capacity(value.len());
    let mut rest = value;
    let mut replaced = false;
    while let Some(index) = rest.find(path) {
        let end = index + path.len();
        let at_boundary = matches!(rest[end..].chars().next(), None | Some('/') | Some('\\'));
        if at_boundary {
            result.push_str(&rest[..index]);
            result.push_str(replacement);
            replaced = true;
        } else {
            result.push_str(&rest[..end]);
        }
        rest = &rest[end..];
    }
    if !replaced {
        return None;
    }
    result.push_str(rest);
    Some(result)
}
