use std::cmp::Ordering;
use std::collections::HashSet;

use dirstore_dom::Element;
use serde::{Deserialize, Serialize};

pub(crate) const FILE_EXTENSION: &str = ".xml";
/// File holding the attributes and text of a per-child state's root element.
pub const ROOT_FILE_NAME: &str = "_root.xml";

/// 將一個元件狀態拆分為多個檔案，並能合併回來。 / Splits one component state across files and merges it back.
pub trait StateSplitter {
    /// Decomposes `state` into `(fragment, file name)` pairs.
    fn split_state(&self, state: Element) -> Vec<(Element, String)>;

    /// Combines the `(fragment, file name)` pairs loaded from every file of a
    /// component into `target`. Pairs may arrive in any order.
    fn merge_states_into(&self, target: &mut Element, fragments: Vec<(Element, String)>);
}

/// 依設定選擇的拆分策略。 / Splitting policy, selectable from configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SplitterPolicy {
    /// The whole state lives in one file.
    SingleFile { file_name: String },
    /// Every child element of the state lives in its own file, named after
    /// the child's `name_attribute`.
    PerChild {
        #[serde(default = "default_name_attribute")]
        name_attribute: String,
    },
}

fn default_name_attribute() -> String {
    "name".to_string()
}

impl SplitterPolicy {
    pub fn per_child() -> Self {
        Self::PerChild {
            name_attribute: default_name_attribute(),
        }
    }
}

impl StateSplitter for SplitterPolicy {
    fn split_state(&self, mut state: Element) -> Vec<(Element, String)> {
        match self {
            Self::SingleFile { file_name } => vec![(state, file_name.clone())],
            Self::PerChild { name_attribute } => {
                let mut used = HashSet::from([ROOT_FILE_NAME.to_string()]);
                let children = state.take_children();
                let mut parts = Vec::with_capacity(children.len() + 1);
                if !state.is_empty() {
                    parts.push((state, ROOT_FILE_NAME.to_string()));
                }
                parts.extend(children.into_iter().map(|child| {
                    let base = child
                        .attribute(name_attribute)
                        .unwrap_or_else(|| child.name());
                    let file_name = unique_file_name(&sanitize_file_name(base), &mut used);
                    (child, file_name)
                }));
                parts
            }
        }
    }

    fn merge_states_into(&self, target: &mut Element, mut fragments: Vec<(Element, String)>) {
        fragments.sort_by(|(_, a), (_, b)| compare_file_names(a, b));
        match self {
            Self::SingleFile { .. } => {
                for (mut fragment, _) in fragments {
                    absorb_root(target, &mut fragment);
                    for child in fragment.take_children() {
                        target.add_child(child);
                    }
                }
            }
            Self::PerChild { .. } => {
                for (mut fragment, file_name) in fragments {
                    if file_name == ROOT_FILE_NAME {
                        absorb_root(target, &mut fragment);
                    } else {
                        target.add_child(fragment);
                    }
                }
            }
        }
    }
}

fn absorb_root(target: &mut Element, fragment: &mut Element) {
    for (key, value) in fragment.take_attributes() {
        target.set_attribute(key, value);
    }
    if let Some(text) = fragment.text() {
        target.set_text(Some(text.to_string()));
    }
}

/// 以自然順序比較檔名，數字片段依數值比較。 / Compares file names with digit runs ordered by value.
///
/// Keeps `item.xml`, `item_2.xml` ... `item_10.xml` in the order
/// [`unique_file_name`] handed them out.
pub(crate) fn compare_file_names(a: &str, b: &str) -> Ordering {
    natural_cmp(stem(a).as_bytes(), stem(b).as_bytes()).then_with(|| a.cmp(b))
}

fn stem(file_name: &str) -> &str {
    let split = file_name.len().saturating_sub(FILE_EXTENSION.len());
    match file_name.get(split..) {
        Some(extension) if extension.eq_ignore_ascii_case(FILE_EXTENSION) => &file_name[..split],
        _ => file_name,
    }
}

fn natural_cmp(mut a: &[u8], mut b: &[u8]) -> Ordering {
    loop {
        match (a.first(), b.first()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit() => {
                let (digits_a, rest_a) = split_digits(a);
                let (digits_b, rest_b) = split_digits(b);
                let (value_a, value_b) = (trim_zeros(digits_a), trim_zeros(digits_b));
                let order = value_a
                    .len()
                    .cmp(&value_b.len())
                    .then_with(|| value_a.cmp(value_b))
                    .then_with(|| digits_a.len().cmp(&digits_b.len()));
                if order != Ordering::Equal {
                    return order;
                }
                a = rest_a;
                b = rest_b;
            }
            (Some(x), Some(y)) => {
                if x != y {
                    return x.cmp(y);
                }
                a = &a[1..];
                b = &b[1..];
            }
        }
    }
}

fn split_digits(bytes: &[u8]) -> (&[u8], &[u8]) {
    let count = bytes.iter().take_while(|byte| byte.is_ascii_digit()).count();
    bytes.split_at(count)
}

fn trim_zeros(digits: &[u8]) -> &[u8] {
    let zeros = digits.iter().take_while(|digit| **digit == b'0').count();
    &digits[zeros..]
}

/// 把任意字串轉成安全的檔名主體。 / Turns an arbitrary label into a safe file stem.
pub fn sanitize_file_name(label: &str) -> String {
    let sanitized: String = label
        .trim()
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-') {
                ch
            } else {
                '_'
            }
        })
        .collect();
    if sanitized.is_empty() {
        "unnamed".to_string()
    } else {
        sanitized
    }
}

// Names are compared case-insensitively so the split is also unique on
// case-insensitive file systems.
fn unique_file_name(stem: &str, used: &mut HashSet<String>) -> String {
    let mut candidate = format!("{stem}{FILE_EXTENSION}");
    let mut counter = 2;
    while !used.insert(candidate.to_lowercase()) {
        candidate = format!("{stem}_{counter}{FILE_EXTENSION}");
        counter += 1;
    }
    candidate
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configuration(name: &str) -> Element {
        Element::new("configuration").with_attribute("name", name)
    }

    #[test]
    fn per_child_names_files_after_children() {
        let state = Element::new("RunManager")
            .with_child(configuration("Unit tests"))
            .with_child(configuration("unit_tests"))
            .with_child(configuration("../escape"))
            .with_child(Element::new("list"));

        let names: Vec<_> = SplitterPolicy::per_child()
            .split_state(state)
            .into_iter()
            .map(|(_, name)| name)
            .collect();

        assert_eq!(
            names,
            vec!["Unit_tests.xml", "unit_tests_2.xml", ".._escape.xml", "list.xml"]
        );
    }

    #[test]
    fn per_child_merge_appends_fragments() {
        let policy = SplitterPolicy::per_child();
        let mut target = Element::new("component");
        policy.merge_states_into(
            &mut target,
            vec![
                (configuration("b"), "b.xml".into()),
                (configuration("a"), "a.xml".into()),
            ],
        );
        assert_eq!(target.children().len(), 2);
        assert_eq!(target.children()[1].attribute("name"), Some("b"));
    }

    #[test]
    fn single_file_round_trips_through_merge() {
        let policy = SplitterPolicy::SingleFile {
            file_name: "misc.xml".into(),
        };
        let state = Element::new("Misc")
            .with_attribute("version", "2")
            .with_child(Element::new("x").with_text("1"));

        let mut parts = policy.split_state(state);
        assert_eq!(parts.len(), 1);
        let (fragment, name) = parts.remove(0);
        assert_eq!(name, "misc.xml");

        let mut target = Element::new("component");
        policy.merge_states_into(&mut target, vec![(fragment, name)]);
        assert_eq!(target.attribute("version"), Some("2"));
        assert_eq!(target.children()[0].text(), Some("1"));
    }

    #[test]
    fn repeated_children_merge_back_in_split_order() {
        let policy = SplitterPolicy::per_child();
        let mut state = Element::new("List");
        for index in 0..12 {
            state.add_child(Element::new("item").with_text(index.to_string()));
        }

        let mut parts = policy.split_state(state);
        assert_eq!(parts[1].1, "item_2.xml");
        assert_eq!(parts[11].1, "item_12.xml");
        parts.reverse();

        let mut target = Element::new("component");
        policy.merge_states_into(&mut target, parts);
        let texts: Vec<_> = target
            .children()
            .iter()
            .map(|child| child.text().unwrap_or_default().to_string())
            .collect();
        let expected: Vec<_> = (0..12).map(|index| index.to_string()).collect();
        assert_eq!(texts, expected);
    }

    #[test]
    fn per_child_keeps_root_attributes_and_text() {
        let policy = SplitterPolicy::per_child();
        let state = Element::new("Versioned")
            .with_attribute("version", "3")
            .with_text("note")
            .with_child(configuration("_root"))
            .with_child(Element::new("x").with_text("5"));

        let parts = policy.split_state(state);
        let names: Vec<_> = parts.iter().map(|(_, name)| name.as_str()).collect();
        assert_eq!(names, vec![ROOT_FILE_NAME, "_root_2.xml", "x.xml"]);

        let mut target = Element::new("component");
        policy.merge_states_into(&mut target, parts);
        assert_eq!(target.attribute("version"), Some("3"));
        assert_eq!(target.text(), Some("note"));
        let children: Vec<_> = target.children().iter().map(Element::name).collect();
        assert_eq!(children, vec!["configuration", "x"]);
    }

    #[test]
    fn per_child_without_root_values_has_no_root_file() {
        let state = Element::new("RunManager").with_child(configuration("unit"));
        let names: Vec<_> = SplitterPolicy::per_child()
            .split_state(state)
            .into_iter()
            .map(|(_, name)| name)
            .collect();
        assert_eq!(names, vec!["unit.xml"]);
    }

    #[test]
    fn file_names_compare_numerically() {
        let mut names = vec!["item_10.xml", "item_2.xml", "item.xml", "alpha.xml", "item_1a.xml"];
        names.sort_by(|a, b| compare_file_names(a, b));
        assert_eq!(
            names,
            vec!["alpha.xml", "item.xml", "item_1a.xml", "item_2.xml", "item_10.xml"]
        );
    }

    #[test]
    fn policy_reads_from_json() {
        let policy: SplitterPolicy = serde_json::from_str(r#"{"kind":"per_child"}"#).unwrap();
        assert_eq!(policy, SplitterPolicy::per_child());
    }
}
