use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::{parse_document, print_document, DomError, Element};

/// 透過 quick-xml 將狀態序列化為元素樹。 / Serializes a value into an element tree via quick-xml.
///
/// The root tag is the serde name of the type; fields renamed with a leading
/// `@` become attributes, everything else becomes child elements.
pub fn to_element<T: Serialize>(value: &T) -> Result<Element, DomError> {
    let xml = quick_xml::se::to_string(value)?;
    parse_document(xml.as_bytes())
}

/// 將元素樹還原為狀態。根標籤名稱不受檢查。 / Deserializes an element tree; the root tag name is not checked.
pub fn from_element<T: DeserializeOwned>(element: &Element) -> Result<T, DomError> {
    let bytes = print_document(element);
    let xml = std::str::from_utf8(&bytes)?;
    Ok(quick_xml::de::from_str(xml)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Runner {
        #[serde(rename = "@name")]
        name: String,
        retries: u32,
        #[serde(default)]
        tags: Vec<String>,
    }

    #[test]
    fn serializes_attributes_and_children() {
        let runner = Runner {
            name: "unit".into(),
            retries: 3,
            tags: vec!["fast".into(), "local".into()],
        };
        let element = to_element(&runner).unwrap();
        assert_eq!(element.name(), "Runner");
        assert_eq!(element.attribute("name"), Some("unit"));
        let names: Vec<_> = element.children().iter().map(Element::name).collect();
        assert_eq!(names, vec!["retries", "tags", "tags"]);
    }

    #[test]
    fn deserializes_from_any_root_tag() {
        let element = Element::new("component")
            .with_attribute("name", "unit")
            .with_child(Element::new("retries").with_text("7"));
        let runner: Runner = from_element(&element).unwrap();
        assert_eq!(
            runner,
            Runner {
                name: "unit".into(),
                retries: 7,
                tags: Vec::new(),
            }
        );
    }
}
