use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::{DomError, Element};

const DECLARATION: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>";
const INDENT: &str = "  ";
const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// 將位元組解析為元素樹。 / Parses one XML document into its root element.
///
/// Text of a leaf element is kept exactly. Inside an element that has child
/// elements, plain text is trimmed and whitespace-only runs are dropped as
/// indentation, while CDATA sections are kept verbatim. Documents written by
/// [`print_document`] therefore parse back to the tree they were printed from.
pub fn parse_document(bytes: &[u8]) -> Result<Element, DomError> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    let source = std::str::from_utf8(bytes)?;
    let mut reader = Reader::from_str(source);

    let mut stack: Vec<OpenElement> = Vec::new();
    let mut root: Option<Element> = None;
    loop {
        match reader.read_event()? {
            Event::Start(start) => stack.push(OpenElement::new(open_element(&start)?)),
            Event::Empty(start) => {
                let element = open_element(&start)?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::End(end) => {
                let open = stack.pop().ok_or_else(|| {
                    DomError::UnbalancedEnd(String::from_utf8_lossy(end.name().as_ref()).into())
                })?;
                attach(&mut stack, &mut root, open.close())?;
            }
            Event::Text(text) => {
                let value = text.unescape()?;
                match stack.last_mut() {
                    Some(open) => open.segments.push(Segment::Text(value.into_owned())),
                    None if value.trim().is_empty() => {}
                    None => return Err(DomError::TextOutsideRoot),
                }
            }
            Event::CData(data) => {
                let value = std::str::from_utf8(&data)?;
                let open = stack.last_mut().ok_or(DomError::TextOutsideRoot)?;
                open.segments.push(Segment::CData(value.to_string()));
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(open) = stack.pop() {
        return Err(DomError::UnexpectedEof(open.element.name().to_string()));
    }
    root.ok_or(DomError::MissingRoot)
}

/// 以穩定、利於 diff 的格式輸出文件。 / Prints a document with stable, diff-friendly formatting.
///
/// Two-space indentation, `\n` separators, attributes in insertion order and
/// empty elements as `<tag />`. Equal trees always print to equal bytes.
pub fn print_document(element: &Element) -> Vec<u8> {
    let mut out = String::with_capacity(256);
    out.push_str(DECLARATION);
    out.push('\n');
    write_element(element, 0, &mut out);
    out.into_bytes()
}

fn open_element(start: &BytesStart<'_>) -> Result<Element, DomError> {
    let qname = start.name();
    let name = std::str::from_utf8(qname.as_ref())?;
    let mut element = Element::new(name);
    for attribute in start.attributes() {
        let attribute = attribute?;
        let key = std::str::from_utf8(attribute.key.as_ref())?.to_string();
        let value = attribute.unescape_value()?.into_owned();
        element.set_attribute(key, value);
    }
    Ok(element)
}

enum Segment {
    Text(String),
    CData(String),
}

/// 尚未關閉的元素與其文字片段。 / An element still being read, with its raw text segments.
struct OpenElement {
    element: Element,
    segments: Vec<Segment>,
}

impl OpenElement {
    fn new(element: Element) -> Self {
        Self {
            element,
            segments: Vec::new(),
        }
    }

    fn close(mut self) -> Element {
        let leaf = self.element.children().is_empty();
        let mut text = String::new();
        for segment in &self.segments {
            match segment {
                Segment::CData(value) => text.push_str(value),
                Segment::Text(value) if leaf => text.push_str(value),
                Segment::Text(value) => text.push_str(value.trim()),
            }
        }
        if !self.segments.is_empty() && (leaf || !text.is_empty()) {
            self.element.set_text(Some(text));
        }
        self.element
    }
}

fn attach(
    stack: &mut [OpenElement],
    root: &mut Option<Element>,
    element: Element,
) -> Result<(), DomError> {
    match stack.last_mut() {
        Some(parent) => parent.element.add_child(element),
        None if root.is_some() => return Err(DomError::MultipleRoots),
        None => *root = Some(element),
    }
    Ok(())
}

// Padded or whitespace-only text goes into CDATA so readers that trim text
// nodes still see it unchanged.
fn write_text(text: &str, out: &mut String) {
    if text.trim() == text && !text.is_empty() {
        out.push_str(&escape(text));
        return;
    }
    out.push_str("<![CDATA[");
    out.push_str(&text.replace("]]>", "]]]]><![CDATA[>"));
    out.push_str("]]>");
}

fn write_element(element: &Element, level: usize, out: &mut String) {
    out.push_str(&INDENT.repeat(level));
    out.push('<');
    out.push_str(element.name());
    for (key, value) in element.attributes() {
        out.push(' ');
        out.push_str(key);
        out.push_str("=\"");
        out.push_str(&escape(value));
        out.push('"');
    }

    let children = element.children();
    match (element.text(), children.is_empty()) {
        (None, true) => {
            out.push_str(" />\n");
            return;
        }
        (Some(text), true) => {
            out.push('>');
            write_text(text, out);
        }
        (text, false) => {
            out.push_str(">\n");
            if let Some(text) = text {
                out.push_str(&INDENT.repeat(level + 1));
                write_text(text, out);
                out.push('\n');
            }
            for child in children {
                write_element(child, level + 1, out);
            }
            out.push_str(&INDENT.repeat(level));
        }
    }
    out.push_str("</");
    out.push_str(element.name());
    out.push_str(">\n");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prints_stable_layout() {
        let element = Element::new("component")
            .with_attribute("name", "Foo")
            .with_child(
                Element::new("Foo")
                    .with_child(Element::new("x").with_text("1"))
                    .with_child(Element::new("flag").with_attribute("on", "a&b")),
            );
        let printed = String::from_utf8(print_document(&element)).unwrap();
        assert_eq!(
            printed,
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
             <component name=\"Foo\">\n\
             \x20 <Foo>\n\
             \x20   <x>1</x>\n\
             \x20   <flag on=\"a&amp;b\" />\n\
             \x20 </Foo>\n\
             </component>\n"
        );
    }

    #[test]
    fn parses_printed_output_back() {
        let element = Element::new("component")
            .with_attribute("name", "Runs")
            .with_child(
                Element::new("configuration")
                    .with_attribute("name", "Unit <fast>")
                    .with_child(Element::new("option").with_text("a \"quoted\" value")),
            );
        let parsed = parse_document(&print_document(&element)).unwrap();
        assert_eq!(parsed, element);
    }

    #[test]
    fn keeps_leaf_text_exactly() {
        let element = Element::new("Note")
            .with_child(Element::new("text").with_text("  padded  "))
            .with_child(Element::new("blank").with_text(" "))
            .with_child(Element::new("raw").with_text(" a]]>b "))
            .with_child(Element::new("plain").with_text("a < b"));
        let printed = String::from_utf8(print_document(&element)).unwrap();
        assert!(printed.contains("<text><![CDATA[  padded  ]]></text>"));
        assert!(printed.contains("<plain>a &lt; b</plain>"));

        let parsed = parse_document(printed.as_bytes()).unwrap();
        assert_eq!(parsed, element);
    }

    #[test]
    fn indentation_around_children_is_not_text() {
        let parsed = parse_document(
            b"<root>\n  <item>  one </item>\n  label\n  <item />\n</root>",
        )
        .unwrap();
        assert_eq!(parsed.text(), Some("label"));
        assert_eq!(parsed.children()[0].text(), Some("  one "));
        assert_eq!(parsed.children()[1].text(), None);

        let mixed = Element::new("root")
            .with_text(" spaced ")
            .with_child(Element::new("item"));
        assert_eq!(parse_document(&print_document(&mixed)).unwrap(), mixed);
    }

    #[test]
    fn accepts_bom_comments_and_cdata() {
        let mut bytes = UTF8_BOM.to_vec();
        bytes.extend_from_slice(
            b"<?xml version=\"1.0\"?>\n<!-- note -->\n<root><value><![CDATA[<raw>]]></value></root>",
        );
        let parsed = parse_document(&bytes).unwrap();
        assert_eq!(parsed.name(), "root");
        assert_eq!(parsed.children()[0].text(), Some("<raw>"));
    }

    #[test]
    fn rejects_truncated_and_empty_documents() {
        assert!(matches!(
            parse_document(b"<?xml version=\"1.0\"?>"),
            Err(DomError::MissingRoot)
        ));
        assert!(parse_document(b"<root><child></root>").is_err());
        assert!(matches!(
            parse_document(b"<a /><b />"),
            Err(DomError::MultipleRoots)
        ));
    }
}
