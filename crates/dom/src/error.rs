use thiserror::Error;

/// 解析或序列化 XML 文件時的錯誤。 / Error raised while parsing, printing or (de)serializing documents.
#[derive(Debug, Error)]
pub enum DomError {
    #[error("malformed XML: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("malformed XML attribute: {0}")]
    Attribute(#[from] quick_xml::events::attributes::AttrError),
    #[error("document is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("failed to (de)serialize state: {0}")]
    Serde(#[from] quick_xml::DeError),
    #[error("document has no root element")]
    MissingRoot,
    #[error("document has more than one root element")]
    MultipleRoots,
    #[error("unexpected closing tag </{0}>")]
    UnbalancedEnd(String),
    #[error("document ended inside <{0}>")]
    UnexpectedEof(String),
    #[error("text content outside of the root element")]
    TextOutsideRoot,
}
