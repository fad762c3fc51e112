mod codec;
mod element;
mod error;
mod serde_bridge;

pub use codec::{parse_document, print_document};
pub use element::Element;
pub use error::DomError;
pub use serde_bridge::{from_element, to_element};
