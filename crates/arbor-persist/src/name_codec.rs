//! Qualified names as embedded `{local, uri}` documents.

use arbor_store::Document;
use arbor_types::QName;

use crate::error::{PersistError, Result};

pub(crate) const LOCAL: &str = "local";
pub(crate) const URI: &str = "uri";

pub fn encode(name: &QName) -> Document {
    Document::new()
        .with(LOCAL, name.local_name())
        .with(URI, name.uri())
}

pub fn decode(doc: &Document) -> Result<QName> {
    let field = |f: &str| {
        doc.get_str(f)
            .ok_or_else(|| PersistError::corrupt(format!("name lacks `{f}`")))
    };
    Ok(QName::new(field(URI)?, field(LOCAL)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let name = QName::new("http://www.jcp.org/jcr/nt/1.0", "unstructured");
        let doc = encode(&name);
        assert_eq!(doc.get_str("local"), Some("unstructured"));
        assert_eq!(decode(&doc).unwrap(), name);
    }

    #[test]
    fn empty_namespace() {
        let name = QName::local("title");
        assert_eq!(decode(&encode(&name)).unwrap(), name);
    }

    #[test]
    fn missing_field_is_corrupt() {
        let doc = Document::new().with("local", "x");
        assert!(matches!(decode(&doc), Err(PersistError::CorruptValue(_))));
    }
}
