//! Canonical form and content-derived file names
//!
//! Two documents that differ only in whitespace between elements, comments,
//! processing instructions, the XML declaration, CDATA wrapping or attribute
//! order produce the same canonical bytes and therefore the same name.

use sha2::{Digest, Sha256};
use xml::escape::{escape_str_attribute, escape_str_pcdata};
use xml::reader::{ParserConfig, XmlEvent};

use crate::error::{StoreError, StoreResult};

/// Re-serialise `bytes` in canonical form.
///
/// # Errors
///
/// Returns [`StoreError::NotXml`] when the input is not well-formed.
pub fn canonicalize(bytes: &[u8]) -> StoreResult<Vec<u8>> {
    let reader = ParserConfig::new()
        .trim_whitespace(true)
        .cdata_to_characters(true)
        .ignore_comments(true)
        .create_reader(bytes);

    let mut out = String::with_capacity(bytes.len());
    for event in reader {
        match event.map_err(|e| StoreError::NotXml(e.to_string()))? {
            XmlEvent::StartElement {
                name,
                mut attributes,
                ..
            } => {
                attributes.sort_by(|a, b| a.name.to_string().cmp(&b.name.to_string()));
                out.push('<');
                out.push_str(&name.to_string());
                for attribute in &attributes {
                    out.push(' ');
                    out.push_str(&attribute.name.to_string());
                    out.push_str("=\"");
                    out.push_str(&escape_str_attribute(&attribute.value));
                    out.push('"');
                }
                out.push('>');
            }
            XmlEvent::EndElement { name } => {
                out.push_str("</");
                out.push_str(&name.to_string());
                out.push('>');
            }
            XmlEvent::Characters(text) => {
                out.push_str(&escape_str_pcdata(text.trim()));
            }
            XmlEvent::EndDocument => break,
            _ => {}
        }
    }

    if out.is_empty() {
        return Err(StoreError::NotXml("document has no root element".to_string()));
    }
    Ok(out.into_bytes())
}

/// `<lowercase sha256 of the canonical form>.xml`
///
/// # Errors
///
/// As [`canonicalize`].
pub fn file_name(bytes: &[u8]) -> StoreResult<String> {
    let canonical = canonicalize(bytes)?;
    let digest = Sha256::digest(&canonical);
    Ok(format!("{}.xml", hex::encode(digest)))
}
