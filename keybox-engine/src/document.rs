//! Structural parser for `<AndroidAttestation>` documents
//!
//! Turns untrusted bytes into an [`AttestationDocument`] without looking at any
//! cryptographic material. The element and attribute names are a fixed
//! external schema:
//!
//! ```xml
//! <AndroidAttestation>
//!   <NumberOfKeyboxes>1</NumberOfKeyboxes>
//!   <Keybox DeviceID="...">
//!     <Key algorithm="ecdsa">
//!       <PrivateKey format="pem">...</PrivateKey>
//!       <CertificateChain>
//!         <NumberOfCertificates>3</NumberOfCertificates>
//!         <Certificate format="pem">...</Certificate>
//!       </CertificateChain>
//!     </Key>
//!   </Keybox>
//! </AndroidAttestation>
//! ```

use std::fmt;

use secrecy::SecretString;
use tracing::debug;
use xml::reader::{ParserConfig, XmlEvent};

use crate::config::ParseLimits;
use crate::error::{KeyboxError, KeyboxResult};

const ROOT: &str = "AndroidAttestation";
const NUMBER_OF_KEYBOXES: &str = "NumberOfKeyboxes";
const KEYBOX: &str = "Keybox";
const DEVICE_ID: &str = "DeviceID";
const KEY: &str = "Key";
const ALGORITHM: &str = "algorithm";
const PRIVATE_KEY: &str = "PrivateKey";
const CERTIFICATE_CHAIN: &str = "CertificateChain";
const NUMBER_OF_CERTIFICATES: &str = "NumberOfCertificates";
const CERTIFICATE: &str = "Certificate";
const FORMAT: &str = "format";

/// Parsed document: one or more keyboxes
#[derive(Debug)]
pub struct AttestationDocument {
    pub keyboxes: Vec<Keybox>,
}

impl AttestationDocument {
    /// Every key of every keybox, in document order.
    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.keyboxes.iter().flat_map(|keybox| keybox.keys.iter())
    }
}

/// One keybox record
#[derive(Debug)]
pub struct Keybox {
    /// Opaque device tag, when the record carries one
    pub device_id: Option<String>,
    pub keys: Vec<Key>,
}

/// Declared key algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlgorithm {
    Rsa,
    Ecdsa,
}

impl KeyAlgorithm {
    fn from_attribute(value: Option<&str>) -> KeyboxResult<Self> {
        match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            Some("rsa") => Ok(KeyAlgorithm::Rsa),
            Some("ecdsa") => Ok(KeyAlgorithm::Ecdsa),
            Some(other) => Err(KeyboxError::UnsupportedAlgorithm(format!(
                "key algorithm {:?}",
                other
            ))),
            None => Err(KeyboxError::UnsupportedAlgorithm(
                "Key element declares no algorithm".to_string(),
            )),
        }
    }
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyAlgorithm::Rsa => f.write_str("rsa"),
            KeyAlgorithm::Ecdsa => f.write_str("ecdsa"),
        }
    }
}

/// One key entry. The private key is carried opaquely and never inspected.
#[derive(Debug)]
pub struct Key {
    pub algorithm: KeyAlgorithm,
    private_key: SecretString,
    pub certificates: Vec<CertificateBlob>,
}

impl Key {
    pub fn private_key(&self) -> &SecretString {
        &self.private_key
    }
}

/// Stored text of one certificate and its declared encoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateBlob {
    /// Value of the `format` attribute, if any
    pub format: Option<String>,
    pub data: String,
}

/// Minimal element tree built from the event stream.
#[derive(Debug, Default)]
struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<Element>,
    text: String,
}

impl Element {
    fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|child| child.name == name)
    }

    fn take_children(&mut self, name: &str) -> Vec<Element> {
        let (matching, rest): (Vec<Element>, Vec<Element>) = std::mem::take(&mut self.children)
            .into_iter()
            .partition(|child| child.name == name);
        self.children = rest;
        matching
    }
}

/// Parse raw bytes into a document.
///
/// # Errors
///
/// Returns a structural [`KeyboxError`] (`MalformedDocument`,
/// `MissingCertificateChain`, `CertificateCountMismatch` or
/// `UnsupportedAlgorithm`) for any input that does not match the schema.
pub(crate) fn parse(bytes: &[u8], limits: &ParseLimits) -> KeyboxResult<AttestationDocument> {
    if bytes.is_empty() {
        return Err(malformed("empty document"));
    }
    if bytes.len() > limits.max_document_bytes {
        return Err(malformed(format!(
            "document is {} bytes, limit is {}",
            bytes.len(),
            limits.max_document_bytes
        )));
    }

    let mut root = read_tree(bytes, limits)?;
    if root.name != ROOT {
        return Err(malformed(format!("unexpected root element <{}>", root.name)));
    }

    let keybox_elements = root.take_children(KEYBOX);
    if keybox_elements.is_empty() {
        return Err(malformed("document contains no Keybox"));
    }
    if keybox_elements.len() > limits.max_keyboxes {
        return Err(malformed(format!(
            "{} keyboxes exceed the limit of {}",
            keybox_elements.len(),
            limits.max_keyboxes
        )));
    }
    if let Some(declared) = root.child(NUMBER_OF_KEYBOXES) {
        let declared = parse_count(declared)?;
        if declared != keybox_elements.len() {
            return Err(malformed(format!(
                "NumberOfKeyboxes declares {}, found {}",
                declared,
                keybox_elements.len()
            )));
        }
    }

    let keyboxes = keybox_elements
        .into_iter()
        .map(|element| parse_keybox(element, limits))
        .collect::<KeyboxResult<Vec<_>>>()?;

    debug!(keyboxes = keyboxes.len(), "parsed attestation document");
    Ok(AttestationDocument { keyboxes })
}

fn read_tree(bytes: &[u8], limits: &ParseLimits) -> KeyboxResult<Element> {
    let reader = ParserConfig::new()
        .trim_whitespace(true)
        .cdata_to_characters(true)
        .ignore_comments(true)
        .create_reader(bytes);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;
    let mut elements = 0usize;

    for event in reader {
        match event.map_err(|e| malformed(format!("invalid XML: {}", e)))? {
            XmlEvent::StartElement {
                name, attributes, ..
            } => {
                elements = elements.saturating_add(1);
                if elements > limits.max_elements {
                    return Err(malformed(format!(
                        "more than {} elements",
                        limits.max_elements
                    )));
                }
                if stack.len() >= limits.max_depth {
                    return Err(malformed(format!(
                        "nesting deeper than {} levels",
                        limits.max_depth
                    )));
                }
                stack.push(Element {
                    name: name.local_name,
                    attributes: attributes
                        .into_iter()
                        .map(|attribute| (attribute.name.local_name, attribute.value))
                        .collect(),
                    ..Element::default()
                });
            }
            XmlEvent::Characters(text) => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&text);
                }
            }
            XmlEvent::EndElement { .. } => {
                let finished = stack
                    .pop()
                    .ok_or_else(|| malformed("unbalanced end element"))?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(finished),
                    None => root = Some(finished),
                }
            }
            XmlEvent::EndDocument => break,
            _ => {}
        }
    }

    root.ok_or_else(|| malformed("document has no root element"))
}

fn parse_keybox(mut element: Element, limits: &ParseLimits) -> KeyboxResult<Keybox> {
    let device_id = element.attribute(DEVICE_ID).map(str::to_string);
    let key_elements = element.take_children(KEY);
    if key_elements.is_empty() {
        return Err(malformed("Keybox has no Key entries"));
    }
    if key_elements.len() > limits.max_keys_per_keybox {
        return Err(malformed(format!(
            "{} keys exceed the limit of {}",
            key_elements.len(),
            limits.max_keys_per_keybox
        )));
    }

    let keys = key_elements
        .into_iter()
        .map(|key| parse_key(key, limits))
        .collect::<KeyboxResult<Vec<_>>>()?;

    Ok(Keybox { device_id, keys })
}

fn parse_key(mut element: Element, limits: &ParseLimits) -> KeyboxResult<Key> {
    let algorithm = KeyAlgorithm::from_attribute(element.attribute(ALGORITHM))?;

    let private_key = element
        .take_children(PRIVATE_KEY)
        .into_iter()
        .next()
        .map(|private_key| SecretString::new(private_key.text))
        .ok_or_else(|| malformed("Key has no PrivateKey"))?;

    let mut chain = element
        .take_children(CERTIFICATE_CHAIN)
        .into_iter()
        .next()
        .ok_or_else(|| {
            KeyboxError::MissingCertificateChain(format!("{} key has no CertificateChain", algorithm))
        })?;

    let declared = chain
        .child(NUMBER_OF_CERTIFICATES)
        .ok_or_else(|| malformed("CertificateChain has no NumberOfCertificates"))
        .and_then(parse_count)?;

    let certificates: Vec<CertificateBlob> = chain
        .take_children(CERTIFICATE)
        .into_iter()
        .map(|certificate| CertificateBlob {
            format: certificate.attribute(FORMAT).map(str::to_string),
            data: certificate.text,
        })
        .collect();

    if certificates.len() > limits.max_certificates_per_chain {
        return Err(malformed(format!(
            "{} certificates exceed the limit of {}",
            certificates.len(),
            limits.max_certificates_per_chain
        )));
    }
    if certificates.is_empty() && declared == 0 {
        return Err(KeyboxError::MissingCertificateChain(format!(
            "{} key has an empty CertificateChain",
            algorithm
        )));
    }
    if declared != certificates.len() {
        return Err(KeyboxError::CertificateCountMismatch {
            declared,
            found: certificates.len(),
        });
    }

    Ok(Key {
        algorithm,
        private_key,
        certificates,
    })
}

fn parse_count(element: &Element) -> KeyboxResult<usize> {
    element.text.trim().parse().map_err(|_| {
        malformed(format!(
            "{} is not a count: {:?}",
            element.name,
            element.text.trim()
        ))
    })
}

fn malformed(detail: impl Into<String>) -> KeyboxError {
    KeyboxError::MalformedDocument(detail.into())
}
