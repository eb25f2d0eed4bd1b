//! Certificate decoding
//!
//! Normalises the two stored encodings (PEM armour or base64 DER) to DER and
//! extracts the fields the later stages need into an owned, immutable
//! [`Certificate`].

use std::fmt;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use x509_parser::pem::Pem;
use x509_parser::prelude::{FromDer, X509Certificate};
use x509_parser::public_key::PublicKey;

use crate::document::CertificateBlob;
use crate::error::{DecodeError, KeyboxError, KeyboxResult};

/// Certificate serial number of arbitrary length.
///
/// Held as its minimal big-endian magnitude, so `0x00ab` and `0xab` compare
/// equal; rendered as lowercase hex without leading zeros.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SerialNumber(Vec<u8>);

impl SerialNumber {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
        Self(bytes.get(start..).unwrap_or_default().to_vec())
    }

    /// Parse a hexadecimal serial, ignoring case, surrounding whitespace and
    /// leading zeros.
    pub fn from_hex(value: &str) -> Option<Self> {
        let trimmed = value.trim().trim_start_matches('0');
        let padded = if trimmed.len() % 2 == 1 {
            format!("0{}", trimmed)
        } else {
            trimmed.to_string()
        };
        hex::decode(padded).ok().map(|bytes| Self::from_bytes(&bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        let encoded = hex::encode(&self.0);
        let trimmed = encoded.trim_start_matches('0');
        if trimmed.is_empty() {
            "0".to_string()
        } else {
            trimmed.to_string()
        }
    }
}

impl fmt::Display for SerialNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Distinguished name, compared on its DER encoding.
#[derive(Debug, Clone)]
pub struct Identity {
    raw: Vec<u8>,
    display: String,
}

impl Identity {
    pub(crate) fn new(raw: &[u8], display: String) -> Self {
        Self {
            raw: raw.to_vec(),
            display,
        }
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }
}

impl PartialEq for Identity {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for Identity {}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display)
    }
}

/// Public key family of a certificate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublicKeyKind {
    Rsa,
    Ec,
    Other,
}

/// One decoded certificate
#[derive(Debug, Clone)]
pub struct Certificate {
    der: Vec<u8>,
    subject: Identity,
    issuer: Identity,
    public_key_kind: PublicKeyKind,
    public_key: Vec<u8>,
    signature: Vec<u8>,
    signature_algorithm: String,
    serial: SerialNumber,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
}

impl Certificate {
    /// Decode a DER certificate. The whole input must be consumed.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] for truncated or malformed encodings, trailing
    /// bytes and validity times outside the representable range.
    pub fn from_der(der: Vec<u8>) -> Result<Self, DecodeError> {
        let fields = {
            let (rest, cert) =
                X509Certificate::from_der(&der).map_err(|e| DecodeError::Der(e.to_string()))?;
            if !rest.is_empty() {
                return Err(DecodeError::TrailingData(rest.len()));
            }

            let spki = cert.public_key();
            let public_key_kind = match spki.parsed() {
                Ok(PublicKey::RSA(_)) => PublicKeyKind::Rsa,
                Ok(PublicKey::EC(_)) => PublicKeyKind::Ec,
                _ => PublicKeyKind::Other,
            };
            let validity = cert.validity();

            (
                Identity::new(cert.subject().as_raw(), cert.subject().to_string()),
                Identity::new(cert.issuer().as_raw(), cert.issuer().to_string()),
                public_key_kind,
                spki.raw.to_vec(),
                cert.signature_value.data.to_vec(),
                cert.signature_algorithm.algorithm.to_id_string(),
                SerialNumber::from_bytes(cert.raw_serial()),
                timestamp(validity.not_before.timestamp())?,
                timestamp(validity.not_after.timestamp())?,
            )
        };

        let (
            subject,
            issuer,
            public_key_kind,
            public_key,
            signature,
            signature_algorithm,
            serial,
            not_before,
            not_after,
        ) = fields;

        Ok(Self {
            der,
            subject,
            issuer,
            public_key_kind,
            public_key,
            signature,
            signature_algorithm,
            serial,
            not_before,
            not_after,
        })
    }

    /// Re-parse the owned encoding for signature work.
    pub(crate) fn x509(&self) -> Result<X509Certificate<'_>, DecodeError> {
        X509Certificate::from_der(&self.der)
            .map(|(_, cert)| cert)
            .map_err(|e| DecodeError::Der(e.to_string()))
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    pub fn subject(&self) -> &Identity {
        &self.subject
    }

    pub fn issuer(&self) -> &Identity {
        &self.issuer
    }

    pub fn public_key_kind(&self) -> PublicKeyKind {
        self.public_key_kind
    }

    /// DER-encoded SubjectPublicKeyInfo
    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    /// Dotted OID of the signature algorithm
    pub fn signature_algorithm(&self) -> &str {
        &self.signature_algorithm
    }

    pub fn serial(&self) -> &SerialNumber {
        &self.serial
    }

    pub fn not_before(&self) -> DateTime<Utc> {
        self.not_before
    }

    pub fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }

    pub fn is_self_issued(&self) -> bool {
        self.subject == self.issuer
    }
}

fn timestamp(seconds: i64) -> Result<DateTime<Utc>, DecodeError> {
    DateTime::<Utc>::from_timestamp(seconds, 0).ok_or(DecodeError::Timestamp(seconds))
}

/// Decode one stored certificate according to its `format` attribute.
///
/// # Errors
///
/// Returns [`DecodeError`] when the text is not in the declared encoding or
/// the encoding is not a well-formed certificate.
pub(crate) fn decode(blob: &CertificateBlob) -> Result<Certificate, DecodeError> {
    let format = blob
        .format
        .as_deref()
        .map(|f| f.trim().to_ascii_lowercase());
    let der = match format.as_deref() {
        None | Some("pem") => pem_to_der(&blob.data)?,
        Some("der") | Some("base64") => base64_to_der(&blob.data)?,
        Some(other) => return Err(DecodeError::UnsupportedFormat(other.to_string())),
    };
    Certificate::from_der(der)
}

fn pem_to_der(text: &str) -> Result<Vec<u8>, DecodeError> {
    let mut blocks = Vec::new();
    for item in Pem::iter_from_buffer(text.trim().as_bytes()) {
        let pem = item.map_err(|e| DecodeError::Pem(e.to_string()))?;
        blocks.push(pem);
    }

    let mut blocks = blocks.into_iter();
    match (blocks.next(), blocks.next()) {
        (Some(pem), None) if pem.label == "CERTIFICATE" => Ok(pem.contents),
        (Some(pem), None) => Err(DecodeError::Pem(format!(
            "expected a CERTIFICATE block, found {}",
            pem.label
        ))),
        (None, _) => Err(DecodeError::Pem("no PEM block found".to_string())),
        (Some(_), Some(_)) => Err(DecodeError::Pem(
            "more than one PEM block in a single Certificate".to_string(),
        )),
    }
}

fn base64_to_der(text: &str) -> Result<Vec<u8>, DecodeError> {
    let compact: String = text.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    BASE64
        .decode(compact)
        .map_err(|e| DecodeError::Base64(e.to_string()))
}

/// Decoded chain, leaf first. Never empty.
#[derive(Debug, Clone)]
pub struct CertificateChain {
    leaf: Certificate,
    issuers: Vec<Certificate>,
}

impl CertificateChain {
    pub fn new(certificates: Vec<Certificate>) -> Option<Self> {
        let mut certificates = certificates.into_iter();
        let leaf = certificates.next()?;
        Some(Self {
            leaf,
            issuers: certificates.collect(),
        })
    }

    pub fn leaf(&self) -> &Certificate {
        &self.leaf
    }

    /// Last certificate of the chain; the leaf for a one-element chain.
    pub fn last(&self) -> &Certificate {
        self.issuers.last().unwrap_or(&self.leaf)
    }

    pub fn len(&self) -> usize {
        self.issuers.len().saturating_add(1)
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn iter(&self) -> impl Iterator<Item = &Certificate> {
        std::iter::once(&self.leaf).chain(self.issuers.iter())
    }

    pub fn serials(&self) -> impl Iterator<Item = &SerialNumber> {
        self.iter().map(Certificate::serial)
    }
}

/// Decode every blob of one key, keeping the position of the first failure.
pub(crate) fn decode_chain(blobs: &[CertificateBlob]) -> KeyboxResult<CertificateChain> {
    let certificates = blobs
        .iter()
        .enumerate()
        .map(|(index, blob)| {
            decode(blob).map_err(|e| KeyboxError::CertificateDecodeFailure {
                index,
                reason: e.to_string(),
            })
        })
        .collect::<KeyboxResult<Vec<_>>>()?;

    CertificateChain::new(certificates).ok_or_else(|| {
        KeyboxError::MissingCertificateChain("chain has no certificates".to_string())
    })
}
