use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::revocation::RevocationStatus;

/// Reason code carried by a negative verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    MalformedDocument,
    MissingCertificateChain,
    CertificateCountMismatch,
    UnsupportedAlgorithm,
    CertificateDecodeFailure,
    SignatureInvalid,
    ChainLinkageBroken,
    UntrustedRoot,
    Expired,
    NotYetValid,
    Revoked,
    RevocationSourceUnavailable,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::MalformedDocument => "MalformedDocument",
            ErrorKind::MissingCertificateChain => "MissingCertificateChain",
            ErrorKind::CertificateCountMismatch => "CertificateCountMismatch",
            ErrorKind::UnsupportedAlgorithm => "UnsupportedAlgorithm",
            ErrorKind::CertificateDecodeFailure => "CertificateDecodeFailure",
            ErrorKind::SignatureInvalid => "SignatureInvalid",
            ErrorKind::ChainLinkageBroken => "ChainLinkageBroken",
            ErrorKind::UntrustedRoot => "UntrustedRoot",
            ErrorKind::Expired => "Expired",
            ErrorKind::NotYetValid => "NotYetValid",
            ErrorKind::Revoked => "Revoked",
            ErrorKind::RevocationSourceUnavailable => "RevocationSourceUnavailable",
        }
    }

    /// Whether retrying later can change the outcome.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::RevocationSourceUnavailable)
    }

    /// Whether the failure was detected by the structural parser.
    pub fn is_structural(self) -> bool {
        matches!(
            self,
            ErrorKind::MalformedDocument
                | ErrorKind::MissingCertificateChain
                | ErrorKind::CertificateCountMismatch
                | ErrorKind::UnsupportedAlgorithm
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of one validation stage.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyboxError {
    #[error("Malformed document: {0}")]
    MalformedDocument(String),

    #[error("Missing certificate chain: {0}")]
    MissingCertificateChain(String),

    #[error("Certificate count mismatch: declared {declared}, found {found}")]
    CertificateCountMismatch { declared: usize, found: usize },

    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Certificate {index} could not be decoded: {reason}")]
    CertificateDecodeFailure { index: usize, reason: String },

    #[error("Signature of certificate {index} does not verify: {reason}")]
    SignatureInvalid { index: usize, reason: String },

    #[error("Issuer of certificate {index} does not match the subject of certificate {}", .index + 1)]
    ChainLinkageBroken { index: usize },

    #[error("Untrusted root: {0}")]
    UntrustedRoot(String),

    #[error("Certificate {index} expired at {not_after}")]
    Expired { index: usize, not_after: DateTime<Utc> },

    #[error("Certificate {index} is not valid before {not_before}")]
    NotYetValid { index: usize, not_before: DateTime<Utc> },

    #[error("Certificate serial {serial} is {status}")]
    Revoked { serial: String, status: RevocationStatus },

    #[error("Revocation source unavailable: {0}")]
    RevocationSourceUnavailable(String),
}

impl KeyboxError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            KeyboxError::MalformedDocument(_) => ErrorKind::MalformedDocument,
            KeyboxError::MissingCertificateChain(_) => ErrorKind::MissingCertificateChain,
            KeyboxError::CertificateCountMismatch { .. } => ErrorKind::CertificateCountMismatch,
            KeyboxError::UnsupportedAlgorithm(_) => ErrorKind::UnsupportedAlgorithm,
            KeyboxError::CertificateDecodeFailure { .. } => ErrorKind::CertificateDecodeFailure,
            KeyboxError::SignatureInvalid { .. } => ErrorKind::SignatureInvalid,
            KeyboxError::ChainLinkageBroken { .. } => ErrorKind::ChainLinkageBroken,
            KeyboxError::UntrustedRoot(_) => ErrorKind::UntrustedRoot,
            KeyboxError::Expired { .. } => ErrorKind::Expired,
            KeyboxError::NotYetValid { .. } => ErrorKind::NotYetValid,
            KeyboxError::Revoked { .. } => ErrorKind::Revoked,
            KeyboxError::RevocationSourceUnavailable(_) => ErrorKind::RevocationSourceUnavailable,
        }
    }
}

pub type KeyboxResult<T> = Result<T, KeyboxError>;

/// Failure to turn one certificate blob into a [`crate::Certificate`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Invalid PEM: {0}")]
    Pem(String),

    #[error("Invalid base64: {0}")]
    Base64(String),

    #[error("Invalid DER: {0}")]
    Der(String),

    #[error("{0} trailing bytes after certificate")]
    TrailingData(usize),

    #[error("Unsupported certificate format: {0}")]
    UnsupportedFormat(String),

    #[error("Timestamp out of range: {0}")]
    Timestamp(i64),
}

/// Failure of the revocation data source.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RevocationError {
    #[error("Revocation source unreachable: {0}")]
    Unavailable(String),

    #[error("Revocation source timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Revocation list could not be decoded: {0}")]
    InvalidSnapshot(String),
}

impl From<RevocationError> for KeyboxError {
    fn from(err: RevocationError) -> Self {
        KeyboxError::RevocationSourceUnavailable(err.to_string())
    }
}

pub type RevocationResult<T> = Result<T, RevocationError>;

/// Errors raised while setting the engine up, before any document is seen.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Trust anchor error: {0}")]
    TrustAnchor(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;
