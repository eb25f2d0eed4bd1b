//! Keybox validation engine
//!
//! Decides whether an Android attestation keybox document is currently
//! trustworthy. Raw bytes go in, a [`Verdict`] comes out:
//!
//! - Structural parsing of the `<AndroidAttestation>` XML schema
//! - Certificate decoding (PEM or base64 DER)
//! - Chain linkage and signature verification up to a [`TrustAnchorSet`]
//! - Validity window checks against a caller-supplied instant
//! - Revocation lookup through a [`RevocationSource`]
//!
//! Private key material is carried opaquely and never parsed or logged.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! use keybox_engine::{EngineConfig, KeyboxValidator, TrustAnchorSet};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let anchors = TrustAnchorSet::from_pem_file(Path::new("roots.pem"))?;
//!     let validator = KeyboxValidator::from_config(&EngineConfig::from_env()?, Arc::new(anchors))?;
//!
//!     let bytes = std::fs::read("keybox.xml")?;
//!     let verdict = validator.validate_now(&bytes).await;
//!     println!("valid: {} ({:?})", verdict.valid, verdict.reason);
//!     Ok(())
//! }
//! ```

pub mod anchors;
pub mod certificate;
mod chain;
pub mod config;
pub mod document;
pub mod error;
pub mod expiry;
pub mod revocation;
pub mod verdict;

pub use anchors::{TrustAnchor, TrustAnchorSet};
pub use certificate::{Certificate, CertificateChain, Identity, PublicKeyKind, SerialNumber};
pub use config::{EngineConfig, ParseLimits, RevocationConfig, RevocationMode, DEFAULT_REVOCATION_URL};
pub use document::{AttestationDocument, CertificateBlob, Key, KeyAlgorithm, Keybox};
pub use error::*;
pub use revocation::{
    FileRevocationSource, HttpRevocationSource, RevocationEntry, RevocationSnapshot,
    RevocationSource, RevocationStatus, StaticRevocationSource,
};
pub use verdict::{evaluate, evaluate_with_limits, Disposition, KeyboxValidator, Verdict};
