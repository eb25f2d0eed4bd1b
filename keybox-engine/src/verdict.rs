//! Verdict aggregation
//!
//! Runs the stages in order (parse, decode, algorithm and chain checks,
//! validity windows, revocation) and folds the first failure into a
//! [`Verdict`]. Every key chain of every keybox in the document has to pass.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::anchors::TrustAnchorSet;
use crate::certificate::{self, CertificateChain, SerialNumber};
use crate::chain;
use crate::config::{EngineConfig, ParseLimits, RevocationMode};
use crate::document;
use crate::error::{EngineError, EngineResult, ErrorKind, KeyboxError, KeyboxResult};
use crate::expiry;
use crate::revocation::{
    check_revocation, FileRevocationSource, HttpRevocationSource, RevocationSource,
};

/// Outcome of validating one document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub valid: bool,
    /// Failure category; `None` when valid
    pub reason: Option<ErrorKind>,
    /// Human-readable context for the failure
    pub detail: Option<String>,
}

/// What a caller should do with a document given its verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Disposition {
    Accept,
    Reject,
    /// Undecided; ask again later
    Retry,
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Disposition::Accept => f.write_str("accept"),
            Disposition::Reject => f.write_str("reject"),
            Disposition::Retry => f.write_str("retry"),
        }
    }
}

impl Verdict {
    pub fn accepted() -> Self {
        Self {
            valid: true,
            reason: None,
            detail: None,
        }
    }

    pub fn rejected(error: &KeyboxError) -> Self {
        Self {
            valid: false,
            reason: Some(error.kind()),
            detail: Some(error.to_string()),
        }
    }

    pub fn disposition(&self) -> Disposition {
        match self.reason {
            None if self.valid => Disposition::Accept,
            Some(kind) if kind.is_retryable() => Disposition::Retry,
            _ => Disposition::Reject,
        }
    }
}

impl From<KeyboxResult<()>> for Verdict {
    fn from(result: KeyboxResult<()>) -> Self {
        match result {
            Ok(()) => Verdict::accepted(),
            Err(e) => Verdict::rejected(&e),
        }
    }
}

/// Validate `bytes` at instant `now` with default parse limits.
pub async fn evaluate(
    bytes: &[u8],
    anchors: &TrustAnchorSet,
    revocation: &dyn RevocationSource,
    now: DateTime<Utc>,
) -> Verdict {
    evaluate_with_limits(bytes, anchors, revocation, now, &ParseLimits::default()).await
}

/// Validate `bytes` at instant `now`.
pub async fn evaluate_with_limits(
    bytes: &[u8],
    anchors: &TrustAnchorSet,
    revocation: &dyn RevocationSource,
    now: DateTime<Utc>,
    limits: &ParseLimits,
) -> Verdict {
    let result = run_stages(bytes, anchors, revocation, now, limits).await;
    if let Err(e) = &result {
        warn!(reason = %e.kind(), detail = %e, "Keybox rejected");
    }
    Verdict::from(result)
}

async fn run_stages(
    bytes: &[u8],
    anchors: &TrustAnchorSet,
    revocation: &dyn RevocationSource,
    now: DateTime<Utc>,
    limits: &ParseLimits,
) -> KeyboxResult<()> {
    let document = document::parse(bytes, limits)?;
    debug!(keyboxes = document.keyboxes.len(), "Document parsed");

    let mut chains: Vec<CertificateChain> = Vec::new();
    for key in document.keys() {
        let decoded = certificate::decode_chain(&key.certificates)?;
        chain::check_key_algorithm(key.algorithm, &decoded)?;
        chains.push(decoded);
    }

    for decoded in &chains {
        chain::verify_chain(decoded, anchors)?;
    }
    debug!(chains = chains.len(), "Chains verified");

    for decoded in &chains {
        expiry::check_chain_validity(decoded, now)?;
    }

    let serials: Vec<SerialNumber> = chains
        .iter()
        .flat_map(|decoded| decoded.serials().cloned())
        .collect();
    let statuses = check_revocation(&serials, revocation).await?;
    if let Some((serial, status)) = statuses.into_iter().find(|(_, status)| status.invalidates()) {
        return Err(KeyboxError::Revoked {
            serial: serial.to_hex(),
            status,
        });
    }

    debug!(serials = serials.len(), "No listed serials");
    Ok(())
}

/// Reusable validator holding the long-lived inputs
///
/// Cheap to clone; clones share the anchors and the revocation source (and
/// with it any cached status list).
#[derive(Clone)]
pub struct KeyboxValidator {
    anchors: Arc<TrustAnchorSet>,
    revocation: Arc<dyn RevocationSource>,
    limits: ParseLimits,
}

impl fmt::Debug for KeyboxValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyboxValidator")
            .field("anchors", &self.anchors)
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

impl KeyboxValidator {
    pub fn new(anchors: Arc<TrustAnchorSet>, revocation: Arc<dyn RevocationSource>) -> Self {
        Self {
            anchors,
            revocation,
            limits: ParseLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: ParseLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Build the revocation source selected by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] for an inconsistent configuration or an HTTP
    /// client that cannot be built.
    pub fn from_config(config: &EngineConfig, anchors: Arc<TrustAnchorSet>) -> EngineResult<Self> {
        config.revocation.validate()?;

        let revocation: Arc<dyn RevocationSource> = match config.revocation.mode {
            RevocationMode::Http => Arc::new(HttpRevocationSource::from_config(&config.revocation)?),
            RevocationMode::File => {
                let path = config.revocation.snapshot_path.clone().ok_or_else(|| {
                    EngineError::Configuration("revocation snapshot_path is not set".to_string())
                })?;
                Arc::new(FileRevocationSource::new(path))
            }
        };

        Ok(Self::new(anchors, revocation).with_limits(config.limits.clone()))
    }

    pub fn anchors(&self) -> &TrustAnchorSet {
        &self.anchors
    }

    pub fn limits(&self) -> &ParseLimits {
        &self.limits
    }

    pub async fn validate(&self, bytes: &[u8], now: DateTime<Utc>) -> Verdict {
        evaluate_with_limits(bytes, &self.anchors, self.revocation.as_ref(), now, &self.limits).await
    }

    /// Validate against the current wall-clock time.
    pub async fn validate_now(&self, bytes: &[u8]) -> Verdict {
        self.validate(bytes, Utc::now()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RevocationError;
    use crate::revocation::{MockRevocationSource, RevocationSnapshot, StaticRevocationSource};
    use keybox_testkit::{default_now, valid_document, KeyXml, KeyboxXml, TestChain};

    fn anchors_for(chain: &TestChain) -> TrustAnchorSet {
        TrustAnchorSet::from_pem(chain.anchors_pem().as_bytes()).unwrap()
    }

    #[test]
    fn test_disposition() {
        assert_eq!(Verdict::accepted().disposition(), Disposition::Accept);
        assert_eq!(
            Verdict::rejected(&KeyboxError::UntrustedRoot("x".to_string())).disposition(),
            Disposition::Reject
        );
        assert_eq!(
            Verdict::rejected(&KeyboxError::RevocationSourceUnavailable("x".to_string()))
                .disposition(),
            Disposition::Retry
        );
    }

    #[test]
    fn test_verdict_serialization() {
        let verdict = Verdict::rejected(&KeyboxError::CertificateCountMismatch {
            declared: 3,
            found: 2,
        });
        let json = serde_json::to_value(&verdict).unwrap();
        assert_eq!(json["valid"], false);
        assert_eq!(json["reason"], "CertificateCountMismatch");
    }

    #[tokio::test]
    async fn test_structural_failure_skips_revocation() {
        let chain = TestChain::generate();
        let mut source = MockRevocationSource::new();
        source.expect_snapshot().never();

        let verdict = evaluate(b"<Nope/>", &anchors_for(&chain), &source, default_now()).await;
        assert_eq!(verdict.reason, Some(ErrorKind::MalformedDocument));
    }

    #[tokio::test]
    async fn test_revocation_queried_once_for_all_chains() {
        let chain = TestChain::generate();
        let second = TestChain::builder().leaf_serial(&[0x77]).build();
        let mut anchors = anchors_for(&chain);
        anchors.add_der(second.root.der.clone()).unwrap();

        let bytes = KeyboxXml::new()
            .with_key(KeyXml::ecdsa(chain.chain_pem()))
            .with_key(KeyXml::ecdsa(second.chain_pem()))
            .to_bytes();

        let mut source = MockRevocationSource::new();
        source
            .expect_snapshot()
            .times(1)
            .returning(|| Ok(Arc::new(RevocationSnapshot::new())));

        let verdict = evaluate(&bytes, &anchors, &source, default_now()).await;
        assert!(verdict.valid, "{:?}", verdict);
    }

    #[tokio::test]
    async fn test_source_timeout_is_retry() {
        let chain = TestChain::generate();
        let mut source = MockRevocationSource::new();
        source
            .expect_snapshot()
            .returning(|| Err(RevocationError::Timeout(std::time::Duration::from_secs(30))));

        let verdict = evaluate(&valid_document(&chain), &anchors_for(&chain), &source, default_now()).await;
        assert_eq!(verdict.reason, Some(ErrorKind::RevocationSourceUnavailable));
        assert_eq!(verdict.disposition(), Disposition::Retry);
    }

    #[tokio::test]
    async fn test_validator_from_file_config() {
        let chain = TestChain::generate();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.json");
        std::fs::write(&path, r#"{"entries": {}}"#).unwrap();

        let mut config = EngineConfig::default();
        config.revocation.mode = RevocationMode::File;
        config.revocation.snapshot_path = Some(path);

        let validator = KeyboxValidator::from_config(&config, Arc::new(anchors_for(&chain))).unwrap();
        let verdict = validator.validate(&valid_document(&chain), default_now()).await;
        assert!(verdict.valid, "{:?}", verdict);
    }

    #[tokio::test]
    async fn test_validator_applies_limits() {
        let chain = TestChain::generate();
        let validator = KeyboxValidator::new(
            Arc::new(anchors_for(&chain)),
            Arc::new(StaticRevocationSource::empty()),
        )
        .with_limits(ParseLimits {
            max_document_bytes: 64,
            ..ParseLimits::default()
        });

        let verdict = validator.validate(&valid_document(&chain), default_now()).await;
        assert_eq!(verdict.reason, Some(ErrorKind::MalformedDocument));
    }
}
