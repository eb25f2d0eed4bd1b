//! Trust anchors
//!
//! Root certificates a chain must terminate in, indexed by the raw DER
//! encoding of their subject name. Loaded once and shared read-only.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use tracing::{debug, info};

use crate::certificate::{Certificate, Identity};
use crate::error::{EngineError, EngineResult};

/// One trusted root
#[derive(Debug, Clone)]
pub struct TrustAnchor {
    certificate: Certificate,
}

impl TrustAnchor {
    pub fn subject(&self) -> &Identity {
        self.certificate.subject()
    }

    /// DER-encoded SubjectPublicKeyInfo
    pub fn public_key(&self) -> &[u8] {
        self.certificate.public_key()
    }

    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    /// Verify the signature on `cert` with this anchor's key.
    pub(crate) fn verifies(&self, cert: &Certificate) -> Result<(), String> {
        let child = cert.x509().map_err(|e| e.to_string())?;
        let anchor = self.certificate.x509().map_err(|e| e.to_string())?;
        child
            .verify_signature(Some(anchor.public_key()))
            .map_err(|e| e.to_string())
    }
}

/// Read-only set of trusted roots
#[derive(Clone, Default)]
pub struct TrustAnchorSet {
    by_subject: HashMap<Vec<u8>, Vec<TrustAnchor>>,
    count: usize,
}

impl fmt::Debug for TrustAnchorSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustAnchorSet")
            .field("count", &self.count)
            .finish()
    }
}

impl TrustAnchorSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from a PEM bundle of `CERTIFICATE` blocks.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::TrustAnchor`] when the bundle holds no
    /// certificate or one of its certificates cannot be decoded.
    pub fn from_pem(pem: &[u8]) -> EngineResult<Self> {
        let mut set = Self::new();
        for item in x509_parser::pem::Pem::iter_from_buffer(pem) {
            let block =
                item.map_err(|e| EngineError::TrustAnchor(format!("invalid PEM bundle: {}", e)))?;
            if block.label != "CERTIFICATE" {
                debug!(label = %block.label, "Skipping non-certificate PEM block");
                continue;
            }
            set.add_der(block.contents)?;
        }

        if set.is_empty() {
            return Err(EngineError::TrustAnchor(
                "no certificates found in trust anchor bundle".to_string(),
            ));
        }
        Ok(set)
    }

    /// Load a PEM bundle from disk.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Io`] when the file cannot be read, otherwise as
    /// [`TrustAnchorSet::from_pem`].
    pub fn from_pem_file(path: &Path) -> EngineResult<Self> {
        let data = std::fs::read(path).map_err(|e| {
            EngineError::Io(std::io::Error::new(
                e.kind(),
                format!("{}: {}", path.display(), e),
            ))
        })?;
        let set = Self::from_pem(&data)?;
        info!(path = %path.display(), anchors = set.len(), "Loaded trust anchors");
        Ok(set)
    }

    /// Add one DER-encoded root certificate.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::TrustAnchor`] when the certificate cannot be
    /// decoded.
    pub fn add_der(&mut self, der: Vec<u8>) -> EngineResult<()> {
        let certificate = Certificate::from_der(der)
            .map_err(|e| EngineError::TrustAnchor(format!("invalid anchor certificate: {}", e)))?;
        self.add_certificate(certificate);
        Ok(())
    }

    pub fn add_certificate(&mut self, certificate: Certificate) {
        let anchors = self
            .by_subject
            .entry(certificate.subject().raw().to_vec())
            .or_default();
        if anchors
            .iter()
            .any(|a| a.public_key() == certificate.public_key())
        {
            return;
        }
        anchors.push(TrustAnchor { certificate });
        self.count += 1;
    }

    /// Anchors whose subject equals `name`.
    pub fn candidates(&self, name: &Identity) -> &[TrustAnchor] {
        self.by_subject
            .get(name.raw())
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Whether `cert` itself is an anchor (same subject and same key).
    pub fn contains(&self, cert: &Certificate) -> bool {
        self.candidates(cert.subject())
            .iter()
            .any(|a| a.public_key() == cert.public_key())
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keybox_testkit::{pem_encode, TestChain};

    fn decoded(der: &[u8]) -> Certificate {
        Certificate::from_der(der.to_vec()).unwrap()
    }

    #[test]
    fn test_from_pem_indexes_by_subject() {
        let chain = TestChain::generate();
        let set = TrustAnchorSet::from_pem(chain.anchors_pem().as_bytes()).unwrap();

        assert_eq!(set.len(), 1);
        let intermediate = decoded(&chain.intermediate.der);
        assert_eq!(set.candidates(intermediate.issuer()).len(), 1);
        assert!(set.candidates(intermediate.subject()).is_empty());
        assert!(set.contains(&decoded(&chain.root.der)));
        assert!(!set.contains(&intermediate));
    }

    #[test]
    fn test_duplicate_anchor_is_counted_once() {
        let chain = TestChain::generate();
        let bundle = format!("{}\n{}\n", chain.anchors_pem(), chain.anchors_pem());
        let set = TrustAnchorSet::from_pem(bundle.as_bytes()).unwrap();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_anchor_verifies_its_children_only() {
        let chain = TestChain::generate();
        let other = TestChain::generate();
        let set = TrustAnchorSet::from_pem(chain.anchors_pem().as_bytes()).unwrap();
        let anchor = &set.candidates(decoded(&chain.root.der).subject())[0];

        assert!(anchor.verifies(&decoded(&chain.intermediate.der)).is_ok());
        assert!(anchor.verifies(&decoded(&other.intermediate.der)).is_err());
    }

    #[test]
    fn test_empty_and_invalid_bundles_are_rejected() {
        assert!(matches!(
            TrustAnchorSet::from_pem(b"no certificates here"),
            Err(EngineError::TrustAnchor(_))
        ));
        let broken = pem_encode(&[0x30, 0x03, 0x02, 0x01, 0x01]);
        assert!(matches!(
            TrustAnchorSet::from_pem(broken.as_bytes()),
            Err(EngineError::TrustAnchor(_))
        ));
    }

    #[test]
    fn test_from_pem_file() {
        let chain = TestChain::generate();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roots.pem");
        std::fs::write(&path, chain.anchors_pem()).unwrap();

        let set = TrustAnchorSet::from_pem_file(&path).unwrap();
        assert_eq!(set.len(), 1);
        assert!(matches!(
            TrustAnchorSet::from_pem_file(&dir.path().join("missing.pem")),
            Err(EngineError::Io(_))
        ));
    }
}
