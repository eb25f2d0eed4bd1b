//! Chain linkage and signature verification

use tracing::debug;

use crate::anchors::TrustAnchorSet;
use crate::certificate::{Certificate, CertificateChain, PublicKeyKind};
use crate::document::KeyAlgorithm;
use crate::error::{KeyboxError, KeyboxResult};

/// Verify that `chain` links leaf to root and terminates in a trust anchor.
///
/// Each certificate must name the next one as its issuer and carry a
/// signature made with the next one's key. The last certificate must be
/// signed by an anchor registered under its issuer name. A single
/// certificate is only accepted when it is itself an anchor.
pub(crate) fn verify_chain(chain: &CertificateChain, anchors: &TrustAnchorSet) -> KeyboxResult<()> {
    let certificates: Vec<&Certificate> = chain.iter().collect();

    for (index, pair) in certificates.windows(2).enumerate() {
        let [child, parent] = pair else { continue };
        if child.issuer() != parent.subject() {
            debug!(index, issuer = %child.issuer(), next = %parent.subject(), "Chain linkage broken");
            return Err(KeyboxError::ChainLinkageBroken { index });
        }
        verify_signed_by(child, parent)
            .map_err(|reason| KeyboxError::SignatureInvalid { index, reason })?;
    }

    if chain.len() == 1 {
        return verify_anchored_leaf(chain.leaf(), anchors);
    }

    let index = chain.len() - 1;
    let last = chain.last();
    let candidates = anchors.candidates(last.issuer());
    if candidates.is_empty() {
        return Err(KeyboxError::UntrustedRoot(format!(
            "no trust anchor named {}",
            last.issuer()
        )));
    }

    let mut failures = Vec::with_capacity(candidates.len());
    for anchor in candidates {
        match anchor.verifies(last) {
            Ok(()) => {
                debug!(length = chain.len(), anchor = %anchor.subject(), "Chain verified");
                return Ok(());
            }
            Err(reason) => failures.push(reason),
        }
    }

    Err(KeyboxError::SignatureInvalid {
        index,
        reason: format!(
            "not signed by any of {} anchors named {}: {}",
            candidates.len(),
            last.issuer(),
            failures.join("; ")
        ),
    })
}

fn verify_anchored_leaf(leaf: &Certificate, anchors: &TrustAnchorSet) -> KeyboxResult<()> {
    let anchor = anchors
        .candidates(leaf.subject())
        .iter()
        .find(|a| a.public_key() == leaf.public_key())
        .ok_or_else(|| {
            KeyboxError::UntrustedRoot(format!(
                "single certificate {} is not a trust anchor",
                leaf.subject()
            ))
        })?;

    anchor
        .verifies(leaf)
        .map_err(|reason| KeyboxError::SignatureInvalid { index: 0, reason })
}

fn verify_signed_by(child: &Certificate, parent: &Certificate) -> Result<(), String> {
    let child = child.x509().map_err(|e| e.to_string())?;
    let parent = parent.x509().map_err(|e| e.to_string())?;
    child
        .verify_signature(Some(parent.public_key()))
        .map_err(|e| e.to_string())
}

/// The key's declared algorithm must match the leaf public key type.
pub(crate) fn check_key_algorithm(
    declared: KeyAlgorithm,
    chain: &CertificateChain,
) -> KeyboxResult<()> {
    let actual = chain.leaf().public_key_kind();
    let matches = matches!(
        (declared, actual),
        (KeyAlgorithm::Ecdsa, PublicKeyKind::Ec) | (KeyAlgorithm::Rsa, PublicKeyKind::Rsa)
    );
    if matches {
        Ok(())
    } else {
        Err(KeyboxError::UnsupportedAlgorithm(format!(
            "key declared as {} but leaf certificate holds a {:?} key",
            declared, actual
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keybox_testkit::{flip_signature_bit, Day, IssuedCertificate, TestChain, Window};

    fn chain_of(ders: &[&[u8]]) -> CertificateChain {
        let certificates = ders
            .iter()
            .map(|der| Certificate::from_der(der.to_vec()).unwrap())
            .collect();
        CertificateChain::new(certificates).unwrap()
    }

    fn anchors_for(chain: &TestChain) -> TrustAnchorSet {
        TrustAnchorSet::from_pem(chain.anchors_pem().as_bytes()).unwrap()
    }

    #[test]
    fn test_valid_chain_verifies() {
        let chain = TestChain::generate();
        let decoded = chain_of(&[&chain.leaf.der, &chain.intermediate.der, &chain.root.der]);
        assert!(verify_chain(&decoded, &anchors_for(&chain)).is_ok());
    }

    #[test]
    fn test_chain_without_root_certificate_verifies() {
        let chain = TestChain::generate();
        let decoded = chain_of(&[&chain.leaf.der, &chain.intermediate.der]);
        assert!(verify_chain(&decoded, &anchors_for(&chain)).is_ok());
    }

    #[test]
    fn test_linkage_broken() {
        let chain = TestChain::generate();
        let decoded = chain_of(&[&chain.leaf.der, &chain.root.der]);
        assert_eq!(
            verify_chain(&decoded, &anchors_for(&chain)),
            Err(KeyboxError::ChainLinkageBroken { index: 0 })
        );
    }

    #[test]
    fn test_foreign_intermediate_with_same_name() {
        let chain = TestChain::generate();
        let other = TestChain::generate();
        let decoded = chain_of(&[&chain.leaf.der, &other.intermediate.der, &chain.root.der]);

        match verify_chain(&decoded, &anchors_for(&chain)) {
            Err(KeyboxError::SignatureInvalid { index, .. }) => assert_eq!(index, 0),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_anchor_with_same_name_but_other_key() {
        let chain = TestChain::generate();
        let impostor = TestChain::generate();
        let decoded = chain_of(&[&chain.leaf.der, &chain.intermediate.der]);

        match verify_chain(&decoded, &anchors_for(&impostor)) {
            Err(KeyboxError::SignatureInvalid { index, .. }) => assert_eq!(index, 1),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_untrusted_root() {
        let chain = TestChain::generate();
        let window = Window::new(Day::new(2016, 1, 1), Day::new(2046, 1, 1));
        let unrelated = IssuedCertificate::self_signed("Unrelated Root", &[0x09], window);
        let anchors = TrustAnchorSet::from_pem(unrelated.pem().as_bytes()).unwrap();
        let decoded = chain_of(&[&chain.leaf.der, &chain.intermediate.der, &chain.root.der]);

        assert!(matches!(
            verify_chain(&decoded, &anchors),
            Err(KeyboxError::UntrustedRoot(_))
        ));
    }

    #[test]
    fn test_tampered_signatures_are_detected_at_each_position() {
        let chain = TestChain::generate();
        let anchors = anchors_for(&chain);

        let leaf = flip_signature_bit(&chain.leaf.der, 5, 3);
        let decoded = chain_of(&[&leaf, &chain.intermediate.der, &chain.root.der]);
        assert!(matches!(
            verify_chain(&decoded, &anchors),
            Err(KeyboxError::SignatureInvalid { index: 0, .. })
        ));

        let root = flip_signature_bit(&chain.root.der, 11, 0);
        let decoded = chain_of(&[&chain.leaf.der, &chain.intermediate.der, &root]);
        assert!(matches!(
            verify_chain(&decoded, &anchors),
            Err(KeyboxError::SignatureInvalid { index: 2, .. })
        ));
    }

    #[test]
    fn test_single_certificate_must_be_an_anchor() {
        let chain = TestChain::generate();
        let anchors = anchors_for(&chain);

        assert!(verify_chain(&chain_of(&[&chain.root.der]), &anchors).is_ok());
        assert!(matches!(
            verify_chain(&chain_of(&[&chain.leaf.der]), &anchors),
            Err(KeyboxError::UntrustedRoot(_))
        ));
    }

    #[test]
    fn test_tampered_anchor_alone_is_signature_invalid() {
        let chain = TestChain::generate();
        let root = flip_signature_bit(&chain.root.der, 7, 2);

        assert!(matches!(
            verify_chain(&chain_of(&[&root]), &anchors_for(&chain)),
            Err(KeyboxError::SignatureInvalid { index: 0, .. })
        ));
    }

    #[test]
    fn test_key_algorithm_must_match_leaf() {
        let chain = TestChain::generate();
        let decoded = chain_of(&[&chain.leaf.der]);

        assert!(check_key_algorithm(KeyAlgorithm::Ecdsa, &decoded).is_ok());
        assert!(matches!(
            check_key_algorithm(KeyAlgorithm::Rsa, &decoded),
            Err(KeyboxError::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn test_rsa_chain_verifies() {
        let chain = TestChain::builder().rsa().build();
        let decoded = chain_of(&[&chain.leaf.der, &chain.intermediate.der, &chain.root.der]);

        assert_eq!(decoded.leaf().public_key_kind(), PublicKeyKind::Rsa);
        assert!(verify_chain(&decoded, &anchors_for(&chain)).is_ok());
        assert!(check_key_algorithm(KeyAlgorithm::Rsa, &decoded).is_ok());
        assert!(matches!(
            check_key_algorithm(KeyAlgorithm::Ecdsa, &decoded),
            Err(KeyboxError::UnsupportedAlgorithm(_))
        ));
    }
}
