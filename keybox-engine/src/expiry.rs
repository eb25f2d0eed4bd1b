//! Validity window checks

use chrono::{DateTime, Utc};

use crate::certificate::CertificateChain;
use crate::error::{KeyboxError, KeyboxResult};

/// Whether every certificate satisfies `not_before <= now <= not_after`.
pub(crate) fn check_validity_window(chain: &CertificateChain, now: DateTime<Utc>) -> bool {
    chain
        .iter()
        .all(|cert| cert.not_before() <= now && now <= cert.not_after())
}

/// Like [`check_validity_window`], reporting the first offending certificate.
///
/// # Errors
///
/// Returns [`KeyboxError::NotYetValid`] or [`KeyboxError::Expired`] with the
/// index of the first certificate outside its window.
pub(crate) fn check_chain_validity(chain: &CertificateChain, now: DateTime<Utc>) -> KeyboxResult<()> {
    if check_validity_window(chain, now) {
        return Ok(());
    }
    for (index, cert) in chain.iter().enumerate() {
        if now < cert.not_before() {
            return Err(KeyboxError::NotYetValid {
                index,
                not_before: cert.not_before(),
            });
        }
        if now > cert.not_after() {
            return Err(KeyboxError::Expired {
                index,
                not_after: cert.not_after(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificate::Certificate;
    use chrono::Duration;
    use keybox_testkit::{default_now, Day, TestChain, Window};

    fn decode(chain: &TestChain) -> CertificateChain {
        let certificates = chain
            .chain_der()
            .into_iter()
            .map(|der| Certificate::from_der(der).unwrap())
            .collect();
        CertificateChain::new(certificates).unwrap()
    }

    #[test]
    fn test_within_window() {
        let chain = decode(&TestChain::generate());
        assert!(check_validity_window(&chain, default_now()));
    }

    #[test]
    fn test_bounds_are_inclusive() {
        let chain = decode(&TestChain::generate());
        let leaf_end = Day::new(2035, 1, 1).to_utc();
        let leaf_start = Day::new(2020, 1, 1).to_utc();

        assert!(check_validity_window(&chain, leaf_end));
        assert!(check_validity_window(&chain, leaf_start));
        assert_eq!(
            check_chain_validity(&chain, leaf_end + Duration::seconds(1)),
            Err(KeyboxError::Expired {
                index: 0,
                not_after: leaf_end
            })
        );
        assert_eq!(
            check_chain_validity(&chain, leaf_start - Duration::seconds(1)),
            Err(KeyboxError::NotYetValid {
                index: 0,
                not_before: leaf_start
            })
        );
    }

    #[test]
    fn test_expired_intermediate_reports_its_index() {
        let chain = TestChain::builder()
            .intermediate_window(Window::new(Day::new(2018, 1, 1), Day::new(2024, 1, 1)))
            .build();
        let decoded = decode(&chain);

        assert!(matches!(
            check_chain_validity(&decoded, default_now()),
            Err(KeyboxError::Expired { index: 1, .. })
        ));
        assert!(!check_validity_window(&decoded, default_now()));
    }
}
