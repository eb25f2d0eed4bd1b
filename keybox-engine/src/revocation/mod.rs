//! Revocation lookup
//!
//! The attestation status list is abstracted behind [`RevocationSource`] so
//! the pipeline never touches the network directly. Each validation takes
//! exactly one [`RevocationSnapshot`] and looks every serial of every chain
//! up in it.
//!
//! Three sources are provided:
//! - [`StaticRevocationSource`]: an in-memory snapshot
//! - [`FileRevocationSource`]: a status list saved on disk
//! - [`HttpRevocationSource`]: the published list, fetched with a timeout and
//!   cached for a configurable TTL

mod file;
mod http;
mod snapshot;

pub use file::FileRevocationSource;
pub use http::{HttpRevocationSource, DEFAULT_MAX_BODY_BYTES};
pub use snapshot::{RevocationEntry, RevocationSnapshot};

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::certificate::SerialNumber;
use crate::error::RevocationResult;

/// Status of one serial number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RevocationStatus {
    Good,
    Revoked,
    Suspended,
    /// Not listed; treated as good.
    Unknown,
}

impl RevocationStatus {
    /// Map a status string from the list. Anything other than `REVOKED`,
    /// including unrecognised values, is treated as suspended.
    pub fn from_list_value(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("REVOKED") {
            RevocationStatus::Revoked
        } else {
            RevocationStatus::Suspended
        }
    }

    pub fn invalidates(self) -> bool {
        matches!(self, RevocationStatus::Revoked | RevocationStatus::Suspended)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RevocationStatus::Good => "good",
            RevocationStatus::Revoked => "revoked",
            RevocationStatus::Suspended => "suspended",
            RevocationStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for RevocationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provider of revocation snapshots
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RevocationSource: Send + Sync {
    /// Current snapshot of the status list.
    ///
    /// # Errors
    ///
    /// Returns [`crate::RevocationError`] when no snapshot can be produced.
    /// Implementations never fall back to an empty list.
    async fn snapshot(&self) -> RevocationResult<Arc<RevocationSnapshot>>;
}

/// Fixed snapshot held in memory
#[derive(Debug, Clone, Default)]
pub struct StaticRevocationSource {
    snapshot: Arc<RevocationSnapshot>,
}

impl StaticRevocationSource {
    pub fn new(snapshot: RevocationSnapshot) -> Self {
        Self {
            snapshot: Arc::new(snapshot),
        }
    }

    /// Source that knows no revoked serials.
    pub fn empty() -> Self {
        Self::default()
    }

    /// # Errors
    ///
    /// Returns [`crate::RevocationError::InvalidSnapshot`] for bodies that are
    /// not a status list.
    pub fn from_json(body: &[u8]) -> RevocationResult<Self> {
        RevocationSnapshot::from_json(body).map(Self::new)
    }
}

#[async_trait]
impl RevocationSource for StaticRevocationSource {
    async fn snapshot(&self) -> RevocationResult<Arc<RevocationSnapshot>> {
        Ok(Arc::clone(&self.snapshot))
    }
}

/// Look every serial up in one snapshot taken from `source`.
///
/// # Errors
///
/// Propagates the source failure; no serial is ever reported as good when
/// the list could not be obtained.
pub(crate) async fn check_revocation(
    serials: &[SerialNumber],
    source: &dyn RevocationSource,
) -> RevocationResult<Vec<(SerialNumber, RevocationStatus)>> {
    let snapshot = source.snapshot().await?;
    debug!(serials = serials.len(), listed = snapshot.len(), "Checking revocation status");

    Ok(serials
        .iter()
        .map(|serial| (serial.clone(), snapshot.lookup(serial)))
        .collect())
}
