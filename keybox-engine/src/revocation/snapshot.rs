use std::collections::HashMap;

use serde::Deserialize;
use tracing::debug;

use super::RevocationStatus;
use crate::certificate::SerialNumber;
use crate::error::{RevocationError, RevocationResult};

/// Status list body as published
#[derive(Debug, Deserialize)]
struct StatusList {
    entries: HashMap<String, ListedEntry>,
}

#[derive(Debug, Deserialize)]
struct ListedEntry {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    comment: Option<String>,
    #[serde(default)]
    expires: Option<String>,
}

/// One listed serial
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevocationEntry {
    pub status: RevocationStatus,
    pub reason: Option<String>,
    pub comment: Option<String>,
    pub expires: Option<String>,
}

impl RevocationEntry {
    pub fn revoked() -> Self {
        Self {
            status: RevocationStatus::Revoked,
            reason: None,
            comment: None,
            expires: None,
        }
    }
}

/// Point-in-time copy of the status list
#[derive(Debug, Clone, Default)]
pub struct RevocationSnapshot {
    entries: HashMap<SerialNumber, RevocationEntry>,
}

impl RevocationSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a status list body.
    ///
    /// Keys that are not hexadecimal can never match a certificate and are
    /// dropped. Entries without a recognised status count as suspended.
    ///
    /// # Errors
    ///
    /// Returns [`RevocationError::InvalidSnapshot`] when the body is not JSON
    /// or has no `entries` object.
    pub fn from_json(body: &[u8]) -> RevocationResult<Self> {
        let list: StatusList = serde_json::from_slice(body)
            .map_err(|e| RevocationError::InvalidSnapshot(e.to_string()))?;

        let mut snapshot = Self::new();
        for (key, listed) in list.entries {
            let Some(serial) = SerialNumber::from_hex(&key) else {
                debug!(key = %key, "Ignoring status entry with non-hex serial");
                continue;
            };
            let status = listed
                .status
                .as_deref()
                .map_or(RevocationStatus::Suspended, RevocationStatus::from_list_value);
            snapshot.insert(
                serial,
                RevocationEntry {
                    status,
                    reason: listed.reason,
                    comment: listed.comment,
                    expires: listed.expires,
                },
            );
        }
        Ok(snapshot)
    }

    pub fn insert(&mut self, serial: SerialNumber, entry: RevocationEntry) {
        self.entries.insert(serial, entry);
    }

    pub fn entry(&self, serial: &SerialNumber) -> Option<&RevocationEntry> {
        self.entries.get(serial)
    }

    /// Status of `serial`; [`RevocationStatus::Unknown`] when not listed.
    pub fn lookup(&self, serial: &SerialNumber) -> RevocationStatus {
        self.entry(serial)
            .map_or(RevocationStatus::Unknown, |entry| entry.status)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
