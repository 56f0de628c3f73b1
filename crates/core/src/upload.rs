//! Chunked upload session types and lifecycle.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use time::OffsetDateTime;
use uuid::Uuid;

/// Unique identifier for an upload session.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UploadId(Uuid);

impl UploadId {
    /// Generate a new random upload ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from a string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| crate::Error::UploadSession(format!("invalid upload ID: {e}")))
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for UploadId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UploadId({})", self.0)
    }
}

impl fmt::Display for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Upload session state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadState {
    /// Session is accepting parts.
    Collecting,
    /// All parts received; reassembly in progress.
    Combining,
    /// Final object written, parts cleaned up.
    Done,
    /// Reassembly failed; the final key was not created.
    Failed,
}

impl UploadState {
    /// Check if the session can receive parts. A session whose combine
    /// failed may collect replacement parts and retry completion.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Collecting | Self::Failed)
    }

    /// Check if the session reached a state it cannot leave.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done)
    }
}

/// An upload session tracking out-of-order part arrival.
///
/// Parts are keyed by index, not arrival order: a client may resend a part
/// after a network blip, and the resend overwrites the previous bytes for
/// that index.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadSession {
    /// Unique session identifier.
    pub id: UploadId,
    /// Key the combined object will be written under.
    pub final_key: String,
    /// Number of parts the client declared.
    pub total_parts: u32,
    /// Storage keys of received parts, by part index.
    pub parts: BTreeMap<u32, String>,
    /// Current session state.
    pub state: UploadState,
    /// When the session was created.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// When the session was last updated.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl UploadSession {
    /// Create a new session in the `Collecting` state.
    pub fn new(final_key: String, total_parts: u32) -> crate::Result<Self> {
        if total_parts == 0 {
            return Err(crate::Error::UploadSession(
                "total_parts must be at least 1".to_string(),
            ));
        }
        let now = OffsetDateTime::now_utc();
        Ok(Self {
            id: UploadId::new(),
            final_key,
            total_parts,
            parts: BTreeMap::new(),
            state: UploadState::Collecting,
            created_at: now,
            updated_at: now,
        })
    }

    /// Record a received part. Overwrites any previous key for the index.
    pub fn record_part(&mut self, index: u32, part_key: String) -> crate::Result<()> {
        if !self.state.is_active() {
            return Err(crate::Error::UploadSession(format!(
                "session {} is not accepting parts (state: {:?})",
                self.id, self.state
            )));
        }
        if index >= self.total_parts {
            return Err(crate::Error::UploadSession(format!(
                "part index {index} out of bounds for {} parts",
                self.total_parts
            )));
        }
        self.parts.insert(index, part_key);
        // A replacement part moves a failed session back into collection.
        if self.state == UploadState::Failed {
            self.state = UploadState::Collecting;
        }
        self.updated_at = OffsetDateTime::now_utc();
        Ok(())
    }

    /// Whether every declared part has been received.
    pub fn is_complete(&self) -> bool {
        self.parts.len() as u32 == self.total_parts
    }

    /// Part indexes not yet received.
    pub fn missing_parts(&self) -> Vec<u32> {
        (0..self.total_parts)
            .filter(|i| !self.parts.contains_key(i))
            .collect()
    }

    /// Part keys in index order. `BTreeMap` iteration gives index order
    /// regardless of arrival order.
    pub fn ordered_part_keys(&self) -> Vec<String> {
        self.parts.values().cloned().collect()
    }
}
