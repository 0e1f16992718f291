//! Stored entry with expiry metadata

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A stored value with its expiration time
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheEntry {
    /// Full store key
    pub key: String,

    /// Encoded value
    pub value: Vec<u8>,

    /// When the entry was written
    pub created_at: DateTime<Utc>,

    /// When the entry stops being served
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Create an entry that expires `expiry` from now
    pub fn new(key: impl Into<String>, value: Vec<u8>, expiry: Duration) -> Self {
        let now = Utc::now();
        let expires_at = chrono::Duration::from_std(expiry)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        Self {
            key: key.into(),
            value,
            created_at: now,
            expires_at,
        }
    }

    /// Check if the entry has expired
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Approximate size in bytes
    pub fn size_bytes(&self) -> usize {
        self.key.len() + self.value.len()
    }
}
