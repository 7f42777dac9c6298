//! Entry types shared between the partition store and supply messages.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Size of the fixed per-entry metadata (version, ttl, expire time).
pub const ENTRY_METADATA_SIZE: usize = 3 * std::mem::size_of::<u64>();

/// A cache entry as it travels to a demanding node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryInfo {
    /// The entry key.
    pub key: Bytes,

    /// The entry value.
    pub value: Bytes,

    /// Write version; a higher version supersedes a lower one.
    pub version: u64,

    /// Time-to-live in milliseconds. Zero means eternal.
    pub ttl_ms: u64,

    /// Absolute expiration time in milliseconds since UNIX epoch.
    /// Zero means no expiration.
    pub expire_time_ms: u64,
}

impl EntryInfo {
    /// Create an eternal entry.
    pub fn new(key: impl Into<Bytes>, value: impl Into<Bytes>, version: u64) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            version,
            ttl_ms: 0,
            expire_time_ms: 0,
        }
    }

    /// Set the ttl and absolute expiration time.
    pub fn with_expiry(mut self, ttl_ms: u64, expire_time_ms: u64) -> Self {
        self.ttl_ms = ttl_ms;
        self.expire_time_ms = expire_time_ms;
        self
    }

    /// Bytes this entry contributes to a supply message.
    pub fn size(&self) -> usize {
        self.key.len() + self.value.len() + ENTRY_METADATA_SIZE
    }

    /// Check if the entry has expired.
    pub fn is_expired(&self) -> bool {
        if self.expire_time_ms == 0 {
            return false;
        }
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        self.expire_time_ms <= now_ms
    }
}

/// An entry as stored in the overflow tier.
///
/// Overflow entries carry the class-loader ids needed to deserialize custom
/// key and value types on the receiving side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverflowEntry {
    /// The entry key.
    pub key: Bytes,
    /// The entry value.
    pub value: Bytes,
    /// Write version.
    pub version: u64,
    /// Time-to-live in milliseconds.
    pub ttl_ms: u64,
    /// Absolute expiration time in milliseconds.
    pub expire_time_ms: u64,
    /// Class loader of the key type, if it is a deployed class.
    pub key_loader: Option<Uuid>,
    /// Class loader of the value type, if it is a deployed class.
    pub value_loader: Option<Uuid>,
}

impl OverflowEntry {
    /// Create an overflow entry from an entry without deployment metadata.
    pub fn from_info(info: EntryInfo) -> Self {
        Self {
            key: info.key,
            value: info.value,
            version: info.version,
            ttl_ms: info.ttl_ms,
            expire_time_ms: info.expire_time_ms,
            key_loader: None,
            value_loader: None,
        }
    }

    /// Attach class loader ids.
    pub fn with_loaders(mut self, key_loader: Option<Uuid>, value_loader: Option<Uuid>) -> Self {
        self.key_loader = key_loader;
        self.value_loader = value_loader;
        self
    }

    /// Loader to resolve deployment metadata from: key first, then value.
    pub fn loader(&self) -> Option<Uuid> {
        self.key_loader.or(self.value_loader)
    }

    /// Entry info without deployment metadata.
    pub fn info(&self) -> EntryInfo {
        EntryInfo {
            key: self.key.clone(),
            value: self.value.clone(),
            version: self.version,
            ttl_ms: self.ttl_ms,
            expire_time_ms: self.expire_time_ms,
        }
    }
}
