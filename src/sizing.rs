//! Pool Size Configuration
//!
//! The operator-controlled target size lives as a small JSON blob at the
//! pool path, e.g. `{"desiredSize": 10}`. Older writers used the
//! `cachePoolSize` key, which is still accepted on read.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Opaque version of a config blob, as supplied by the config source
pub type Revision = u64;

/// A raw config payload together with its revision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedBlob {
    pub data: Bytes,
    pub revision: Revision,
}

impl VersionedBlob {
    pub fn new(data: impl Into<Bytes>, revision: Revision) -> Self {
        Self {
            data: data.into(),
            revision,
        }
    }
}

/// Decoded size configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeConfig {
    /// Number of endpoints the pool should expose
    #[serde(rename = "desiredSize", alias = "cachePoolSize")]
    pub desired_size: usize,

    /// When the administrative write happened (informational)
    #[serde(rename = "updatedAt", default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl SizeConfig {
    /// Create a size config stamped with the current time
    pub fn new(desired_size: usize) -> Self {
        Self {
            desired_size,
            updated_at: Some(Utc::now()),
        }
    }

    /// Decode a config payload. Negative or non-integer sizes are rejected.
    pub fn decode(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }

    /// Encode for the administrative write path
    pub fn encode(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_size_config() {
        let config = SizeConfig::decode(br#"{"desiredSize": 10}"#).unwrap();
        assert_eq!(config.desired_size, 10);
        assert!(config.updated_at.is_none());

        let legacy = SizeConfig::decode(br#"{"cachePoolSize": 4}"#).unwrap();
        assert_eq!(legacy.desired_size, 4);
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert!(SizeConfig::decode(b"").is_err());
        assert!(SizeConfig::decode(b"not json").is_err());
        assert!(SizeConfig::decode(br#"{"desiredSize": -1}"#).is_err());
        assert!(SizeConfig::decode(br#"{"desiredSize": "ten"}"#).is_err());
        assert!(SizeConfig::decode(br#"{"size": 3}"#).is_err());
    }

    #[test]
    fn test_encode_carries_timestamp() {
        let data = SizeConfig::new(7).encode().unwrap();
        let text = std::str::from_utf8(&data).unwrap();
        assert!(text.contains("\"desiredSize\":7"));
        assert!(text.contains("updatedAt"));
        assert_eq!(SizeConfig::decode(&data).unwrap().desired_size, 7);
    }
}
