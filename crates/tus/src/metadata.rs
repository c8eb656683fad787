//! `Upload-Metadata` header encoding.
//!
//! The header is a comma-separated list of `key base64(value)` pairs.
//! Keys must be non-empty and contain neither spaces nor commas.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// Ordered key/value metadata attached to a new upload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadMetadata {
    pairs: Vec<(String, String)>,
}

impl UploadMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a pair. Invalid keys are dropped with a warning.
    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        if is_valid_key(key) {
            self.pairs.push((key.to_string(), value.into()));
        } else {
            tracing::warn!(key, "Dropping invalid tus metadata key");
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Render the `Upload-Metadata` header value.
    pub fn to_header_value(&self) -> String {
        self.pairs
            .iter()
            .map(|(key, value)| format!("{key} {}", STANDARD.encode(value)))
            .collect::<Vec<_>>()
            .join(",")
    }
}

fn is_valid_key(key: &str) -> bool {
    !key.is_empty() && key.is_ascii() && !key.contains(|c: char| c == ' ' || c == ',')
}
