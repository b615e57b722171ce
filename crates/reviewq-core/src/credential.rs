//! Credential hashing for queue fairness.
//!
//! Queue capacity is partitioned by the API credential a request was made
//! with. Only the SHA-256 digest is ever stored or logged.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 digest of an API credential.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialHash(String);

impl CredentialHash {
    /// Hash a plaintext credential.
    pub fn from_credential(credential: &str) -> Self {
        let digest = Sha256::digest(credential.trim().as_bytes());
        Self(hex::encode(digest))
    }

    /// Wrap an already-computed hash read back from storage.
    pub fn from_hashed(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix for log lines.
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl fmt::Display for CredentialHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CredentialHash {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_stable() {
        let a = CredentialHash::from_credential("sk-test-123");
        let b = CredentialHash::from_credential("sk-test-123");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn test_hash_never_contains_plaintext() {
        let hash = CredentialHash::from_credential("sk-secret-value");
        assert!(!hash.as_str().contains("secret"));
    }

    #[test]
    fn test_surrounding_whitespace_ignored() {
        assert_eq!(
            CredentialHash::from_credential("  key \n"),
            CredentialHash::from_credential("key")
        );
    }

    #[test]
    fn test_different_credentials_differ() {
        assert_ne!(
            CredentialHash::from_credential("key-a"),
            CredentialHash::from_credential("key-b")
        );
    }

    #[test]
    fn test_short_prefix() {
        let hash = CredentialHash::from_hashed("abc");
        assert_eq!(hash.short(), "abc");
        let full = CredentialHash::from_credential("x");
        assert_eq!(full.short().len(), 12);
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let hash = CredentialHash::from_hashed("deadbeef");
        assert_eq!(serde_json::to_string(&hash).unwrap(), "\"deadbeef\"");
    }
}
