//! Content-addressed cache key generation.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Deterministic key for one (operation, input content, parameters) triple.
///
/// Keys never collide for semantically different inputs: the digest covers
/// the SHA-256 of the primary input plus the exact parameter tuple, and the
/// operation name is kept as a visible prefix so operators can invalidate by
/// operation class.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    /// Full key as stored in the backend, `{operation}:{digest}`.
    pub full: String,
    pub operation: String,
}

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.full
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.full)
    }
}

/// Key generator.
///
/// Correctness depends entirely on the caller supplying *every* parameter
/// that affects the operation's output; the generator enforces no semantic
/// knowledge of the wrapped operation.
pub struct CacheKeyGenerator {
    salt: Option<String>,
}

impl CacheKeyGenerator {
    pub fn new() -> Self {
        Self { salt: None }
    }

    /// Namespace keys, e.g. per deployment, to avoid cross-environment hits
    /// on a shared backend.
    pub fn with_salt(mut self, salt: impl Into<String>) -> Self {
        self.salt = Some(salt.into());
        self
    }

    pub fn generate(
        &self,
        operation: &str,
        input: &[u8],
        params: &BTreeMap<String, String>,
    ) -> CacheKey {
        let content_hash = Sha256::digest(input);

        let mut hasher = Sha256::new();
        hasher.update(operation.as_bytes());
        hasher.update([0u8]);
        hasher.update(content_hash);
        // BTreeMap iteration is ordered, so the parameter tuple is canonical.
        for (k, v) in params {
            hasher.update([0u8]);
            hasher.update(k.as_bytes());
            hasher.update([b'=']);
            hasher.update(v.as_bytes());
        }
        if let Some(ref salt) = self.salt {
            hasher.update([0u8]);
            hasher.update(salt.as_bytes());
        }

        let digest: String = hasher.finalize().iter().map(|b| format!("{:02x}", b)).collect();
        CacheKey { full: format!("{}:{}", operation, digest), operation: operation.to_string() }
    }
}

impl Default for CacheKeyGenerator {
    fn default() -> Self {
        Self::new()
    }
}
