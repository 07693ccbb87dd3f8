//! Cache-key hash generation.
//!
//! A cache key is an opaque uniqueness token, not a content hash: two
//! regenerations for an identical owner state still produce different keys.
//! The hash input is the owner's uniqueness token, any extra dimensions the
//! embedder appends, a nanosecond timestamp, and a process-wide monotonic
//! counter. The counter guarantees distinct keys even when two regenerations
//! land inside one timestamp tick.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};

static GENERATION: AtomicU64 = AtomicU64::new(0);

/// Extra string dimensions appended to the hash input.
///
/// Lets embedders vary keys along axes the engine does not know about
/// (a locale suffix, a rendering profile) without changing the generation
/// contract.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct KeyDimensions {
    dims: Vec<String>,
}

impl KeyDimensions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, dim: impl Into<String>) -> Self {
        self.dims.push(dim.into());
        self
    }

    pub fn push(&mut self, dim: impl Into<String>) {
        self.dims.push(dim.into());
    }

    pub fn is_empty(&self) -> bool {
        self.dims.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.dims.iter().map(String::as_str)
    }
}

/// Generate a fresh cache-key hash for the given uniqueness token.
///
/// Every call returns a new hash, even for identical inputs.
pub fn generate_key_hash(token: &str, dimensions: &KeyDimensions) -> String {
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let generation = GENERATION.fetch_add(1, Ordering::Relaxed);

    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.update([0u8]);
    for dim in dimensions.iter() {
        hasher.update(dim.as_bytes());
        hasher.update([0u8]);
    }
    hasher.update(nanos.to_le_bytes());
    hasher.update(generation.to_le_bytes());
    hex::encode(hasher.finalize())
}

// =============================================================================
// TESTS
// =============================================================================
