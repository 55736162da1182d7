use sha2::{Digest, Sha256};
use std::fmt::Write as _;

use crate::error::{EngineError, EngineResult};
use crate::types::JobId;

/// Derives a deterministic job identity from a caller-supplied idempotency
/// key: `id = hex(sha256(key))`. Identical keys always yield identical ids,
/// which is the basis for broker-side deduplication.
pub struct IdempotencyResolver;

impl IdempotencyResolver {
    /// Resolve an idempotency key into a job id.
    ///
    /// Rejects empty/whitespace-only keys, and keys that already match the
    /// job-id format (64 hex characters) - a caller passing one of those is
    /// almost certainly feeding back a previously returned job id instead of
    /// the semantic key.
    pub fn resolve(key: &str) -> EngineResult<JobId> {
        if key.trim().is_empty() {
            return Err(EngineError::InvalidKey(
                "key must not be empty or whitespace-only".to_string(),
            ));
        }
        if looks_like_job_id(key) {
            return Err(EngineError::InvalidKey(
                "key matches the job-id format (64 hex characters); \
                 pass the original semantic key, not a returned job id"
                    .to_string(),
            ));
        }

        let digest = Sha256::digest(key.as_bytes());
        let mut hex = String::with_capacity(64);
        for byte in digest {
            // Writing to a String cannot fail
            let _ = write!(hex, "{byte:02x}");
        }
        Ok(JobId::from(hex))
    }
}

fn looks_like_job_id(key: &str) -> bool {
    key.len() == 64 && key.chars().all(|c| c.is_ascii_hexdigit())
}
