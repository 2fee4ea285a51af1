//! Credential redaction for diagnostics.

use sha2::{Digest, Sha256};

/// Short, non-reversible fingerprint of a secret for log correlation.
///
/// Returns the first eight hex digits of the SHA-256 digest, so two log lines
/// can be matched to the same credential without exposing any of it.
pub fn fingerprint(secret: &str) -> String {
    let digest = Sha256::digest(secret.as_bytes());
    digest[..4].iter().map(|byte| format!("{byte:02x}")).collect()
}
