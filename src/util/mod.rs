//! Utility modules: timeout, credential redaction.

pub mod redact;
pub mod timeout;
