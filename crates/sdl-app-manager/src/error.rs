//! Core error taxonomy.
//!
//! Errors are kinds, not exceptions: every component boundary returns
//! `Result<T, CoreError>` and nothing panics on malformed external
//! input. Timer and worker tasks catch and log at the boundary rather
//! than letting an error escape the spawned task.

use crate::ids::{ConnectionKey, CorrelationId};

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    // ── Invalid input ──
    #[error("invalid request data: {0}")]
    InvalidData(String),

    #[error("unknown correlation id {correlation_id} on connection {connection_key}")]
    UnknownCorrelation {
        connection_key: ConnectionKey,
        correlation_id: CorrelationId,
    },

    // ── Rate limiting ──
    #[error("too many requests for this app in the current time window")]
    TooManyRequests,

    #[error("too many requests while app hmi_level is NONE")]
    NoneHmiLevelManyRequests,

    #[error("too many pending requests across all applications")]
    TooManyPendingRequests,

    // ── Lookup failures ──
    #[error("application {0} not found")]
    AppNotFound(ConnectionKey),

    #[error("request {correlation_id} not found on connection {connection_key}")]
    RequestNotFound {
        connection_key: ConnectionKey,
        correlation_id: CorrelationId,
    },

    #[error("no regular state on application state stack")]
    StackEmpty,

    // ── Timeout ──
    #[error("request {correlation_id} on connection {connection_key} timed out")]
    Timeout {
        connection_key: ConnectionKey,
        correlation_id: CorrelationId,
    },

    // ── Policy ──
    #[error("policy engine denied this request")]
    PolicyDenied,

    #[error("device consent not yet requested")]
    ConsentNotRequested,

    // ── Resumption ──
    #[error("resumption record failed structural validation: {0}")]
    ResumptionDataCorrupt(String),

    #[error("persisted record could not be decoded: {0}")]
    ResumptionDecode(#[from] serde_json::Error),

    #[error("resumption storage I/O failure: {0}")]
    ResumptionIo(#[from] std::io::Error),

    // ── Fatal / internal consistency ──
    #[error("internal consistency error: {0}")]
    Fatal(String),
}

impl CoreError {
    /// True for the three rate-limit variants the request controller's
    /// gate produces; useful at the boundary where these must be
    /// surfaced to mobile verbatim rather than logged as failures.
    #[must_use]
    pub fn is_rate_limited(&self) -> bool {
        matches!(
            self,
            Self::TooManyRequests | Self::NoneHmiLevelManyRequests | Self::TooManyPendingRequests
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_variants_are_classified() {
        assert!(CoreError::TooManyRequests.is_rate_limited());
        assert!(CoreError::NoneHmiLevelManyRequests.is_rate_limited());
        assert!(CoreError::TooManyPendingRequests.is_rate_limited());
        assert!(!CoreError::PolicyDenied.is_rate_limited());
    }
}
