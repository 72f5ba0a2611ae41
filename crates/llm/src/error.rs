//! Generator error taxonomy.

/// Errors the external generator can fail with.
///
/// The split drives the retry policy: transient failures are retried with
/// backoff, fatal ones are surfaced immediately.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerateError {
    /// Rate limits, timeouts, connection resets, 5xx responses.
    #[error("transient generator error: {0}")]
    Transient(String),

    /// Quota exhaustion, policy refusal, bad credentials.
    #[error("fatal generator error: {0}")]
    Fatal(String),
}
