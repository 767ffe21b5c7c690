//! Error types for incremental delivery.

/// Failures of a streaming cycle. Cancellation is not one of them; it is
/// reported through [`crate::StreamOutcome::Cancelled`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    #[error("chunk source failed: {0}")]
    Source(String),
    #[error("stream task aborted: {0}")]
    Aborted(String),
}

impl From<StreamError> for xsimple_core::XSimpleError {
    fn from(err: StreamError) -> Self {
        xsimple_core::XSimpleError::Stream(err.to_string())
    }
}
