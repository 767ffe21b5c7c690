//! Error types for the conversation engine.

use xsimple_core::error::XSimpleError;
use xsimple_core::CycleId;
use xsimple_stream::StreamError;

use crate::state::ConversationPhase;

/// Errors from the conversation engine.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("query cannot be empty")]
    EmptyQuery,
    #[error("query exceeds maximum length of {0} characters")]
    QueryTooLong(usize),
    #[error("a response is still streaming (cycle {0})")]
    Busy(CycleId),
    #[error("session is closed")]
    Closed,
    #[error("cycle {0} is no longer active")]
    StaleCycle(CycleId),
    #[error("invalid conversation transition: {from} -> {to}")]
    InvalidTransition {
        from: ConversationPhase,
        to: ConversationPhase,
    },
    #[error("stream error: {0}")]
    Stream(#[from] StreamError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ChatError {
    /// Whether this error is a rejected submission. The log is left
    /// untouched by every rejection.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            ChatError::EmptyQuery
                | ChatError::QueryTooLong(_)
                | ChatError::Busy(_)
                | ChatError::Closed
        )
    }
}

impl From<XSimpleError> for ChatError {
    fn from(err: XSimpleError) -> Self {
        ChatError::Internal(err.to_string())
    }
}

impl From<ChatError> for XSimpleError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::Closed => XSimpleError::ShuttingDown,
            ChatError::Stream(e) => e.into(),
            other => XSimpleError::Conversation(other.to_string()),
        }
    }
}
