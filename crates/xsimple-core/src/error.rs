use thiserror::Error;

/// Top-level error type for the XSimple assistant.
///
/// Subsystem crates define their own error types and convert into or out of
/// this one at crate boundaries so `?` works across them.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum XSimpleError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Streaming error: {0}")]
    Stream(String),

    #[error("Conversation error: {0}")]
    Conversation(String),

    #[error("Shutdown in progress")]
    ShuttingDown,
}

impl From<toml::de::Error> for XSimpleError {
    fn from(err: toml::de::Error) -> Self {
        XSimpleError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for XSimpleError {
    fn from(err: toml::ser::Error) -> Self {
        XSimpleError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for XSimpleError {
    fn from(err: serde_json::Error) -> Self {
        XSimpleError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for XSimple operations.
pub type Result<T> = std::result::Result<T, XSimpleError>;
