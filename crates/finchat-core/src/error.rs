use thiserror::Error;

/// Top-level error type for finchat.
///
/// Subsystem crates define their own error types and implement
/// `From<FinchatError>` so that `?` works across crate boundaries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FinchatError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("No user context established")]
    NoUserContext,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<toml::de::Error> for FinchatError {
    fn from(err: toml::de::Error) -> Self {
        FinchatError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for FinchatError {
    fn from(err: toml::ser::Error) -> Self {
        FinchatError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for FinchatError {
    fn from(err: serde_json::Error) -> Self {
        FinchatError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for finchat operations.
pub type Result<T> = std::result::Result<T, FinchatError>;
