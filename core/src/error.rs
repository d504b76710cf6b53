/// Error types for conversation state aggregation
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AccordError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Network or server failure while talking to a fetch collaborator
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// A fetched record could not be read as a message
    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown conversation: {0}")]
    UnknownConversation(String),

    #[error("Unsupported bundle: {0}")]
    UnsupportedBundle(String),
}

impl AccordError {
    /// Errors that only affect a single record and must not abort a batch
    pub fn is_record_local(&self) -> bool {
        matches!(self, AccordError::MalformedRecord(_) | AccordError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, AccordError>;
