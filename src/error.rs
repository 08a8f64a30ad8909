use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    /// The cursor could not construct its scan. Fatal, never retried.
    #[error("Error while constructing an enumerator: {reason}")]
    Initialization { reason: String },

    /// A window request failed mid-scan. Fatal, never retried.
    #[error("Window {window_index} fetch failed at offset {offset}: {reason}")]
    WindowFetch {
        window_index: u64,
        offset: u64,
        reason: String,
    },

    #[error("Failed to resolve deferred reference: {0}")]
    ReferenceResolution(String),

    #[error("No schema registered for entity type {entity_type}")]
    UnknownEntityType { entity_type: String },

    /// A change item does not match its schema. Deterministic, so retrying
    /// the same batch reproduces it.
    #[error("Serialization error for {entity_type}: {reason}")]
    Serialization { entity_type: String, reason: String },

    #[error("Transport rejected send: {reason}")]
    TransportSend { reason: String },

    #[error("Can't publish batch after {attempts} attempts: {last}")]
    RetryExhausted { attempts: u32, last: Box<Error> },

    #[error("Transport is not connected")]
    NotConnected,

    #[error("Transport connect failed: {0}")]
    Connect(String),

    #[error("Invalid operation: {reason}")]
    InvalidOperation { reason: String },
}

impl Error {
    pub fn error_code(&self) -> i32 {
        match self {
            Error::Io(_) => -1,
            Error::Json(_) => -2,
            Error::Config(_) => -3,
            Error::Initialization { .. } => -10,
            Error::WindowFetch { .. } => -11,
            Error::ReferenceResolution(_) => -12,
            Error::UnknownEntityType { .. } => -20,
            Error::Serialization { .. } => -21,
            Error::TransportSend { .. } => -30,
            Error::RetryExhausted { .. } => -31,
            Error::NotConnected => -32,
            Error::Connect(_) => -33,
            Error::InvalidOperation { .. } => -40,
        }
    }

    /// Whether repeating the failed operation can succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::TransportSend { .. } | Error::Connect(_))
    }

    /// Errors that end an enumeration.
    pub fn is_cursor_fatal(&self) -> bool {
        matches!(
            self,
            Error::Initialization { .. } | Error::WindowFetch { .. }
        )
    }

    /// The innermost cause for wrapped errors.
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::RetryExhausted { last, .. } => last.root_cause(),
            other => other,
        }
    }
}
