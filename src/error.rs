//! Error types for the pharmacy agent service.

use std::time::Duration;

use crate::agent::Field;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Record service error: {0}")]
    Record(#[from] RecordError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Routing error: {0}")]
    Route(#[from] RouteError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),
}

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to read fixtures from {path}: {reason}")]
    Fixtures { path: String, reason: String },
}

/// A single failed attempt against the record service.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Transport failure: {reason}")]
    Transport { reason: String },

    #[error("Server error {status}: {body}")]
    Server { status: u16, body: String },

    #[error("Request rejected with {status}: {body}")]
    Client { status: u16, body: String },

    #[error("Invalid response body: {reason}")]
    Decode { reason: String },
}

impl RecordError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            RecordError::Timeout(_) | RecordError::Transport { .. } => true,
            RecordError::Server { .. } => true,
            // 429 is the one client-class status worth waiting out.
            RecordError::Client { status, .. } => *status == 429,
            RecordError::Decode { .. } => false,
        }
    }
}

/// Outcome of a cached lookup that could not produce a record or a
/// not-found marker. Cloned to every caller waiting on the same fetch.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    #[error("Record service unavailable for {key} after {attempts} attempt(s): {reason}")]
    Upstream {
        key: String,
        attempts: u32,
        reason: String,
    },

    #[error("Record service rejected lookup for {key}: {reason}")]
    Rejected { key: String, reason: String },

    #[error("Lookup for {key} was cancelled")]
    Cancelled { key: String },
}

/// Malformed or out-of-order client messages. Never fatal to the connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Invalid message format: {0}")]
    Malformed(String),

    #[error("Message is missing a 'type' field")]
    MissingType,

    #[error("Unknown message type '{0}'")]
    UnknownType(String),

    #[error("Please initialize the conversation with a phone number first")]
    NotInitialized,

    #[error("Session is already initialized")]
    AlreadyInitialized,

    #[error("Invalid phone number format: {0}")]
    InvalidPhone(String),

    #[error("Registration is already complete; no further messages are accepted")]
    CollectionComplete,

    #[error("Session is closing")]
    Closing,
}

/// A field value the collection agent refused to accept.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error(
        "'{value}' doesn't look like a valid email address. Please provide one like name@example.com"
    )]
    InvalidEmail { value: String },

    #[error("The {field} can't be empty")]
    Empty { field: Field },
}

impl ValidationError {
    pub fn field(&self) -> Field {
        match self {
            ValidationError::InvalidEmail { .. } => Field::Email,
            ValidationError::Empty { field } => *field,
        }
    }
}

/// Failures of the field-extraction capability.
#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("Extractor {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Extractor {provider} returned an invalid response: {reason}")]
    InvalidResponse { provider: String, reason: String },
}

/// Failures while resolving the agent for a session.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RouteError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Upstream(#[from] CacheError),
}

/// Gateway lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {name} failed to start: {reason}")]
    StartupFailed { name: String, reason: String },

    #[error("Failed to send to {name}: {reason}")]
    SendFailed { name: String, reason: String },
}

/// Result type for library operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(RecordError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(
            RecordError::Transport {
                reason: "connection refused".to_string()
            }
            .is_transient()
        );
        assert!(
            RecordError::Server {
                status: 503,
                body: String::new()
            }
            .is_transient()
        );
        assert!(
            RecordError::Client {
                status: 429,
                body: String::new()
            }
            .is_transient()
        );
        assert!(
            !RecordError::Client {
                status: 400,
                body: String::new()
            }
            .is_transient()
        );
        assert!(
            !RecordError::Decode {
                reason: "eof".to_string()
            }
            .is_transient()
        );
    }

    #[test]
    fn test_validation_error_field() {
        let err = ValidationError::InvalidEmail {
            value: "nope".to_string(),
        };
        assert_eq!(err.field(), Field::Email);
        assert!(err.to_string().contains("nope"));
    }
}
