//! Channel source error types.

use channel_protocol_types::{error_codes, ErrorInfo};
use thiserror::Error;

/// Channel source error type.
#[derive(Error, Debug)]
pub enum SourceError {
    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error reported by the peer that proxied the request
    #[error("Remote error: {0}")]
    Remote(ErrorInfo),

    /// A listener vetoed the operation with explicit error information
    #[error("Rejected: {0}")]
    Rejected(ErrorInfo),

    /// A listener failed
    #[error("Listener failed: {0}")]
    Listener(String),

    /// Local store failure
    #[error("Store error: {0}")]
    Store(String),

    /// Record or resource not found in the local store
    #[error("Not found: {0}")]
    NotFound(String),

    /// Conflicting write against the local store
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A request with this ID is already awaiting a reply
    #[error("Duplicate request ID: {0}")]
    DuplicateRequest(String),

    /// No reply arrived within the configured request timeout
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Protocol misuse (e.g. a query kind used for a write)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The source has not been activated
    #[error("Channel source not activated")]
    NotActivated,

    /// Channel closed
    #[error("Channel closed")]
    ChannelClosed,
}

impl SourceError {
    /// Convenience constructor for listener failures.
    pub fn listener(message: impl Into<String>) -> Self {
        SourceError::Listener(message.into())
    }

    /// Convert into the error value carried by an `error` reply.
    ///
    /// Remote and rejected errors pass through untouched so an error keeps its
    /// original code when it is relayed.
    pub fn to_error_info(&self) -> ErrorInfo {
        match self {
            SourceError::Remote(info) | SourceError::Rejected(info) => info.clone(),
            SourceError::Listener(message) => {
                ErrorInfo::new(error_codes::LISTENER_FAILED, message)
            }
            SourceError::Store(message) => ErrorInfo::new(error_codes::STORE_FAILED, message),
            SourceError::NotFound(message) => ErrorInfo::new(error_codes::NOT_FOUND, message),
            SourceError::Conflict(message) => ErrorInfo::new(error_codes::CONFLICT, message),
            SourceError::Json(e) => ErrorInfo::new(error_codes::PARSE_ERROR, &e.to_string()),
            SourceError::Protocol(message) => {
                ErrorInfo::new(error_codes::INVALID_REQUEST, message)
            }
            other => ErrorInfo::new(error_codes::INTERNAL_ERROR, &other.to_string()),
        }
    }
}

/// Result type alias using SourceError.
pub type SourceResult<T> = Result<T, SourceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listener_message_is_carried_verbatim() {
        let info = SourceError::listener("ValidationFailed").to_error_info();
        assert_eq!(info.code, error_codes::LISTENER_FAILED);
        assert_eq!(info.message, "ValidationFailed");
    }

    #[test]
    fn remote_error_keeps_original_code() {
        let original = ErrorInfo::new(error_codes::CONFLICT, "record exists");
        let info = SourceError::Remote(original.clone()).to_error_info();
        assert_eq!(info, original);
    }

    #[test]
    fn remote_error_display_mentions_message() {
        let err = SourceError::Remote(ErrorInfo::new(error_codes::LISTENER_FAILED, "ValidationFailed"));
        assert!(err.to_string().contains("ValidationFailed"));
    }

    #[test]
    fn lifecycle_errors_map_to_internal() {
        assert_eq!(
            SourceError::ChannelClosed.to_error_info().code,
            error_codes::INTERNAL_ERROR
        );
        assert_eq!(
            SourceError::Timeout("q1".into()).to_error_info().code,
            error_codes::INTERNAL_ERROR
        );
    }
}
