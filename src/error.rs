//! Error types for irods-ops operations.
//!
//! Every failure carries one of four kinds so callers branch on the kind rather
//! than on message text.

use std::fmt;

use thiserror::Error;

/// Closed classification of a single-shot failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing or malformed arguments, detected before any resource is touched.
    Argument,
    /// The external system could not be reached or rejected credentials.
    Connection,
    /// The external system reported a domain-level error for the request.
    Operation,
    /// Anything else, including panics caught at the runner boundary.
    Unexpected,
}

impl ErrorKind {
    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::Argument => "ArgumentError",
            ErrorKind::Connection => "ConnectionError",
            ErrorKind::Operation => "OperationError",
            ErrorKind::Unexpected => "UnexpectedError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Main error type for irods-ops operations
#[derive(Error, Debug)]
pub enum OpsError {
    /// Too few positional arguments; carries the usage text and the missing field names
    #[error("{usage} (missing: {})", missing.join(", "))]
    MissingArguments { usage: String, missing: Vec<String> },

    /// An argument failed its format check
    #[error("invalid value for '{0}': {1}")]
    InvalidArgument(String, String),

    /// Invalid configuration for a named section
    #[error("invalid config for '{0}': {1}")]
    InvalidConfig(String, String),

    /// Could not acquire the external resource
    #[error("connection to {0} failed: {1}")]
    Connection(String, String),

    /// Acquisition did not finish within the fixed timeout
    #[error("connection to {0} timed out after {1}s")]
    ConnectTimeout(String, u64),

    /// The external system rejected the request
    #[error("{0}")]
    Operation(String),

    /// HTTP request answered with a non-2xx status
    #[error("HTTP {status} from {url}: {body}")]
    HttpStatus {
        status: u16,
        url: String,
        body: String,
    },

    /// Entries that did not reach the desired state after a verified write
    #[error("{action}, {}", entries.join(", "))]
    Unverified { action: String, entries: Vec<String> },

    /// Local file I/O failure
    #[error("I/O error on {0}: {1}")]
    Io(String, String),

    /// Unclassified fault, including a panic inside an operation
    #[error("unexpected failure: {0}")]
    Unexpected(String),
}

impl OpsError {
    /// The closed kind this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            OpsError::MissingArguments { .. }
            | OpsError::InvalidArgument(..)
            | OpsError::InvalidConfig(..) => ErrorKind::Argument,
            OpsError::Connection(..) | OpsError::ConnectTimeout(..) => ErrorKind::Connection,
            OpsError::Operation(_)
            | OpsError::HttpStatus { .. }
            | OpsError::Unverified { .. }
            | OpsError::Io(..) => ErrorKind::Operation,
            OpsError::Unexpected(_) => ErrorKind::Unexpected,
        }
    }
}

/// Result type alias for irods-ops operations
pub type Result<T> = std::result::Result<T, OpsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_arguments_display() {
        let err = OpsError::MissingArguments {
            usage: "usage: send-mail FROM TO SUBJECT BODY".to_string(),
            missing: vec!["SUBJECT".to_string(), "BODY".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "usage: send-mail FROM TO SUBJECT BODY (missing: SUBJECT, BODY)"
        );
        assert_eq!(err.kind(), ErrorKind::Argument);
    }

    #[test]
    fn test_http_status_display() {
        let err = OpsError::HttpStatus {
            status: 404,
            url: "https://bisque/blob_service/paths/list".to_string(),
            body: "not found".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "HTTP 404 from https://bisque/blob_service/paths/list: not found"
        );
        assert_eq!(err.kind(), ErrorKind::Operation);
    }

    #[test]
    fn test_unverified_display() {
        let err = OpsError::Unverified {
            action: "users disappear after creation".to_string(),
            entries: vec!["alice".to_string(), "bob".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "users disappear after creation, alice, bob"
        );
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(ErrorKind::Argument.name(), "ArgumentError");
        assert_eq!(
            OpsError::ConnectTimeout("amqp://localhost".to_string(), 10).kind(),
            ErrorKind::Connection
        );
        assert_eq!(
            OpsError::Unexpected("boom".to_string()).kind().to_string(),
            "UnexpectedError"
        );
    }
}
