/*!
 * Error types for the node bridge
 */

use std::fmt;
use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, BridgeError>;

#[derive(Error, Debug)]
pub enum BridgeError {
    /// Invalid construction parameters
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// TLS or credential negotiation failed while starting a session
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// Credential material could not be turned into a TLS configuration
    #[error("TLS error: {0}")]
    Tls(String),

    #[error("node is not connected")]
    NotConnected,

    #[error("node is broken")]
    Broken,

    #[error("gRPC status error: {0}")]
    Status(#[from] tonic::Status),

    #[error("gRPC transport error: {0}")]
    GrpcTransport(#[from] tonic::transport::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected HTTP status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("Failed to decode response: {0}")]
    Decode(#[from] prost::DecodeError),

    /// Failure inside a background task; never returned to callers
    #[error("Stream error: {0}")]
    Stream(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl BridgeError {
    /// Map a rejected session-start call to the right error class
    pub(crate) fn from_start_status(status: tonic::Status) -> Self {
        BridgeError::Status(status).into_start_error()
    }

    /// Reclassify a failed session start: unreachable node or refused
    /// credential become `Handshake`
    pub(crate) fn into_start_error(self) -> Self {
        use tonic::Code::*;
        match self {
            BridgeError::Status(status)
                if matches!(status.code(), Unavailable | Unauthenticated | PermissionDenied) =>
            {
                BridgeError::Handshake(status.to_string())
            }
            BridgeError::Http(err) if err.is_connect() => BridgeError::Handshake(err.to_string()),
            BridgeError::UnexpectedStatus { status, body } if matches!(status, 401 | 403) => {
                BridgeError::Handshake(format!("node refused credential ({}): {}", status, body))
            }
            other => other,
        }
    }

    /// Get error category for logging and recovery decisions
    pub fn category(&self) -> ErrorCategory {
        match self {
            BridgeError::Configuration(_) => ErrorCategory::Configuration,
            BridgeError::Handshake(_) | BridgeError::Tls(_) => ErrorCategory::Handshake,
            BridgeError::NotConnected | BridgeError::Broken => ErrorCategory::ConnectionState,
            BridgeError::Stream(_) => ErrorCategory::Stream,
            BridgeError::Status(_)
            | BridgeError::GrpcTransport(_)
            | BridgeError::Http(_)
            | BridgeError::UnexpectedStatus { .. }
            | BridgeError::Decode(_)
            | BridgeError::Io(_) => ErrorCategory::Transport,
        }
    }

    /// The call was refused because of the current connection state
    pub fn is_connection_state(&self) -> bool {
        self.category() == ErrorCategory::ConnectionState
    }

    /// Check if this error is fatal (retrying the same call will not help)
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BridgeError::Configuration(_) | BridgeError::Tls(_) | BridgeError::Handshake(_)
        )
    }

    /// Check if this error is transient (temporary, worth retrying)
    pub fn is_transient(&self) -> bool {
        match self {
            BridgeError::Status(status) => matches!(
                status.code(),
                tonic::Code::Unavailable
                    | tonic::Code::DeadlineExceeded
                    | tonic::Code::Aborted
                    | tonic::Code::ResourceExhausted
            ),
            BridgeError::GrpcTransport(_) => true,
            BridgeError::Http(err) => err.is_timeout() || err.is_connect() || err.is_request(),
            BridgeError::UnexpectedStatus { status, .. } => *status >= 500,
            BridgeError::Io(_) | BridgeError::Stream(_) => true,
            BridgeError::NotConnected | BridgeError::Broken => true,
            _ => false,
        }
    }

    /// The node no longer recognises our session or credential
    pub fn invalidates_session(&self) -> bool {
        match self {
            BridgeError::Status(status) => matches!(
                status.code(),
                tonic::Code::Unauthenticated
                    | tonic::Code::PermissionDenied
                    | tonic::Code::FailedPrecondition
            ),
            BridgeError::UnexpectedStatus { status, .. } => matches!(status, 401 | 403),
            BridgeError::Http(err) => matches!(err.status().map(|s| s.as_u16()), Some(401 | 403)),
            _ => false,
        }
    }
}

/// Error category for classification and reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Invalid construction parameters
    Configuration,
    /// TLS/credential negotiation
    Handshake,
    /// Operation refused because of the connection state
    ConnectionState,
    /// Network failure of a synchronous call
    Transport,
    /// Background task failure
    Stream,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Configuration => write!(f, "configuration"),
            ErrorCategory::Handshake => write!(f, "handshake"),
            ErrorCategory::ConnectionState => write!(f, "connection_state"),
            ErrorCategory::Transport => write!(f, "transport"),
            ErrorCategory::Stream => write!(f, "stream"),
        }
    }
}
