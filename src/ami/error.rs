//! Error types for manager-interface transports

use std::fmt;

/// Result type alias for transport operations
pub type AmiResult<T> = Result<T, AmiError>;

/// Errors raised by a transport
#[derive(Debug)]
pub enum AmiError {
    /// Connecting or logging in failed
    ConnectionFailed(String),

    /// The session is gone (EOF, reset, reader stopped)
    Disconnected(String),

    /// Unsubscribe for a subscription the table does not know
    UnknownSubscription(String),

    /// Malformed or unexpected protocol data
    Protocol(String),

    /// The switch answered the action with `Response: Error`
    ActionFailed(String),
}

impl fmt::Display for AmiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AmiError::ConnectionFailed(msg) => write!(f, "ami connection failed: {}", msg),
            AmiError::Disconnected(msg) => write!(f, "ami session disconnected: {}", msg),
            AmiError::UnknownSubscription(msg) => write!(f, "unknown subscription: {}", msg),
            AmiError::Protocol(msg) => write!(f, "ami protocol error: {}", msg),
            AmiError::ActionFailed(msg) => write!(f, "ami action failed: {}", msg),
        }
    }
}

impl std::error::Error for AmiError {}
