//! Error types for correlated queries

use std::fmt;
use std::time::Duration;

use crate::ami::AmiError;

/// Result type alias for query operations
pub type QueryResult<T> = Result<T, QueryError>;

/// Errors a logical query can end with
///
/// None of them is fatal: the scheduler logs the error and exports the
/// affected metric family as unknown for the tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// Sending the action failed or the session is gone
    Transport(String),

    /// The terminal signal did not arrive within the budget
    Timeout { query: String, after: Duration },

    /// The switch answered with text we cannot read
    Parse(String),

    /// Another query holds the correlator
    Busy(String),
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryError::Transport(msg) => write!(f, "transport error: {}", msg),
            QueryError::Timeout { query, after } => {
                write!(f, "query {} timed out after {:?}", query, after)
            }
            QueryError::Parse(msg) => write!(f, "parse error: {}", msg),
            QueryError::Busy(msg) => write!(f, "correlator busy: {}", msg),
        }
    }
}

impl std::error::Error for QueryError {}

impl From<AmiError> for QueryError {
    fn from(err: AmiError) -> Self {
        QueryError::Transport(err.to_string())
    }
}
