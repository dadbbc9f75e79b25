//! The error type surfaced by a query's `error` signal (spec §4.7, §9's
//! "error signal typing" resolution: a stable message string, not a
//! structured per-fetcher error type — callers map their own fetch error
//! into this with `QueryError::new(err.to_string())`).

use thiserror::Error;

/// A fetch failure, captured into a query's error signal after retries are
/// exhausted (spec §7 taxonomy 3: "fetch/async errors inside query").
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct QueryError {
    pub message: String,
}

impl QueryError {
    /// Build a query error from any displayable value.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
