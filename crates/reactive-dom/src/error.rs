//! Structured error types for the template engine and component shell.

use thiserror::Error;

/// Result type alias for DOM operations.
pub type Result<T> = std::result::Result<T, DomError>;

/// Errors surfaced by the template engine and component shell.
#[derive(Error, Debug, Clone)]
pub enum DomError {
    /// A slot index referenced by the parsed template has no corresponding
    /// value in the slots passed to `html()`. The structural parser tracks
    /// slot positions by index rather than an embedded marker string, so
    /// this indicates the parts array and the slots vec disagree — a
    /// framework bug, not a caller error.
    #[error("template marker for slot {0} not found while mounting")]
    MarkerNotFound(usize),

    /// A component tag was registered twice.
    #[error("component <{0}> is already registered")]
    DuplicateComponent(String),

    /// A factory referenced a tag with no registered `ComponentDef`.
    #[error("no component registered for tag <{0}>")]
    UnknownComponent(String),

    /// Attempted to mount an already-mounted template result, or unmount one
    /// never mounted.
    #[error("template result double-{0}")]
    DoubleLifecycle(&'static str),
}
