//! Error types for the assistant pipeline

use thiserror::Error;

use crate::executor::DomError;
use crate::phase::Phase;

/// Result type alias for library operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised across the pipeline.
///
/// Most of these never reach the user: the orchestrator turns upstream
/// failures into a fallback reply and the dispatcher logs action failures.
#[derive(Debug, Error)]
pub enum Error {
    /// The completion service answered with a non-success status
    #[error("upstream error ({status}): {message}")]
    Upstream { status: u16, message: String },

    /// The completion service answered with a body we could not use
    #[error("malformed upstream response: {0}")]
    MalformedResponse(String),

    /// An action could not be carried out
    #[error("action failed: {0}")]
    Action(String),

    /// A turn is already being processed for this session
    #[error("a request is already being processed")]
    Busy,

    /// The session was asked to move between phases it cannot connect
    #[error("cannot {trigger} while {from:?}")]
    InvalidTransition { from: Phase, trigger: &'static str },

    /// Speech synthesis failure
    #[error("speech error: {0}")]
    Speech(String),

    /// Page automation failure
    #[error("dom error: {0}")]
    Dom(#[from] DomError),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
