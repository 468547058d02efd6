use thiserror::Error;

/// Failures surfaced by the engine's request paths.  Nothing in the event
/// loop returns these; they only reach callers of the facade.
#[derive(Debug, Error)]
pub enum Error {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("invalid backend url: {0}")]
    InvalidUrl(String),

    #[error("backend returned status {0}")]
    Status(reqwest::StatusCode),

    /// The backend answered but refused the request; the message is shown
    /// to the user verbatim.
    #[error("{0}")]
    Rejected(String),

    /// Caller-side precondition not met; nothing was sent.
    #[error("{0}")]
    Precondition(&'static str),

    #[error("notification engine is not running")]
    Closed,
}

pub type Result<T> = std::result::Result<T, Error>;
