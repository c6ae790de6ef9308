//! Error taxonomy for the ingest session.

/// Errors raised by [`crate::IngestSession`] operations.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Login returned a non-200 status; the session is unusable.
    #[error("authentication failed: {status} {body}")]
    AuthFailed { status: u16, body: String },

    /// A non-200 response from an entity operation. The operation is
    /// logged at ERROR and returns a null result rather than retrying.
    #[error("request to {path} failed: {status}")]
    Http { path: String, status: u16 },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("malformed response from {path}: {reason}")]
    MalformedResponse { path: String, reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
}

pub type Result<T> = std::result::Result<T, IngestError>;
