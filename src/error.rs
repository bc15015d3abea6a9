use thiserror::Error;

/// Failure taxonomy of a listing run. None of these are recovered locally.
#[derive(Debug, Error)]
pub enum IngestError {
    /// `credentials.json` missing or invalid, or a forbidden scope requested.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Interactive grant abandoned/timed out, or the refresh token was rejected.
    #[error("authentication error: {0}")]
    Authentication(String),

    /// A provider call failed after the retry policy was exhausted.
    #[error("remote request failed: {0}")]
    RemoteRequest(String),

    /// The token file could not be written.
    #[error("persistence error: {0}")]
    Persistence(String),
}

pub type Result<T> = std::result::Result<T, IngestError>;

impl IngestError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn authentication(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    pub fn remote(msg: impl Into<String>) -> Self {
        Self::RemoteRequest(msg.into())
    }

    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }
}
