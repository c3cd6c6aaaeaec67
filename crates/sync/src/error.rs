use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("remote store is not configured")]
    NotConfigured,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("reading local file failed: {0}")]
    LocalIo(String),
    #[error("access token rejected as expired")]
    AuthExpired,
    #[error("credential refresh failed: {0}")]
    AuthFailure(String),
    #[error("remote store unavailable: {0}")]
    RemoteUnavailable(String),
}

impl RemoteError {
    /// Whether the credential itself was refused, as opposed to the store or the file.
    pub fn is_auth(&self) -> bool {
        matches!(self, RemoteError::AuthExpired | RemoteError::AuthFailure(_))
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(e: reqwest::Error) -> Self {
        RemoteError::RemoteUnavailable(e.to_string())
    }
}
