//! Errors from the remote backend layer.

/// Errors from the remote generation service client.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The backend returned a non-2xx status code.
    #[error("backend error ({status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The backend rejected the session (401/403 class).
    #[error("backend rejected the session as unauthenticated")]
    Unauthorized,

    /// A submission was accepted but the response carried no job id.
    #[error("backend response carried no job id: {0}")]
    MissingJobId(String),
}

impl BackendError {
    /// Whether this error means the session is no longer authenticated.
    ///
    /// Auth errors halt the affected loop and notify the session
    /// collaborator instead of failing the task.
    pub fn is_auth(&self) -> bool {
        matches!(self, BackendError::Unauthorized)
    }
}
