use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Main SDK error type
// ---------------------------------------------------------------------------

#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum EngageError {
    /// An error returned by the collection endpoint.
    #[error("{0}")]
    Server(Box<ServerError>),

    /// HTTP transport error.
    #[error("transport error: {0}")]
    Transport(String),

    /// Serialization / deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Builder misconfiguration.
    #[error("builder error: {0}")]
    Builder(String),
}

impl EngageError {
    /// Returns `true` if retrying the same request may succeed. A failed
    /// batch is requeued only when this holds.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngageError::Server(err) => err.retryable,
            EngageError::Transport(_) => true,
            _ => false,
        }
    }
}

impl From<ServerError> for EngageError {
    fn from(err: ServerError) -> Self {
        EngageError::Server(Box::new(err))
    }
}

#[cfg(feature = "reqwest-transport")]
impl From<reqwest::Error> for EngageError {
    fn from(err: reqwest::Error) -> Self {
        EngageError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for EngageError {
    fn from(err: serde_json::Error) -> Self {
        EngageError::Serialization(err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Server error (structured error from the collection endpoint)
// ---------------------------------------------------------------------------

#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerError {
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub retryable: bool,
    #[serde(skip)]
    pub http_status: u16,
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for ServerError {}

impl ServerError {
    /// Create a new server error.
    pub fn new(code: impl Into<String>, message: impl Into<String>, http_status: u16) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            retryable: false,
            http_status,
        }
    }

    /// Set whether this error is retryable.
    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Returns the machine-readable error code.
    pub fn code(&self) -> &str {
        &self.code
    }
}

// ---------------------------------------------------------------------------
// Wire format for parsing server error responses
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorResponse {
    pub error: ServerErrorPayload,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ServerErrorPayload {
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub retryable: bool,
}

impl ServerErrorPayload {
    pub fn into_server_error(self, http_status: u16) -> ServerError {
        ServerError {
            code: self.code,
            message: self.message,
            retryable: self.retryable,
            http_status,
        }
    }
}

/// Parse a non-success response body into an [`EngageError`].
///
/// Structured `{"error": {...}}` bodies keep their code; anything else becomes
/// an `http_<status>` error that is retryable for 429 and 5xx.
pub(crate) fn parse_error_response(body: &[u8], status_code: u16) -> EngageError {
    if let Ok(err_resp) = serde_json::from_slice::<ErrorResponse>(body) {
        return EngageError::from(err_resp.error.into_server_error(status_code));
    }

    let message = String::from_utf8_lossy(body).to_string();
    EngageError::from(ServerError {
        code: format!("http_{}", status_code),
        message: if message.is_empty() {
            format!("HTTP {}", status_code)
        } else {
            message
        },
        retryable: status_code == 429 || status_code >= 500,
        http_status: status_code,
    })
}

// ---------------------------------------------------------------------------
// Result type alias
// ---------------------------------------------------------------------------

pub type Result<T> = std::result::Result<T, EngageError>;
