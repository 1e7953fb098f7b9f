//! Error types for a3s-relay

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Malformed body, empty message list, or a non-streaming request in a
    /// streaming-only deployment
    #[error("{0}")]
    InvalidRequest(String),

    #[error("Unknown model: {0}")]
    UnknownModel(String),

    #[error("Invalid role: {0}")]
    InvalidRole(String),

    #[error("Unsupported conversation shape: {0}")]
    UnsupportedConversationShape(String),

    /// Backend invocation failure, carrying the backend's own message
    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

pub type Result<T> = std::result::Result<T, RelayError>;

impl RelayError {
    /// HTTP status a client sees when this error ends a request.
    pub fn status(&self) -> StatusCode {
        match self {
            RelayError::InvalidRequest(_)
            | RelayError::UnknownModel(_)
            | RelayError::InvalidRole(_)
            | RelayError::UnsupportedConversationShape(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(err: reqwest::Error) -> Self {
        RelayError::Backend(err.to_string())
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = serde_json::json!({ "detail": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}
