use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Unified error type for the Portal proxy
#[derive(Error, Debug)]
pub enum PortalError {
    // Input errors
    #[error("Missing url")]
    MissingUrl,

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    // Transport errors
    #[error("Fetch failed: {0}")]
    Transport(String),

    #[error("Fetch timed out")]
    Timeout,

    #[error("Request timed out")]
    RequestTimeout,

    // Headless browser errors
    #[error("Browser unavailable: {0}")]
    BrowserUnavailable(String),

    #[error("Render failed: {0}")]
    Render(String),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for Portal operations
pub type Result<T> = std::result::Result<T, PortalError>;

impl PortalError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            PortalError::MissingUrl => StatusCode::BAD_REQUEST,

            // 504 Gateway Timeout
            PortalError::RequestTimeout => StatusCode::GATEWAY_TIMEOUT,

            // 500 Internal Server Error
            PortalError::InvalidUrl(_)
            | PortalError::Transport(_)
            | PortalError::Timeout
            | PortalError::BrowserUnavailable(_)
            | PortalError::Render(_)
            | PortalError::InvalidConfig(_)
            | PortalError::Io(_)
            | PortalError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Check if this is a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Check if this is a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Build a plain-text response whose server-side messages carry `prefix`
    ///
    /// Client errors are returned verbatim; server errors read `"{prefix}: {error}"`.
    pub fn into_prefixed_response(self, prefix: &str) -> Response {
        let status = self.status_code();
        let body = if status.is_server_error() {
            format!("{}: {}", prefix, self)
        } else {
            self.to_string()
        };

        plain_text(status, body)
    }
}

// Implement IntoResponse for plain-text error responses
impl IntoResponse for PortalError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        plain_text(status, self.to_string())
    }
}

fn plain_text(status: StatusCode, body: String) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    )
        .into_response()
}

// Convert from reqwest errors
impl From<reqwest::Error> for PortalError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            PortalError::Timeout
        } else if err.is_builder() {
            PortalError::InvalidUrl(err.to_string())
        } else {
            PortalError::Transport(err.to_string())
        }
    }
}

// Convert from URL parse errors
impl From<url::ParseError> for PortalError {
    fn from(err: url::ParseError) -> Self {
        PortalError::InvalidUrl(err.to_string())
    }
}
