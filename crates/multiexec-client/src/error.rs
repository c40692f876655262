//! Client errors

use thiserror::Error;

/// Errors from talking to a multiexec daemon
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Handshake or frame error on the dispatch socket
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// The base URL has no WebSocket counterpart
    #[error("no dispatch endpoint for {0}")]
    NoDispatchUrl(String),

    /// The daemon answered with a non-success status
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Connection closed: {0}")]
    ConnectionClosed(String),
}

pub type Result<T> = std::result::Result<T, ClientError>;
