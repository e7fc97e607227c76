#![forbid(unsafe_code)]

//! Error taxonomy for the download proxy and its HTTP rendering.

use axum::{
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Failures reported by an extraction backend.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The backend could not produce metadata or a stream for the URL
    /// (private, removed, region locked, unsupported...).
    #[error("{0}")]
    Unavailable(String),
    /// The backend returned something we could not understand.
    #[error("invalid extractor output: {0}")]
    Malformed(String),
    #[error("failed to run extractor: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ProxyError {
    /// Missing or malformed source URL. Never reaches the extractor.
    #[error("{0}")]
    InvalidInput(String),
    /// The extractor failed before any byte was committed to the client.
    #[error("{0}")]
    UpstreamResolution(String),
    /// The upstream failed after headers were sent.
    #[error("{0}")]
    MidStream(String),
}

impl ProxyError {
    pub fn invalid_url() -> Self {
        Self::InvalidInput("Invalid or missing YouTube URL".to_string())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::UpstreamResolution(_) | Self::MidStream(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ExtractError> for ProxyError {
    fn from(err: ExtractError) -> Self {
        Self::UpstreamResolution(err.to_string())
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            Self::InvalidInput(message) => message.clone(),
            Self::UpstreamResolution(message) | Self::MidStream(message) => {
                format!("Error downloading video: {message}")
            }
        };
        let mut response = (status, body).into_response();
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        response
    }
}

pub type ProxyResult<T> = Result<T, ProxyError>;
