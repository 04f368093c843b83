//! Error types for the release mirror

use artifact_cache::CacheError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use std::fmt;

#[derive(Debug)]
pub enum MirrorError {
    Cache(CacheError),
    Io(Box<std::io::Error>),
    Http(axum::http::Error),
    Config(String),
}

impl fmt::Display for MirrorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MirrorError::Cache(err) => write!(f, "{}", err),
            MirrorError::Io(err) => write!(f, "IO error: {}", err),
            MirrorError::Http(err) => write!(f, "HTTP error: {}", err),
            MirrorError::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for MirrorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MirrorError::Cache(err) => Some(err),
            MirrorError::Io(err) => Some(err.as_ref()),
            MirrorError::Http(err) => Some(err),
            _ => None,
        }
    }
}

impl From<CacheError> for MirrorError {
    fn from(err: CacheError) -> Self {
        MirrorError::Cache(err)
    }
}

impl From<std::io::Error> for MirrorError {
    fn from(err: std::io::Error) -> Self {
        MirrorError::Io(Box::new(err))
    }
}

impl From<axum::http::Error> for MirrorError {
    fn from(err: axum::http::Error) -> Self {
        MirrorError::Http(err)
    }
}

impl From<tracing_subscriber::filter::ParseError> for MirrorError {
    fn from(err: tracing_subscriber::filter::ParseError) -> Self {
        MirrorError::Config(err.to_string())
    }
}

impl IntoResponse for MirrorError {
    fn into_response(self) -> Response {
        let status = match &self {
            MirrorError::Cache(CacheError::NotFound(_)) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, axum::Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub type Result<T> = std::result::Result<T, MirrorError>;
