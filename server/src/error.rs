//! Service-wide error type with stable textual tags and HTTP mapping.

use axum::http::StatusCode;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Every failure the service can surface. Each variant carries a stable
/// tag (`Error::tag`) that API responses and logs key on.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("path rejected by filter: {0}")]
    FilterRejected(String),

    #[error("parse error: {0}")]
    ParseError(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("operation cancelled")]
    Cancelled,

    #[error("component unavailable: {0}")]
    Unavailable(String),

    #[error("index rebuild in progress")]
    Rebuilding,
}

impl Error {
    /// Stable machine-readable tag for this error kind.
    pub fn tag(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "not_found",
            Error::AlreadyExists(_) => "already_exists",
            Error::InvalidInput(_) => "invalid_input",
            Error::FilterRejected(_) => "filter_rejected",
            Error::ParseError(_) => "parse_error",
            Error::Io(_) => "io_error",
            Error::Cancelled => "cancelled",
            Error::Unavailable(_) => "unavailable",
            Error::Rebuilding => "rebuilding",
        }
    }

    /// HTTP status this error maps to at the API boundary.
    pub fn status(&self) -> StatusCode {
        match self {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::AlreadyExists(_) | Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            // Intentionally-disabled components read as absent resources.
            Error::Unavailable(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<git2::Error> for Error {
    fn from(e: git2::Error) -> Self {
        Error::ParseError(format!("git: {}", e.message()))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::ParseError(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_are_stable() {
        assert_eq!(Error::NotFound("x".into()).tag(), "not_found");
        assert_eq!(Error::AlreadyExists("x".into()).tag(), "already_exists");
        assert_eq!(Error::InvalidInput("x".into()).tag(), "invalid_input");
        assert_eq!(Error::FilterRejected("x".into()).tag(), "filter_rejected");
        assert_eq!(Error::ParseError("x".into()).tag(), "parse_error");
        assert_eq!(Error::Cancelled.tag(), "cancelled");
        assert_eq!(Error::Unavailable("x".into()).tag(), "unavailable");
        assert_eq!(Error::Rebuilding.tag(), "rebuilding");
    }

    #[test]
    fn test_http_mapping() {
        assert_eq!(Error::NotFound("x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(Error::AlreadyExists("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(Error::InvalidInput("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(Error::Unavailable("x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(Error::Rebuilding.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(Error::Cancelled.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
