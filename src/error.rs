//! Error taxonomy for the data layer.
//!
//! `DataError` is the crate-wide error: every subsystem error converts into
//! it. `ApiError` is the shape handed to the transport boundary, and
//! `ResponseError` wraps a non-success response coming back from it.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::property::PropertyError;
use crate::storage::StoreError;
use crate::validation::ValidationError;

/// Result type for data-layer operations
pub type DataResult<T> = Result<T, DataError>;

/// Data-layer error
#[derive(Debug, Clone, Error)]
pub enum DataError {
    /// One or more properties or validators rejected the data
    #[error("{0}")]
    Validation(#[from] ValidationError),

    /// A value could not be serialized for a property
    #[error("{0}")]
    Property(#[from] PropertyError),

    /// The document store rejected the call
    #[error("{0}")]
    Store(#[from] StoreError),

    /// The declarative query is malformed
    #[error("Invalid query: {0}")]
    Query(String),

    /// Referenced model or property is missing or of the wrong type
    #[error("Schema misconfiguration: {0}")]
    Schema(String),

    /// No model registered under the slug
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// No document matched a single-document operation
    #[error("Not found: {0}")]
    NotFound(String),

    /// The session manager was already ended
    #[error("Session already ended")]
    SessionEnded,

    /// A hook aborted the attempt
    #[error("Operation aborted: {0}")]
    Aborted(String),

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(String),

    /// Cache payload could not be encoded or decoded
    #[error("Cache error: {0}")]
    Cache(String),

    /// Internal invariant failure
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DataError {
    /// Create a query error
    pub fn query(msg: impl Into<String>) -> Self {
        Self::Query(msg.into())
    }

    /// Create a schema error
    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether the whole attempt can be replayed on a fresh session.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Get error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_FAILED",
            Self::Property(_) => "INVALID_PROPERTY_VALUE",
            Self::Store(e) => e.code(),
            Self::Query(_) => "INVALID_QUERY",
            Self::Schema(_) => "SCHEMA_MISCONFIGURED",
            Self::ModelNotFound(_) => "MODEL_NOT_FOUND",
            Self::NotFound(_) => "NOT_FOUND",
            Self::SessionEnded => "SESSION_ENDED",
            Self::Aborted(_) => "ABORTED",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Cache(_) => "CACHE_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Get HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) | Self::Property(_) | Self::Query(_) => 400,
            Self::ModelNotFound(_) | Self::NotFound(_) => 404,
            Self::Store(StoreError::DuplicateKey(_)) => 409,
            Self::Store(e) if e.is_retryable() => 503,
            Self::Store(StoreError::InvalidFilter(_))
            | Self::Store(StoreError::InvalidUpdate(_)) => 400,
            _ => 500,
        }
    }
}

impl From<serde_json::Error> for DataError {
    fn from(e: serde_json::Error) -> Self {
        Self::Query(e.to_string())
    }
}

/// Error handed to the transport boundary: status, app identity and body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("[{status}] {code}: {message}")]
pub struct ApiError {
    /// HTTP status code
    pub status: u16,
    /// Identity of the application that produced the error
    pub app: String,
    /// Stable error code
    pub code: String,
    /// Human-readable message
    pub message: String,
    /// Structured detail (the validation aggregate, when present)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ApiError {
    /// Convert a data-layer error for the given application.
    pub fn from_data(app: impl Into<String>, err: &DataError) -> Self {
        let details = match err {
            DataError::Validation(v) => Some(v.to_json()),
            _ => None,
        };
        Self {
            status: err.status_code(),
            app: app.into(),
            code: err.code().to_string(),
            message: err.to_string(),
            details,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

/// A non-success response received across the transport boundary.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Request failed with status {status}")]
pub struct ResponseError {
    pub status: u16,
    pub body: Value,
}

impl ResponseError {
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    /// Recover the `ApiError` carried in the body, if it has that shape.
    pub fn api_error(&self) -> Option<ApiError> {
        serde_json::from_value(self.body.clone()).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_codes() {
        assert_eq!(DataError::query("bad").status_code(), 400);
        assert_eq!(DataError::NotFound("x".into()).status_code(), 404);
        assert_eq!(
            DataError::Store(StoreError::WriteConflict("x".into())).status_code(),
            503
        );
        assert_eq!(DataError::internal("x").status_code(), 500);
    }

    #[test]
    fn test_retryable_only_for_store_conflicts() {
        assert!(DataError::Store(StoreError::NoSuchTransaction("t".into())).is_retryable());
        assert!(!DataError::Store(StoreError::DuplicateKey("k".into())).is_retryable());
        assert!(!DataError::schema("missing ref").is_retryable());
    }

    #[test]
    fn test_api_error_from_data() {
        let err = ApiError::from_data("shop", &DataError::ModelNotFound("carts".into()));
        assert_eq!(err.status, 404);
        assert_eq!(err.app, "shop");
        assert_eq!(err.code, "MODEL_NOT_FOUND");
        assert!(err.details.is_none());
    }

    #[test]
    fn test_response_error_recovers_api_error() {
        let api = ApiError::from_data("shop", &DataError::query("limit must be a number"));
        let body = serde_json::to_value(&api).unwrap();
        let wrapped = ResponseError::new(400, body);
        assert_eq!(wrapped.api_error(), Some(api));

        let opaque = ResponseError::new(502, json!("bad gateway"));
        assert!(opaque.api_error().is_none());
    }
}
