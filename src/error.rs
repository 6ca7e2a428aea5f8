//! Error types for cardkit
//!
//! Two failure kinds flow through the error policy: [`HandlerError`] (raised by
//! user handlers) and [`ValidationError`] (raised by record schemas). Everything
//! else is a [`CardError`] surfaced to the host framework directly.

use std::fmt;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Which side of the adapter produced a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// The user handler failed.
    Handler,
    /// A produced item did not satisfy the record schema.
    Validation,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Handler => f.write_str("handler"),
            Self::Validation => f.write_str("validation"),
        }
    }
}

/// A single field-level diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// Dotted path to the offending field (`$` for the item itself).
    pub path: String,
    /// Human readable reason.
    pub message: String,
}

impl FieldError {
    /// Create a new field error.
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Raised when a raw item does not satisfy a record schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    /// Name of the schema that rejected the item.
    pub schema: String,
    /// Every violation found, in the order the validator reported them.
    pub fields: Vec<FieldError>,
}

impl ValidationError {
    /// Create a validation error with no field diagnostics yet.
    pub fn new(schema: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            fields: Vec::new(),
        }
    }

    /// Append a field diagnostic.
    pub fn with_field(mut self, path: impl Into<String>, message: impl Into<String>) -> Self {
        self.fields.push(FieldError::new(path, message));
        self
    }

    /// Paths of all offending fields.
    pub fn paths(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.path.as_str()).collect()
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} rejected item", self.schema)?;
        for (i, field) in self.fields.iter().enumerate() {
            f.write_str(if i == 0 { ": " } else { "; " })?;
            write!(f, "{field}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

/// Raised by a user handler, either when invoked or while producing an item.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl HandlerError {
    /// Create a handler error from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Wrap any error raised inside a handler.
    pub fn from_error<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            message: error.to_string(),
            source: Some(Box::new(error)),
        }
    }

    /// The message reported to clients when errors are not masked.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(error: serde_json::Error) -> Self {
        Self::from_error(error)
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Errors that can occur in cardkit
#[derive(Debug, Error)]
pub enum CardError {
    /// An item was rejected by its record schema
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// A user handler failed
    #[error("Handler error: {0}")]
    Handler(#[from] HandlerError),

    /// Request parameters could not be decoded
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// A JSON Schema could not be compiled
    #[error("Schema compilation error: {0}")]
    SchemaCompilation(String),

    /// A record could not be serialized for the wire
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The host transport rejected a write
    #[error("Transport error: {0}")]
    Transport(String),

    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// Telemetry initialization error
    #[cfg(feature = "telemetry")]
    #[error("Telemetry initialization error: {0}")]
    TelemetryInit(String),
}

impl CardError {
    /// Policy-relevant failure kind, if this error is one the error policy handles.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Validation(_) => Some(FailureKind::Validation),
            Self::Handler(_) => Some(FailureKind::Handler),
            _ => None,
        }
    }

    /// HTTP status used when this error ends a plain HTTP exchange.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message suitable for clients.
    pub fn user_message(&self) -> String {
        match self {
            Self::Handler(e) => e.message().to_string(),
            other => other.to_string(),
        }
    }

    /// The `detail` member of an error response body.
    pub fn detail(&self) -> serde_json::Value {
        match self {
            Self::Validation(e) => serde_json::json!(e.fields),
            other => serde_json::Value::String(other.user_message()),
        }
    }
}

impl IntoResponse for CardError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(serde_json::json!({ "detail": self.detail() }))).into_response()
    }
}

/// Result type for cardkit operations
pub type Result<T> = std::result::Result<T, CardError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_lists_fields() {
        let err = ValidationError::new("NumberCard")
            .with_field("data.value", "invalid type: string, expected f64")
            .with_field("card_id", "length");
        assert_eq!(err.paths(), vec!["data.value", "card_id"]);
        assert_eq!(
            err.to_string(),
            "NumberCard rejected item: data.value: invalid type: string, expected f64; card_id: length"
        );
    }

    #[test]
    fn failure_kinds_and_status_codes() {
        let v: CardError = ValidationError::new("s").into();
        let h: CardError = HandlerError::new("boom").into();
        assert_eq!(v.failure_kind(), Some(FailureKind::Validation));
        assert_eq!(h.failure_kind(), Some(FailureKind::Handler));
        assert_eq!(v.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(h.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(h.user_message(), "boom");
        assert_eq!(CardError::BadRequest("x".into()).failure_kind(), None);
    }

    #[test]
    fn handler_error_keeps_source() {
        let io = std::io::Error::other("disk gone");
        let err = HandlerError::from_error(io);
        assert_eq!(err.message(), "disk gone");
        assert!(std::error::Error::source(&err).is_some());
    }
}
