//! Typed error handling for mapgeo
//!
//! Failures fall into three families, and each family is handled differently:
//!
//! - [`NetworkError`]: non-2xx responses and transport failures. Read paths
//!   turn them into a [`Diagnostic`](crate::core::service::Diagnostic) and an
//!   empty result; write paths return them to the caller.
//! - [`ValidationError`]: malformed coordinates or short queries. Reads filter
//!   or short-circuit silently; writes reject the draft.
//! - [`ProtocolError`]: a backend breaking its own contract (a pagination
//!   cursor that does not advance). Fatal for that fetch only.
//!
//! Configuration problems ([`ConfigError`]) only occur at startup.
//!
//! # Example
//!
//! ```rust,ignore
//! match provider.delete_entity(&auth, "17").await {
//!     Ok(()) => {}
//!     Err(GeoError::Network(NetworkError::Status { status: 404, .. })) => {
//!         println!("already gone");
//!     }
//!     Err(e) => eprintln!("delete failed: {}", e),
//! }
//! ```

use crate::core::entity::SourceSystem;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

/// The main error type for mapgeo
#[derive(Debug, Error)]
pub enum GeoError {
    /// HTTP/transport errors talking to a backend
    #[error(transparent)]
    Network(#[from] NetworkError),

    /// Input validation errors
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Backend protocol violations
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Configuration errors
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The auth context carries no credentials for this backend
    #[error("No credentials supplied for {system}")]
    Unauthorized { system: SourceSystem },

    /// The backend is read-only for this operation
    #[error("Operation '{operation}' is not supported by provider '{provider}'")]
    Unsupported {
        provider: String,
        operation: &'static str,
    },

    /// Entity not found in a provider
    #[error("Entity '{id}' not found in provider '{provider}'")]
    NotFound { provider: String, id: String },

    /// No provider or geocoder registered under this name
    #[error("Unknown provider: {name}")]
    UnknownProvider { name: String },

    /// The caller cancelled the operation
    #[error("Operation cancelled")]
    Cancelled,

    /// Internal errors (should not happen in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error response structure for HTTP responses
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling
    pub code: String,
    /// Human-readable error message
    pub message: String,
    /// Optional additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl GeoError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            GeoError::Network(e) => e.status_code(),
            GeoError::Validation(_) => StatusCode::BAD_REQUEST,
            GeoError::Protocol(_) => StatusCode::BAD_GATEWAY,
            GeoError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GeoError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            GeoError::Unsupported { .. } => StatusCode::METHOD_NOT_ALLOWED,
            GeoError::NotFound { .. } => StatusCode::NOT_FOUND,
            GeoError::UnknownProvider { .. } => StatusCode::NOT_FOUND,
            GeoError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            GeoError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            GeoError::Network(e) => e.error_code(),
            GeoError::Validation(_) => "VALIDATION_ERROR",
            GeoError::Protocol(_) => "PROTOCOL_VIOLATION",
            GeoError::Config(_) => "CONFIG_ERROR",
            GeoError::Unauthorized { .. } => "UNAUTHORIZED",
            GeoError::Unsupported { .. } => "UNSUPPORTED_OPERATION",
            GeoError::NotFound { .. } => "ENTITY_NOT_FOUND",
            GeoError::UnknownProvider { .. } => "UNKNOWN_PROVIDER",
            GeoError::Cancelled => "CANCELLED",
            GeoError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Convert to an error response
    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            code: self.error_code().to_string(),
            message: self.to_string(),
            details: self.details(),
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            GeoError::Network(NetworkError::Status { status, url }) => Some(serde_json::json!({
                "upstream_status": status,
                "url": url,
            })),
            GeoError::NotFound { provider, id } => Some(serde_json::json!({
                "provider": provider,
                "id": id,
            })),
            GeoError::Protocol(ProtocolError::CursorNotAdvancing { previous, next }) => {
                Some(serde_json::json!({ "previous": previous, "next": next }))
            }
            _ => None,
        }
    }
}

impl IntoResponse for GeoError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.error_code(), "{}", self);
        }
        let body = Json(self.to_response());
        (status, body).into_response()
    }
}

// =============================================================================
// Network Errors
// =============================================================================

/// Errors talking to a remote backend
#[derive(Debug, Clone, Error)]
pub enum NetworkError {
    /// Non-2xx HTTP status
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    /// Connection, TLS or I/O failure
    #[error("Request to {url} failed: {message}")]
    Transport { url: String, message: String },

    /// The body could not be decoded
    #[error("Invalid response from {url}: {message}")]
    Decode { url: String, message: String },

    /// The backend answered with an application-level error
    #[error("{backend} error '{code}': {message}")]
    Backend {
        backend: String,
        code: String,
        message: String,
    },

    /// No answer within the allotted time
    #[error("Request timed out after {elapsed_ms} ms")]
    Timeout { elapsed_ms: u64 },
}

impl NetworkError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            NetworkError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::BAD_GATEWAY,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            NetworkError::Status { .. } => "UPSTREAM_STATUS",
            NetworkError::Transport { .. } => "UPSTREAM_UNREACHABLE",
            NetworkError::Decode { .. } => "UPSTREAM_INVALID_RESPONSE",
            NetworkError::Backend { .. } => "UPSTREAM_ERROR",
            NetworkError::Timeout { .. } => "UPSTREAM_TIMEOUT",
        }
    }
}

// =============================================================================
// Validation Errors
// =============================================================================

/// Errors related to input validation
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    /// Single field validation error
    #[error("Validation error for field '{field}': {message}")]
    FieldError { field: String, message: String },

    /// Latitude or longitude out of range
    #[error("Invalid coordinates ({latitude}, {longitude})")]
    InvalidCoordinates { latitude: f64, longitude: f64 },

    /// Missing required argument
    #[error("Missing required argument: {argument}")]
    MissingArgument { argument: String },
}

// =============================================================================
// Protocol Errors
// =============================================================================

/// A backend broke its own protocol
#[derive(Debug, Clone, Error)]
pub enum ProtocolError {
    /// The continuation marker did not move forward
    #[error("Pagination cursor did not advance ({previous} -> {next})")]
    CursorNotAdvancing { previous: u64, next: u64 },

    /// Response shape does not match what the backend documents
    #[error("Malformed {backend} payload: {message}")]
    MalformedPayload { backend: String, message: String },
}

// =============================================================================
// Config Errors
// =============================================================================

/// Errors related to configuration
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Failed to parse configuration file
    #[error("Failed to parse config{}: {message}", .file.as_ref().map(|f| format!(" file '{}'", f)).unwrap_or_default())]
    ParseError {
        file: Option<String>,
        message: String,
    },

    /// Values that failed validation
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let err = GeoError::from(NetworkError::Status {
            status: 500,
            url: "http://x".into(),
        });
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);

        let err = GeoError::from(NetworkError::Timeout { elapsed_ms: 10 });
        assert_eq!(err.status_code(), StatusCode::GATEWAY_TIMEOUT);

        let err = GeoError::Unsupported {
            provider: "utm5".into(),
            operation: "create",
        };
        assert_eq!(err.status_code(), StatusCode::METHOD_NOT_ALLOWED);

        let err = GeoError::Unauthorized {
            system: SourceSystem::Crm,
        };
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_response_details() {
        let err = GeoError::from(ProtocolError::CursorNotAdvancing {
            previous: 50,
            next: 50,
        });
        let response = err.to_response();
        assert_eq!(response.code, "PROTOCOL_VIOLATION");
        assert_eq!(response.details.unwrap()["next"], 50);
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::ParseError {
            file: Some("mapgeo.yaml".into()),
            message: "bad indent".into(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to parse config file 'mapgeo.yaml': bad indent"
        );

        let err = ConfigError::ParseError {
            file: None,
            message: "bad indent".into(),
        };
        assert_eq!(err.to_string(), "Failed to parse config: bad indent");
    }
}
