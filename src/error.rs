use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

/// Application error type.
///
/// Client-facing variants (`Validation`, `NotFound`, `Forbidden`, `Auth`)
/// map to the corresponding HTTP status codes; everything else is an
/// operational failure that surfaces as a 5xx without internal details.
#[derive(Error, Debug)]
pub enum AppError {
    // ===== Client errors =====
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ===== Outbound client errors =====
    #[error("Client not configured: {0}")]
    NotConfigured(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Remote error: {0}")]
    Remote(String),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    // ===== Queue & storage errors =====
    #[error("Kafka error: {0}")]
    Kafka(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    // ===== Configuration & internal errors =====
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Unknown error: {0}")]
    Unknown(#[from] anyhow::Error),
}

impl AppError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::Json(_) => StatusCode::BAD_REQUEST,
            AppError::Auth(_) | AppError::Jwt(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Transport(_) | AppError::Remote(_) | AppError::Reqwest(_) => {
                StatusCode::BAD_GATEWAY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get a user-friendly error message (without sensitive details)
    pub fn user_message(&self) -> String {
        match self {
            AppError::Validation(msg)
            | AppError::NotFound(msg)
            | AppError::Forbidden(msg)
            | AppError::Auth(msg) => msg.clone(),
            AppError::Jwt(_) => "Invalid or expired token".to_string(),
            AppError::Json(err) => format!("Malformed request body: {}", err),
            AppError::NotConfigured(msg) => format!("Client not configured: {}", msg),
            AppError::Transport(_) | AppError::Remote(_) | AppError::Reqwest(_) => {
                "External service error".to_string()
            }
            AppError::Kafka(_) => "Message queue error".to_string(),
            AppError::Database(_) | AppError::Migrate(_) => "Storage error".to_string(),
            AppError::Config(msg) => format!("Configuration error: {}", msg),
            _ => "Internal server error".to_string(),
        }
    }

    /// Get error code for programmatic error handling
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::Auth(_) => "AUTH_ERROR",
            AppError::Jwt(_) => "JWT_ERROR",
            AppError::Json(_) => "JSON_ERROR",
            AppError::NotConfigured(_) => "NOT_CONFIGURED",
            AppError::Transport(_) => "TRANSPORT_ERROR",
            AppError::Remote(_) => "REMOTE_ERROR",
            AppError::Reqwest(_) => "EXTERNAL_SERVICE_ERROR",
            AppError::Kafka(_) => "KAFKA_ERROR",
            AppError::Database(_) => "DATABASE_ERROR",
            AppError::Migrate(_) => "MIGRATION_ERROR",
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
            AppError::Unknown(_) => "UNKNOWN_ERROR",
        }
    }

    /// Log this error with appropriate level and context
    pub fn log(&self) {
        let status = self.status_code();
        let code = self.error_code();

        if status.is_server_error() {
            tracing::error!(
                error = %self,
                error_code = %code,
                status = %status.as_u16(),
                "Server error occurred"
            );
        } else if status == StatusCode::UNAUTHORIZED {
            tracing::warn!(
                error = %self,
                error_code = %code,
                "Authentication failed"
            );
        } else {
            tracing::debug!(
                error = %self,
                error_code = %code,
                "Client error occurred"
            );
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        self.log();

        let status = self.status_code();
        let error_code = self.error_code();

        // For server errors, don't expose internal details to the client
        let body = if status.is_server_error() {
            json!({
                "error": "Internal server error",
                "error_code": error_code,
                "status": status.as_u16(),
            })
        } else {
            json!({
                "error": self.user_message(),
                "error_code": error_code,
                "status": status.as_u16(),
            })
        };

        (status, axum::Json(body)).into_response()
    }
}

impl From<rdkafka::error::KafkaError> for AppError {
    fn from(err: rdkafka::error::KafkaError) -> Self {
        tracing::error!(error = %err, "Kafka error occurred");
        AppError::Kafka(err.to_string())
    }
}

// ============================================================================
// Helper constructors for common errors
// ============================================================================

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        AppError::NotFound(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        AppError::Forbidden(msg.into())
    }

    pub fn auth(msg: impl Into<String>) -> Self {
        AppError::Auth(msg.into())
    }

    pub fn not_configured(msg: impl Into<String>) -> Self {
        AppError::NotConfigured(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        AppError::Transport(msg.into())
    }

    pub fn remote(msg: impl Into<String>) -> Self {
        AppError::Remote(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        AppError::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        AppError::Internal(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_status_codes() {
        assert_eq!(
            AppError::validation("bad").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::not_found("missing").status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::forbidden("nope").status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(AppError::auth("who").status_code(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_server_errors_hide_details() {
        let err = AppError::internal("secret detail");
        assert!(err.status_code().is_server_error());
        assert_eq!(err.user_message(), "Internal server error");
    }

    #[test]
    fn test_outbound_errors_map_to_bad_gateway() {
        assert_eq!(
            AppError::transport("connection refused").status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            AppError::remote("processEvent failed").status_code(),
            StatusCode::BAD_GATEWAY
        );
    }
}
