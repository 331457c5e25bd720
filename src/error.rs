use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not authenticated with the calendar provider")]
    NotAuthenticated,

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("OAuth error: {0}")]
    OAuth(String),

    /// The provider refused the grant for good (revoked or expired refresh
    /// token, reused authorization code). Retrying will not help.
    #[error("OAuth grant rejected: {0}")]
    OAuthRevoked(String),

    #[error("Google API error: {0}")]
    GoogleApi(String),

    #[error("Telegram error: {0}")]
    Telegram(String),

    #[error("Language model error: {0}")]
    Llm(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("External service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl AppError {
    /// Whether the failure can go away on its own (network hiccup, provider
    /// throttling, timeout), as opposed to needing user action.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::Request(_)
                | AppError::RateLimited
                | AppError::Timeout(_)
                | AppError::ServiceUnavailable(_)
                | AppError::Database(_)
        )
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::NotAuthenticated => (
                StatusCode::UNAUTHORIZED,
                "NOT_AUTHENTICATED",
                self.to_string(),
            ),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                "RATE_LIMITED",
                self.to_string(),
            ),
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "A database error occurred".to_string(),
                )
            }
            AppError::Request(e) => {
                tracing::error!("HTTP request error: {:?}", e);
                (
                    StatusCode::BAD_GATEWAY,
                    "EXTERNAL_REQUEST_FAILED",
                    "Failed to communicate with external service".to_string(),
                )
            }
            AppError::Serialization(e) => {
                tracing::error!("Serialization error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "SERIALIZATION_ERROR",
                    "Failed to process data".to_string(),
                )
            }
            AppError::OAuth(msg) | AppError::OAuthRevoked(msg) => {
                tracing::warn!("OAuth error: {}", msg);
                (StatusCode::BAD_GATEWAY, "OAUTH_ERROR", msg.clone())
            }
            AppError::GoogleApi(msg) => {
                tracing::error!("Google API error: {}", msg);
                (StatusCode::BAD_GATEWAY, "GOOGLE_API_ERROR", msg.clone())
            }
            AppError::Telegram(msg) => {
                tracing::error!("Telegram error: {}", msg);
                (StatusCode::BAD_GATEWAY, "TELEGRAM_ERROR", msg.clone())
            }
            AppError::Llm(msg) => {
                tracing::error!("Language model error: {}", msg);
                (StatusCode::BAD_GATEWAY, "LLM_ERROR", msg.clone())
            }
            AppError::Timeout(msg) => (StatusCode::GATEWAY_TIMEOUT, "TIMEOUT", msg.clone()),
            AppError::Config(msg) => {
                tracing::error!("Configuration error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "CONFIG_ERROR",
                    "Server configuration error".to_string(),
                )
            }
            AppError::ServiceUnavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "SERVICE_UNAVAILABLE",
                msg.clone(),
            ),
            AppError::Internal(e) => {
                tracing::error!("Internal error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
            },
        };

        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
