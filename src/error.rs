use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

use crate::providers::ProviderError;
use crate::storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found")]
    NotFound,

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Forbidden")]
    Forbidden,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Upstream error ({status}): {message}")]
    Upstream {
        status: u16,
        message: String,
        details: Value,
    },

    #[error("Not configured: {0}")]
    NotConfigured(&'static str),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Unauthorized | AppError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Upstream { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            AppError::NotConfigured(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Database(_) | AppError::Pool(_) | AppError::Internal(_) | AppError::Json(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn code(&self) -> &'static str {
        match self {
            AppError::NotFound => "not_found",
            AppError::Unauthorized => "unauthorized",
            AppError::InvalidCredentials => "invalid_credentials",
            AppError::Forbidden => "forbidden",
            AppError::BadRequest(_) => "bad_request",
            AppError::Conflict(_) => "conflict",
            AppError::Upstream { .. } => "upstream_error",
            AppError::NotConfigured(_) => "not_configured",
            _ => "internal_error",
        }
    }
}

impl From<ProviderError> for AppError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Api {
                status,
                message,
                details,
            } => AppError::Upstream {
                status,
                message,
                details,
            },
            ProviderError::Transport(message) => {
                tracing::error!("Provider transport error: {}", message);
                AppError::Upstream {
                    status: StatusCode::BAD_GATEWAY.as_u16(),
                    message: "Upstream provider unreachable".to_string(),
                    details: Value::Null,
                }
            }
            ProviderError::Parse(message) => {
                tracing::error!("Provider response parse error: {}", message);
                AppError::Upstream {
                    status: StatusCode::BAD_GATEWAY.as_u16(),
                    message: "Upstream provider returned an unexpected response".to_string(),
                    details: Value::Null,
                }
            }
            ProviderError::NotConfigured(what) => AppError::NotConfigured(what),
        }
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::InvalidPath(path) => {
                AppError::BadRequest(format!("Invalid upload path: {}", path))
            }
            StorageError::Io(e) => AppError::Internal(format!("storage: {}", e)),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();
        let (message, details) = match self {
            AppError::NotFound => ("Not found".to_string(), Value::Null),
            AppError::Unauthorized => ("Unauthorized".to_string(), Value::Null),
            AppError::InvalidCredentials => (
                crate::auth::password::INVALID_CREDENTIALS.to_string(),
                Value::Null,
            ),
            AppError::Forbidden => ("Forbidden".to_string(), Value::Null),
            AppError::BadRequest(msg) | AppError::Conflict(msg) => (msg, Value::Null),
            AppError::Upstream {
                message, details, ..
            } => (message, details),
            AppError::NotConfigured(what) => (format!("{} is not configured", what), Value::Null),
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                ("Internal server error".to_string(), Value::Null)
            }
            AppError::Pool(e) => {
                tracing::error!("Pool error: {}", e);
                ("Internal server error".to_string(), Value::Null)
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                ("Internal server error".to_string(), Value::Null)
            }
            AppError::Json(e) => {
                tracing::error!("JSON error: {}", e);
                ("Internal server error".to_string(), Value::Null)
            }
        };

        (
            status,
            Json(json!({ "error": message, "code": code, "details": details })),
        )
            .into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
