use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::error::Error;
use std::fmt;

pub const INTERNAL_SERVER_ERROR_MESSAGE: &str =
    "an internal error has occurred that is preventing the service from servicing this request";
pub const ID_MALFORMED: &str = "id is malformed";
pub const RESOURCE_NOT_FOUND: &str = "resource not found";
pub const NO_ASSOCIATED_USER: &str = "no associated user found";

tokio::task_local! {
    /// Request id of the request currently being served.
    pub static REQUEST_ID: String;
}

/// Returns the id of the request being served, or an empty string outside a request.
pub fn current_request_id() -> String {
    REQUEST_ID.try_with(|id| id.clone()).unwrap_or_default()
}

/// The primary error type for the application.
///
/// Every handler error is rendered through the same JSON envelope, so the variant only
/// decides the status code and the message exposed to the client.
#[derive(Debug)]
pub enum AppError {
    /// For internal server errors that are not expected to be handled by the client.
    Internal(anyhow::Error),
    /// For client errors due to invalid requests.
    BadRequest(String),
    /// For when a request has no (or an unknown) acting user.
    Unauthorized(String),
    /// For when the acting user may not perform the operation.
    Forbidden(String),
    /// For when a requested resource is not found.
    NotFound(String),
    /// For when a request conflicts with the current state of the server.
    Conflict(String),
    /// For request bodies in a media type the endpoint does not accept.
    UnsupportedMediaType(String),
    /// For request bodies over the configured size limit.
    PayloadTooLarge(String),
    /// For when a service is temporarily unavailable.
    ServiceUnavailable(String),
    /// For errors related to database operations.
    Database(String),
    /// For errors related to I/O operations.
    IoError(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(e) => write!(f, "Internal error: {}", e),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            AppError::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            AppError::UnsupportedMediaType(msg) => write!(f, "Unsupported media type: {}", msg),
            AppError::PayloadTooLarge(msg) => write!(f, "Payload too large: {}", msg),
            AppError::ServiceUnavailable(msg) => write!(f, "Service unavailable: {}", msg),
            AppError::Database(msg) => write!(f, "Database error: {}", msg),
            AppError::IoError(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl Error for AppError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            AppError::Internal(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) | AppError::Database(_) | AppError::IoError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message exposed to the client. Server-side failures never leak their cause.
    pub fn client_message(&self) -> String {
        match self {
            AppError::BadRequest(msg)
            | AppError::Unauthorized(msg)
            | AppError::Forbidden(msg)
            | AppError::NotFound(msg)
            | AppError::Conflict(msg)
            | AppError::UnsupportedMediaType(msg)
            | AppError::PayloadTooLarge(msg)
            | AppError::ServiceUnavailable(msg) => msg.clone(),
            AppError::Internal(_) | AppError::Database(_) | AppError::IoError(_) => {
                INTERNAL_SERVER_ERROR_MESSAGE.to_string()
            }
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorDetails {
    pub context: String,
    pub message: String,
}

/// JSON body of every error response.
#[derive(Debug, Serialize)]
pub struct ErrorWrapper {
    pub http_status: u16,
    pub timestamp: String,
    pub request_id: String,
    pub errors: Vec<ErrorDetails>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let request_id = current_request_id();
        match &self {
            AppError::Internal(e) => tracing::error!(request_id = %request_id, "Internal error: {:?}", e),
            AppError::Database(msg) => tracing::error!(request_id = %request_id, "Database error: {}", msg),
            AppError::IoError(msg) => tracing::error!(request_id = %request_id, "I/O error: {}", msg),
            _ => tracing::debug!(request_id = %request_id, "{}", self),
        }

        let status = self.status();
        let body = ErrorWrapper {
            http_status: status.as_u16(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            request_id,
            errors: vec![ErrorDetails { context: String::new(), message: self.client_message() }],
        };

        (status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err)
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => AppError::NotFound(RESOURCE_NOT_FOUND.to_string()),
            sqlx::Error::Database(db_err) => AppError::Database(db_err.message().to_string()),
            sqlx::Error::PoolTimedOut => {
                AppError::ServiceUnavailable("database connection pool timed out".to_string())
            }
            _ => AppError::Database(err.to_string()),
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::IoError(format!("{}: {}", err.kind(), err))
    }
}

impl From<crate::model::filter::FilterError> for AppError {
    fn from(err: crate::model::filter::FilterError) -> Self {
        AppError::BadRequest(err.to_string())
    }
}

impl From<crate::graph::GraphError> for AppError {
    fn from(err: crate::graph::GraphError) -> Self {
        match err {
            crate::graph::GraphError::NotFound => AppError::NotFound("node not found".to_string()),
            crate::graph::GraphError::InvalidCypher(msg) => AppError::BadRequest(msg),
            crate::graph::GraphError::Database(e) => e.into(),
            crate::graph::GraphError::Serialization(e) => AppError::Internal(e.into()),
        }
    }
}

/// A type alias for `Result<T, AppError>`, used throughout the application.
pub type AppResult<T> = Result<T, AppError>;

/// An extension trait for `Option` that provides a convenient way to convert
/// an `Option` to a `Result` with a `NotFound` error.
pub trait OptionExt<T> {
    /// Converts `None` into `AppError::NotFound` carrying `message`.
    fn ok_or_not_found(self, message: &str) -> AppResult<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_not_found(self, message: &str) -> AppResult<T> {
        self.ok_or_else(|| AppError::NotFound(message.to_string()))
    }
}

/// Returns true for unique constraint violations, which callers map to their own
/// duplicate-name message.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.is_unique_violation() || db_err.message().contains("UNIQUE constraint failed")
        }
        _ => false,
    }
}
