use axum::http::StatusCode;
use thiserror::Error;

pub mod storage;

pub use storage::{StorageError, StorageResult};

/// Common trait for errors that are surfaced over the wire
pub trait AppError: std::error::Error + Send + Sync + 'static {
    /// Get the HTTP status code for this error
    fn status_code(&self) -> StatusCode;

    /// Get a user-friendly error message
    fn user_message(&self) -> String;

    /// Get the error code for client-side branching
    fn error_code(&self) -> &'static str;
}

/// Macro to implement IntoResponse for AppError types
/// This provides consistent HTTP response formatting
macro_rules! impl_into_response {
    ($error_type:ty) => {
        impl axum::response::IntoResponse for $error_type {
            fn into_response(self) -> axum::response::Response {
                use crate::errors::AppError;
                use axum::response::Json;
                use serde_json::json;

                let status = self.status_code();
                let body = Json(json!({
                    "error": self.user_message(),
                    "code": self.error_code(),
                    "status": status.as_u16()
                }));

                (status, body).into_response()
            }
        }
    };
}

/// Protocol-level failures of a DAV operation.
///
/// Every variant maps to its own status code so that sync clients can
/// branch on it (retry on `FileLocked`, give up on `Forbidden`, ...).
#[derive(Error, Debug)]
pub enum DavError {
    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    #[error("Invalid file name '{name}'")]
    InvalidName { name: String },

    #[error("expected filesize {expected} got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("Bad request: {message}")]
    BadRequest { message: String },

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Not found: {message}")]
    NotFound { message: String },

    #[error("Method not allowed: {message}")]
    MethodNotAllowed { message: String },

    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("Precondition failed: {message}")]
    PreconditionFailed { message: String },

    #[error("Entity too large: {message}")]
    EntityTooLarge { message: String },

    #[error("Unsupported media type: {message}")]
    UnsupportedMediaType { message: String },

    #[error("File is locked: {message}")]
    FileLocked {
        message: String,
        #[source]
        source: StorageError,
    },

    #[error("Internal server error: {message}")]
    Internal { message: String },

    #[error("Not implemented: {message}")]
    NotImplemented { message: String },

    #[error("Service unavailable: {message}")]
    ServiceUnavailable { message: String },

    #[error("System unavailable: {message}")]
    SystemUnavailable { message: String },

    #[error("Insufficient storage")]
    InsufficientStorage,
}

pub type DavResult<T> = Result<T, DavError>;

impl AppError for DavError {
    fn status_code(&self) -> StatusCode {
        match self {
            DavError::Forbidden { .. } => StatusCode::FORBIDDEN,
            DavError::InvalidName { .. }
            | DavError::SizeMismatch { .. }
            | DavError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            DavError::NotAuthenticated => StatusCode::UNAUTHORIZED,
            DavError::NotFound { .. } => StatusCode::NOT_FOUND,
            DavError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            DavError::Conflict { .. } => StatusCode::CONFLICT,
            DavError::PreconditionFailed { .. } => StatusCode::PRECONDITION_FAILED,
            DavError::EntityTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            DavError::UnsupportedMediaType { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            DavError::FileLocked { .. } => StatusCode::LOCKED,
            DavError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            DavError::NotImplemented { .. } => StatusCode::NOT_IMPLEMENTED,
            DavError::ServiceUnavailable { .. } | DavError::SystemUnavailable { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            DavError::InsufficientStorage => StatusCode::INSUFFICIENT_STORAGE,
        }
    }

    fn user_message(&self) -> String {
        match self {
            DavError::Internal { .. } => "An internal error occurred".to_string(),
            DavError::FileLocked { message, .. } => message.clone(),
            DavError::NotAuthenticated => "Authentication required".to_string(),
            DavError::InsufficientStorage => "Not enough free space to store the file".to_string(),
            other => other.to_string(),
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            DavError::Forbidden { .. } => "FORBIDDEN",
            DavError::InvalidName { .. } => "INVALID_NAME",
            DavError::SizeMismatch { .. } => "SIZE_MISMATCH",
            DavError::BadRequest { .. } => "BAD_REQUEST",
            DavError::NotAuthenticated => "NOT_AUTHENTICATED",
            DavError::NotFound { .. } => "NOT_FOUND",
            DavError::MethodNotAllowed { .. } => "METHOD_NOT_ALLOWED",
            DavError::Conflict { .. } => "CONFLICT",
            DavError::PreconditionFailed { .. } => "PRECONDITION_FAILED",
            DavError::EntityTooLarge { .. } => "ENTITY_TOO_LARGE",
            DavError::UnsupportedMediaType { .. } => "UNSUPPORTED_MEDIA_TYPE",
            DavError::FileLocked { .. } => "FILE_LOCKED",
            DavError::Internal { .. } => "INTERNAL_SERVER_ERROR",
            DavError::NotImplemented { .. } => "NOT_IMPLEMENTED",
            DavError::ServiceUnavailable { .. } => "SERVICE_UNAVAILABLE",
            DavError::SystemUnavailable { .. } => "SYSTEM_UNAVAILABLE",
            DavError::InsufficientStorage => "INSUFFICIENT_STORAGE",
        }
    }
}

impl_into_response!(DavError);

/// Utility functions for common error creation patterns
impl DavError {
    pub fn forbidden<S: Into<String>>(message: S) -> Self {
        Self::Forbidden { message: message.into() }
    }

    pub fn bad_request<S: Into<String>>(message: S) -> Self {
        Self::BadRequest { message: message.into() }
    }

    pub fn not_found<S: Into<String>>(message: S) -> Self {
        Self::NotFound { message: message.into() }
    }

    pub fn conflict<S: Into<String>>(message: S) -> Self {
        Self::Conflict { message: message.into() }
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal { message: message.into() }
    }

    pub fn not_implemented<S: Into<String>>(message: S) -> Self {
        Self::NotImplemented { message: message.into() }
    }

    pub fn service_unavailable<S: Into<String>>(message: S) -> Self {
        Self::ServiceUnavailable { message: message.into() }
    }

    pub fn system_unavailable<S: Into<String>>(message: S) -> Self {
        Self::SystemUnavailable { message: message.into() }
    }

    pub fn file_locked(source: StorageError) -> Self {
        Self::FileLocked { message: source.to_string(), source }
    }
}

impl From<StorageError> for DavError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotPermitted { .. } => DavError::forbidden(err.to_string()),
            StorageError::EntityTooLarge { .. } => DavError::EntityTooLarge { message: err.to_string() },
            StorageError::InvalidContent { .. } => {
                DavError::UnsupportedMediaType { message: err.to_string() }
            }
            StorageError::InvalidPath { .. } => DavError::forbidden(err.to_string()),
            StorageError::LockNotAcquired { .. } => DavError::file_locked(err),
            StorageError::Encryption { .. } => DavError::forbidden(err.to_string()),
            StorageError::NotAvailable { reason } => DavError::service_unavailable(reason),
            StorageError::Invalid { .. } | StorageError::NotFound { .. } => {
                DavError::not_found(err.to_string())
            }
            StorageError::WriteFailed { .. } => DavError::internal("Could not write file contents"),
            StorageError::Io(_) => DavError::internal(err.to_string()),
        }
    }
}
