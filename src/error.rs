//! Shared error handling utilities.

use axum::{
    extract::{rejection::JsonRejection, Request},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, warn};
use utoipa::ToSchema;
use validator::{ValidationErrors, ValidationErrorsKind};

use crate::auth::TokenError;
use crate::response::ApiResponse;

/// Message that replaces internal error details in production.
pub const MASKED_INTERNAL_MESSAGE: &str = "Internal Server Error";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct FieldError {
    #[schema(example = "email")]
    pub field: String,
    #[schema(example = "Invalid email format")]
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{message}")]
    Validation {
        message: String,
        errors: Vec<FieldError>,
        data: Option<serde_json::Value>,
    },

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Internal(String),

    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("Database connection error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            errors: Vec::new(),
            data: None,
        }
    }

    pub fn validation_with(message: impl Into<String>, errors: Vec<FieldError>) -> Self {
        Self::Validation {
            message: message.into(),
            errors,
            data: None,
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation { .. } => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) | ApiError::Database(_) | ApiError::Pool(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn is_internal(&self) -> bool {
        self.status() == StatusCode::INTERNAL_SERVER_ERROR
    }
}

/// Response extension set on every 500 produced by [`ApiError`].
#[derive(Debug, Clone, Copy)]
pub struct InternalErrorMarker;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        if self.is_internal() {
            error!(error = %self, "Internal error while handling request");
        } else if status == StatusCode::FORBIDDEN || status == StatusCode::UNAUTHORIZED {
            warn!(status = status.as_u16(), error = %self, "Request rejected");
        } else {
            debug!(status = status.as_u16(), error = %self, "Request failed");
        }

        let message = self.to_string();
        let envelope = match self {
            ApiError::Validation { errors, data, .. } => ApiResponse::failure(message, errors, data),
            _ => ApiResponse::failure(message, Vec::new(), None),
        };

        let mut response = (status, Json(envelope)).into_response();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            response.extensions_mut().insert(InternalErrorMarker);
        }
        response
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        match rejection {
            JsonRejection::JsonDataError(e) => ApiError::validation_with(
                "Validation failed",
                vec![FieldError::new("body", e.body_text())],
            ),
            JsonRejection::JsonSyntaxError(_) => ApiError::validation("Malformed JSON body"),
            JsonRejection::MissingJsonContentType(_) => {
                ApiError::validation("Expected request with `Content-Type: application/json`")
            }
            other => ApiError::validation(other.body_text()),
        }
    }
}

/// Issuance failures are internal. Callers that verify tokens map rejections
/// to their own `Unauthorized` message.
impl From<TokenError> for ApiError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::Invalid(_) => ApiError::unauthorized("Invalid or expired token"),
            TokenError::Signing(_) | TokenError::Key(_) => ApiError::internal(e.to_string()),
        }
    }
}

impl From<ValidationErrors> for ApiError {
    fn from(errors: ValidationErrors) -> Self {
        ApiError::validation_with("Validation failed", flatten_validation_errors(&errors))
    }
}

/// Flattens nested validator output into `field` / `parent[i].field` paths.
pub fn flatten_validation_errors(errors: &ValidationErrors) -> Vec<FieldError> {
    let mut out = Vec::new();
    collect_errors(None, errors, &mut out);
    out.sort_by(|a, b| a.field.cmp(&b.field));
    out
}

fn collect_errors(prefix: Option<&str>, errors: &ValidationErrors, out: &mut Vec<FieldError>) {
    for (field, kind) in errors.errors() {
        let path = match prefix {
            Some(prefix) => format!("{prefix}.{field}"),
            None => field.to_string(),
        };

        match kind {
            ValidationErrorsKind::Field(field_errors) => {
                for e in field_errors {
                    let message = e
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| format!("{path} is invalid ({})", e.code));
                    out.push(FieldError::new(path.clone(), message));
                }
            }
            ValidationErrorsKind::Struct(nested) => collect_errors(Some(&path), nested, out),
            ValidationErrorsKind::List(items) => {
                for (index, nested) in items {
                    collect_errors(Some(&format!("{path}[{index}]")), nested, out);
                }
            }
        }
    }
}

/// Replaces the body of internal errors with a generic message.
///
/// Layered only when running in production.
pub async fn mask_internal_errors(request: Request, next: Next) -> Response {
    let response = next.run(request).await;

    if response.extensions().get::<InternalErrorMarker>().is_some() {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::<()>::failure(
                MASKED_INTERNAL_MESSAGE,
                Vec::new(),
                None,
            )),
        )
            .into_response();
    }

    response
}

pub fn is_unique_violation(error: &diesel::result::Error) -> bool {
    matches!(
        error,
        diesel::result::Error::DatabaseError(
            diesel::result::DatabaseErrorKind::UniqueViolation,
            _
        )
    )
}

pub type ApiResult<T> = Result<T, ApiError>;
