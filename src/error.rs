use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use rust_decimal::Decimal;
use serde_json::json;
use thiserror::Error;
use tracing::error;
use uuid::Uuid;

use crate::responses::RequestMeta;
use crate::types::OrderStatus;

pub const E_VALIDATION: &str = "VALIDATION_FAILED";
pub const E_MISSING_FIELD: &str = "MISSING_FIELD";
pub const E_BAD_TRANSACTION_ID: &str = "BAD_TRANSACTION_ID";
pub const E_INSUFFICIENT_BALANCE: &str = "INSUFFICIENT_BALANCE";
pub const E_NOT_FOUND: &str = "NOT_FOUND";
pub const E_UNAUTHENTICATED: &str = "UNAUTHENTICATED";
pub const E_FORBIDDEN: &str = "FORBIDDEN";
pub const E_INVALID_TRANSITION: &str = "INVALID_TRANSITION";
pub const E_CONFIRMATION_REQUIRED: &str = "CONFIRMATION_REQUIRED";
pub const E_ALREADY_RESOLVED: &str = "ALREADY_RESOLVED";
pub const E_PRODUCT_UNAVAILABLE: &str = "PRODUCT_UNAVAILABLE";
pub const E_CONFLICT: &str = "CONFLICT";
pub const E_LINK_EXPIRED: &str = "LINK_EXPIRED";
pub const E_BAD_SIGNATURE: &str = "BAD_SIGNATURE";
pub const E_PAYLOAD_TOO_LARGE: &str = "PAYLOAD_TOO_LARGE";
pub const E_STORAGE_FAILURE: &str = "STORAGE_FAILURE";
pub const E_DB_FAILURE: &str = "DB_FAILURE";
pub const E_INTERNAL: &str = "INTERNAL";

/// Failures of the order, wallet and moderation procedures.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    Validation(String),

    #[error("{0} is required")]
    MissingField(&'static str),

    #[error("transaction id must be exactly 6 digits")]
    InvalidTransactionId,

    #[error("insufficient balance: available {available}, required {required}")]
    InsufficientBalance {
        available: Decimal,
        required: Decimal,
    },

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("authentication required")]
    Unauthenticated,

    #[error("{0}")]
    Forbidden(String),

    #[error("cannot move order from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("moving orders to {0} must be confirmed")]
    ConfirmationRequired(OrderStatus),

    #[error("{0} has already been resolved")]
    AlreadyResolved(&'static str),

    #[error("product {0} is not available")]
    ProductUnavailable(Uuid),

    #[error("{0}")]
    Conflict(String),

    #[error("link has expired")]
    LinkExpired,

    #[error("link signature is invalid")]
    BadSignature,

    #[error("upload exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error("storage failure: {0}")]
    Storage(String),

    #[error("{0}")]
    Internal(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl ServiceError {
    /// Stable machine-readable code returned to clients.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::Validation(_) => E_VALIDATION,
            ServiceError::MissingField(_) => E_MISSING_FIELD,
            ServiceError::InvalidTransactionId => E_BAD_TRANSACTION_ID,
            ServiceError::InsufficientBalance { .. } => E_INSUFFICIENT_BALANCE,
            ServiceError::NotFound(_) => E_NOT_FOUND,
            ServiceError::Unauthenticated => E_UNAUTHENTICATED,
            ServiceError::Forbidden(_) => E_FORBIDDEN,
            ServiceError::InvalidTransition { .. } => E_INVALID_TRANSITION,
            ServiceError::ConfirmationRequired(_) => E_CONFIRMATION_REQUIRED,
            ServiceError::AlreadyResolved(_) => E_ALREADY_RESOLVED,
            ServiceError::ProductUnavailable(_) => E_PRODUCT_UNAVAILABLE,
            ServiceError::Conflict(_) => E_CONFLICT,
            ServiceError::LinkExpired => E_LINK_EXPIRED,
            ServiceError::BadSignature => E_BAD_SIGNATURE,
            ServiceError::PayloadTooLarge { .. } => E_PAYLOAD_TOO_LARGE,
            ServiceError::Storage(_) => E_STORAGE_FAILURE,
            ServiceError::Internal(_) => E_INTERNAL,
            ServiceError::Database(_) => E_DB_FAILURE,
        }
    }

    pub fn with_meta(self, meta: RequestMeta) -> ApiErrorWithMeta {
        let code = self.code();
        ApiError::from(self).with_meta(meta).with_code(code)
    }
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    NotFound(String),
    Conflict(String),
    Gone(String),
    PayloadTooLarge(String),
    Internal(anyhow::Error),
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        let msg = err.to_string();
        match err {
            ServiceError::Validation(_)
            | ServiceError::MissingField(_)
            | ServiceError::InvalidTransactionId
            | ServiceError::InsufficientBalance { .. }
            | ServiceError::ConfirmationRequired(_) => ApiError::BadRequest(msg),
            ServiceError::Unauthenticated => ApiError::Unauthorized(msg),
            ServiceError::Forbidden(_) | ServiceError::BadSignature => ApiError::Forbidden(msg),
            ServiceError::NotFound(_) => ApiError::NotFound(msg),
            ServiceError::InvalidTransition { .. }
            | ServiceError::AlreadyResolved(_)
            | ServiceError::ProductUnavailable(_)
            | ServiceError::Conflict(_) => ApiError::Conflict(msg),
            ServiceError::LinkExpired => ApiError::Gone(msg),
            ServiceError::PayloadTooLarge { .. } => ApiError::PayloadTooLarge(msg),
            ServiceError::Storage(_) | ServiceError::Internal(_) => {
                ApiError::Internal(anyhow::anyhow!(msg))
            }
            ServiceError::Database(e) => ApiError::Internal(e.into()),
        }
    }
}

#[derive(Debug)]
pub struct ApiErrorWithMeta {
    error: ApiError,
    meta: RequestMeta,
    code: Option<String>,
}

impl ApiError {
    pub fn with_meta(self, meta: RequestMeta) -> ApiErrorWithMeta {
        ApiErrorWithMeta {
            error: self,
            meta,
            code: None,
        }
    }
}

impl ApiErrorWithMeta {
    pub fn with_code(mut self, code: &str) -> Self {
        self.code = Some(code.to_string());
        self
    }
}

impl IntoResponse for ApiErrorWithMeta {
    fn into_response(self) -> Response {
        let (status, error_message) = match self.error {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Gone(msg) => (StatusCode::GONE, msg),
            ApiError::PayloadTooLarge(msg) => (StatusCode::PAYLOAD_TOO_LARGE, msg),
            ApiError::Internal(e) => {
                error!(request_id = %self.meta.request_id, "internal error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        };

        let mut body = json!({
            "request_id": self.meta.request_id,
            "error": error_message,
        });
        if let Some(code) = self.code {
            body["code"] = json!(code);
        }

        (status, Json(body)).into_response()
    }
}
