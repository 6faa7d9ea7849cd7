//! # Web API Error Types
//!
//! HTTP mapping for engine errors. Token and state failures on the customer
//! path map to distinct statuses because the page shown differs for each.

use crate::error::NdrError;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Resource not found")]
    NotFound,

    #[error("Invalid request: {message}")]
    BadRequest { message: String },

    #[error("Invalid UUID format: {uuid}")]
    InvalidUuid { uuid: String },

    #[error("Service temporarily unavailable")]
    ServiceUnavailable,

    #[error(transparent)]
    Engine(#[from] NdrError),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    pub fn invalid_uuid(uuid: impl Into<String>) -> Self {
        Self::InvalidUuid { uuid: uuid.into() }
    }

    fn status_and_code(&self) -> (StatusCode, String) {
        match self {
            Self::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND".to_string()),
            Self::BadRequest { .. } => (StatusCode::BAD_REQUEST, "BAD_REQUEST".to_string()),
            Self::InvalidUuid { .. } => (StatusCode::BAD_REQUEST, "INVALID_UUID".to_string()),
            Self::ServiceUnavailable => (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE".to_string()),
            Self::Engine(err) => (engine_status(err), err.error_code().to_uppercase()),
        }
    }

    fn public_message(&self) -> String {
        match self {
            Self::Engine(NdrError::TokenExpired) => {
                "This link has expired. Please contact the seller for help with your delivery".to_string()
            }
            Self::Engine(NdrError::TokenInvalid { .. }) => "This link is not valid".to_string(),
            Self::Engine(NdrError::EventAlreadyTerminal { .. }) => {
                "This delivery issue has already been resolved".to_string()
            }
            Self::Engine(NdrError::AlreadyInResolution { .. } | NdrError::StaleWrite { .. }) => {
                "Another request for this delivery was already accepted".to_string()
            }
            Self::Engine(NdrError::Storage(_) | NdrError::Configuration(_)) => {
                "Service temporarily unavailable".to_string()
            }
            other => other.to_string(),
        }
    }
}

fn engine_status(err: &NdrError) -> StatusCode {
    match err {
        NdrError::TokenExpired => StatusCode::GONE,
        NdrError::TokenInvalid { .. } => StatusCode::UNAUTHORIZED,
        NdrError::EventAlreadyTerminal { .. }
        | NdrError::AlreadyInResolution { .. }
        | NdrError::StaleWrite { .. }
        | NdrError::InvalidTransition(_) => StatusCode::CONFLICT,
        NdrError::EventNotFound(_) => StatusCode::NOT_FOUND,
        NdrError::Validation(_) => StatusCode::BAD_REQUEST,
        NdrError::CarrierCommandFailed { .. } | NdrError::Collaborator { .. } => StatusCode::BAD_GATEWAY,
        NdrError::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
        NdrError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status_code, error_code) = self.status_and_code();
        if status_code.is_server_error() {
            error!(code = %error_code, error = %self, "Request failed");
        }

        let error_response = json!({
            "error": {
                "code": error_code,
                "message": self.public_message()
            }
        });

        (status_code, Json(error_response)).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl From<uuid::Error> for ApiError {
    fn from(err: uuid::Error) -> Self {
        Self::invalid_uuid(err.to_string())
    }
}
