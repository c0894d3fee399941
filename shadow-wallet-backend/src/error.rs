use axum::{
    extract::rejection::JsonRejection,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use shadow_wallet_state::WalletError;
use tracing::error;

pub(crate) const CODE_VALIDATION: &str = "VALIDATION_ERROR";
pub(crate) const CODE_NOT_FOUND: &str = "NOT_FOUND";
pub(crate) const CODE_CONFLICT: &str = "CONFLICT";
pub(crate) const CODE_INVALID_TRANSITION: &str = "INVALID_TRANSITION";
pub(crate) const CODE_STORE_ERROR: &str = "STORE_ERROR";
pub(crate) const CODE_PROVING_ERROR: &str = "PROVING_ERROR";
pub(crate) const CODE_METHOD_NOT_ALLOWED: &str = "METHOD_NOT_ALLOWED";

const STORE_FAILURE_MESSAGE: &str = "Internal server error";

/// Methods served by the account and transaction collections.
pub(crate) const ALLOWED_METHODS: &str = "GET, POST, PUT";

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub(crate) fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, CODE_VALIDATION, message)
    }

    pub(crate) fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, CODE_NOT_FOUND, message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.code
    }
}

impl From<WalletError> for ApiError {
    fn from(err: WalletError) -> Self {
        match err {
            WalletError::Validation(message) => Self::bad_request(message),
            WalletError::NotFound(message) => Self::not_found(message),
            WalletError::Conflict(message) => {
                Self::new(StatusCode::BAD_REQUEST, CODE_CONFLICT, message)
            }
            err @ WalletError::InvalidTransition { .. } => Self::new(
                StatusCode::BAD_REQUEST,
                CODE_INVALID_TRANSITION,
                err.to_string(),
            ),
            WalletError::Proving(message) => {
                error!(error = %message, "proving backend failure");
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    CODE_PROVING_ERROR,
                    format!("proving backend error: {message}"),
                )
            }
            WalletError::Store(err) => {
                error!(error = %err, "store failure");
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    CODE_STORE_ERROR,
                    STORE_FAILURE_MESSAGE,
                )
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(format!("Invalid request body: {}", rejection.body_text()))
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorResponse {
    error: String,
    error_code: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: self.message,
            error_code: self.code,
        };
        (self.status, Json(body)).into_response()
    }
}

/// Fallback for unsupported methods on the collection endpoints.
pub(crate) async fn method_not_allowed() -> Response {
    let mut response = ApiError::new(
        StatusCode::METHOD_NOT_ALLOWED,
        CODE_METHOD_NOT_ALLOWED,
        "Method not allowed",
    )
    .into_response();
    response
        .headers_mut()
        .insert(header::ALLOW, HeaderValue::from_static(ALLOWED_METHODS));
    response
}
