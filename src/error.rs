use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::error;

use crate::response::ApiResponse;
use crate::users::repo::StoreError;

/// Domain error shared by the services and the HTTP layer.
///
/// Every variant maps to a fixed client-facing message; internal details
/// (driver errors, signing failures) are logged and never echoed back.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("email already registered")]
    DuplicateEmail,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("account not verified")]
    AccountUnverified,

    #[error("invalid otp")]
    InvalidOtp,

    #[error("otp expired")]
    OtpExpired,

    #[error("password shorter than {0} characters")]
    PasswordTooShort(usize),

    #[error("passwords do not match")]
    PasswordMismatch,

    #[error("user not found")]
    UserNotFound,

    #[error("missing bearer token")]
    MissingToken,

    #[error("token expired")]
    ExpiredToken,

    #[error("malformed token")]
    MalformedToken,

    #[error("admin privileges required")]
    Forbidden,

    #[error("external identity rejected: {0}")]
    ExternalIdentity(String),

    #[error("storage deadline exceeded")]
    Timeout,

    #[error("token signing failed: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),

    #[error("storage failure: {0}")]
    Storage(anyhow::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_)
            | Self::PasswordTooShort(_)
            | Self::PasswordMismatch
            | Self::InvalidOtp
            | Self::OtpExpired => StatusCode::BAD_REQUEST,

            Self::InvalidCredentials
            | Self::MissingToken
            | Self::ExpiredToken
            | Self::MalformedToken
            | Self::ExternalIdentity(_) => StatusCode::UNAUTHORIZED,

            Self::AccountUnverified | Self::Forbidden => StatusCode::FORBIDDEN,
            Self::UserNotFound => StatusCode::NOT_FOUND,
            Self::DuplicateEmail => StatusCode::CONFLICT,
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,

            Self::Signing(_) | Self::Storage(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message sent to the client.
    pub fn public_message(&self) -> String {
        match self {
            Self::Validation(msg) => msg.clone(),
            Self::DuplicateEmail => "This email already exists".into(),
            // Shared by unknown email and wrong password.
            Self::InvalidCredentials => "Invalid email or password".into(),
            Self::AccountUnverified => "Account verification incomplete".into(),
            Self::InvalidOtp => "Invalid OTP".into(),
            Self::OtpExpired => "OTP has expired".into(),
            Self::PasswordTooShort(min) => {
                format!("Password must be at least {min} characters long")
            }
            Self::PasswordMismatch => "Passwords do not match".into(),
            Self::UserNotFound => "User does not exist".into(),
            Self::MissingToken => "No Authorization header provided".into(),
            Self::ExpiredToken => "Token has expired".into(),
            Self::MalformedToken => "The token is invalid".into(),
            Self::Forbidden => "You don't have the permission to access this data".into(),
            Self::ExternalIdentity(_) => "Unable to verify external identity".into(),
            Self::Timeout => "The request took too long to complete".into(),
            Self::Signing(_) => "Failed to generate authentication tokens".into(),
            Self::Storage(_) | Self::Internal(_) => "Internal server error".into(),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => AppError::UserNotFound,
            StoreError::DuplicateEmail => AppError::DuplicateEmail,
            StoreError::StaleOtp => AppError::InvalidOtp,
            StoreError::Timeout => AppError::Timeout,
            StoreError::Backend(e) => AppError::Storage(e),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Validation(format!("Invalid request payload: {}", rejection.body_text()))
    }
}

impl From<PathRejection> for AppError {
    fn from(_: PathRejection) -> Self {
        AppError::Validation("Invalid user id".into())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::Validation(format!("Invalid query string: {}", rejection.body_text()))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self, %status, "request failed");
        }
        ApiResponse::message(status, self.public_message()).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
