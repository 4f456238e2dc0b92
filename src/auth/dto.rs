use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::services::{
    ChangePasswordInput, OtpIssued, ResetPasswordInput, Session, SignUpInput,
};
use crate::users::repo_types::User;

/// Request body for both signup flavours.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupRequest {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub is_admin: bool,
}

impl From<SignupRequest> for SignUpInput {
    fn from(req: SignupRequest) -> Self {
        Self {
            first_name: req.first_name,
            last_name: req.last_name,
            email: req.email,
            password: req.password,
            is_admin: req.is_admin,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub email: String,
    pub otp: String,
}

/// Body of resend-otp and send-reset-otp.
#[derive(Debug, Deserialize)]
pub struct EmailRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    pub email: String,
    pub otp: String,
    pub new_password: String,
    pub confirm_password: String,
}

impl From<ResetPasswordRequest> for ResetPasswordInput {
    fn from(req: ResetPasswordRequest) -> Self {
        Self {
            email: req.email,
            otp: req.otp,
            new_password: req.new_password,
            confirm_password: req.confirm_password,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub old_password: String,
    pub new_password: String,
    pub confirm_new_password: String,
}

impl From<ChangePasswordRequest> for ChangePasswordInput {
    fn from(req: ChangePasswordRequest) -> Self {
        Self {
            old_password: req.old_password,
            new_password: req.new_password,
            confirm_new_password: req.confirm_new_password,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct GoogleCallbackQuery {
    pub access_token: Option<String>,
}

/// Public part of the user returned to the client. Never carries the hash or the OTP.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub is_admin: bool,
    pub is_verified: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_login_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub updated_at: Option<OffsetDateTime>,
}

impl From<User> for PublicUser {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            first_name: user.first_name,
            last_name: user.last_name,
            email: user.email,
            is_admin: user.is_admin,
            is_verified: user.is_verified,
            last_login_at: user.last_login_at,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

/// Response returned after signup, login or federated login.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    #[serde(flatten)]
    pub user: PublicUser,
    pub access_token: String,
    pub refresh_token: String,
}

impl From<Session> for AuthResponse {
    fn from(session: Session) -> Self {
        Self {
            user: session.user.into(),
            access_token: session.tokens.access_token,
            refresh_token: session.tokens.refresh_token,
        }
    }
}

/// Confirmation that a code was issued. The code itself is not echoed.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OtpSentResponse {
    pub email: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

impl From<OtpIssued> for OtpSentResponse {
    fn from(issued: OtpIssued) -> Self {
        Self {
            email: issued.email,
            expires_at: issued.expires_at,
        }
    }
}
