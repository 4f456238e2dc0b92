use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::{info, instrument};

use crate::{
    auth::{
        dto::{
            AuthResponse, ChangePasswordRequest, EmailRequest, GoogleCallbackQuery, LoginRequest,
            OtpSentResponse, PublicUser, ResetPasswordRequest, SignupRequest, VerifyRequest,
        },
        extractors::AuthUser,
    },
    error::{AppError, AppResult},
    response::ApiResponse,
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/signup", post(signup))
        .route("/auth/register", post(register))
        .route("/auth/verify-account", post(verify_account))
        .route("/auth/resend-otp", post(resend_otp))
        .route("/auth/send-reset-otp", post(send_reset_otp))
        .route("/auth/login", post(login))
        .route("/auth/reset-password", post(reset_password))
        .route("/auth/change-password", post(change_password))
        .route("/auth/google/callback", get(google_callback))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/auth/me", get(get_me))
}

#[instrument(skip(state, payload))]
pub async fn signup(
    State(state): State<AppState>,
    payload: Result<Json<SignupRequest>, JsonRejection>,
) -> AppResult<ApiResponse<AuthResponse>> {
    let Json(payload) = payload?;
    let session = state.accounts.sign_up(payload.into()).await?;
    Ok(ApiResponse::created("User created successfully", session.into()))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<SignupRequest>, JsonRejection>,
) -> AppResult<ApiResponse<OtpSentResponse>> {
    let Json(payload) = payload?;
    let issued = state.accounts.sign_up_with_otp(payload.into()).await?;
    Ok(ApiResponse::created(
        "Account created, an OTP has been sent to your email",
        issued.into(),
    ))
}

#[instrument(skip(state, payload))]
pub async fn verify_account(
    State(state): State<AppState>,
    payload: Result<Json<VerifyRequest>, JsonRejection>,
) -> AppResult<ApiResponse<PublicUser>> {
    let Json(payload) = payload?;
    let user = state
        .accounts
        .verify_account(&payload.email, &payload.otp)
        .await?;
    Ok(ApiResponse::ok("Account verified successfully", user.into()))
}

#[instrument(skip(state, payload))]
pub async fn resend_otp(
    State(state): State<AppState>,
    payload: Result<Json<EmailRequest>, JsonRejection>,
) -> AppResult<ApiResponse<OtpSentResponse>> {
    let Json(payload) = payload?;
    let issued = state.accounts.resend_otp(&payload.email).await?;
    Ok(ApiResponse::created("OTP sent successfully", issued.into()))
}

#[instrument(skip(state, payload))]
pub async fn send_reset_otp(
    State(state): State<AppState>,
    payload: Result<Json<EmailRequest>, JsonRejection>,
) -> AppResult<ApiResponse<OtpSentResponse>> {
    let Json(payload) = payload?;
    let issued = state.accounts.resend_otp(&payload.email).await?;
    info!(email = %issued.email, "password reset requested");
    Ok(ApiResponse::created(
        "A password reset OTP has been sent to your email",
        issued.into(),
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> AppResult<ApiResponse<AuthResponse>> {
    let Json(payload) = payload?;
    let session = state
        .accounts
        .login(&payload.email, &payload.password)
        .await?;
    Ok(ApiResponse::ok("Login successful", session.into()))
}

#[instrument(skip(state, payload))]
pub async fn reset_password(
    State(state): State<AppState>,
    payload: Result<Json<ResetPasswordRequest>, JsonRejection>,
) -> AppResult<ApiResponse<()>> {
    let Json(payload) = payload?;
    state.accounts.reset_password(payload.into()).await?;
    Ok(ApiResponse::message(StatusCode::OK, "Password reset successfully"))
}

#[instrument(skip(state, claims, payload), fields(user_id = %claims.sub))]
pub async fn change_password(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    payload: Result<Json<ChangePasswordRequest>, JsonRejection>,
) -> AppResult<ApiResponse<()>> {
    let Json(payload) = payload?;
    state
        .accounts
        .change_password(&claims.email, payload.into())
        .await?;
    Ok(ApiResponse::message(StatusCode::OK, "Password changed successfully"))
}

#[instrument(skip(state, query))]
pub async fn google_callback(
    State(state): State<AppState>,
    query: Result<Query<GoogleCallbackQuery>, QueryRejection>,
) -> AppResult<ApiResponse<AuthResponse>> {
    let Query(query) = query?;
    let access_token = query
        .access_token
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| AppError::Validation("access_token is required".into()))?;

    let profile = state.identity.fetch_profile(&access_token).await?;
    info!(provider = state.identity.name(), email = %profile.email, "external identity accepted");
    let outcome = state.accounts.federated_login_or_create(profile).await?;

    Ok(if outcome.created {
        ApiResponse::created("User created successfully", outcome.session.into())
    } else {
        ApiResponse::ok("Login successful", outcome.session.into())
    })
}

#[instrument(skip(state, claims), fields(user_id = %claims.sub))]
pub async fn get_me(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
) -> AppResult<ApiResponse<PublicUser>> {
    let user = state.users.get_user(claims.sub).await?;
    Ok(ApiResponse::ok("User fetched successfully", user.into()))
}
