use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use tracing::warn;

use super::{claims::Claims, jwt::JwtKeys};
use crate::error::AppError;

/// Extracts and validates the bearer access token.
pub struct AuthUser(pub Claims);

/// Like [`AuthUser`], but additionally requires the `isAdmin` claim.
pub struct AdminUser(pub Claims);

fn bearer_token(parts: &Parts) -> Result<&str, AppError> {
    // Read Authorization header
    let auth = parts
        .headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or(AppError::MissingToken)?;

    // Expect "Bearer <token>"
    auth.strip_prefix("Bearer ")
        .or_else(|| auth.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(AppError::MalformedToken)
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    JwtKeys: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let keys = JwtKeys::from_ref(state);
        let token = bearer_token(parts)?;
        let claims = keys.verify(token).map_err(|e| {
            warn!(error = %e, "rejected bearer token");
            e
        })?;
        Ok(AuthUser(claims))
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AdminUser
where
    S: Send + Sync,
    JwtKeys: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let AuthUser(claims) = AuthUser::from_request_parts(parts, state).await?;
        if !claims.is_admin {
            warn!(user_id = %claims.sub, "admin route refused");
            return Err(AppError::Forbidden);
        }
        Ok(AdminUser(claims))
    }
}
