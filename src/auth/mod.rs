use crate::state::AppState;
use axum::Router;

mod claims;
pub(crate) mod dto;
pub(crate) mod extractors;
pub mod google;
pub mod handlers;
pub mod jwt;
pub mod otp;
pub mod password;
pub mod services;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(handlers::auth_routes())
        .merge(handlers::me_routes())
}
