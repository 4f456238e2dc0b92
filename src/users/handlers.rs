use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    routing::{delete, get, put},
    Json, Router,
};
use tracing::instrument;
use uuid::Uuid;

use super::{
    dto::{ListUsersQuery, UpdateUserRequest},
    repo_types::Page,
};
use crate::{
    auth::{dto::PublicUser, extractors::AdminUser},
    error::AppResult,
    response::ApiResponse,
    state::AppState,
};

/// Admin-only routes. Every handler takes [`AdminUser`], so the role claim is
/// re-checked on each request.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users))
        .route("/users/:id", get(get_user))
        .route("/update-user/:id", put(update_user))
        .route("/delete-user/:id", delete(delete_user))
}

#[instrument(skip(state, admin, query), fields(admin_id = %admin.0.sub))]
pub async fn list_users(
    State(state): State<AppState>,
    admin: AdminUser,
    query: Result<Query<ListUsersQuery>, QueryRejection>,
) -> AppResult<ApiResponse<Page<PublicUser>>> {
    let Query(query) = query?;
    let page = state
        .users
        .list_users(query.page_request(), query.filter())
        .await?;
    Ok(ApiResponse::ok(
        "Users fetched successfully",
        page.map(PublicUser::from),
    ))
}

#[instrument(skip(state, admin, id), fields(admin_id = %admin.0.sub))]
pub async fn get_user(
    State(state): State<AppState>,
    admin: AdminUser,
    id: Result<Path<Uuid>, PathRejection>,
) -> AppResult<ApiResponse<PublicUser>> {
    let Path(id) = id?;
    let user = state.users.get_user(id).await?;
    Ok(ApiResponse::ok("User fetched successfully", user.into()))
}

#[instrument(skip(state, admin, id, payload), fields(admin_id = %admin.0.sub))]
pub async fn update_user(
    State(state): State<AppState>,
    admin: AdminUser,
    id: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<UpdateUserRequest>, JsonRejection>,
) -> AppResult<ApiResponse<PublicUser>> {
    let Path(id) = id?;
    let Json(payload) = payload?;
    let user = state.users.update_user(id, payload.into()).await?;
    Ok(ApiResponse::ok("User updated successfully", user.into()))
}

#[instrument(skip(state, admin, id), fields(admin_id = %admin.0.sub))]
pub async fn delete_user(
    State(state): State<AppState>,
    admin: AdminUser,
    id: Result<Path<Uuid>, PathRejection>,
) -> AppResult<ApiResponse<()>> {
    let Path(id) = id?;
    state.users.delete_user(id).await?;
    Ok(ApiResponse::message(StatusCode::OK, "User deleted successfully"))
}
