//! User lookup and self-service profile handlers. All routes require auth.

use axum::extract::{Query, State};
use axum::{Extension, Json};
use warden_core::models::auth::{User, UserUpdate};

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthenticatedUser;
use crate::models::{EmailQuery, MessageResponse, UpdateUserRequest};
use crate::validation::{IdPath, ValidJson};

/// `GET /api/user/me`: The caller's own record.
pub async fn me_handler(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(claims)): Extension<AuthenticatedUser>,
) -> AppResult<Json<User>> {
    let user = state
        .users
        .current_user(&state.request_context(), &claims)
        .await?;
    Ok(Json(user))
}

/// `GET /api/user/{id}`
pub async fn get_user_handler(
    State(state): State<AppState>,
    IdPath(id): IdPath,
) -> AppResult<Json<User>> {
    let user = state.users.get_user(&state.request_context(), id).await?;
    Ok(Json(user))
}

/// `GET /api/user/get-all`
pub async fn list_users_handler(State(state): State<AppState>) -> AppResult<Json<Vec<User>>> {
    let users = state.users.list_users(&state.request_context()).await?;
    Ok(Json(users))
}

/// `GET /api/user/email?email=`
pub async fn get_user_by_email_handler(
    State(state): State<AppState>,
    Query(query): Query<EmailQuery>,
) -> AppResult<Json<User>> {
    let email = query.email.trim();
    if email.is_empty() {
        return Err(AppError::BadRequest("Email is required".into()));
    }
    let user = state
        .users
        .get_user_by_email(&state.request_context(), email)
        .await?;
    Ok(Json(user))
}

/// `PATCH /api/user/update`: Change the caller's own profile.
pub async fn update_user_handler(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(claims)): Extension<AuthenticatedUser>,
    ValidJson(body): ValidJson<UpdateUserRequest>,
) -> AppResult<Json<User>> {
    let update = UserUpdate {
        id: body.id,
        username: body.username,
        avatar_url: body.avatar_url,
        email: body.email,
    };
    let user = state
        .users
        .update_user(&state.request_context(), &claims, &update)
        .await?;
    Ok(Json(user))
}

/// `DELETE /api/user/delete/{id}`: Delete the caller's own account.
pub async fn delete_user_handler(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(claims)): Extension<AuthenticatedUser>,
    IdPath(id): IdPath,
) -> AppResult<Json<MessageResponse>> {
    state
        .users
        .delete_user(&state.request_context(), &claims, id)
        .await?;
    Ok(Json(MessageResponse::new("User deleted successfully")))
}
