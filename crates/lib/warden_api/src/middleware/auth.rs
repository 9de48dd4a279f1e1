//! Authentication middleware: access token from cookie or Bearer header.

use axum::http::header::AUTHORIZATION;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use warden_core::models::auth::TokenClaims;

use crate::AppState;
use crate::error::AppError;
use crate::services::cookies::ACCESS_COOKIE;

/// Claims of the verified access token, stored in request extensions.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub TokenClaims);

/// Token from `Authorization: Bearer`, else the access cookie.
fn access_token(request: &Request, jar: &CookieJar) -> Result<String, AppError> {
    if let Some(header) = request.headers().get(AUTHORIZATION) {
        let value = header
            .to_str()
            .map_err(|_| AppError::Unauthorized("Invalid authorization header".into()))?;
        return value
            .strip_prefix("Bearer ")
            .map(str::to_string)
            .ok_or_else(|| AppError::Unauthorized("Invalid authorization scheme".into()));
    }
    jar.get(ACCESS_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::Unauthorized("Missing access token".into()))
}

/// Axum middleware: verifies the access token and injects
/// [`AuthenticatedUser`] into request extensions.
pub async fn require_auth(
    State(state): State<AppState>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = access_token(&request, &jar)?;
    let claims = state
        .engine
        .verify_access(&token)
        .map_err(|_| AppError::Unauthorized("Invalid or expired token".into()))?;

    request.extensions_mut().insert(AuthenticatedUser(claims));
    Ok(next.run(request).await)
}
