//! Authentication request handlers.
//!
//! Tokens travel in cookies only; response bodies carry a message.

use axum::Json;
use axum::extract::{Query, State};
use axum_extra::extract::cookie::CookieJar;
use warden_core::auth::engine::Registration;

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::middleware::client::ClientMeta;
use crate::models::{
    EmailQuery, ForgotPasswordRequest, LoginRequest, MessageResponse, RegisterRequest,
    ResetPasswordRequest, TokenIdQuery,
};
use crate::services::cookies::{self, REFRESH_COOKIE};
use crate::validation::ValidJson;

fn refresh_token(jar: &CookieJar) -> AppResult<String> {
    jar.get(REFRESH_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::Unauthorized("Refresh token not found".into()))
}

/// `POST /api/auth/register`: Create an account and mail its verification link.
pub async fn register_handler(
    State(state): State<AppState>,
    ValidJson(body): ValidJson<RegisterRequest>,
) -> AppResult<Json<MessageResponse>> {
    let mut registration = Registration::new(body.email, body.password);
    if let Some(username) = body.username {
        registration = registration.with_username(username);
    }
    state
        .engine
        .register(&state.request_context(), &registration)
        .await?;
    Ok(Json(MessageResponse::new("User registered successfully")))
}

/// `POST /api/auth/login`: Check credentials and set the session cookies.
pub async fn login_handler(
    State(state): State<AppState>,
    ClientMeta(client): ClientMeta,
    jar: CookieJar,
    ValidJson(body): ValidJson<LoginRequest>,
) -> AppResult<(CookieJar, Json<MessageResponse>)> {
    let pair = state
        .engine
        .login(&state.request_context(), &body.email, &body.password, &client)
        .await?;
    let jar = cookies::with_session(jar, &state.config.cookies, &pair, state.clock.now());
    Ok((jar, Json(MessageResponse::new("User logged in successfully"))))
}

/// `POST /api/auth/logout`: End the session of the refresh cookie and clear both cookies.
pub async fn logout_handler(
    State(state): State<AppState>,
    jar: CookieJar,
) -> AppResult<(CookieJar, Json<MessageResponse>)> {
    let token = refresh_token(&jar)?;
    state
        .engine
        .logout(&state.request_context(), &token)
        .await?;
    let jar = cookies::without_session(jar, &state.config.cookies);
    Ok((jar, Json(MessageResponse::new("User logged out successfully"))))
}

/// `POST /api/auth/refresh`: Rotate the refresh cookie into a new pair.
pub async fn refresh_handler(
    State(state): State<AppState>,
    ClientMeta(client): ClientMeta,
    jar: CookieJar,
) -> AppResult<(CookieJar, Json<MessageResponse>)> {
    let token = refresh_token(&jar)?;
    let pair = state
        .engine
        .refresh(&state.request_context(), &token, &client)
        .await?;
    let jar = cookies::with_session(jar, &state.config.cookies, &pair, state.clock.now());
    Ok((
        jar,
        Json(MessageResponse::new("Access token refreshed successfully")),
    ))
}

/// `POST /api/auth/verify/email?id=`: Consume a verification link.
pub async fn verify_email_handler(
    State(state): State<AppState>,
    Query(query): Query<TokenIdQuery>,
) -> AppResult<Json<MessageResponse>> {
    if query.id.trim().is_empty() {
        return Err(AppError::BadRequest("Token id is required".into()));
    }
    state
        .engine
        .verify_email(&state.request_context(), &query.id)
        .await?;
    Ok(Json(MessageResponse::new("Email verified successfully")))
}

/// `POST /api/auth/verify/email/resend?email=`: Mail a fresh verification link.
pub async fn resend_verify_email_handler(
    State(state): State<AppState>,
    Query(query): Query<EmailQuery>,
) -> AppResult<Json<MessageResponse>> {
    let email = query.email.trim();
    if email.is_empty() {
        return Err(AppError::BadRequest("Email is required".into()));
    }
    state
        .engine
        .create_verify_email(&state.request_context(), email)
        .await?;
    Ok(Json(MessageResponse::new(
        "Verification email resent successfully",
    )))
}

/// `POST /api/auth/forgot-password`: Mail a password reset link.
pub async fn forgot_password_handler(
    State(state): State<AppState>,
    ValidJson(body): ValidJson<ForgotPasswordRequest>,
) -> AppResult<Json<MessageResponse>> {
    state
        .engine
        .forgot_password(&state.request_context(), &body.email)
        .await?;
    Ok(Json(MessageResponse::new(
        "Password reset link sent to your email",
    )))
}

/// `POST /api/auth/reset-password`: Consume a reset link and set the new password.
pub async fn reset_password_handler(
    State(state): State<AppState>,
    ValidJson(body): ValidJson<ResetPasswordRequest>,
) -> AppResult<Json<MessageResponse>> {
    state
        .engine
        .reset_password(&state.request_context(), &body.id, &body.password)
        .await?;
    Ok(Json(MessageResponse::new("Password reset successfully")))
}
