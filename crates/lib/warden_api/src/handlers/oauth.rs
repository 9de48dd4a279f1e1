//! OAuth login: redirect to the provider, then finish on its callback.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::response::Redirect;
use axum_extra::extract::cookie::CookieJar;
use tracing::{info, warn};

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::middleware::client::ClientMeta;
use crate::models::{MessageResponse, OAuthCallbackQuery};
use crate::services::cookies;
use crate::services::oauth::{GITHUB_PROVIDER, GithubOAuth, OAuthError};

fn provider_client(state: &AppState, provider: &str) -> Result<Arc<GithubOAuth>, OAuthError> {
    match (provider, &state.github) {
        (GITHUB_PROVIDER, Some(github)) => Ok(Arc::clone(github)),
        _ => Err(OAuthError::UnknownProvider(provider.to_string())),
    }
}

/// `GET /api/auth/{provider}`: Redirect the browser to the provider's consent page.
pub async fn begin_handler(
    State(state): State<AppState>,
    Path(provider): Path<String>,
) -> AppResult<Redirect> {
    let client = provider_client(&state, &provider)?;
    let url = client.authorize_url()?;
    Ok(Redirect::to(url.as_str()))
}

/// `GET /api/auth/{provider}/callback`: Resolve the identity, find or create
/// the user and set the session cookies.
pub async fn callback_handler(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(query): Query<OAuthCallbackQuery>,
    ClientMeta(client_info): ClientMeta,
    jar: CookieJar,
) -> AppResult<(CookieJar, Json<MessageResponse>)> {
    let client = provider_client(&state, &provider)?;
    if let Some(error) = query.error {
        warn!(provider = %provider, error = %error, "provider denied authorization");
        return Err(AppError::Unauthorized(format!("Authorization denied: {error}")));
    }
    let (Some(code), Some(csrf_state)) = (query.code, query.state) else {
        return Err(AppError::BadRequest("Missing code or state".into()));
    };

    let identity = client.complete(&code, &csrf_state).await?;
    let ctx = state.request_context();
    let user = state.federation.oauth_login(&ctx, &identity).await?;
    let pair = state
        .engine
        .issue_session(&ctx, &user, &client_info)
        .await?;
    info!(user_id = user.id, provider = %provider, "user logged in via oauth");

    let jar = cookies::with_session(jar, &state.config.cookies, &pair, state.clock.now());
    Ok((jar, Json(MessageResponse::new("User logged in successfully"))))
}
