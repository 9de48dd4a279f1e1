//! Auth cookies.
//!
//! `access_token` is readable by scripts so the frontend can attach it;
//! `refresh_token` is httpOnly.

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use time::Duration;
use warden_core::models::auth::TokenPair;

/// Cookie name for the access token.
pub const ACCESS_COOKIE: &str = "access_token";
/// Cookie name for the refresh token.
pub const REFRESH_COOKIE: &str = "refresh_token";

/// Attributes shared by both cookies.
#[derive(Debug, Clone, Default)]
pub struct CookieSettings {
    /// `None` gives host-only cookies.
    pub domain: Option<String>,
    /// Set in production.
    pub secure: bool,
}

fn build(
    settings: &CookieSettings,
    name: &'static str,
    value: String,
    http_only: bool,
    max_age: Duration,
) -> Cookie<'static> {
    let mut builder = Cookie::build((name, value))
        .http_only(http_only)
        .secure(settings.secure)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(max_age);
    if let Some(domain) = &settings.domain {
        builder = builder.domain(domain.clone());
    }
    builder.build()
}

/// Cookie carrying the access token.
pub fn access_cookie(settings: &CookieSettings, token: &str, max_age_secs: i64) -> Cookie<'static> {
    build(
        settings,
        ACCESS_COOKIE,
        token.to_string(),
        false,
        Duration::seconds(max_age_secs),
    )
}

/// httpOnly cookie carrying the refresh token.
pub fn refresh_cookie(settings: &CookieSettings, token: &str, max_age_secs: i64) -> Cookie<'static> {
    build(
        settings,
        REFRESH_COOKIE,
        token.to_string(),
        true,
        Duration::seconds(max_age_secs),
    )
}

/// Expired access cookie, clears client state.
pub fn clear_access_cookie(settings: &CookieSettings) -> Cookie<'static> {
    build(settings, ACCESS_COOKIE, String::new(), false, Duration::ZERO)
}

/// Expired refresh cookie, clears client state.
pub fn clear_refresh_cookie(settings: &CookieSettings) -> Cookie<'static> {
    build(settings, REFRESH_COOKIE, String::new(), true, Duration::ZERO)
}

/// Add both session cookies for `pair`, each living as long as its token.
pub fn with_session(
    jar: CookieJar,
    settings: &CookieSettings,
    pair: &TokenPair,
    now: chrono::DateTime<chrono::Utc>,
) -> CookieJar {
    let access_secs = (pair.access_expires_at - now).num_seconds().max(0);
    let refresh_secs = (pair.refresh_expires_at - now).num_seconds().max(0);
    jar.add(access_cookie(settings, &pair.access_token, access_secs))
        .add(refresh_cookie(settings, &pair.refresh_token, refresh_secs))
}

/// Remove both session cookies.
pub fn without_session(jar: CookieJar, settings: &CookieSettings) -> CookieJar {
    jar.add(clear_access_cookie(settings))
        .add(clear_refresh_cookie(settings))
}
