//! # warden_api
//!
//! HTTP API library for Warden.

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod validation;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::http::{HeaderValue, Method, header};
use axum::routing::{delete, get, patch, post};
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;
use warden_core::auth::engine::AuthEngine;
use warden_core::auth::federation::Federation;
use warden_core::clock::Clock;
use warden_core::context::RequestContext;
use warden_core::mail::Mailer;
use warden_core::store::{Store, UserStore};
use warden_core::users::UserService;

use crate::config::ApiConfig;
use crate::handlers::{auth, health, oauth, users};
use crate::services::oauth::GithubOAuth;

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<AuthEngine>,
    pub federation: Arc<Federation>,
    pub users: Arc<UserService>,
    /// `None` when GitHub login is not configured.
    pub github: Option<Arc<GithubOAuth>>,
    /// Only used by the health check.
    pub pool: Option<PgPool>,
    pub config: Arc<ApiConfig>,
    pub clock: Arc<dyn Clock>,
    /// Cancelled on shutdown; every request context is a child of it.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        config: ApiConfig,
        store: Arc<dyn Store>,
        mailer: Arc<dyn Mailer>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let user_store: Arc<dyn UserStore> = store.clone();
        let engine = AuthEngine::new(config.auth.clone(), store, mailer, clock.clone());
        let github = config
            .github
            .clone()
            .map(|github| Arc::new(GithubOAuth::new(github)));
        Self {
            engine: Arc::new(engine),
            federation: Arc::new(Federation::new(user_store.clone())),
            users: Arc::new(UserService::new(user_store)),
            github,
            pool: None,
            config: Arc::new(config),
            clock,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_pool(mut self, pool: PgPool) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Deadline and cancellation for one inbound request.
    pub fn request_context(&self) -> RequestContext {
        RequestContext::with_timeout(self.config.request_timeout)
            .with_cancellation(self.shutdown.child_token())
    }
}

/// Run embedded database migrations.
///
/// Delegates to `warden_core::migrate::migrate()` which owns the migration files.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    warden_core::migrate::migrate(pool).await
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .max_age(Duration::from_secs(12 * 60 * 60))
}

/// Builds the Axum router with all routes and shared state.
pub fn router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.allowed_origins);

    // Public routes (no auth required)
    let public = Router::new()
        .route(routes::GET_HEALTH, get(health::health))
        .route(routes::POST_AUTH_REGISTER, post(auth::register_handler))
        .route(routes::POST_AUTH_LOGIN, post(auth::login_handler))
        .route(routes::POST_AUTH_LOGOUT, post(auth::logout_handler))
        .route(routes::POST_AUTH_REFRESH, post(auth::refresh_handler))
        .route(
            routes::POST_AUTH_FORGOT_PASSWORD,
            post(auth::forgot_password_handler),
        )
        .route(
            routes::POST_AUTH_RESET_PASSWORD,
            post(auth::reset_password_handler),
        )
        .route(
            routes::POST_AUTH_VERIFY_EMAIL,
            post(auth::verify_email_handler),
        )
        .route(
            routes::POST_AUTH_VERIFY_EMAIL_RESEND,
            post(auth::resend_verify_email_handler),
        )
        .route(routes::GET_AUTH_PROVIDER, get(oauth::begin_handler))
        .route(
            routes::GET_AUTH_PROVIDER_CALLBACK,
            get(oauth::callback_handler),
        );

    // Protected routes (require auth)
    let protected = Router::new()
        .route(routes::GET_USER_ME, get(users::me_handler))
        .route(routes::GET_USER_ALL, get(users::list_users_handler))
        .route(routes::GET_USER_EMAIL, get(users::get_user_by_email_handler))
        .route(routes::GET_USER_ID, get(users::get_user_handler))
        .route(routes::PATCH_USER_UPDATE, patch(users::update_user_handler))
        .route(routes::DELETE_USER_ID, delete(users::delete_user_handler))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::require_auth,
        ));

    Router::new()
        .merge(public)
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
