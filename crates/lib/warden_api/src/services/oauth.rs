//! GitHub OAuth handshake.
//!
//! Builds the authorize redirect with a CSRF state, exchanges the callback
//! code for a provider token and reads the profile plus primary verified
//! email. The result is an [`OAuthIdentity`] for
//! [`warden_core::auth::federation::Federation`].

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Deserialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::debug;
use url::Url;
use warden_core::models::auth::OAuthIdentity;

/// TTL for pending state entries (10 minutes).
const STATE_TTL: Duration = Duration::from_secs(600);

pub const GITHUB_PROVIDER: &str = "github";
const GITHUB_AUTHORIZE_URL: &str = "https://github.com/login/oauth/authorize";
const GITHUB_TOKEN_URL: &str = "https://github.com/login/oauth/access_token";
const GITHUB_API_URL: &str = "https://api.github.com";
const GITHUB_SCOPES: &str = "read:user user:email";

/// OAuth handshake errors.
#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error("invalid or expired state")]
    InvalidState,

    #[error("provider request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider returned an error: {0}")]
    Provider(String),

    #[error("no verified email on the provider account")]
    NoVerifiedEmail,

    #[error("bad url: {0}")]
    Url(#[from] url::ParseError),
}

/// GitHub OAuth app credentials.
#[derive(Clone)]
pub struct GithubConfig {
    pub client_id: String,
    pub client_secret: String,
    /// Must match the callback URL registered with the OAuth app.
    pub redirect_uri: String,
}

impl fmt::Debug for GithubConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GithubConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("redirect_uri", &self.redirect_uri)
            .finish()
    }
}

/// Generate a cryptographic state parameter (CSRF token).
pub fn generate_state() -> String {
    use base64::Engine;
    use rand::RngCore;

    let mut bytes = [0u8; 24];
    rand::rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// In-memory store for pending state values between redirect and callback.
pub struct OAuthStateStore {
    states: DashMap<String, Instant>,
}

impl OAuthStateStore {
    pub fn new() -> Self {
        Self {
            states: DashMap::new(),
        }
    }

    pub fn insert(&self, state: String) {
        self.states.insert(state, Instant::now());
    }

    /// Remove the state. `false` if unknown or older than the TTL.
    pub fn take(&self, state: &str) -> bool {
        match self.states.remove(state) {
            Some((_, created_at)) => created_at.elapsed() <= STATE_TTL,
            None => false,
        }
    }

    /// Evict expired entries.
    pub fn cleanup(&self) {
        self.states
            .retain(|_, created_at| created_at.elapsed() <= STATE_TTL);
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Spawn a periodic cleanup task.
    pub fn spawn_cleanup_task(self: &Arc<Self>) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                store.cleanup();
            }
        })
    }
}

impl Default for OAuthStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GithubUser {
    id: i64,
    login: String,
    name: Option<String>,
    avatar_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GithubEmail {
    email: String,
    primary: bool,
    verified: bool,
}

/// Endpoints used for the handshake. Overridable for tests.
#[derive(Debug, Clone)]
pub struct GithubEndpoints {
    pub authorize_url: String,
    pub token_url: String,
    pub api_url: String,
}

impl Default for GithubEndpoints {
    fn default() -> Self {
        Self {
            authorize_url: GITHUB_AUTHORIZE_URL.into(),
            token_url: GITHUB_TOKEN_URL.into(),
            api_url: GITHUB_API_URL.into(),
        }
    }
}

/// GitHub login client.
pub struct GithubOAuth {
    config: GithubConfig,
    endpoints: GithubEndpoints,
    http: reqwest::Client,
    states: Arc<OAuthStateStore>,
}

impl GithubOAuth {
    pub fn new(config: GithubConfig) -> Self {
        Self::with_endpoints(config, GithubEndpoints::default())
    }

    pub fn with_endpoints(config: GithubConfig, endpoints: GithubEndpoints) -> Self {
        Self {
            config,
            endpoints,
            http: reqwest::Client::new(),
            states: Arc::new(OAuthStateStore::new()),
        }
    }

    pub fn states(&self) -> &Arc<OAuthStateStore> {
        &self.states
    }

    /// Authorize URL to redirect the browser to. Registers a fresh state.
    pub fn authorize_url(&self) -> Result<Url, OAuthError> {
        let state = generate_state();
        let url = Url::parse_with_params(
            &self.endpoints.authorize_url,
            &[
                ("client_id", self.config.client_id.as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("scope", GITHUB_SCOPES),
                ("state", state.as_str()),
            ],
        )?;
        self.states.insert(state);
        Ok(url)
    }

    /// Validate the callback and resolve the provider identity.
    pub async fn complete(&self, code: &str, state: &str) -> Result<OAuthIdentity, OAuthError> {
        if !self.states.take(state) {
            return Err(OAuthError::InvalidState);
        }
        let token = self.exchange_code(code).await?;
        self.fetch_identity(&token).await
    }

    async fn exchange_code(&self, code: &str) -> Result<String, OAuthError> {
        let params = [
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
        ];
        let resp = self
            .http
            .post(&self.endpoints.token_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&params)
            .send()
            .await?
            .error_for_status()?
            .json::<TokenResponse>()
            .await?;

        match (resp.access_token, resp.error) {
            (Some(token), None) => Ok(token),
            (_, Some(error)) => Err(OAuthError::Provider(match resp.error_description {
                Some(desc) => format!("{error}: {desc}"),
                None => error,
            })),
            (None, None) => Err(OAuthError::Provider("token response without access_token".into())),
        }
    }

    async fn fetch_identity(&self, token: &str) -> Result<OAuthIdentity, OAuthError> {
        let user = self
            .api_get(token, "user")
            .await?
            .json::<GithubUser>()
            .await?;
        let emails = self
            .api_get(token, "user/emails")
            .await?
            .json::<Vec<GithubEmail>>()
            .await?;
        let email = pick_email(&emails).ok_or(OAuthError::NoVerifiedEmail)?;
        debug!(github_id = user.id, "github identity resolved");

        Ok(OAuthIdentity {
            provider: GITHUB_PROVIDER.into(),
            external_id: user.id.to_string(),
            email,
            display_name: user.name.filter(|n| !n.trim().is_empty()).unwrap_or(user.login),
            avatar_url: user.avatar_url,
        })
    }

    async fn api_get(&self, token: &str, path: &str) -> Result<reqwest::Response, OAuthError> {
        let url = format!("{}/{path}", self.endpoints.api_url.trim_end_matches('/'));
        Ok(self
            .http
            .get(url)
            .bearer_auth(token)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .header(reqwest::header::USER_AGENT, "warden")
            .send()
            .await?
            .error_for_status()?)
    }
}

/// Primary verified address, else any verified one.
fn pick_email(emails: &[GithubEmail]) -> Option<String> {
    emails
        .iter()
        .find(|e| e.primary && e.verified)
        .or_else(|| emails.iter().find(|e| e.verified))
        .map(|e| e.email.clone())
}
