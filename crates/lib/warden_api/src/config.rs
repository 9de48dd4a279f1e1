//! API server configuration.

use std::time::Duration;

use warden_core::auth::password::DEFAULT_BCRYPT_COST;
use warden_core::config::{AuthConfig, ConfigError};
use warden_core::mail::smtp::{DEFAULT_SMTP_PORT, SmtpConfig};

use crate::services::cookies::CookieSettings;
use crate::services::oauth::GithubConfig;

/// Per-request deadline for engine operations.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for the API server.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    /// Address to bind the HTTP listener (e.g. "0.0.0.0:8080").
    pub bind_addr: String,
    /// PostgreSQL connection URL.
    pub database_url: String,
    /// Token secrets, lifetimes and hashing cost.
    pub auth: AuthConfig,
    pub cookies: CookieSettings,
    /// Origins allowed to make credentialed CORS requests.
    pub allowed_origins: Vec<String>,
    /// `None` logs mail instead of sending it.
    pub smtp: Option<SmtpConfig>,
    /// `None` disables GitHub login.
    pub github: Option<GithubConfig>,
    pub request_timeout: Duration,
}

impl ApiConfig {
    /// Config with defaults for everything but the auth settings.
    pub fn new(auth: AuthConfig) -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".into(),
            database_url: "postgres://localhost:5432/warden".into(),
            auth,
            cookies: CookieSettings::default(),
            allowed_origins: vec!["http://localhost:3000".into()],
            smtp: None,
            github: None,
            request_timeout: REQUEST_TIMEOUT,
        }
    }

    /// Reads configuration from environment variables.
    ///
    /// | Variable                | Default                              |
    /// |-------------------------|--------------------------------------|
    /// | `BIND_ADDR`             | `0.0.0.0:8080`                       |
    /// | `DATABASE_URL`          | `postgres://localhost:5432/warden`   |
    /// | `JWT_ACCESS_SECRET`     | required                             |
    /// | `JWT_REFRESH_SECRET`    | required, must differ from access    |
    /// | `BASE_URL`              | `http://localhost:8080`              |
    /// | `BCRYPT_COST`           | `10`                                 |
    /// | `COOKIE_DOMAIN`         | unset (host-only cookies)            |
    /// | `ENVIRONMENT`           | `production` enables `Secure` cookies|
    /// | `ALLOWED_ORIGINS`       | `http://localhost:3000`              |
    /// | `SMTP_HOST`             | unset (log mail instead)             |
    /// | `SMTP_PORT`             | `587`                                |
    /// | `SMTP_USERNAME` / `SMTP_PASSWORD` / `SMTP_FROM` | required with host |
    /// | `GITHUB_CLIENT_ID` / `GITHUB_CLIENT_SECRET` | unset (GitHub login off) |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`Self::from_env`] but reading through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &'static str| var(key).ok_or(ConfigError::Missing(key));

        let base_url = var("BASE_URL").unwrap_or_else(|| "http://localhost:8080".into());
        let bcrypt_cost = match var("BCRYPT_COST") {
            Some(raw) => raw.trim().parse::<u32>().map_err(|e| ConfigError::Invalid {
                name: "BCRYPT_COST",
                reason: e.to_string(),
            })?,
            None => DEFAULT_BCRYPT_COST,
        };
        let auth = AuthConfig::new(
            required("JWT_ACCESS_SECRET")?,
            required("JWT_REFRESH_SECRET")?,
            base_url,
        )
        .with_bcrypt_cost(bcrypt_cost);
        auth.validate()?;

        let smtp = match var("SMTP_HOST") {
            Some(host) => Some(SmtpConfig {
                host,
                port: match var("SMTP_PORT") {
                    Some(raw) => raw.trim().parse::<u16>().map_err(|e| ConfigError::Invalid {
                        name: "SMTP_PORT",
                        reason: e.to_string(),
                    })?,
                    None => DEFAULT_SMTP_PORT,
                },
                username: required("SMTP_USERNAME")?,
                password: required("SMTP_PASSWORD")?,
                from_address: required("SMTP_FROM")?,
            }),
            None => None,
        };

        let github = match (var("GITHUB_CLIENT_ID"), var("GITHUB_CLIENT_SECRET")) {
            (Some(client_id), Some(client_secret)) => Some(GithubConfig {
                client_id,
                client_secret,
                redirect_uri: format!("{}/api/auth/github/callback", auth.base_url),
            }),
            (None, None) => None,
            (Some(_), None) => return Err(ConfigError::Missing("GITHUB_CLIENT_SECRET")),
            (None, Some(_)) => return Err(ConfigError::Missing("GITHUB_CLIENT_ID")),
        };

        let mut config = Self::new(auth);
        if let Some(addr) = var("BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Some(url) = var("DATABASE_URL") {
            config.database_url = url;
        }
        if let Some(origins) = var("ALLOWED_ORIGINS") {
            config.allowed_origins = origins
                .split(',')
                .map(|o| o.trim().trim_end_matches('/').to_string())
                .filter(|o| !o.is_empty())
                .collect();
        }
        config.cookies = CookieSettings {
            domain: var("COOKIE_DOMAIN"),
            secure: var("ENVIRONMENT").is_some_and(|e| e.eq_ignore_ascii_case("production")),
        };
        config.smtp = smtp;
        config.github = github;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    const SECRETS: [(&str, &str); 2] = [
        ("JWT_ACCESS_SECRET", "access"),
        ("JWT_REFRESH_SECRET", "refresh"),
    ];

    #[test]
    fn defaults_with_only_secrets() {
        let config = ApiConfig::from_lookup(lookup(&SECRETS)).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.auth.bcrypt_cost, DEFAULT_BCRYPT_COST);
        assert_eq!(config.auth.base_url, "http://localhost:8080");
        assert!(!config.cookies.secure);
        assert!(config.cookies.domain.is_none());
        assert!(config.smtp.is_none());
        assert!(config.github.is_none());
        assert_eq!(config.request_timeout, REQUEST_TIMEOUT);
    }

    #[test]
    fn secrets_are_required_and_distinct() {
        assert_eq!(
            ApiConfig::from_lookup(lookup(&[("JWT_REFRESH_SECRET", "r")])).unwrap_err(),
            ConfigError::Missing("JWT_ACCESS_SECRET")
        );
        assert_eq!(
            ApiConfig::from_lookup(lookup(&[
                ("JWT_ACCESS_SECRET", "same"),
                ("JWT_REFRESH_SECRET", "same"),
            ]))
            .unwrap_err(),
            ConfigError::SharedSecret
        );
    }

    #[test]
    fn full_environment() {
        let mut pairs = SECRETS.to_vec();
        pairs.extend([
            ("BASE_URL", "https://auth.example.com/"),
            ("BCRYPT_COST", "12"),
            ("COOKIE_DOMAIN", "example.com"),
            ("ENVIRONMENT", "production"),
            ("ALLOWED_ORIGINS", "https://a.example.com, https://b.example.com/"),
            ("SMTP_HOST", "smtp.example.com"),
            ("SMTP_USERNAME", "mailer"),
            ("SMTP_PASSWORD", "pw"),
            ("SMTP_FROM", "Warden <no-reply@example.com>"),
            ("GITHUB_CLIENT_ID", "id"),
            ("GITHUB_CLIENT_SECRET", "secret"),
        ]);
        let config = ApiConfig::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(config.auth.bcrypt_cost, 12);
        assert!(config.cookies.secure);
        assert_eq!(config.cookies.domain.as_deref(), Some("example.com"));
        assert_eq!(
            config.allowed_origins,
            vec!["https://a.example.com", "https://b.example.com"]
        );
        assert_eq!(config.smtp.as_ref().map(|s| s.port), Some(DEFAULT_SMTP_PORT));
        assert_eq!(
            config.github.as_ref().map(|g| g.redirect_uri.as_str()),
            Some("https://auth.example.com/api/auth/github/callback")
        );
    }

    #[test]
    fn smtp_host_needs_credentials() {
        let mut pairs = SECRETS.to_vec();
        pairs.push(("SMTP_HOST", "smtp.example.com"));
        assert_eq!(
            ApiConfig::from_lookup(lookup(&pairs)).unwrap_err(),
            ConfigError::Missing("SMTP_USERNAME")
        );
    }

    #[test]
    fn bad_bcrypt_cost() {
        let mut pairs = SECRETS.to_vec();
        pairs.push(("BCRYPT_COST", "fast"));
        assert!(matches!(
            ApiConfig::from_lookup(lookup(&pairs)),
            Err(ConfigError::Invalid { name: "BCRYPT_COST", .. })
        ));
    }
}
