//! Credential & session engine.
//!
//! Orchestrates registration, login, refresh rotation, logout and the two
//! single-use token workflows on top of the store, codec and mailer. Every
//! public operation runs inside the caller's [`RequestContext`].

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::AuthError;
use super::jwt::{IssuedToken, TokenCodec, TokenError};
use super::password::{hash_password_blocking, verify_password_blocking};
use crate::clock::Clock;
use crate::config::AuthConfig;
use crate::context::RequestContext;
use crate::mail::{self, Mailer};
use crate::models::auth::{
    ClientInfo, EphemeralKind, EphemeralToken, NewUser, SessionTokenRecord, TokenClaims,
    TokenKind, TokenPair, TokenSubject, User,
};
use crate::store::{Consumption, Store, StoreError, USERS_EMAIL_KEY};
use crate::uuid::{opaque_id, parse_opaque_id, uuidv7};

/// Input to [`AuthEngine::register`].
#[derive(Clone)]
pub struct Registration {
    pub email: String,
    pub password: String,
    /// Display name. Defaults to the local part of the email.
    pub username: Option<String>,
}

impl Registration {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            username: None,
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }
}

/// `alice` for `alice@example.com`.
fn username_from_email(email: &str) -> String {
    email.split('@').next().unwrap_or(email).to_string()
}

fn store_failure(context: &'static str) -> impl FnOnce(StoreError) -> AuthError {
    move |e| AuthError::internal(context, e)
}

impl From<TokenError> for AuthError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::Encode(_) => AuthError::internal("sign token", e),
            TokenError::Invalid(_) | TokenError::Expired | TokenError::WrongKind { .. } => {
                debug!(error = %e, "bearer token rejected");
                AuthError::Unauthorized
            }
        }
    }
}

/// Maps a consume outcome to the result both workflows share.
fn consumed_user(outcome: Consumption) -> Result<i64, AuthError> {
    match outcome {
        Consumption::Consumed { user_id } => Ok(user_id),
        Consumption::Expired => Err(AuthError::BadRequest("token expired".into())),
        Consumption::Missing => Err(AuthError::NotFound),
    }
}

/// Registration, login, session rotation and single-use token workflows.
pub struct AuthEngine {
    store: Arc<dyn Store>,
    codec: Arc<TokenCodec>,
    mailer: Arc<dyn Mailer>,
    clock: Arc<dyn Clock>,
    config: AuthConfig,
}

impl AuthEngine {
    pub fn new(
        config: AuthConfig,
        store: Arc<dyn Store>,
        mailer: Arc<dyn Mailer>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let codec = Arc::new(TokenCodec::new(&config, clock.clone()));
        Self {
            store,
            codec,
            mailer,
            clock,
            config,
        }
    }

    pub fn codec(&self) -> &Arc<TokenCodec> {
        &self.codec
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Verify a bearer access token. Pure; touches no store.
    pub fn verify_access(&self, token: &str) -> Result<TokenClaims, AuthError> {
        Ok(self.codec.verify(token, TokenKind::Access)?)
    }

    /// Create an unverified password account and send its verification mail.
    ///
    /// A mail failure is reported, but the account is kept; the user can ask
    /// for a new link with [`Self::create_verify_email`].
    pub async fn register(
        &self,
        ctx: &RequestContext,
        registration: &Registration,
    ) -> Result<User, AuthError> {
        ctx.run(async {
            let hash =
                hash_password_blocking(&registration.password, self.config.bcrypt_cost).await?;

            let new_user = NewUser {
                username: registration
                    .username
                    .clone()
                    .unwrap_or_else(|| username_from_email(&registration.email)),
                email: registration.email.clone(),
                password_hash: Some(hash),
                ..Default::default()
            };
            let user = match self.store.create_user(&new_user).await {
                Ok(user) => user,
                Err(e) if e.is_unique_violation_on(USERS_EMAIL_KEY) => {
                    return Err(AuthError::Conflict);
                }
                Err(e) => return Err(AuthError::internal("create user", e)),
            };
            info!(user_id = user.id, "user registered");

            self.send_verification(&user).await?;
            Ok(user)
        })
        .await
    }

    /// Check a password and open a new session.
    pub async fn login(
        &self,
        ctx: &RequestContext,
        email: &str,
        password: &str,
        client: &ClientInfo,
    ) -> Result<TokenPair, AuthError> {
        ctx.run(async {
            let credentials = self
                .store
                .find_credentials_by_email(email)
                .await
                .map_err(store_failure("find user by email"))?
                .ok_or(AuthError::NotFound)?;

            let Some(hash) = credentials.password_hash.as_deref() else {
                debug!(user_id = credentials.user.id, "password login on oauth-only account");
                return Err(AuthError::Unauthorized);
            };
            if !verify_password_blocking(password, hash).await? {
                return Err(AuthError::Unauthorized);
            }

            let pair = self.open_session(&credentials.user, client).await?;
            info!(user_id = credentials.user.id, "user logged in");
            Ok(pair)
        })
        .await
    }

    /// Open a session for an already authenticated user (OAuth callback).
    pub async fn issue_session(
        &self,
        ctx: &RequestContext,
        user: &User,
        client: &ClientInfo,
    ) -> Result<TokenPair, AuthError> {
        ctx.run(self.open_session(user, client)).await
    }

    /// Exchange a live refresh token for a new pair, retiring the old one.
    ///
    /// Of two concurrent calls with the same token, exactly one succeeds.
    pub async fn refresh(
        &self,
        ctx: &RequestContext,
        refresh_token: &str,
        client: &ClientInfo,
    ) -> Result<TokenPair, AuthError> {
        ctx.run(async {
            let claims = self.codec.verify(refresh_token, TokenKind::Refresh)?;

            let record = self
                .store
                .find_session(&claims.jti)
                .await
                .map_err(store_failure("find session"))?
                .ok_or(AuthError::Unauthorized)?;
            if record.invalidated_at.is_some() {
                warn!(
                    user_id = record.user_id,
                    jti = %record.jti,
                    "refresh with invalidated token"
                );
                return Err(AuthError::Unauthorized);
            }
            if record.user_id != claims.user_id {
                return Err(AuthError::Unauthorized);
            }

            let subject = TokenSubject::from(&claims);
            let (pair, refresh) = self.mint_pair(&subject)?;
            let now = self.clock.now();
            let successor = self.session_record(
                subject.user_id,
                &refresh,
                Some(claims.jti.clone()),
                client,
                now,
            );

            let rotated = self
                .store
                .rotate_session(&claims.jti, &successor, now)
                .await
                .map_err(store_failure("rotate session"))?;
            if !rotated {
                warn!(user_id = subject.user_id, "concurrent refresh lost rotation");
                return Err(AuthError::Unauthorized);
            }
            debug!(user_id = subject.user_id, "session rotated");
            Ok(pair)
        })
        .await
    }

    /// Mark a logged refresh token invalid, optionally naming its successor.
    pub async fn invalidate_tokens(
        &self,
        ctx: &RequestContext,
        old_jti: &str,
        new_jti: Option<&str>,
    ) -> Result<(), AuthError> {
        if old_jti.is_empty() {
            return Err(AuthError::BadRequest("token id is required".into()));
        }
        let new_jti = new_jti.filter(|j| !j.is_empty());

        ctx.run(async {
            let changed = self
                .store
                .invalidate_session(old_jti, new_jti, self.clock.now())
                .await
                .map_err(store_failure("invalidate session"))?;
            if changed {
                Ok(())
            } else {
                Err(AuthError::Unauthorized)
            }
        })
        .await
    }

    /// End the session a refresh token belongs to. The paired access token
    /// stays valid until it expires.
    pub async fn logout(&self, ctx: &RequestContext, refresh_token: &str) -> Result<(), AuthError> {
        let claims = self.codec.verify(refresh_token, TokenKind::Refresh)?;
        self.invalidate_tokens(ctx, &claims.jti, None).await?;
        info!(user_id = claims.user_id, "user logged out");
        Ok(())
    }

    /// Issue a fresh verification link for `email`.
    pub async fn create_verify_email(
        &self,
        ctx: &RequestContext,
        email: &str,
    ) -> Result<(), AuthError> {
        ctx.run(async {
            let user = self
                .store
                .find_user_by_email(email)
                .await
                .map_err(store_failure("find user by email"))?
                .ok_or(AuthError::NotFound)?;
            self.send_verification(&user).await
        })
        .await
    }

    /// Consume a verification token and mark its owner verified.
    pub async fn verify_email(&self, ctx: &RequestContext, token_id: &str) -> Result<(), AuthError> {
        let id = parse_opaque_id(token_id)
            .ok_or_else(|| AuthError::BadRequest("invalid token".into()))?;

        ctx.run(async {
            let outcome = self
                .store
                .consume_verification(id, self.clock.now())
                .await
                .map_err(store_failure("consume verification"))?;
            let user_id = consumed_user(outcome)?;
            info!(user_id, "email verified");
            Ok(())
        })
        .await
    }

    /// Issue a password reset link for `email`.
    pub async fn forgot_password(&self, ctx: &RequestContext, email: &str) -> Result<(), AuthError> {
        ctx.run(async {
            let user = self
                .store
                .find_user_by_email(email)
                .await
                .map_err(store_failure("find user by email"))?
                .ok_or(AuthError::NotFound)?;

            let token = self.ephemeral_for(&user, self.config.password_reset_ttl);
            self.store
                .insert_ephemeral(EphemeralKind::PasswordReset, &token)
                .await
                .map_err(store_failure("create password reset"))?;

            let link = mail::password_reset_link(&self.config.base_url, token.id);
            self.mailer
                .send(
                    &user.email,
                    mail::PASSWORD_RESET_SUBJECT,
                    &mail::password_reset_body(&link),
                )
                .await
                .map_err(|e| AuthError::internal("send password reset email", e))?;
            info!(user_id = user.id, "password reset requested");
            Ok(())
        })
        .await
    }

    /// Consume a reset token, store the new password and end every session
    /// the user had open.
    pub async fn reset_password(
        &self,
        ctx: &RequestContext,
        token_id: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        let id = parse_opaque_id(token_id)
            .ok_or_else(|| AuthError::BadRequest("invalid token".into()))?;

        ctx.run(async {
            let hash = hash_password_blocking(new_password, self.config.bcrypt_cost).await?;
            let now = self.clock.now();
            let outcome = self
                .store
                .consume_password_reset(id, now, &hash)
                .await
                .map_err(store_failure("consume password reset"))?;
            let user_id = consumed_user(outcome)?;

            let revoked = self
                .store
                .invalidate_user_sessions(user_id, now)
                .await
                .map_err(store_failure("revoke sessions"))?;
            info!(user_id, revoked, "password reset");
            Ok(())
        })
        .await
    }

    async fn send_verification(&self, user: &User) -> Result<(), AuthError> {
        let token = self.ephemeral_for(user, self.config.verify_email_ttl);
        self.store
            .insert_ephemeral(EphemeralKind::Verification, &token)
            .await
            .map_err(store_failure("create verification"))?;

        let link = mail::verification_link(&self.config.base_url, token.id);
        self.mailer
            .send(
                &user.email,
                mail::VERIFY_EMAIL_SUBJECT,
                &mail::verification_body(&link),
            )
            .await
            .map_err(|e| AuthError::internal("send verification email", e))?;
        debug!(user_id = user.id, "verification email sent");
        Ok(())
    }

    fn ephemeral_for(&self, user: &User, ttl: chrono::Duration) -> EphemeralToken {
        let now = self.clock.now();
        EphemeralToken {
            id: opaque_id(),
            user_id: user.id,
            email: user.email.clone(),
            expired_at: now + ttl,
            created_at: now,
        }
    }

    async fn open_session(&self, user: &User, client: &ClientInfo) -> Result<TokenPair, AuthError> {
        let (pair, refresh) = self.mint_pair(&TokenSubject::from(user))?;
        let record = self.session_record(user.id, &refresh, None, client, self.clock.now());
        self.store
            .insert_session(&record)
            .await
            .map_err(store_failure("log session"))?;
        Ok(pair)
    }

    fn mint_pair(&self, subject: &TokenSubject) -> Result<(TokenPair, IssuedToken), AuthError> {
        let access = self.codec.issue(subject, TokenKind::Access)?;
        let refresh = self.codec.issue(subject, TokenKind::Refresh)?;
        let pair = TokenPair {
            access_token: access.token,
            refresh_token: refresh.token.clone(),
            access_expires_at: access.expires_at,
            refresh_expires_at: refresh.expires_at,
        };
        Ok((pair, refresh))
    }

    fn session_record(
        &self,
        user_id: i64,
        refresh: &IssuedToken,
        refreshed_from: Option<String>,
        client: &ClientInfo,
        now: chrono::DateTime<chrono::Utc>,
    ) -> SessionTokenRecord {
        SessionTokenRecord {
            id: uuidv7(),
            user_id,
            jti: refresh.jti.clone(),
            refreshed_from_jti: refreshed_from,
            replaced_by_jti: None,
            invalidated_at: None,
            expired_at: refresh.expires_at,
            created_at: now,
            ip_address: client.ip_address.clone(),
            user_agent: client.user_agent.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::clock::ManualClock;
    use crate::mail::outbox::Outbox;
    use crate::store::memory::MemoryStore;
    use crate::store::{EphemeralTokenLedger, SessionTokenLog, UserStore};

    struct Harness {
        engine: AuthEngine,
        store: Arc<MemoryStore>,
        outbox: Arc<Outbox>,
        clock: Arc<ManualClock>,
        ctx: RequestContext,
        client: ClientInfo,
    }

    fn harness() -> Harness {
        let clock = Arc::new(ManualClock::starting_now());
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let outbox = Arc::new(Outbox::new());
        let config = AuthConfig::new("access-secret", "refresh-secret", "http://app.test")
            .with_bcrypt_cost(4);
        let engine = AuthEngine::new(config, store.clone(), outbox.clone(), clock.clone());
        Harness {
            engine,
            store,
            outbox,
            clock,
            ctx: RequestContext::background(),
            client: ClientInfo::new("203.0.113.7", "test-agent"),
        }
    }

    impl Harness {
        async fn register(&self, email: &str, password: &str) -> User {
            self.engine
                .register(&self.ctx, &Registration::new(email, password))
                .await
                .unwrap()
        }

        async fn login(&self, email: &str, password: &str) -> Result<TokenPair, AuthError> {
            self.engine.login(&self.ctx, email, password, &self.client).await
        }

        fn jti(&self, token: &str, kind: TokenKind) -> String {
            self.engine.codec().verify(token, kind).unwrap().jti
        }
    }

    #[tokio::test]
    async fn register_then_login_issues_distinct_verifiable_pair() {
        let h = harness();
        let user = h.register("a@x.com", "pw12345678").await;
        assert_eq!(user.username, "a");
        assert!(!user.is_verified);

        let pair = h.login("a@x.com", "pw12345678").await.unwrap();
        assert!(!pair.access_token.is_empty());
        assert_ne!(pair.access_token, pair.refresh_token);

        let access = h.engine.codec().verify(&pair.access_token, TokenKind::Access).unwrap();
        let refresh = h.engine.codec().verify(&pair.refresh_token, TokenKind::Refresh).unwrap();
        assert_ne!(access.jti, refresh.jti);
        assert_eq!(access.user_id, user.id);

        let record = h.store.find_session(&refresh.jti).await.unwrap().unwrap();
        assert_eq!(record.refreshed_from_jti, None);
        assert_eq!(record.ip_address, "203.0.113.7");
        assert_eq!(record.user_agent, "test-agent");
        assert_eq!(record.expired_at, h.clock.now() + Duration::days(7));
        // Access tokens are never logged.
        assert!(h.store.find_session(&access.jti).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn register_uses_explicit_username() {
        let h = harness();
        let user = h
            .engine
            .register(
                &h.ctx,
                &Registration::new("b@x.com", "pw12345678").with_username("bob"),
            )
            .await
            .unwrap();
        assert_eq!(user.username, "bob");
    }

    #[tokio::test]
    async fn wrong_password_is_unauthorized_and_unknown_email_not_found() {
        let h = harness();
        h.register("a@x.com", "pw12345678").await;
        assert!(matches!(
            h.login("a@x.com", "wrong-password").await,
            Err(AuthError::Unauthorized)
        ));
        assert!(matches!(
            h.login("nobody@x.com", "pw12345678").await,
            Err(AuthError::NotFound)
        ));
    }

    #[tokio::test]
    async fn oauth_only_account_cannot_password_login() {
        let h = harness();
        h.store
            .create_user(&NewUser {
                oauth_id: Some("gh-7".into()),
                username: "octo".into(),
                email: "octo@x.com".into(),
                is_verified: true,
                provider: Some("github".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(matches!(
            h.login("octo@x.com", "anything-at-all").await,
            Err(AuthError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn duplicate_register_is_conflict_with_one_row() {
        let h = harness();
        h.register("a@x.com", "pw12345678").await;
        let err = h
            .engine
            .register(&h.ctx, &Registration::new("a@x.com", "other-password"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Conflict));
        assert_eq!(h.store.list_users().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn register_keeps_user_when_mail_fails() {
        let h = harness();
        h.outbox.set_failing(true);
        let err = h
            .engine
            .register(&h.ctx, &Registration::new("a@x.com", "pw12345678"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Internal { .. }));
        assert!(h.store.find_user_by_email("a@x.com").await.unwrap().is_some());

        h.outbox.set_failing(false);
        assert!(h.login("a@x.com", "pw12345678").await.is_ok());
    }

    #[tokio::test]
    async fn refresh_rotates_and_old_token_is_single_shot() {
        let h = harness();
        h.register("a@x.com", "pw12345678").await;
        let first = h.login("a@x.com", "pw12345678").await.unwrap();
        let first_jti = h.jti(&first.refresh_token, TokenKind::Refresh);

        let second = h
            .engine
            .refresh(&h.ctx, &first.refresh_token, &h.client)
            .await
            .unwrap();
        let second_jti = h.jti(&second.refresh_token, TokenKind::Refresh);
        assert_ne!(first_jti, second_jti);

        let old = h.store.find_session(&first_jti).await.unwrap().unwrap();
        assert!(old.invalidated_at.is_some());
        assert_eq!(old.replaced_by_jti.as_deref(), Some(second_jti.as_str()));
        let new = h.store.find_session(&second_jti).await.unwrap().unwrap();
        assert_eq!(new.refreshed_from_jti.as_deref(), Some(first_jti.as_str()));

        assert!(matches!(
            h.engine.refresh(&h.ctx, &first.refresh_token, &h.client).await,
            Err(AuthError::Unauthorized)
        ));
        assert!(h.engine.refresh(&h.ctx, &second.refresh_token, &h.client).await.is_ok());
    }

    #[tokio::test]
    async fn concurrent_refresh_has_exactly_one_winner() {
        let h = harness();
        let user = h.register("a@x.com", "pw12345678").await;
        let pair = h.login("a@x.com", "pw12345678").await.unwrap();

        let (a, b) = tokio::join!(
            h.engine.refresh(&h.ctx, &pair.refresh_token, &h.client),
            h.engine.refresh(&h.ctx, &pair.refresh_token, &h.client),
        );
        assert!(a.is_ok() ^ b.is_ok());
        let loser = if a.is_ok() { b } else { a };
        assert!(matches!(loser, Err(AuthError::Unauthorized)));

        let now = h.clock.now();
        let active: Vec<_> = h
            .store
            .list_sessions(user.id)
            .await
            .unwrap()
            .into_iter()
            .filter(|s| s.is_active(now))
            .collect();
        assert_eq!(active.len(), 1);
        assert!(active[0].refreshed_from_jti.is_some());
    }

    #[tokio::test]
    async fn access_token_cannot_refresh() {
        let h = harness();
        h.register("a@x.com", "pw12345678").await;
        let pair = h.login("a@x.com", "pw12345678").await.unwrap();
        assert!(matches!(
            h.engine.refresh(&h.ctx, &pair.access_token, &h.client).await,
            Err(AuthError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn expired_refresh_token_is_unauthorized() {
        let h = harness();
        h.register("a@x.com", "pw12345678").await;
        let pair = h.login("a@x.com", "pw12345678").await.unwrap();
        h.clock.advance(Duration::days(7));
        assert!(matches!(
            h.engine.refresh(&h.ctx, &pair.refresh_token, &h.client).await,
            Err(AuthError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn logout_invalidates_refresh_but_not_access() {
        let h = harness();
        h.register("a@x.com", "pw12345678").await;
        let pair = h.login("a@x.com", "pw12345678").await.unwrap();

        h.engine.logout(&h.ctx, &pair.refresh_token).await.unwrap();
        assert!(matches!(
            h.engine.refresh(&h.ctx, &pair.refresh_token, &h.client).await,
            Err(AuthError::Unauthorized)
        ));
        assert!(matches!(
            h.engine.logout(&h.ctx, &pair.refresh_token).await,
            Err(AuthError::Unauthorized)
        ));
        assert!(h.engine.verify_access(&pair.access_token).is_ok());
    }

    #[tokio::test]
    async fn invalidate_tokens_validates_and_links() {
        let h = harness();
        h.register("a@x.com", "pw12345678").await;
        let pair = h.login("a@x.com", "pw12345678").await.unwrap();
        let jti = h.jti(&pair.refresh_token, TokenKind::Refresh);

        assert!(matches!(
            h.engine.invalidate_tokens(&h.ctx, "", None).await,
            Err(AuthError::BadRequest(_))
        ));
        assert!(matches!(
            h.engine.invalidate_tokens(&h.ctx, "no-such-jti", None).await,
            Err(AuthError::Unauthorized)
        ));

        h.engine
            .invalidate_tokens(&h.ctx, &jti, Some("next-jti"))
            .await
            .unwrap();
        let record = h.store.find_session(&jti).await.unwrap().unwrap();
        assert_eq!(record.replaced_by_jti.as_deref(), Some("next-jti"));
        assert!(matches!(
            h.engine.invalidate_tokens(&h.ctx, &jti, None).await,
            Err(AuthError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn verify_email_is_single_shot() {
        let h = harness();
        let user = h.register("a@x.com", "pw12345678").await;
        let mail = h.outbox.last().unwrap();
        assert_eq!(mail.to, "a@x.com");
        assert_eq!(mail.subject, mail::VERIFY_EMAIL_SUBJECT);
        assert!(mail.html_body.contains("http://app.test/verify-email?id="));
        let token = mail.link_token().unwrap().to_string();

        h.engine.verify_email(&h.ctx, &token).await.unwrap();
        assert!(h.store.find_user_by_id(user.id).await.unwrap().unwrap().is_verified);
        assert!(matches!(
            h.engine.verify_email(&h.ctx, &token).await,
            Err(AuthError::NotFound)
        ));
    }

    #[tokio::test]
    async fn concurrent_verification_has_one_winner() {
        let h = harness();
        h.register("a@x.com", "pw12345678").await;
        let token = h.outbox.last().unwrap().link_token().unwrap().to_string();

        let (a, b) = tokio::join!(
            h.engine.verify_email(&h.ctx, &token),
            h.engine.verify_email(&h.ctx, &token),
        );
        assert!(a.is_ok() ^ b.is_ok());
        let loser = if a.is_ok() { b } else { a };
        assert!(matches!(loser, Err(AuthError::NotFound)));
    }

    #[tokio::test]
    async fn verify_email_rejects_malformed_and_expired_tokens() {
        let h = harness();
        h.register("a@x.com", "pw12345678").await;
        let token = h.outbox.last().unwrap().link_token().unwrap();

        assert!(matches!(
            h.engine.verify_email(&h.ctx, "not-a-uuid").await,
            Err(AuthError::BadRequest(_))
        ));

        h.clock.advance(Duration::hours(1));
        match h.engine.verify_email(&h.ctx, &token.to_string()).await {
            Err(AuthError::BadRequest(msg)) => assert_eq!(msg, "token expired"),
            other => panic!("expected expired token, got {other:?}"),
        }
        assert!(
            h.store
                .find_ephemeral(EphemeralKind::Verification, token)
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn resend_verification_needs_known_email() {
        let h = harness();
        h.register("a@x.com", "pw12345678").await;
        h.engine.create_verify_email(&h.ctx, "a@x.com").await.unwrap();
        assert_eq!(h.outbox.sent().len(), 2);
        assert_eq!(h.store.ephemeral_count(EphemeralKind::Verification), 2);
        assert!(matches!(
            h.engine.create_verify_email(&h.ctx, "nobody@x.com").await,
            Err(AuthError::NotFound)
        ));
    }

    #[tokio::test]
    async fn reset_password_changes_password_and_ends_sessions() {
        let h = harness();
        h.register("a@x.com", "pw12345678").await;
        let session = h.login("a@x.com", "pw12345678").await.unwrap();

        h.engine.forgot_password(&h.ctx, "a@x.com").await.unwrap();
        let mail = h.outbox.last().unwrap();
        assert_eq!(mail.subject, mail::PASSWORD_RESET_SUBJECT);
        assert!(mail.html_body.contains("http://app.test/reset-password?id="));
        let token = mail.link_token().unwrap().to_string();

        h.engine
            .reset_password(&h.ctx, &token, "new-password-1")
            .await
            .unwrap();

        assert!(matches!(
            h.login("a@x.com", "pw12345678").await,
            Err(AuthError::Unauthorized)
        ));
        assert!(h.login("a@x.com", "new-password-1").await.is_ok());
        assert!(matches!(
            h.engine.refresh(&h.ctx, &session.refresh_token, &h.client).await,
            Err(AuthError::Unauthorized)
        ));
        assert!(matches!(
            h.engine.reset_password(&h.ctx, &token, "another-pass").await,
            Err(AuthError::NotFound)
        ));
    }

    #[tokio::test]
    async fn concurrent_reset_has_one_winner() {
        let h = harness();
        let user = h.register("a@x.com", "pw12345678").await;
        h.engine.forgot_password(&h.ctx, "a@x.com").await.unwrap();
        let token = h.outbox.last().unwrap().link_token().unwrap().to_string();

        let (a, b) = tokio::join!(
            h.engine.reset_password(&h.ctx, &token, "first-password"),
            h.engine.reset_password(&h.ctx, &token, "second-password"),
        );
        assert!(a.is_ok() ^ b.is_ok());
        let (winner, loser) = if a.is_ok() {
            ("first-password", b)
        } else {
            ("second-password", a)
        };
        assert!(matches!(loser, Err(AuthError::NotFound)));

        let hash = h.store.password_hash(user.id).unwrap();
        assert!(crate::auth::password::verify_password(winner, &hash).unwrap());
        assert_eq!(h.store.ephemeral_count(EphemeralKind::PasswordReset), 0);
    }

    #[tokio::test]
    async fn expired_reset_token_leaves_password_alone() {
        let h = harness();
        let user = h.register("a@x.com", "pw12345678").await;
        h.engine.forgot_password(&h.ctx, "a@x.com").await.unwrap();
        let token = h.outbox.last().unwrap().link_token().unwrap().to_string();
        let before = h.store.password_hash(user.id);

        h.clock.advance(Duration::minutes(15));
        assert!(matches!(
            h.engine.reset_password(&h.ctx, &token, "new-password-1").await,
            Err(AuthError::BadRequest(_))
        ));
        assert_eq!(h.store.password_hash(user.id), before);
    }

    #[tokio::test]
    async fn forgot_password_unknown_email_is_not_found() {
        let h = harness();
        assert!(matches!(
            h.engine.forgot_password(&h.ctx, "nobody@x.com").await,
            Err(AuthError::NotFound)
        ));
        assert!(h.outbox.sent().is_empty());
    }

    #[tokio::test]
    async fn cancelled_context_is_service_unavailable() {
        let h = harness();
        let cancel = tokio_util::sync::CancellationToken::new();
        cancel.cancel();
        let ctx = RequestContext::background().with_cancellation(cancel);
        assert!(matches!(
            h.engine.forgot_password(&ctx, "a@x.com").await,
            Err(AuthError::ServiceUnavailable(_))
        ));
    }
}
