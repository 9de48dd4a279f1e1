//! Maps an identity verified by an OAuth provider onto a local user.

use std::sync::Arc;

use tracing::{debug, info};

use super::AuthError;
use crate::context::RequestContext;
use crate::models::auth::{NewUser, OAuthIdentity, User};
use crate::store::{USERS_EMAIL_KEY, UserStore};

/// Identity federation adapter.
///
/// Returns the local user only. Opening a session is a separate step
/// ([`super::engine::AuthEngine::issue_session`]).
pub struct Federation {
    store: Arc<dyn UserStore>,
}

impl Federation {
    pub fn new(store: Arc<dyn UserStore>) -> Self {
        Self { store }
    }

    /// Find or create the user for `identity`.
    ///
    /// The insert is attempted first; an existing account with the same
    /// email makes it fail on the email constraint, which is expected.
    pub async fn oauth_login(
        &self,
        ctx: &RequestContext,
        identity: &OAuthIdentity,
    ) -> Result<User, AuthError> {
        ctx.run(async {
            let new_user = NewUser {
                oauth_id: Some(identity.external_id.clone()),
                username: identity.display_name.clone(),
                avatar_url: identity.avatar_url.clone(),
                email: identity.email.clone(),
                password_hash: None,
                // The provider has already verified the address.
                is_verified: true,
                provider: Some(identity.provider.clone()),
            };

            match self.store.create_user(&new_user).await {
                Ok(user) => {
                    info!(user_id = user.id, provider = %identity.provider, "user created from oauth");
                    return Ok(user);
                }
                Err(e) if e.is_unique_violation_on(USERS_EMAIL_KEY) => {
                    debug!(provider = %identity.provider, "oauth identity matches existing account");
                }
                Err(e) => return Err(AuthError::internal("create oauth user", e)),
            }

            self.store
                .find_user_by_email(&identity.email)
                .await
                .map_err(|e| AuthError::internal("find oauth user", e))?
                .ok_or_else(|| AuthError::internal_msg("oauth user vanished after insert"))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    fn identity(external_id: &str, email: &str) -> OAuthIdentity {
        OAuthIdentity {
            provider: "github".into(),
            external_id: external_id.into(),
            email: email.into(),
            display_name: "Octo Cat".into(),
            avatar_url: Some("https://avatars.example.com/1".into()),
        }
    }

    #[tokio::test]
    async fn first_login_creates_verified_oauth_user() {
        let store = Arc::new(MemoryStore::new());
        let federation = Federation::new(store.clone());
        let ctx = RequestContext::background();

        let user = federation
            .oauth_login(&ctx, &identity("gh-1", "octo@x.com"))
            .await
            .unwrap();
        assert!(user.is_verified);
        assert_eq!(user.oauth_id.as_deref(), Some("gh-1"));
        assert_eq!(user.provider.as_deref(), Some("github"));
        assert_eq!(store.password_hash(user.id), None);
    }

    #[tokio::test]
    async fn repeat_login_returns_existing_user() {
        let store = Arc::new(MemoryStore::new());
        let federation = Federation::new(store.clone());
        let ctx = RequestContext::background();

        let first = federation
            .oauth_login(&ctx, &identity("gh-1", "octo@x.com"))
            .await
            .unwrap();
        let second = federation
            .oauth_login(&ctx, &identity("gh-1", "octo@x.com"))
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(store.list_users().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn links_to_password_account_with_same_email() {
        let store = Arc::new(MemoryStore::new());
        let existing = store
            .create_user(&NewUser {
                username: "alice".into(),
                email: "alice@x.com".into(),
                password_hash: Some("hash".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        let federation = Federation::new(store.clone());

        let user = federation
            .oauth_login(&RequestContext::background(), &identity("gh-2", "alice@x.com"))
            .await
            .unwrap();
        assert_eq!(user.id, existing.id);
    }

    #[tokio::test]
    async fn other_constraint_failures_are_internal() {
        let store = Arc::new(MemoryStore::new());
        let federation = Federation::new(store.clone());
        let ctx = RequestContext::background();
        federation
            .oauth_login(&ctx, &identity("gh-1", "one@x.com"))
            .await
            .unwrap();

        // Same external id, different email: the oauth_id constraint fires.
        let err = federation
            .oauth_login(&ctx, &identity("gh-1", "two@x.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Internal { .. }));
    }
}
