//! User profile queries and self-service management.

use std::sync::Arc;

use tracing::info;

use crate::auth::AuthError;
use crate::context::RequestContext;
use crate::models::auth::{TokenClaims, User, UserUpdate};
use crate::store::{StoreError, USERS_EMAIL_KEY, UserStore};

fn lookup_failure(e: StoreError) -> AuthError {
    AuthError::internal("user lookup", e)
}

/// Read and manage user records on behalf of an authenticated caller.
pub struct UserService {
    store: Arc<dyn UserStore>,
}

impl UserService {
    pub fn new(store: Arc<dyn UserStore>) -> Self {
        Self { store }
    }

    pub async fn get_user(&self, ctx: &RequestContext, id: i64) -> Result<User, AuthError> {
        ctx.run(async {
            self.store
                .find_user_by_id(id)
                .await
                .map_err(lookup_failure)?
                .ok_or(AuthError::NotFound)
        })
        .await
    }

    pub async fn get_user_by_email(
        &self,
        ctx: &RequestContext,
        email: &str,
    ) -> Result<User, AuthError> {
        ctx.run(async {
            self.store
                .find_user_by_email(email)
                .await
                .map_err(lookup_failure)?
                .ok_or(AuthError::NotFound)
        })
        .await
    }

    pub async fn list_users(&self, ctx: &RequestContext) -> Result<Vec<User>, AuthError> {
        ctx.run(async { self.store.list_users().await.map_err(lookup_failure) })
            .await
    }

    /// The user behind a verified access token.
    pub async fn current_user(
        &self,
        ctx: &RequestContext,
        claims: &TokenClaims,
    ) -> Result<User, AuthError> {
        self.get_user(ctx, claims.user_id).await
    }

    /// Update the caller's own profile.
    pub async fn update_user(
        &self,
        ctx: &RequestContext,
        actor: &TokenClaims,
        update: &UserUpdate,
    ) -> Result<User, AuthError> {
        if actor.user_id != update.id {
            return Err(AuthError::Forbidden);
        }
        ctx.run(async {
            let user = match self.store.update_user(update).await {
                Ok(user) => user.ok_or(AuthError::NotFound)?,
                Err(e) if e.is_unique_violation_on(USERS_EMAIL_KEY) => {
                    return Err(AuthError::Conflict);
                }
                Err(e) => return Err(AuthError::internal("update user", e)),
            };
            info!(user_id = user.id, "user updated");
            Ok(user)
        })
        .await
    }

    /// Delete the caller's own account, along with its tokens and sessions.
    pub async fn delete_user(
        &self,
        ctx: &RequestContext,
        actor: &TokenClaims,
        id: i64,
    ) -> Result<(), AuthError> {
        if actor.user_id != id {
            return Err(AuthError::Forbidden);
        }
        ctx.run(async {
            let deleted = self
                .store
                .delete_user(id)
                .await
                .map_err(|e| AuthError::internal("delete user", e))?;
            if !deleted {
                return Err(AuthError::NotFound);
            }
            info!(user_id = id, "user deleted");
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::auth::{NewUser, TokenKind};
    use crate::store::memory::MemoryStore;

    async fn seeded() -> (UserService, User, User) {
        let store = Arc::new(MemoryStore::new());
        let mut users = Vec::new();
        for (name, email) in [("alice", "alice@x.com"), ("bob", "bob@x.com")] {
            users.push(
                store
                    .create_user(&NewUser {
                        username: name.into(),
                        email: email.into(),
                        password_hash: Some("hash".into()),
                        ..Default::default()
                    })
                    .await
                    .unwrap(),
            );
        }
        let bob = users.pop().unwrap();
        let alice = users.pop().unwrap();
        (UserService::new(store), alice, bob)
    }

    fn claims_for(user: &User) -> TokenClaims {
        TokenClaims {
            user_id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            jti: "jti".into(),
            typ: TokenKind::Access,
            iat: 0,
            exp: i64::MAX,
        }
    }

    fn update_of(user: &User, email: &str) -> UserUpdate {
        UserUpdate {
            id: user.id,
            username: "renamed".into(),
            avatar_url: None,
            email: email.into(),
        }
    }

    #[tokio::test]
    async fn lookups() {
        let (svc, alice, _) = seeded().await;
        let ctx = RequestContext::background();
        assert_eq!(svc.get_user(&ctx, alice.id).await.unwrap(), alice);
        assert_eq!(
            svc.get_user_by_email(&ctx, "alice@x.com").await.unwrap(),
            alice
        );
        assert_eq!(svc.list_users(&ctx).await.unwrap().len(), 2);
        assert_eq!(svc.current_user(&ctx, &claims_for(&alice)).await.unwrap(), alice);
        assert!(matches!(
            svc.get_user(&ctx, 999).await,
            Err(AuthError::NotFound)
        ));
    }

    #[tokio::test]
    async fn update_own_profile() {
        let (svc, alice, _) = seeded().await;
        let ctx = RequestContext::background();
        let updated = svc
            .update_user(&ctx, &claims_for(&alice), &update_of(&alice, "a2@x.com"))
            .await
            .unwrap();
        assert_eq!(updated.username, "renamed");
        assert_eq!(updated.email, "a2@x.com");
    }

    #[tokio::test]
    async fn cannot_touch_other_users() {
        let (svc, alice, bob) = seeded().await;
        let ctx = RequestContext::background();
        assert!(matches!(
            svc.update_user(&ctx, &claims_for(&alice), &update_of(&bob, "b2@x.com"))
                .await,
            Err(AuthError::Forbidden)
        ));
        assert!(matches!(
            svc.delete_user(&ctx, &claims_for(&alice), bob.id).await,
            Err(AuthError::Forbidden)
        ));
    }

    #[tokio::test]
    async fn email_collision_on_update_is_conflict() {
        let (svc, alice, _) = seeded().await;
        let ctx = RequestContext::background();
        assert!(matches!(
            svc.update_user(&ctx, &claims_for(&alice), &update_of(&alice, "bob@x.com"))
                .await,
            Err(AuthError::Conflict)
        ));
    }

    #[tokio::test]
    async fn delete_own_account() {
        let (svc, alice, _) = seeded().await;
        let ctx = RequestContext::background();
        let actor = claims_for(&alice);
        svc.delete_user(&ctx, &actor, alice.id).await.unwrap();
        assert!(matches!(
            svc.delete_user(&ctx, &actor, alice.id).await,
            Err(AuthError::NotFound)
        ));
    }
}
