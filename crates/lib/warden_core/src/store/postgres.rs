//! PostgreSQL implementation of the store traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use super::{Consumption, EphemeralTokenLedger, SessionTokenLog, StoreError, UserStore};
use crate::models::auth::{
    EphemeralKind, EphemeralToken, NewUser, SessionTokenRecord, User, UserUpdate,
    UserWithPassword,
};

const USER_COLUMNS: &str =
    "id, oauth_id, username, avatar_url, email, is_verified, provider, created_at, updated_at";

const SESSION_COLUMNS: &str = "id, user_id, jti, refreshed_from_jti, replaced_by_jti, \
     invalidated_at, expired_at, created_at, ip_address, user_agent";

/// Table holding tokens of the given kind.
fn ephemeral_table(kind: EphemeralKind) -> &'static str {
    match kind {
        EphemeralKind::Verification => "verify_emails",
        EphemeralKind::PasswordReset => "forgot_password_emails",
    }
}

/// Store backed by a shared Postgres pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Tell an expired token apart from a missing one after a consume
    /// statement deleted nothing.
    async fn classify_unconsumed(
        &self,
        kind: EphemeralKind,
        id: Uuid,
    ) -> Result<Consumption, StoreError> {
        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE id = $1)",
            ephemeral_table(kind)
        );
        let exists = sqlx::query_scalar::<_, bool>(&sql)
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(if exists {
            Consumption::Expired
        } else {
            Consumption::Missing
        })
    }
}

#[async_trait]
impl UserStore for PgStore {
    async fn create_user(&self, user: &NewUser) -> Result<User, StoreError> {
        let sql = format!(
            "INSERT INTO users (oauth_id, username, avatar_url, email, password_hash, is_verified, provider) \
             VALUES ($1, $2, $3, $4, $5, $6, COALESCE($7, 'local')) \
             RETURNING {USER_COLUMNS}"
        );
        let created = sqlx::query_as::<_, User>(&sql)
            .bind(&user.oauth_id)
            .bind(&user.username)
            .bind(&user.avatar_url)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(user.is_verified)
            .bind(&user.provider)
            .fetch_one(&self.pool)
            .await?;
        Ok(created)
    }

    async fn find_user_by_id(&self, id: i64) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let row = sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");
        let row = sqlx::query_as::<_, User>(&sql)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn find_credentials_by_email(
        &self,
        email: &str,
    ) -> Result<Option<UserWithPassword>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS}, password_hash FROM users WHERE email = $1");
        let row = sqlx::query_as::<_, UserWithPassword>(&sql)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users ORDER BY id");
        let rows = sqlx::query_as::<_, User>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn update_user(&self, update: &UserUpdate) -> Result<Option<User>, StoreError> {
        let sql = format!(
            "UPDATE users SET username = $1, avatar_url = $2, email = $3, updated_at = now() \
             WHERE id = $4 \
             RETURNING {USER_COLUMNS}"
        );
        let row = sqlx::query_as::<_, User>(&sql)
            .bind(&update.username)
            .bind(&update.avatar_url)
            .bind(&update.email)
            .bind(update.id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn delete_user(&self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl EphemeralTokenLedger for PgStore {
    async fn insert_ephemeral(
        &self,
        kind: EphemeralKind,
        token: &EphemeralToken,
    ) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT INTO {} (id, user_id, email, expired_at, created_at) VALUES ($1, $2, $3, $4, $5)",
            ephemeral_table(kind)
        );
        sqlx::query(&sql)
            .bind(token.id)
            .bind(token.user_id)
            .bind(&token.email)
            .bind(token.expired_at)
            .bind(token.created_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_ephemeral(
        &self,
        kind: EphemeralKind,
        id: Uuid,
    ) -> Result<Option<EphemeralToken>, StoreError> {
        let sql = format!(
            "SELECT id, user_id, email, expired_at, created_at FROM {} WHERE id = $1",
            ephemeral_table(kind)
        );
        let row = sqlx::query_as::<_, EphemeralToken>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn consume_verification(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Consumption, StoreError> {
        // Delete and update in one statement: the second of two racing
        // callers blocks on the row lock, then deletes nothing.
        let user_id = sqlx::query_scalar::<_, i64>(
            "WITH consumed AS ( \
                 DELETE FROM verify_emails WHERE id = $1 AND expired_at > $2 RETURNING user_id \
             ) \
             UPDATE users SET is_verified = TRUE, updated_at = now() \
             FROM consumed WHERE users.id = consumed.user_id \
             RETURNING users.id",
        )
        .bind(id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        match user_id {
            Some(user_id) => Ok(Consumption::Consumed { user_id }),
            None => self.classify_unconsumed(EphemeralKind::Verification, id).await,
        }
    }

    async fn consume_password_reset(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        password_hash: &str,
    ) -> Result<Consumption, StoreError> {
        let mut tx = self.pool.begin().await?;

        let user_id = sqlx::query_scalar::<_, i64>(
            "DELETE FROM forgot_password_emails WHERE id = $1 AND expired_at > $2 RETURNING user_id",
        )
        .bind(id)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(user_id) = user_id else {
            tx.rollback().await?;
            return self
                .classify_unconsumed(EphemeralKind::PasswordReset, id)
                .await;
        };

        sqlx::query("UPDATE users SET password_hash = $1, updated_at = now() WHERE id = $2")
            .bind(password_hash)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Consumption::Consumed { user_id })
    }

    async fn purge_expired_ephemeral(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut purged = 0;
        for kind in [EphemeralKind::Verification, EphemeralKind::PasswordReset] {
            let sql = format!(
                "DELETE FROM {} WHERE expired_at <= $1",
                ephemeral_table(kind)
            );
            purged += sqlx::query(&sql)
                .bind(now)
                .execute(&self.pool)
                .await?
                .rows_affected();
        }
        Ok(purged)
    }
}

#[async_trait]
impl SessionTokenLog for PgStore {
    async fn insert_session(&self, record: &SessionTokenRecord) -> Result<(), StoreError> {
        insert_session_with(&self.pool, record).await
    }

    async fn find_session(&self, jti: &str) -> Result<Option<SessionTokenRecord>, StoreError> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM token_log WHERE jti = $1");
        let row = sqlx::query_as::<_, SessionTokenRecord>(&sql)
            .bind(jti)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn list_sessions(&self, user_id: i64) -> Result<Vec<SessionTokenRecord>, StoreError> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM token_log WHERE user_id = $1 ORDER BY created_at, id"
        );
        let rows = sqlx::query_as::<_, SessionTokenRecord>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn rotate_session(
        &self,
        old_jti: &str,
        successor: &SessionTokenRecord,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        let invalidated = sqlx::query(
            "UPDATE token_log SET invalidated_at = $1, replaced_by_jti = $2 \
             WHERE jti = $3 AND invalidated_at IS NULL",
        )
        .bind(now)
        .bind(&successor.jti)
        .bind(old_jti)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if invalidated == 0 {
            tx.rollback().await?;
            debug!(jti = old_jti, "rotation lost: token already invalidated");
            return Ok(false);
        }

        insert_session_with(&mut *tx, successor).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn invalidate_session(
        &self,
        jti: &str,
        replaced_by: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE token_log SET invalidated_at = $1, replaced_by_jti = COALESCE($2, replaced_by_jti) \
             WHERE jti = $3 AND invalidated_at IS NULL",
        )
        .bind(now)
        .bind(replaced_by)
        .bind(jti)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn invalidate_user_sessions(
        &self,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE token_log SET invalidated_at = $1 \
             WHERE user_id = $2 AND invalidated_at IS NULL",
        )
        .bind(now)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

async fn insert_session_with<'e, E>(executor: E, record: &SessionTokenRecord) -> Result<(), StoreError>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query(
        "INSERT INTO token_log \
         (id, user_id, jti, refreshed_from_jti, replaced_by_jti, invalidated_at, expired_at, created_at, ip_address, user_agent) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
    )
    .bind(record.id)
    .bind(record.user_id)
    .bind(&record.jti)
    .bind(&record.refreshed_from_jti)
    .bind(&record.replaced_by_jti)
    .bind(record.invalidated_at)
    .bind(record.expired_at)
    .bind(record.created_at)
    .bind(&record.ip_address)
    .bind(&record.user_agent)
    .execute(executor)
    .await?;
    Ok(())
}

// These run against a real database: `DATABASE_URL=... cargo test -- --ignored`.
#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::store::USERS_EMAIL_KEY;
    use crate::uuid::{opaque_id, uuidv7};

    async fn store() -> PgStore {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let pool = PgPool::connect(&url).await.expect("connect");
        crate::migrate::migrate(&pool).await.expect("migrate");
        PgStore::new(pool)
    }

    fn new_user(email: &str) -> NewUser {
        NewUser {
            username: "pg-test".into(),
            email: email.into(),
            password_hash: Some("hash".into()),
            ..Default::default()
        }
    }

    fn unique_email() -> String {
        format!("{}@pg.test", opaque_id())
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn duplicate_email_is_unique_violation() {
        let store = store().await;
        let email = unique_email();
        store.create_user(&new_user(&email)).await.unwrap();
        let err = store.create_user(&new_user(&email)).await.unwrap_err();
        assert!(err.is_unique_violation_on(USERS_EMAIL_KEY), "{err:?}");
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn verification_is_consumed_once() {
        let store = store().await;
        let user = store.create_user(&new_user(&unique_email())).await.unwrap();
        let now = Utc::now();
        let token = EphemeralToken {
            id: opaque_id(),
            user_id: user.id,
            email: user.email.clone(),
            expired_at: now + Duration::hours(1),
            created_at: now,
        };
        store
            .insert_ephemeral(EphemeralKind::Verification, &token)
            .await
            .unwrap();

        let first = store.consume_verification(token.id, now).await.unwrap();
        assert_eq!(first, Consumption::Consumed { user_id: user.id });
        let second = store.consume_verification(token.id, now).await.unwrap();
        assert_eq!(second, Consumption::Missing);

        let user = store.find_user_by_id(user.id).await.unwrap().unwrap();
        assert!(user.is_verified);
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn rotation_is_single_shot() {
        let store = store().await;
        let user = store.create_user(&new_user(&unique_email())).await.unwrap();
        let now = Utc::now();
        let record = |jti: &str, from: Option<&str>| SessionTokenRecord {
            id: uuidv7(),
            user_id: user.id,
            jti: jti.to_string(),
            refreshed_from_jti: from.map(str::to_string),
            replaced_by_jti: None,
            invalidated_at: None,
            expired_at: now + Duration::days(7),
            created_at: now,
            ip_address: "127.0.0.1".into(),
            user_agent: "test".into(),
        };
        let root = opaque_id().to_string();
        store.insert_session(&record(&root, None)).await.unwrap();

        let a = opaque_id().to_string();
        let b = opaque_id().to_string();
        let successor_a = record(&a, Some(&root));
        let successor_b = record(&b, Some(&root));
        let (ra, rb) = tokio::join!(
            store.rotate_session(&root, &successor_a, now),
            store.rotate_session(&root, &successor_b, now),
        );
        assert!(ra.unwrap() ^ rb.unwrap());
    }
}
