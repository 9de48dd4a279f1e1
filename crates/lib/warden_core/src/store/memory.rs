//! In-process store.
//!
//! Holds everything behind one mutex, so every trait method is atomic with
//! respect to every other. Enforces the same unique constraints and cascades
//! as the SQL schema. Used by tests and by the API integration suite.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{
    Consumption, EphemeralTokenLedger, SessionTokenLog, StoreError, UserStore,
    TOKEN_LOG_JTI_KEY, USERS_EMAIL_KEY, USERS_OAUTH_ID_KEY,
};
use crate::clock::{Clock, SystemClock};
use crate::models::auth::{
    EphemeralKind, EphemeralToken, NewUser, SessionTokenRecord, User, UserUpdate,
    UserWithPassword,
};

#[derive(Debug, Default)]
struct State {
    next_user_id: i64,
    users: BTreeMap<i64, UserWithPassword>,
    verifications: HashMap<Uuid, EphemeralToken>,
    resets: HashMap<Uuid, EphemeralToken>,
    sessions: HashMap<String, SessionTokenRecord>,
}

impl State {
    fn ledger(&mut self, kind: EphemeralKind) -> &mut HashMap<Uuid, EphemeralToken> {
        match kind {
            EphemeralKind::Verification => &mut self.verifications,
            EphemeralKind::PasswordReset => &mut self.resets,
        }
    }

    fn email_taken(&self, email: &str, except: Option<i64>) -> bool {
        self.users
            .values()
            .any(|u| u.user.email == email && Some(u.user.id) != except)
    }

    fn oauth_id_taken(&self, oauth_id: &str) -> bool {
        self.users
            .values()
            .any(|u| u.user.oauth_id.as_deref() == Some(oauth_id))
    }

    /// Remove the token if it is live; otherwise report why not.
    fn take_live(
        &mut self,
        kind: EphemeralKind,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<i64, Consumption> {
        let ledger = self.ledger(kind);
        let expired = match ledger.get(&id) {
            None => return Err(Consumption::Missing),
            Some(token) => token.is_expired(now),
        };
        if expired {
            return Err(Consumption::Expired);
        }
        ledger
            .remove(&id)
            .map(|t| t.user_id)
            .ok_or(Consumption::Missing)
    }
}

fn unique(constraint: &str) -> StoreError {
    StoreError::UniqueViolation {
        constraint: constraint.to_string(),
    }
}

/// Store kept entirely in memory.
pub struct MemoryStore {
    state: Mutex<State>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Use `clock` for `created_at`/`updated_at` stamps.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(State {
                next_user_id: 1,
                ..State::default()
            }),
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of outstanding single-use tokens of `kind`.
    pub fn ephemeral_count(&self, kind: EphemeralKind) -> usize {
        self.lock().ledger(kind).len()
    }

    /// Number of session log records across all users.
    pub fn session_count(&self) -> usize {
        self.lock().sessions.len()
    }

    /// Current password hash of a user, if any.
    pub fn password_hash(&self, user_id: i64) -> Option<String> {
        self.lock()
            .users
            .get(&user_id)
            .and_then(|u| u.password_hash.clone())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn create_user(&self, new: &NewUser) -> Result<User, StoreError> {
        let now = self.clock.now();
        let mut state = self.lock();

        if state.email_taken(&new.email, None) {
            return Err(unique(USERS_EMAIL_KEY));
        }
        if let Some(oauth_id) = new.oauth_id.as_deref()
            && state.oauth_id_taken(oauth_id)
        {
            return Err(unique(USERS_OAUTH_ID_KEY));
        }

        let id = state.next_user_id;
        state.next_user_id += 1;

        let user = User {
            id,
            oauth_id: new.oauth_id.clone(),
            username: new.username.clone(),
            avatar_url: new.avatar_url.clone(),
            email: new.email.clone(),
            is_verified: new.is_verified,
            provider: Some(new.provider.clone().unwrap_or_else(|| "local".to_string())),
            created_at: now,
            updated_at: now,
        };
        state.users.insert(
            id,
            UserWithPassword {
                user: user.clone(),
                password_hash: new.password_hash.clone(),
            },
        );
        Ok(user)
    }

    async fn find_user_by_id(&self, id: i64) -> Result<Option<User>, StoreError> {
        Ok(self.lock().users.get(&id).map(|u| u.user.clone()))
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        Ok(self
            .lock()
            .users
            .values()
            .find(|u| u.user.email == email)
            .map(|u| u.user.clone()))
    }

    async fn find_credentials_by_email(
        &self,
        email: &str,
    ) -> Result<Option<UserWithPassword>, StoreError> {
        Ok(self
            .lock()
            .users
            .values()
            .find(|u| u.user.email == email)
            .cloned())
    }

    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        Ok(self.lock().users.values().map(|u| u.user.clone()).collect())
    }

    async fn update_user(&self, update: &UserUpdate) -> Result<Option<User>, StoreError> {
        let now = self.clock.now();
        let mut state = self.lock();

        if !state.users.contains_key(&update.id) {
            return Ok(None);
        }
        if state.email_taken(&update.email, Some(update.id)) {
            return Err(unique(USERS_EMAIL_KEY));
        }

        let Some(stored) = state.users.get_mut(&update.id) else {
            return Ok(None);
        };
        stored.user.username = update.username.clone();
        stored.user.avatar_url = update.avatar_url.clone();
        stored.user.email = update.email.clone();
        stored.user.updated_at = now;
        Ok(Some(stored.user.clone()))
    }

    async fn delete_user(&self, id: i64) -> Result<bool, StoreError> {
        let mut state = self.lock();
        if state.users.remove(&id).is_none() {
            return Ok(false);
        }
        state.verifications.retain(|_, t| t.user_id != id);
        state.resets.retain(|_, t| t.user_id != id);
        state.sessions.retain(|_, s| s.user_id != id);
        Ok(true)
    }
}

#[async_trait]
impl EphemeralTokenLedger for MemoryStore {
    async fn insert_ephemeral(
        &self,
        kind: EphemeralKind,
        token: &EphemeralToken,
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        if !state.users.contains_key(&token.user_id) {
            return Err(StoreError::Db(sqlx::Error::RowNotFound));
        }
        state.ledger(kind).insert(token.id, token.clone());
        Ok(())
    }

    async fn find_ephemeral(
        &self,
        kind: EphemeralKind,
        id: Uuid,
    ) -> Result<Option<EphemeralToken>, StoreError> {
        Ok(self.lock().ledger(kind).get(&id).cloned())
    }

    async fn consume_verification(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Consumption, StoreError> {
        let stamp = self.clock.now();
        let mut state = self.lock();
        let user_id = match state.take_live(EphemeralKind::Verification, id, now) {
            Ok(user_id) => user_id,
            Err(outcome) => return Ok(outcome),
        };
        if let Some(stored) = state.users.get_mut(&user_id) {
            stored.user.is_verified = true;
            stored.user.updated_at = stamp;
        }
        Ok(Consumption::Consumed { user_id })
    }

    async fn consume_password_reset(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        password_hash: &str,
    ) -> Result<Consumption, StoreError> {
        let stamp = self.clock.now();
        let mut state = self.lock();
        let user_id = match state.take_live(EphemeralKind::PasswordReset, id, now) {
            Ok(user_id) => user_id,
            Err(outcome) => return Ok(outcome),
        };
        if let Some(stored) = state.users.get_mut(&user_id) {
            stored.password_hash = Some(password_hash.to_string());
            stored.user.updated_at = stamp;
        }
        Ok(Consumption::Consumed { user_id })
    }

    async fn purge_expired_ephemeral(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut state = self.lock();
        let before = state.verifications.len() + state.resets.len();
        state.verifications.retain(|_, t| !t.is_expired(now));
        state.resets.retain(|_, t| !t.is_expired(now));
        let after = state.verifications.len() + state.resets.len();
        Ok((before - after) as u64)
    }
}

#[async_trait]
impl SessionTokenLog for MemoryStore {
    async fn insert_session(&self, record: &SessionTokenRecord) -> Result<(), StoreError> {
        let mut state = self.lock();
        if state.sessions.contains_key(&record.jti) {
            return Err(unique(TOKEN_LOG_JTI_KEY));
        }
        state.sessions.insert(record.jti.clone(), record.clone());
        Ok(())
    }

    async fn find_session(&self, jti: &str) -> Result<Option<SessionTokenRecord>, StoreError> {
        Ok(self.lock().sessions.get(jti).cloned())
    }

    async fn list_sessions(&self, user_id: i64) -> Result<Vec<SessionTokenRecord>, StoreError> {
        let mut records: Vec<_> = self
            .lock()
            .sessions
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(records)
    }

    async fn rotate_session(
        &self,
        old_jti: &str,
        successor: &SessionTokenRecord,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut state = self.lock();
        if state.sessions.contains_key(&successor.jti) {
            return Err(unique(TOKEN_LOG_JTI_KEY));
        }
        let Some(old) = state.sessions.get_mut(old_jti) else {
            return Ok(false);
        };
        if old.invalidated_at.is_some() {
            return Ok(false);
        }
        old.invalidated_at = Some(now);
        old.replaced_by_jti = Some(successor.jti.clone());
        state
            .sessions
            .insert(successor.jti.clone(), successor.clone());
        Ok(true)
    }

    async fn invalidate_session(
        &self,
        jti: &str,
        replaced_by: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut state = self.lock();
        match state.sessions.get_mut(jti) {
            Some(record) if record.invalidated_at.is_none() => {
                record.invalidated_at = Some(now);
                if let Some(next) = replaced_by {
                    record.replaced_by_jti = Some(next.to_string());
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn invalidate_user_sessions(
        &self,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut changed = 0;
        for record in self.lock().sessions.values_mut() {
            if record.user_id == user_id && record.invalidated_at.is_none() {
                record.invalidated_at = Some(now);
                changed += 1;
            }
        }
        Ok(changed)
    }
}
