use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::UserRepository;
use crate::error::AppResult;
use crate::models::{User, UserSession};

/// Vec-backed store for local runs and tests. Sessions accumulate for the
/// process lifetime; expired ones are rejected at read time by the caller.
pub struct InMemoryUserRepository {
    users: RwLock<Vec<User>>,
    sessions: RwLock<Vec<UserSession>>,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self {
            users: RwLock::new(Vec::new()),
            sessions: RwLock::new(Vec::new()),
        }
    }
}

impl Default for InMemoryUserRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn get_user_by_auth_id(&self, auth_id: &str) -> AppResult<Option<User>> {
        let users = self.users.read().await;
        Ok(users.iter().find(|u| u.auth_id == auth_id).cloned())
    }

    async fn get_user_by_id(&self, id: &str) -> AppResult<Option<User>> {
        let users = self.users.read().await;
        Ok(users.iter().find(|u| u.id == id).cloned())
    }

    async fn get_users_by_ids(&self, ids: &[String]) -> AppResult<Vec<User>> {
        let users = self.users.read().await;
        Ok(users
            .iter()
            .filter(|u| ids.contains(&u.id))
            .cloned()
            .collect())
    }

    async fn get_session_by_refresh_token(
        &self,
        token: &str,
    ) -> AppResult<Option<UserSession>> {
        let sessions = self.sessions.read().await;
        Ok(sessions.iter().find(|s| s.refresh_token == token).cloned())
    }

    async fn create_users(&self, new_users: Vec<User>) -> AppResult<()> {
        let mut users = self.users.write().await;
        users.extend(new_users);
        Ok(())
    }

    async fn create_session(&self, session: UserSession) -> AppResult<()> {
        let mut sessions = self.sessions.write().await;
        sessions.push(session);
        Ok(())
    }

    async fn invalidate_refresh_token(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        // Check-and-set under the write lock, so concurrent invalidations
        // of the same session see exactly one winner.
        let mut sessions = self.sessions.write().await;
        match sessions.iter_mut().find(|s| s.id == session_id) {
            Some(session) if session.refresh_token_expire_date_time > now => {
                session.refresh_token_expire_date_time = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
