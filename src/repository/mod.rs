pub mod in_memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::config::{RepositoryConfig, RepositoryKind};
use crate::error::{AppError, AppResult};
use crate::models::{User, UserSession};

pub use in_memory::InMemoryUserRepository;
pub use postgres::PostgresUserRepository;

/// User and session storage.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn get_user_by_auth_id(&self, auth_id: &str) -> AppResult<Option<User>>;

    async fn get_user_by_id(&self, id: &str) -> AppResult<Option<User>>;

    async fn get_users_by_ids(&self, ids: &[String]) -> AppResult<Vec<User>>;

    async fn get_session_by_refresh_token(&self, token: &str)
        -> AppResult<Option<UserSession>>;

    async fn create_users(&self, users: Vec<User>) -> AppResult<()>;

    async fn create_session(&self, session: UserSession) -> AppResult<()>;

    /// Expires the session's refresh token, but only if it is still in the
    /// future at `now`. Returns whether this call performed the expiry;
    /// concurrent callers race and exactly one wins.
    async fn invalidate_refresh_token(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> AppResult<bool>;
}

/// Builds the configured backend. Postgres connection and migration
/// failures are fatal at startup.
pub async fn build_repository(
    config: &RepositoryConfig,
) -> AppResult<Arc<dyn UserRepository>> {
    match config.kind {
        RepositoryKind::InMemory => Ok(Arc::new(InMemoryUserRepository::new())),
        RepositoryKind::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .ok_or_else(|| AppError::config("DATABASE_URL is required for postgres"))?;
            Ok(Arc::new(PostgresUserRepository::connect(url).await?))
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SeedUser {
    id: Option<String>,
    auth_id: String,
    secret: String,
}

/// Seeds users from the configured JSON array. Idempotent across restarts:
/// entries whose id already exists are skipped.
pub async fn seed_users(repo: &dyn UserRepository, config: &RepositoryConfig) -> AppResult<()> {
    let raw = match &config.test_users_data {
        Some(raw) if !raw.trim().is_empty() => raw,
        _ => return Ok(()),
    };
    let seeds: Vec<SeedUser> = serde_json::from_str(raw)?;
    if seeds.is_empty() {
        return Ok(());
    }

    let known_ids: Vec<String> = seeds.iter().filter_map(|s| s.id.clone()).collect();
    let existing = repo.get_users_by_ids(&known_ids).await?;

    let fresh: Vec<User> = seeds
        .into_iter()
        .filter(|seed| {
            seed.id
                .as_ref()
                .map(|id| !existing.iter().any(|u| &u.id == id))
                .unwrap_or(true)
        })
        .map(|seed| User::new(seed.id, seed.auth_id, seed.secret))
        .collect();

    if !fresh.is_empty() {
        tracing::info!(count = fresh.len(), "Seeding users");
        repo.create_users(fresh).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_seed(raw: &str) -> RepositoryConfig {
        RepositoryConfig {
            kind: RepositoryKind::InMemory,
            database_url: None,
            test_users_data: Some(raw.to_string()),
        }
    }

    #[tokio::test]
    async fn test_seed_creates_users() {
        let repo = InMemoryUserRepository::new();
        let config = config_with_seed(
            r#"[{"id":"usr_one","authId":"alpha","secret":"s1"},{"authId":"beta","secret":"s2"}]"#,
        );
        seed_users(&repo, &config).await.unwrap();

        let alpha = repo.get_user_by_auth_id("alpha").await.unwrap().unwrap();
        assert_eq!(alpha.id, "usr_one");
        let beta = repo.get_user_by_auth_id("beta").await.unwrap().unwrap();
        assert!(beta.id.starts_with("usr_"));
    }

    #[tokio::test]
    async fn test_seed_is_idempotent_for_known_ids() {
        let repo = InMemoryUserRepository::new();
        let config =
            config_with_seed(r#"[{"id":"usr_one","authId":"alpha","secret":"s1"}]"#);
        seed_users(&repo, &config).await.unwrap();
        seed_users(&repo, &config).await.unwrap();

        let users = repo.get_users_by_ids(&["usr_one".to_string()]).await.unwrap();
        assert_eq!(users.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_seed_is_a_noop() {
        let repo = InMemoryUserRepository::new();
        let mut config = config_with_seed("");
        seed_users(&repo, &config).await.unwrap();
        config.test_users_data = None;
        seed_users(&repo, &config).await.unwrap();
    }

    #[tokio::test]
    async fn test_factory_requires_database_url_for_postgres() {
        let config = RepositoryConfig {
            kind: RepositoryKind::Postgres,
            database_url: None,
            test_users_data: None,
        };
        let result = build_repository(&config).await;
        assert!(matches!(result, Err(AppError::Config(_))));
    }
}
