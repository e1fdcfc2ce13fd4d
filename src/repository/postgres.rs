use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;

use super::UserRepository;
use crate::error::AppResult;
use crate::models::{User, UserSession};

const MAX_CONNECTIONS: u32 = 10;

/// sqlx-backed store. Migrations are embedded and run at connect time.
pub struct PostgresUserRepository {
    pool: PgPool,
}

impl PostgresUserRepository {
    pub async fn connect(database_url: &str) -> AppResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect(database_url)
            .await?;
        sqlx::migrate!().run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn user_from_row(row: &PgRow) -> Result<User, sqlx::Error> {
    Ok(User {
        id: row.try_get("id")?,
        auth_id: row.try_get("auth_id")?,
        secret: row.try_get("secret")?,
    })
}

fn session_from_row(row: &PgRow) -> Result<UserSession, sqlx::Error> {
    Ok(UserSession {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        access_token: row.try_get("access_token")?,
        access_token_expire_date_time: row.try_get("access_token_expire_date_time")?,
        refresh_token: row.try_get("refresh_token")?,
        refresh_token_expire_date_time: row.try_get("refresh_token_expire_date_time")?,
        ip_address: row.try_get("ip_address")?,
        start_date_time: row.try_get("start_date_time")?,
    })
}

#[async_trait]
impl UserRepository for PostgresUserRepository {
    async fn get_user_by_auth_id(&self, auth_id: &str) -> AppResult<Option<User>> {
        let row = sqlx::query("SELECT id, auth_id, secret FROM users WHERE auth_id = $1")
            .bind(auth_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(user_from_row).transpose()?)
    }

    async fn get_user_by_id(&self, id: &str) -> AppResult<Option<User>> {
        let row = sqlx::query("SELECT id, auth_id, secret FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(user_from_row).transpose()?)
    }

    async fn get_users_by_ids(&self, ids: &[String]) -> AppResult<Vec<User>> {
        let rows = sqlx::query("SELECT id, auth_id, secret FROM users WHERE id = ANY($1)")
            .bind(ids)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(user_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn get_session_by_refresh_token(
        &self,
        token: &str,
    ) -> AppResult<Option<UserSession>> {
        let row = sqlx::query(
            "SELECT id, user_id, access_token, access_token_expire_date_time, \
                    refresh_token, refresh_token_expire_date_time, ip_address, \
                    start_date_time \
             FROM user_sessions WHERE refresh_token = $1",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(session_from_row).transpose()?)
    }

    async fn create_users(&self, users: Vec<User>) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;
        for user in users {
            sqlx::query("INSERT INTO users (id, auth_id, secret) VALUES ($1, $2, $3)")
                .bind(&user.id)
                .bind(&user.auth_id)
                .bind(&user.secret)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn create_session(&self, session: UserSession) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO user_sessions \
                (id, user_id, access_token, access_token_expire_date_time, \
                 refresh_token, refresh_token_expire_date_time, ip_address, \
                 start_date_time) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(&session.id)
        .bind(&session.user_id)
        .bind(&session.access_token)
        .bind(session.access_token_expire_date_time)
        .bind(&session.refresh_token)
        .bind(session.refresh_token_expire_date_time)
        .bind(&session.ip_address)
        .bind(session.start_date_time)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn invalidate_refresh_token(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        // Conditional update doubles as the compare-and-swap: only a
        // still-valid token can be expired, and only one caller sees an
        // affected row.
        let result = sqlx::query(
            "UPDATE user_sessions SET refresh_token_expire_date_time = $2 \
             WHERE id = $1 AND refresh_token_expire_date_time > $2",
        )
        .bind(session_id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}
