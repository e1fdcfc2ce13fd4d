use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::HeaderMap;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::{AuthConfig, REFRESH_TOKEN_LEN};
use crate::error::{AppError, AppResult};
use crate::models::{TokenContext, User, UserSession, UserSessionProps};
use crate::repository::UserRepository;

/// Access token claims. `exp` makes the token self-expiring at the access
/// expiry; `user` carries caller identity for downstream consumers.
#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    user: TokenContext,
    iat: i64,
    exp: i64,
}

/// Session body returned to the caller. The stored access token is also in
/// here; the client presents it as a bearer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionData {
    pub id: String,
    pub access_token: String,
    pub access_token_expire_date_time: DateTime<Utc>,
    pub refresh_token: String,
    pub refresh_token_expire_date_time: DateTime<Utc>,
    pub start_date_time: DateTime<Utc>,
}

impl From<UserSession> for SessionData {
    fn from(session: UserSession) -> Self {
        Self {
            id: session.id,
            access_token: session.access_token,
            access_token_expire_date_time: session.access_token_expire_date_time,
            refresh_token: session.refresh_token,
            refresh_token_expire_date_time: session.refresh_token_expire_date_time,
            start_date_time: session.start_date_time,
        }
    }
}

/// Creates, refreshes and verifies user sessions.
pub struct SessionManager {
    config: AuthConfig,
    repository: Arc<dyn UserRepository>,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl SessionManager {
    pub fn new(config: AuthConfig, repository: Arc<dyn UserRepository>) -> Self {
        let encoding_key = EncodingKey::from_secret(config.access_token_secret.as_bytes());
        let decoding_key = DecodingKey::from_secret(config.access_token_secret.as_bytes());
        Self {
            config,
            repository,
            encoding_key,
            decoding_key,
        }
    }

    /// Checks a presented secret against the stored one: exact equality for
    /// plaintext legacy records, bcrypt verification otherwise. The
    /// plaintext branch exists for migration compatibility and is the
    /// weaker posture.
    pub fn verify_secret(&self, candidate: &str, stored: &str) -> bool {
        candidate == stored || bcrypt::verify(candidate, stored).unwrap_or(false)
    }

    /// Authenticates by authId + secret and opens a session.
    pub async fn login(
        &self,
        auth_id: &str,
        secret: &str,
        ip_address: Option<String>,
    ) -> AppResult<SessionData> {
        let user = self
            .repository
            .get_user_by_auth_id(auth_id)
            .await?
            .ok_or_else(|| {
                AppError::not_found(format!(
                    "User with provided authId '{}' was not found",
                    auth_id
                ))
            })?;
        if !self.verify_secret(secret, &user.secret) {
            return Err(AppError::forbidden("Provided secret is not valid"));
        }
        self.create_session(&user, ip_address).await
    }

    /// Mints both tokens and persists a new session pinned to `ip_address`
    /// (when known).
    pub async fn create_session(
        &self,
        user: &User,
        ip_address: Option<String>,
    ) -> AppResult<SessionData> {
        let now = Utc::now();
        let access_expiry = now + Duration::seconds(self.config.access_token_expires_in_sec);
        let refresh_expiry = now + Duration::seconds(self.config.refresh_token_expires_in_sec);

        let claims = Claims {
            user: TokenContext {
                id: user.id.clone(),
                auth_id: user.auth_id.clone(),
            },
            iat: now.timestamp(),
            exp: access_expiry.timestamp(),
        };
        let access_token = encode(&Header::default(), &claims, &self.encoding_key)?;

        let session = UserSession::new(UserSessionProps {
            user_id: user.id.clone(),
            access_token,
            access_token_expire_date_time: access_expiry,
            refresh_token: generate_refresh_token(),
            refresh_token_expire_date_time: refresh_expiry,
            ip_address,
            start_date_time: now,
        });
        self.repository.create_session(session.clone()).await?;

        tracing::debug!(session_id = %session.id, user_id = %user.id, "Session created");
        Ok(session.into())
    }

    /// Rotates a session: validates the presented refresh token, expires it
    /// and opens a brand-new session. The expiry is a compare-and-swap in
    /// the repository, so of two concurrent refreshes with the same token
    /// at most one succeeds; the loser sees an already-expired token.
    pub async fn refresh_session(
        &self,
        refresh_token: &str,
        ip_address: Option<String>,
    ) -> AppResult<SessionData> {
        let session = self
            .repository
            .get_session_by_refresh_token(refresh_token)
            .await?
            .ok_or_else(|| {
                AppError::not_found("Session with provided refresh token was not found")
            })?;

        if let Some(pinned) = session.ip_address.as_deref() {
            // An empty pin means the session was created without a known
            // address and is exempt from the check.
            if !pinned.is_empty() && ip_address.as_deref() != Some(pinned) {
                return Err(AppError::forbidden(
                    "IP address was changed, need to create new session",
                ));
            }
        }

        let now = Utc::now();
        if now >= session.refresh_token_expire_date_time {
            return Err(AppError::forbidden(
                "Provided refresh token was expired, need to create new session",
            ));
        }

        if !self
            .repository
            .invalidate_refresh_token(&session.id, now)
            .await?
        {
            // Lost the race against a concurrent refresh.
            return Err(AppError::forbidden(
                "Provided refresh token was expired, need to create new session",
            ));
        }

        let user = self
            .repository
            .get_user_by_id(&session.user_id)
            .await?
            .ok_or_else(|| AppError::not_found("Session owner no longer exists"))?;
        self.create_session(&user, ip_address).await
    }

    /// Decodes and validates a bearer access token.
    pub fn verify_access_token(&self, token: &str) -> AppResult<TokenContext> {
        let data = decode::<Claims>(token, &self.decoding_key, &Validation::default())?;
        Ok(data.claims.user)
    }
}

fn generate_refresh_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(REFRESH_TOKEN_LEN)
        .map(char::from)
        .collect()
}

/// Caller address: first `x-forwarded-for` entry when present, else the
/// transport peer. `None` is a valid unknown state.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
}
