use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// Length of the random part of generated entity ids.
pub const SHORT_ID_LEN: usize = 22;

const EVENT_NAME_MIN: usize = 2;
const EVENT_NAME_MAX: usize = 1000;
const EVENT_BODY_MIN: usize = 1;
const EVENT_BODY_MAX: usize = 10000;
const BRAND_MIN: usize = 2;
const BRAND_MAX: usize = 1000;

/// Generates an opaque alphanumeric short id.
pub fn short_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SHORT_ID_LEN)
        .map(char::from)
        .collect()
}

fn prefixed_id(prefix: &str) -> String {
    format!("{}_{}", prefix, short_id())
}

/// A caller known to the service. `secret` is either a bcrypt hash or a
/// legacy plaintext credential (see `SessionManager::verify_secret`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub auth_id: String,
    pub secret: String,
}

impl User {
    /// Creates a user, generating a `usr_` id when none is supplied.
    pub fn new(id: Option<String>, auth_id: String, secret: String) -> Self {
        Self {
            id: id.unwrap_or_else(|| prefixed_id("usr")),
            auth_id,
            secret,
        }
    }
}

/// A stored session. Expired sessions are never purged, only rejected at
/// read time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSession {
    pub id: String,
    pub user_id: String,
    pub access_token: String,
    pub access_token_expire_date_time: DateTime<Utc>,
    pub refresh_token: String,
    pub refresh_token_expire_date_time: DateTime<Utc>,
    pub ip_address: Option<String>,
    pub start_date_time: DateTime<Utc>,
}

/// Everything needed to construct a `UserSession` except the generated id.
#[derive(Debug, Clone)]
pub struct UserSessionProps {
    pub user_id: String,
    pub access_token: String,
    pub access_token_expire_date_time: DateTime<Utc>,
    pub refresh_token: String,
    pub refresh_token_expire_date_time: DateTime<Utc>,
    pub ip_address: Option<String>,
    pub start_date_time: DateTime<Utc>,
}

impl UserSession {
    /// Creates a session with a generated `uss_` id.
    pub fn new(props: UserSessionProps) -> Self {
        Self {
            id: prefixed_id("uss"),
            user_id: props.user_id,
            access_token: props.access_token,
            access_token_expire_date_time: props.access_token_expire_date_time,
            refresh_token: props.refresh_token,
            refresh_token_expire_date_time: props.refresh_token_expire_date_time,
            ip_address: props.ip_address,
            start_date_time: props.start_date_time,
        }
    }
}

/// Claims embedded in a signed access token. Lets queue consumers and
/// downstream services reconstruct caller identity without a repository
/// lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenContext {
    pub id: String,
    pub auth_id: String,
}

/// An inbound event as received over HTTP and republished on the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseEvent {
    pub id: Uuid,
    pub name: String,
    pub body: String,
    pub timestamp: DateTime<Utc>,
}

impl BaseEvent {
    /// Validates field constraints: v4 id, name 2..=1000 chars, body
    /// 1..=10000 chars.
    pub fn validate(&self) -> AppResult<()> {
        if self.id.get_version_num() != 4 {
            return Err(AppError::validation("Event id must be a UUID v4"));
        }
        let name_len = self.name.chars().count();
        if name_len < EVENT_NAME_MIN || name_len > EVENT_NAME_MAX {
            return Err(AppError::validation(format!(
                "Event name must be between {} and {} characters",
                EVENT_NAME_MIN, EVENT_NAME_MAX
            )));
        }
        let body_len = self.body.chars().count();
        if body_len < EVENT_BODY_MIN || body_len > EVENT_BODY_MAX {
            return Err(AppError::validation(format!(
                "Event body must be between {} and {} characters",
                EVENT_BODY_MIN, EVENT_BODY_MAX
            )));
        }
        Ok(())
    }
}

/// A `BaseEvent` enriched with a brand, the shape forwarded to the target
/// service. Derived once, never mutated back into a `BaseEvent`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtendedEvent {
    pub id: Uuid,
    pub name: String,
    pub body: String,
    pub timestamp: DateTime<Utc>,
    pub brand: String,
}

impl ExtendedEvent {
    /// Enrichment is pure: the same base event and brand always produce a
    /// field-for-field identical extended event.
    pub fn from_base(base: BaseEvent, brand: impl Into<String>) -> Self {
        Self {
            id: base.id,
            name: base.name,
            body: base.body,
            timestamp: base.timestamp,
            brand: brand.into(),
        }
    }

    pub fn validate(&self) -> AppResult<()> {
        let brand_len = self.brand.chars().count();
        if brand_len < BRAND_MIN || brand_len > BRAND_MAX {
            return Err(AppError::validation(format!(
                "Event brand must be between {} and {} characters",
                BRAND_MIN, BRAND_MAX
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event() -> BaseEvent {
        BaseEvent {
            id: Uuid::new_v4(),
            name: "user.created".to_string(),
            body: "{\"key\":\"value\"}".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_generated_ids_are_prefixed_and_unique() {
        let a = User::new(None, "auth-a".to_string(), "s".to_string());
        let b = User::new(None, "auth-b".to_string(), "s".to_string());
        assert!(a.id.starts_with("usr_"));
        assert_eq!(a.id.len(), "usr_".len() + SHORT_ID_LEN);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_explicit_id_is_kept() {
        let user = User::new(
            Some("usr_fixed".to_string()),
            "auth".to_string(),
            "s".to_string(),
        );
        assert_eq!(user.id, "usr_fixed");
    }

    #[test]
    fn test_base_event_validation() {
        let event = sample_event();
        assert!(event.validate().is_ok());

        let mut short_name = sample_event();
        short_name.name = "x".to_string();
        assert!(short_name.validate().is_err());

        let mut long_name = sample_event();
        long_name.name = "x".repeat(1001);
        assert!(long_name.validate().is_err());

        let mut empty_body = sample_event();
        empty_body.body = String::new();
        assert!(empty_body.validate().is_err());

        let mut long_body = sample_event();
        long_body.body = "x".repeat(10001);
        assert!(long_body.validate().is_err());
    }

    #[test]
    fn test_enrichment_is_pure() {
        let base = sample_event();
        let first = ExtendedEvent::from_base(base.clone(), "Test brand");
        let second = ExtendedEvent::from_base(base.clone(), "Test brand");
        assert_eq!(first, second);
        assert_eq!(first.id, base.id);
        assert_eq!(first.timestamp, base.timestamp);
        assert_eq!(first.brand, "Test brand");
    }

    #[test]
    fn test_extended_event_brand_validation() {
        let extended = ExtendedEvent::from_base(sample_event(), "b");
        assert!(extended.validate().is_err());
        let extended = ExtendedEvent::from_base(sample_event(), "brand");
        assert!(extended.validate().is_ok());
    }
}
