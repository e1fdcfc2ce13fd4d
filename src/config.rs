use anyhow::Result;

// ============================================================================
// Configuration Constants
// ============================================================================

const DEFAULT_PORT: u16 = 8080;

// Default token lifetimes (in seconds)
const DEFAULT_ACCESS_TOKEN_EXPIRES_IN_SEC: i64 = 600;
const DEFAULT_REFRESH_TOKEN_EXPIRES_IN_SEC: i64 = 86400;

// Default brand attached to enriched events
const DEFAULT_EVENT_BRAND: &str = "Test brand";

/// Length of opaque refresh tokens.
pub const REFRESH_TOKEN_LEN: usize = 256;

/// Logical service name, used as the Kafka consumer group so replicas share
/// one consumption group.
pub const SERVICE_NAME: &str = "relay-server";

// ============================================================================
// Configuration Structures
// ============================================================================

/// Which queue transport to run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueueKind {
    InMemory,
    Kafka,
}

impl std::str::FromStr for QueueKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "in-memory" | "in_memory" | "memory" => Ok(Self::InMemory),
            "kafka" => Ok(Self::Kafka),
            _ => anyhow::bail!("Invalid QUEUE_TYPE: {}. Must be 'in-memory' or 'kafka'", s),
        }
    }
}

/// Which user/session storage backend to run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RepositoryKind {
    InMemory,
    Postgres,
}

impl std::str::FromStr for RepositoryKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "in-memory" | "in_memory" | "memory" => Ok(Self::InMemory),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            _ => anyhow::bail!(
                "Invalid REPOSITORY_TYPE: {}. Must be 'in-memory' or 'postgres'",
                s
            ),
        }
    }
}

/// Session token settings.
#[derive(Clone, Debug)]
pub struct AuthConfig {
    /// HS256 signing secret for access tokens
    pub access_token_secret: String,
    /// Access token lifetime (seconds)
    pub access_token_expires_in_sec: i64,
    /// Refresh token lifetime (seconds)
    pub refresh_token_expires_in_sec: i64,
}

/// Queue transport settings.
#[derive(Clone, Debug)]
pub struct QueueConfig {
    pub kind: QueueKind,
    /// Kafka bootstrap servers (e.g., "kafka1:9092,kafka2:9092")
    pub url: String,
    /// Identifies this replica as the Kafka client.id; generated when unset
    pub replica_name: String,
}

/// Storage settings.
#[derive(Clone, Debug)]
pub struct RepositoryConfig {
    pub kind: RepositoryKind,
    /// Postgres connection string; required only for the postgres backend
    pub database_url: Option<String>,
    /// JSON array of users to seed at startup
    pub test_users_data: Option<String>,
}

/// Downstream GraphQL target settings.
#[derive(Clone, Debug)]
pub struct TargetConfig {
    pub graphql_url: Option<String>,
    pub request_retries: Option<u32>,
    pub rate_limit_interval_ms: Option<u64>,
    pub rate_limit_requests_per_interval: Option<u32>,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub auth: AuthConfig,
    pub queue: QueueConfig,
    pub repository: RepositoryConfig,
    pub target: TargetConfig,
    /// Brand stamped onto events before forwarding
    pub event_brand: String,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(DEFAULT_PORT),
            auth: AuthConfig {
                access_token_secret: std::env::var("ACCESS_TOKEN_SECRET")?,
                access_token_expires_in_sec: std::env::var("ACCESS_TOKEN_EXPIRES_IN_SEC")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_ACCESS_TOKEN_EXPIRES_IN_SEC),
                refresh_token_expires_in_sec: std::env::var("REFRESH_TOKEN_EXPIRES_IN_SEC")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_REFRESH_TOKEN_EXPIRES_IN_SEC),
            },
            queue: QueueConfig {
                kind: std::env::var("QUEUE_TYPE")
                    .unwrap_or_else(|_| "in-memory".to_string())
                    .parse()?,
                url: std::env::var("QUEUE_URL").unwrap_or_else(|_| "localhost:9092".to_string()),
                replica_name: std::env::var("REPLICA_NAME").unwrap_or_else(|_| {
                    format!("{}-{}", SERVICE_NAME, crate::models::short_id())
                }),
            },
            repository: RepositoryConfig {
                kind: std::env::var("REPOSITORY_TYPE")
                    .unwrap_or_else(|_| "in-memory".to_string())
                    .parse()?,
                database_url: std::env::var("DATABASE_URL").ok(),
                test_users_data: std::env::var("TEST_USERS_DATA").ok(),
            },
            target: TargetConfig {
                graphql_url: std::env::var("TARGET_GRAPHQL_URL").ok(),
                request_retries: std::env::var("TARGET_REQUEST_RETRIES")
                    .ok()
                    .and_then(|r| r.parse().ok()),
                rate_limit_interval_ms: std::env::var("TARGET_RATE_LIMIT_INTERVAL_MS")
                    .ok()
                    .and_then(|i| i.parse().ok()),
                rate_limit_requests_per_interval: std::env::var(
                    "TARGET_RATE_LIMIT_REQUESTS_PER_INTERVAL",
                )
                .ok()
                .and_then(|r| r.parse().ok()),
            },
            event_brand: std::env::var("EVENT_BRAND")
                .unwrap_or_else(|_| DEFAULT_EVENT_BRAND.to_string()),
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_kind_parsing() {
        assert_eq!("in-memory".parse::<QueueKind>().unwrap(), QueueKind::InMemory);
        assert_eq!("Kafka".parse::<QueueKind>().unwrap(), QueueKind::Kafka);
        assert!("rabbitmq".parse::<QueueKind>().is_err());
    }

    #[test]
    fn test_repository_kind_parsing() {
        assert_eq!(
            "postgres".parse::<RepositoryKind>().unwrap(),
            RepositoryKind::Postgres
        );
        assert_eq!(
            "memory".parse::<RepositoryKind>().unwrap(),
            RepositoryKind::InMemory
        );
        assert!("mongo".parse::<RepositoryKind>().is_err());
    }
}
