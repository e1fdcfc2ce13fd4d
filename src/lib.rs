pub mod auth;
pub mod config;
pub mod context;
pub mod error;
pub mod graphql;
pub mod models;
pub mod pipeline;
pub mod rate_limit;
pub mod repository;
pub mod routes;
pub mod transport;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::auth::SessionManager;
use crate::config::Config;
use crate::context::AppContext;
use crate::graphql::{GraphqlClient, GraphqlClientConfig, HttpExecutor};
use crate::transport::TransportRegistry;

pub async fn run() -> Result<()> {
    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_new(&config.rust_log)?)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        queue = ?config.queue.kind,
        repository = ?config.repository.kind,
        replica = %config.queue.replica_name,
        "Starting relay-server"
    );

    let repository = repository::build_repository(&config.repository).await?;
    repository::seed_users(repository.as_ref(), &config.repository).await?;

    let sessions = SessionManager::new(config.auth.clone(), repository.clone());

    let registry = TransportRegistry::new(config.queue.clone());
    let transport = registry.get()?;

    let client = Arc::new(GraphqlClient::new(Arc::new(HttpExecutor::new())));
    client
        .configure(GraphqlClientConfig {
            endpoint: config.target.graphql_url.clone(),
            rate_limit_interval_ms: config.target.rate_limit_interval_ms,
            rate_limit_requests_per_interval: config.target.rate_limit_requests_per_interval,
            retries: config.target.request_retries,
        })
        .await;

    pipeline::register_event_consumer(transport.as_ref(), client, config.event_brand.clone())
        .await;
    let listener = transport.clone();
    tokio::spawn(async move {
        if let Err(err) = listener.listen().await {
            tracing::error!(error = %err, "Queue listener terminated");
        }
    });

    let port = config.port;
    let context = Arc::new(AppContext {
        config,
        repository,
        sessions,
        transport,
    });
    let app = routes::create_router(context);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let tcp = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "Listening");

    tokio::select! {
        result = axum::serve(tcp, app.into_make_service_with_connect_info::<SocketAddr>()) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }
    Ok(())
}
