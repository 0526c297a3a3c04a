// Main entry point for the account merge server

use std::sync::Arc;

use anyhow::{Context, Result};
use server_core::{
    domains::account_merge::{PostgresIdentityStore, PostgresMergeRequestRepository},
    kernel::{
        scheduled_tasks::start_scheduler, AuthorizationAdapter, KeyValueCache,
        NotificationAdapter, PostgresKeyValueStore, SecondaryDataAdapter, ServerDeps, SystemClock,
    },
    server::{auth::JwtService, build_app, AppState},
    Config,
};
use service_clients::{AuthorizationClient, NotificationClient, SecondaryDataClient, ServiceOptions};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,server_core=debug,service_clients=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting account merge server");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!("Configuration loaded");

    // Connect to database
    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connected");

    // Run migrations
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;
    tracing::info!("Migrations complete");

    // Internal service clients
    let service_options = |url: &str| {
        ServiceOptions::new(url).with_api_key(config.service_api_key.clone())
    };
    let authorization = AuthorizationClient::new(service_options(&config.authorization_service_url));
    let secondary_data =
        SecondaryDataClient::new(service_options(&config.secondary_data_service_url));
    let notifications = NotificationClient::new(service_options(&config.notification_service_url));

    let kv_store = Arc::new(PostgresKeyValueStore::new(pool.clone()));
    let deps = Arc::new(ServerDeps::new(
        Arc::new(PostgresMergeRequestRepository::new(pool.clone())),
        Arc::new(PostgresIdentityStore::new(pool.clone())),
        kv_store.clone(),
        Arc::new(AuthorizationAdapter::new(Arc::new(authorization))),
        Arc::new(SecondaryDataAdapter::new(Arc::new(secondary_data))),
        Arc::new(NotificationAdapter::new(Arc::new(notifications))),
        Arc::new(KeyValueCache::new(kv_store)),
        Arc::new(SystemClock),
        config.merge_confirm_base_url.clone(),
    ));

    // Keep the scheduler alive for the lifetime of the server
    let _scheduler = start_scheduler(deps.clone())
        .await
        .context("Failed to start scheduled tasks")?;

    let jwt_service = Arc::new(JwtService::new(&config.jwt_secret, config.jwt_issuer.clone()));
    let app = build_app(AppState { deps }, jwt_service);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("Starting server on {}", addr);
    tracing::info!("Health check: http://localhost:{}/health", config.port);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
