//! Service assembly: configuration in, running HTTP server out

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::Router;
use tracing::info;

use crate::engine::api::{create_router, ApiState};
use crate::engine::config::Config;
use crate::engine::database::Database;
use crate::engine::fota::{AdminAuth, FotaService, FotaSettings};
use crate::engine::registry::SqliteRegistry;
use crate::engine::storage::{open_store, BlobStore};

/// Everything a running service holds on to
pub struct App {
    pub router: Router,
    pub store: Arc<dyn BlobStore>,
}

/// Open the database and blob store named by `config` and build the router
pub async fn build_app(config: &Config) -> anyhow::Result<App> {
    let db = Database::new(&config.database.path)
        .with_context(|| format!("failed to open database {}", config.database.path.display()))?;
    info!(path = %config.database.path.display(), "firmware registry opened");

    let store = open_store(&config.storage)
        .await
        .context("failed to initialize blob storage")?;
    info!(backend = store.kind(), "blob storage ready");

    let settings = FotaSettings::new(
        &config.server.route_prefix,
        Duration::from_secs(config.storage.signed_url_ttl_secs),
    );
    let fota = FotaService::new(Arc::clone(&store), Arc::new(SqliteRegistry::new(db)), settings);

    let auth = AdminAuth::new(config.auth.admin_api_token.as_deref());
    info!(upload_auth = auth.is_enabled(), "admin token check configured");

    let state = ApiState {
        fota: Arc::new(fota),
        auth: Arc::new(auth),
        max_upload_bytes: config.server.max_upload_bytes,
    };

    Ok(App {
        router: create_router(state),
        store,
    })
}

/// Serve until Ctrl-C, then release the blob store
pub async fn run(config: Config) -> anyhow::Result<()> {
    let app = build_app(&config).await?;
    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    info!(
        addr = %addr,
        route_prefix = %config.server.route_prefix,
        "FOTA service listening"
    );

    axum::serve(listener, app.router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    app.store.close().await.context("failed to close blob storage")?;
    info!("FOTA service stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
