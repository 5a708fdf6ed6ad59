use anyhow::{Context, Result};
use axum::Router;
use std::{io::ErrorKind, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use filesrv::{
    config::{AppConfig, Backend},
    crypto::KeyDeriver,
    routes,
    services::{
        gateway_service::{GatewayService, GatewaySettings},
        memory_store::MemoryStore,
        object_store::ObjectStore,
        s3_store::S3Store,
        spool,
    },
};

/// How long startup waits for the backend to confirm the bucket.
const BOOTSTRAP_TIMEOUT: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // --- Parse config ---
    let cfg = AppConfig::from_env_and_args()?;
    tracing::info!("Starting filesrv with config: {:?}", cfg);

    let addr = cfg.addr();
    let deriver = KeyDeriver::new(cfg.secret).context("initializing key derivation")?;

    // --- Ensure spool directory exists ---
    spool::prepare_dir(&cfg.spool_dir)
        .await
        .with_context(|| format!("creating spool directory {}", cfg.spool_dir.display()))?;

    // --- Initialize storage backend ---
    let store: Arc<dyn ObjectStore> = match (cfg.backend, cfg.s3.as_ref()) {
        (Backend::S3, Some(s3)) => Arc::new(S3Store::new(s3)),
        (Backend::S3, None) => anyhow::bail!("s3 backend selected without s3 settings"),
        (Backend::Memory, _) => {
            tracing::warn!("Using the in-memory backend; objects are lost on exit");
            Arc::new(MemoryStore::new())
        }
    };
    tokio::time::timeout(BOOTSTRAP_TIMEOUT, store.ensure_bucket(&cfg.bucket))
        .await
        .with_context(|| format!("timed out ensuring bucket `{}`", cfg.bucket))?
        .with_context(|| format!("ensuring bucket `{}`", cfg.bucket))?;

    // --- Initialize core service ---
    let service = GatewayService::new(
        store,
        deriver,
        GatewaySettings {
            bucket: cfg.bucket.clone(),
            chunk_size: cfg.chunk_size,
            form_limit: cfg.form_limit,
            spool_dir: cfg.spool_dir.clone(),
            kdf_concurrency: cfg.kdf_concurrency,
        },
    );

    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(service);

    // --- Start server ---
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err).with_context(|| format!("binding {addr}")),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutdown signal received, draining connections"),
        Err(err) => tracing::error!("Failed to listen for shutdown signal: {err}"),
    }
}
