use std::{process::ExitCode, sync::Arc};
use storage::{InMemoryStorage, LocalFileStorage, Storage};
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod preview;
mod routes;
mod storage;

use config::{AppConfig, StorageType};
use errors::StartupError;
use routes::AppState;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug")),
        )
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{err}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), StartupError> {
    let config = AppConfig::from_env()?;
    let storage = build_storage(&config)?;
    let addr = config.socket_addr()?;

    let app = routes::router(AppState {
        storage,
        fallback_host: addr.to_string(),
        allow_delete: config.allow_delete,
    });

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| StartupError::Bind { addr, source })?;
    tracing::info!(
        accept = ?config.policy.accept,
        max_upload_bytes = ?config.policy.max_bytes,
        allow_delete = config.allow_delete,
        "Server running on {}",
        addr
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(StartupError::Serve)
}

fn build_storage(config: &AppConfig) -> Result<Arc<dyn Storage>, StartupError> {
    let policy = config.policy.clone();
    let storage: Arc<dyn Storage> = match config.storage_type {
        StorageType::Memory => Arc::new(InMemoryStorage::new(policy)),
        StorageType::Local => {
            if config.require_existing_storage && !config.storage_path.is_dir() {
                return Err(StartupError::StoragePrereqMissing(
                    config.storage_path.display().to_string(),
                ));
            }
            let storage = LocalFileStorage::new(config.storage_path.clone(), policy)
                .map_err(StartupError::Storage)?;
            tracing::info!(path = %storage.storage_path().display(), "Using local file storage");
            Arc::new(storage)
        }
    };
    Ok(storage)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
