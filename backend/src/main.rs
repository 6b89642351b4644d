mod config;
mod handler;
mod storage;

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::{config::Config, storage::ChunkStore};

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("signal received, starting graceful shutdown");
}

fn spawn_cleanup(store: Arc<ChunkStore>, interval_secs: u64, stale_after: Duration) {
    if interval_secs == 0 {
        tracing::info!("periodic upload cleanup disabled");
        return;
    }
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
        loop {
            interval.tick().await;
            tracing::info!(dir = %store.upload_dir().display(), "cleaning up upload folder");
            if let Err(error) = store.clean_uploads().await {
                tracing::error!(%error, "failed to clean upload folder");
            }
            match store.clean_stale_chunks(stale_after).await {
                Ok(0) => {}
                Ok(removed) => tracing::info!(removed, "dropped stale chunks"),
                Err(error) => tracing::error!(%error, "failed to drop stale chunks"),
            }
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_file(true)
                .with_line_number(true),
        )
        .init();

    let config = Config::from_env()?;

    let store = Arc::new(ChunkStore::new(&config.chunk_dir, &config.upload_dir));
    store
        .prepare()
        .await
        .context("failed to prepare storage directories")?;
    spawn_cleanup(
        store.clone(),
        config.cleanup_interval_secs,
        Duration::from_secs(config.stale_chunk_secs),
    );

    let router = crate::handler::create_router(store, &config.static_dir, config.max_body_bytes);

    let listen_addr = config
        .listen_addr
        .parse()
        .context("failed to parse listen addr")?;

    tracing::info!(%listen_addr, "starting http server...");

    axum::Server::bind(&listen_addr)
        .serve(router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("failed to serve HTTP")?;

    Ok(())
}
