mod config;
mod notifier;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Router, routing::get};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use courier_api::state::{AppState, AppStateInner};
use courier_core::{ChangeFeed, Messaging};
use courier_db::Database;

use crate::config::ServerConfig;
use crate::notifier::WebhookNotifier;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "courier=debug,tower_http=debug".into()),
        )
        .init();

    let config = ServerConfig::from_env()?;

    // Init database and media storage
    let db = Arc::new(Database::open(&config.db_path)?);
    tokio::fs::create_dir_all(&config.media_dir).await?;

    let feed = ChangeFeed::new(config.feed_capacity);
    let cancel = CancellationToken::new();
    let (notifier, notifier_task) = WebhookNotifier::spawn(config.notify_webhook.clone(), cancel.clone());

    let state: AppState = Arc::new(AppStateInner {
        messaging: Messaging::new(db, feed.clone(), Arc::new(notifier)),
        jwt_secret: config.jwt_secret.clone(),
        media_dir: config.media_dir.clone(),
        public_url: config.public_url.clone(),
    });

    let app = Router::new()
        .route("/health", get(health))
        .merge(courier_api::router(state))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        );

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Courier server listening on {}", addr);
    info!("Media served from {} as {}/media", config.media_dir.display(), config.public_url);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(feed))
        .await?;

    cancel.cancel();
    if let Err(e) = notifier_task.await {
        warn!("Notification task ended abnormally: {}", e);
    }

    Ok(())
}

async fn health() -> &'static str {
    "ok"
}

/// Resolves on Ctrl+C or SIGTERM, then closes the feed so live sockets end
/// and the server can drain.
async fn shutdown_signal(feed: ChangeFeed) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await;
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await;
        info!("Received Ctrl+C, shutting down...");
    }

    feed.close();
}
