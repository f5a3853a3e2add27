//! HTTP gateway.
//!
//! ```text
//! GET  /                    service banner
//! GET  /health              liveness + store status
//! POST /convert/:kind       multipart upload → converted file (or JSON for pdf-to-image)
//! GET  /download/*handle    previously converted artifact
//! ```
//!
//! Handlers never block: uploads are written through the async
//! [`ArtifactStore`] and conversions run on the [`ConversionPool`].

mod error;
mod handlers;
mod upload;

pub use error::ApiError;
pub use handlers::HANDLE_HEADER;

use crate::config::ServiceConfig;
use crate::convert::ConversionPool;
use crate::error::ConvertError;
use crate::storage::{ArtifactStore, LocalStore};
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServiceConfig>,
    pub incoming: Arc<dyn ArtifactStore>,
    pub converted: Arc<dyn ArtifactStore>,
    pub pool: ConversionPool,
}

impl AppState {
    /// Open both local stores, creating their directories.
    pub async fn open(config: ServiceConfig) -> Result<Self, ConvertError> {
        let config = Arc::new(config);
        let incoming = LocalStore::open(config.upload_dir.clone()).await?;
        let converted = LocalStore::open(config.converted_dir.clone()).await?;
        Ok(Self::with_stores(config, Arc::new(incoming), Arc::new(converted)))
    }

    /// Assemble state around existing stores.
    pub fn with_stores(
        config: Arc<ServiceConfig>,
        incoming: Arc<dyn ArtifactStore>,
        converted: Arc<dyn ArtifactStore>,
    ) -> Self {
        let pool = ConversionPool::new(Arc::clone(&config));
        Self {
            config,
            incoming,
            converted,
            pool,
        }
    }
}

/// Build the service router.
pub fn router(state: AppState) -> Router {
    let body_limit = state.config.max_upload_bytes;
    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/convert/:kind", post(handlers::convert))
        .route("/download/*handle", get(handlers::download))
        .fallback(handlers::not_found)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve on `addr` until Ctrl-C or SIGTERM.
pub async fn serve(state: AppState, addr: SocketAddr) -> Result<(), ConvertError> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ConvertError::Internal(format!("cannot bind {addr}: {e}")))?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ConvertError::Internal(format!("server error: {e}")))?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received, draining connections");
}
