pub mod routes;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::sync::{watch, RwLock};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use common::{EngineState, Result, TraderStatus};

/// Shared application state injected into every route handler.
#[derive(Clone)]
pub struct AppState {
    pub engine_state: Arc<RwLock<EngineState>>,
    /// Latest published status per instrument code.
    pub statuses: Arc<HashMap<String, watch::Receiver<TraderStatus>>>,
}

impl AppState {
    pub fn new(
        engine_state: Arc<RwLock<EngineState>>,
        statuses: HashMap<String, watch::Receiver<TraderStatus>>,
    ) -> Self {
        Self {
            engine_state,
            statuses: Arc::new(statuses),
        }
    }
}

/// Read-only status router with permissive CORS.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_headers(Any)
        .allow_methods(Any);

    Router::new()
        .merge(routes::status_router())
        .merge(routes::health_router())
        .with_state(state)
        .layer(cors)
}

/// Build and run the Axum API server.
pub async fn serve(state: AppState, port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "Status API listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}
