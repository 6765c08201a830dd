use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use huddle_api::bus::{EventBus, LocalEventBus};
use huddle_api::config::Config;
use huddle_api::db::pg_store::PgStore;
use huddle_api::db::store::{MemoryStore, RecordStore};
use huddle_api::AppState;

#[tokio::main]
async fn main() {
    // Load .env file (silently skip if missing; env vars may be set externally)
    if dotenvy::dotenv().is_err() {
        let env_path = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(env_path);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let port = config.port;

    let store: Arc<dyn RecordStore> = match config.database_url.as_deref() {
        Some(url) => match huddle_api::db::pool::connect(url) {
            Ok(pool) => Arc::new(PgStore::new(pool)),
            Err(err) => {
                tracing::error!(%err, "cannot start without a database pool");
                return;
            }
        },
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory record store");
            Arc::new(MemoryStore::new())
        }
    };

    let bus: Arc<dyn EventBus> = Arc::new(LocalEventBus::spawn(
        store.clone(),
        config.bus_capacity,
        config.persist_retries,
    ));

    tracing::info!(
        heartbeat_interval_ms = config.heartbeat_interval_ms,
        persist_retries = config.persist_retries,
        "huddle-api configured"
    );

    let state = AppState::new(config, store, bus);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .merge(huddle_api::routes::router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(%addr, %err, "failed to bind");
            return;
        }
    };
    tracing::info!(%addr, "huddle-api listening");

    if let Err(err) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(%err, "server error");
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(%err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
