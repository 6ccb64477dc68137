use std::net::SocketAddr;
use std::sync::Arc;

use socketioxide::extract::SocketRef;
use socketioxide::SocketIo;

use huddle_chat::broadcast::{socket, SocketBroadcaster};
use huddle_chat::config::{AppConfig, StorageBackend};
use huddle_chat::store::{ChatStore, MemoryStore, PgStore};
use huddle_chat::{build_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    huddle_shared::middleware::init_tracing("huddle-chat");

    let config = AppConfig::load()?;
    let port = config.port;

    let store: Arc<dyn ChatStore> = match config.storage {
        StorageBackend::Postgres => {
            let pool = huddle_shared::db::create_pool(&config.database_url, config.db_pool_size)?;
            Arc::new(PgStore::new(pool))
        }
        StorageBackend::Memory => {
            tracing::warn!("using in-memory storage, nothing will be persisted");
            Arc::new(MemoryStore::new())
        }
    };

    let metrics_handle = huddle_shared::middleware::init_metrics()?;

    // the REST handlers publish through the same io handle the sockets subscribe on
    let (sio_layer, io) = SocketIo::builder().build_layer();

    let state = Arc::new(AppState {
        store,
        broadcaster: Arc::new(SocketBroadcaster::new(io.clone())),
        config,
        metrics_handle: Some(metrics_handle),
    });

    io.ns("/", {
        let state = state.clone();
        move |socket: SocketRef| {
            let state = state.clone();
            async move {
                socket::on_connect_with_state(socket, state).await;
            }
        }
    });

    let app = build_router(state, Some(sio_layer));

    let addr = format!("0.0.0.0:{port}");
    tracing::info!(addr = %addr, "huddle-chat starting");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;

    Ok(())
}
