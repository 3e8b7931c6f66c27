use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use draw_queue::clock::SystemClock;
use draw_queue::server::{build_router, AppState};
use draw_queue::store::MemoryStore;

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "draw_queue=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let store = Arc::new(MemoryStore::new());
    let app = build_router(AppState::new(store, Arc::new(SystemClock)));

    let addr = SocketAddr::from(([0, 0, 0, 0], 3000));
    tracing::info!("listening on {}", addr);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(error = %err, "failed to bind {addr}");
            std::process::exit(1);
        }
    };
    if let Err(err) = axum::serve(listener, app).await {
        tracing::error!(error = %err, "server exited");
        std::process::exit(1);
    }
}
