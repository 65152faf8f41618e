mod config;
mod db;
mod error;
mod event;
mod routes;
mod services;
mod state;
mod storage;

use std::sync::Arc;

use crate::config::Config;
use crate::services::notify::LogNotifier;
use crate::storage::Store;
use crate::storage::memory::MemoryStore;
use crate::storage::postgres::PgStore;

/// In-memory store with one board, two groups and a session for local runs.
fn demo_store() -> MemoryStore {
    let store = MemoryStore::new();
    let user_id = store.seed_user("demo");
    let token = store.create_session(user_id);
    let board_id = store.seed_board("Demo board", user_id);
    let todo = store.seed_group(board_id, "Todo");
    store.seed_group(board_id, "Done");
    store.seed_task(todo, "Try moving me");

    let guest_id = store.seed_user("guest");
    store.add_member(board_id, guest_id);
    let guest_token = store.create_session(guest_id);

    tracing::info!(%board_id, %token, %guest_token, "in-memory demo board seeded");
    store
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = Config::from_env();

    let store: Arc<dyn Store> = match config.database_url.as_deref() {
        Some(database_url) => {
            let pool = db::init_pool(database_url, config.db_max_connections)
                .await
                .expect("database init failed");
            Arc::new(PgStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory store, data is lost on exit");
            Arc::new(demo_store())
        }
    };

    let port = config.port;
    let state = state::AppState::new(store, Arc::new(LogNotifier), config);

    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, "taskboard listening");
    axum::serve(listener, app).await.expect("server failed");
}
