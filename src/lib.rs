pub mod types;
pub mod error;
pub mod config;
pub mod seeding;
pub mod bracket;
pub mod voting;
pub mod round_engine;
pub mod store;
pub mod tournament;
pub mod server;

use config::*;
use server::ServerState;
use store::JsonFileStore;
use tournament::Tournament;

use std::{
    fs,
    sync::{Arc, Mutex},
};
use tracing::info;
use tracing_subscriber::EnvFilter;

// ── Entry point ────────────────────────────────────────────────────────

pub fn run() -> Result<(), String> {
    load_env_file();
    let config = load_config_inner()?;

    // Initialize tracing with daily-rolled file output
    let logs_dir = config.log_path();
    fs::create_dir_all(&logs_dir).ok();
    let file_appender = tracing_appender::rolling::daily(&logs_dir, "bracket.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(non_blocking)
        .with_ansi(false)
        .init();
    info!("Year bracket starting");
    log_config_warnings(&config);

    let store = JsonFileStore::in_dir(&config.data_path());
    let tournament = Tournament::open(Box::new(store)).map_err(|e| e.to_string())?;
    let state = ServerState {
        tournament: Arc::new(Mutex::new(tournament)),
        seed_path: config.seed_path(),
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("start runtime: {e}"))?;
    runtime.block_on(server::serve(state, config.static_path(), &config.bind_addr))
}
