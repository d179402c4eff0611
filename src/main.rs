use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use udlf_gateway::config::Config;
use udlf_gateway::server::routes::build_router;
use udlf_gateway::server::AppState;
use udlf_gateway::storage::DatasetStore;

#[tokio::main]
async fn main() {
    // Load .env
    let _ = dotenvy::dotenv();

    // Load config first (needed for logging setup)
    let config = Config::load(None).expect("failed to load config");

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .init();
        }
    }

    tracing::info!(
        deployment = ?config.storage.backend,
        root = %config.paths.root.display(),
        executable = %config.execution.executable.display(),
        "udlf gateway starting"
    );

    udlf_gateway::metrics::init();

    let store = DatasetStore::from_config(&config.storage).expect("failed to initialize storage");

    for dir in [&config.paths.uploads_dir, &config.paths.outputs_dir] {
        if let Err(e) = tokio::fs::create_dir_all(dir).await {
            tracing::warn!(dir = %dir.display(), error = %e, "could not create directory");
        }
    }

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = AppState::new(config, store);
    let app = build_router(state);

    tracing::info!(addr = %addr, "listening");

    let listener = TcpListener::bind(&addr)
        .await
        .expect("failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
