use live_polls::config::Config;
use live_polls::startup::{AppState, build_router, connect_repository, spawn_pool_health_check};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    // initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let (repo, pool) = match connect_repository(&config).await {
        Ok(connected) => connected,
        Err(e) => {
            error!("failed to connect to the database: {e}");
            std::process::exit(1);
        }
    };
    if let Some(pool) = pool {
        spawn_pool_health_check(pool);
    }

    let app_state = AppState::new(repo, &config.live);
    let dispatcher = app_state.dispatcher.clone();
    let app = build_router(app_state);

    let listener = match tokio::net::TcpListener::bind(config.bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("unable to bind {}: {e}", config.bind_addr);
            std::process::exit(1);
        }
    };
    info!("listening on {}", config.bind_addr);

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("server error: {e}");
    }

    dispatcher.shutdown().await;
    info!("shut down");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
