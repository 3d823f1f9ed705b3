use clap::Parser;
use pixctl::{
    build_router,
    config::{Args, Config, DatabaseConfig},
    create_initial_admin_user,
    credits::{Clock, SystemClock},
    db::store::{CreditStore, InMemoryCreditStore, PgCreditStore},
    AppState,
};
use sqlx::PgPool;
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing with environment filter
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")))
        .init();

    // Parse CLI args
    let args = Args::parse();
    debug!("{:?}", args);

    // Load configuration
    let config = Config::load(&args)?;
    if args.validate {
        info!("Configuration at {} is valid", args.config);
        return Ok(());
    }
    debug!("Starting credit service with configuration: {:#?}", config);

    let store: Arc<dyn CreditStore> = match &config.database {
        DatabaseConfig::External { url } => {
            info!("Using external database");
            let pool = PgPool::connect(url).await?;

            // Run migrations
            sqlx::migrate!("./migrations").run(&pool).await?;
            Arc::new(PgCreditStore::new(pool))
        }
        DatabaseConfig::Memory => {
            warn!("Using in-memory store: all accounts are lost on shutdown");
            Arc::new(InMemoryCreditStore::new())
        }
    };

    let clock = Arc::new(SystemClock);

    // create admin user if it doesn't exist
    create_initial_admin_user(&config.admin_email, config.admin_password.as_deref(), store.as_ref(), clock.now())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create initial admin user: {}", e))?;

    let state = AppState::assemble(config.clone(), store, clock);
    let router = build_router(&state)?;

    // Start the daily reset job
    let shutdown = CancellationToken::new();
    let scheduler_task = if config.scheduler.enabled {
        let scheduler = state.scheduler.clone();
        let token = shutdown.clone();
        Some(tokio::spawn(async move { scheduler.run_daemon(token).await }))
    } else {
        info!("Credit reset scheduler disabled, resets only happen on request");
        None
    };

    let bind_addr = config.bind_address();
    let listener = TcpListener::bind(&bind_addr).await?;
    info!(
        "Credit service listening on http://{}, docs at http://localhost:{}/api/docs",
        bind_addr, config.port
    );

    // Run the server with graceful shutdown
    // Peer addresses key the login rate limit
    axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    if let Some(task) = scheduler_task {
        task.await?;
    }

    Ok(())
}

/// Wait for shutdown signal (SIGTERM or Ctrl+C), then stop background tasks
async fn shutdown_signal(shutdown: CancellationToken) {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully...");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down gracefully...");
        },
    }

    shutdown.cancel();
}
