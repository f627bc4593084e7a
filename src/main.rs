use barangay_server::{app, auth, config::Config, cron, db::Database, AppState};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting barangay-server...");

    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let db = Database::new(&config.database_path)?;
    if let Err(e) = auth::bootstrap_officials(&db, &config.bootstrap_officials) {
        tracing::error!("Failed to set up officials: {}", e);
        std::process::exit(1);
    }
    let state = AppState::new(db, config.event_channel_capacity);

    // GC opens its own connection from the path
    let db_path = config.database_path.clone();
    let (every, retention) = (config.gc_interval, config.gc_retention_days);
    tokio::spawn(async move {
        cron::start_gc_task(db_path, every, retention).await;
    });

    let addr = config.addr();
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app(state)).await?;
    Ok(())
}
