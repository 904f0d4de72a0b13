use kirin::app_context::{AppContext, StartupError};
use kirin::config::Config;
use kirin::server::{create_router, AppState};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    // Use RUST_LOG env var if set, otherwise default to info level
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    if let Err(e) = run().await {
        error!("kirin failed: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), StartupError> {
    let config = Config::load()?;
    let context = AppContext::init(config).await?;

    let state = AppState {
        archive: context.archive.clone(),
        admin_token: context.config.admin_token.clone(),
    };
    let router = create_router(state, context.media_root.clone());

    let listener = tokio::net::TcpListener::bind(context.config.bind_addr).await?;
    info!("kirin listening on http://{}", context.config.bind_addr);
    axum::serve(listener, router).await?;
    Ok(())
}
