use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use classroom_backend_lib::config::Settings;
use classroom_backend_lib::{ws_router, AppState};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Live class session coordinator
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, default_value = "classroom.toml")]
    config: String,

    /// Override the bind address from the config
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Override the data directory from the config
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load_from(&cli.config)?;
    if let Some(bind) = cli.bind {
        settings.bind_addr = bind;
    }
    if let Some(data_dir) = cli.data_dir {
        settings.data_dir = data_dir;
    }

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let bind_addr = settings.bind_addr;
    let state = Arc::new(AppState::new(settings)?);
    let app = ws_router::create_router(state);

    let listener = TcpListener::bind(&bind_addr).await?;
    info!(%bind_addr, "listening");

    axum::serve(listener, app).await?;

    Ok(())
}
