use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::Level;
use vista_core::{init_tracing, BroadcastHub, ConfigFile, Services, METRICS};
use vistad::{router, AppState};

#[derive(Parser)]
#[command(name = "vistad")]
#[command(about = "Serve bundles, file capabilities, VCS helpers and live streams")]
#[command(version)]
struct Cli {
    /// TOML config file
    #[arg(short, long, env = "VISTA_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(short, long, env = "VISTA_BIND", default_value = "127.0.0.1:7878")]
    bind: SocketAddr,

    /// Project root (overrides config and VISTA_PROJECT_ROOT)
    #[arg(long)]
    project_root: Option<PathBuf>,

    /// Emit JSON log lines
    #[arg(long)]
    json: bool,

    /// Debug-level logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let hub = BroadcastHub::new();
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    init_tracing(cli.json, level, Some(&hub));

    let mut file = match &cli.config {
        Some(path) => ConfigFile::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => ConfigFile::default(),
    }
    .apply_env(|key| std::env::var(key).ok())
    .context("reading VISTA_* environment")?;
    if let Some(root) = cli.project_root {
        file.project_root = Some(root);
    }
    let config = file.finish().context("invalid configuration")?;

    let services = Services::from_config(&config, hub).context("starting services")?;
    tracing::info!(
        root = %services.root.path().display(),
        artifacts = %config.artifact_dir.display(),
        "vistad starting"
    );
    let app = router(AppState::new(services));

    let listener = tokio::net::TcpListener::bind(cli.bind)
        .await
        .with_context(|| format!("binding {}", cli.bind))?;
    tracing::info!(addr = %cli.bind, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown requested");
        })
        .await
        .context("server error")?;

    METRICS.flush();
    Ok(())
}
