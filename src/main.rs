//! sharebot - IRC file sharing bot.

use sharebot::commands::Router;
use sharebot::config::Config;
use sharebot::session::Session;
use sharebot::stats::StatsStore;
use sharebot::transfer::TransferCoordinator;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing(log_file: Option<&Path>) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(Arc::new(file))
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());

    let config = Config::load(&config_path).map_err(|e| {
        eprintln!("failed to load config {config_path}: {e}");
        e
    })?;
    init_tracing(config.paths.log_file.as_deref())?;

    info!(
        host = %config.server.host,
        channel = %config.server.channel,
        nick = %config.server.nick,
        "starting sharebot"
    );

    std::fs::create_dir_all(&config.paths.shared_dir)?;
    std::fs::create_dir_all(&config.paths.upload_dir)?;

    let config = Arc::new(config);
    let stats = Arc::new(StatsStore::load(&config.paths.stats_file));
    let token = CancellationToken::new();

    {
        let token = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, shutting down");
                token.cancel();
            }
        });
    }

    let session = Session::connect(Arc::clone(&config), token.clone()).await?;
    let out = session.outbound();

    let transfers = Arc::new(TransferCoordinator::new(
        Arc::clone(&config),
        out.clone(),
        token.clone(),
    ));
    let router = Router::new(
        Arc::clone(&config),
        Arc::clone(&stats),
        transfers,
        out,
        token.clone(),
    );

    let flush = Arc::clone(&stats).spawn_flush(
        config.paths.stats_file.clone(),
        Duration::from_secs(config.stats.save_interval_secs),
        token.clone(),
    );

    let result = session.run(router).await;
    if let Err(e) = &result {
        error!(error = %e, "session ended");
    }

    token.cancel();
    let _ = flush.await;
    if let Err(e) = stats.save(&config.paths.stats_file) {
        warn!(error = %e, "final stats snapshot failed");
    }

    result.map_err(anyhow::Error::from)
}
