use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use spotguard_core::imds::ImdsClient;

mod config;
mod notice;
mod poller;
mod shutdown;
mod signals;

#[derive(Debug, Parser)]
#[command(name = "spot-handler", about = "Runs a shutdown script when the instance is about to be reclaimed")]
struct Args {
    /// Path to the YAML configuration file.
    #[arg(short, long, env = "SPOT_HANDLER_CONFIG", default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    tracing::info!(config = %args.config.display(), "starting spot interruption handler");

    let config = config::HandlerConfig::load(&args.config)
        .with_context(|| format!("load config {}", args.config.display()))?;
    tracing::info!(
        polling_interval = ?config.polling_interval,
        metadata_url = %config.metadata_url,
        script = %config.shutdown_script.display(),
        token = config.token_url.is_some(),
        "configuration loaded"
    );

    let signals = signals::SignalWatcher::try_new().context("install signal handlers")?;

    let imds = ImdsClient::new(
        config.token_url.clone(),
        config.token_ttl,
        config.request_timeout,
    )
    .context("build metadata client")?;
    let checker = notice::NoticeChecker::new(imds, config.metadata_url.clone());
    let action = shutdown::ScriptShutdown::new(config.shutdown_script.clone());

    let reason = poller::Poller::new(checker, action, config.polling_interval)
        .run(signals.token())
        .await;
    match reason {
        poller::ExitReason::NoticeHandled { detail, shutdown } => {
            tracing::info!(
                %detail,
                script_succeeded = shutdown.as_ref().is_some_and(|r| r.success),
                "interruption handled; exiting"
            );
        }
        poller::ExitReason::Signaled => tracing::info!("shutting down spot interruption handler"),
    }

    Ok(())
}
