use anyhow::Context;
use clap::Parser;
use spotguard_core::imds::DEFAULT_TIMEOUT;

mod config;
mod decision;
mod dispatch;
mod rcon;
mod store;
mod tick;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = config::MonitorConfig::from_args(config::Args::parse())?;

    let game = rcon::RconGameServer::new(
        &config.rcon_host,
        config.rcon_port,
        config.rcon_password.clone(),
        config.rcon_timeout,
    );
    let queue = dispatch::SqsStopQueue::load(config.queue_url.clone(), config.region.clone()).await;
    let store = store::CounterStore::new(
        config.counter_file.clone(),
        config.last_stop_sent_file.clone(),
    );

    let identity: Box<dyn dispatch::InstanceIdentity> = match config.instance_id.clone() {
        Some(id) => Box::new(dispatch::FixedIdentity(id)),
        None => Box::new(
            dispatch::MetadataIdentity::new(config.metadata_base.clone(), DEFAULT_TIMEOUT)
                .context("build metadata client")?,
        ),
    };

    let monitor = tick::IdleMonitor::new(game, queue, identity, store, config.policy);
    let report = monitor.run_tick(spotguard_core::unix_now()).await;
    tracing::debug!(
        sample = ?report.sample,
        consecutive_idle = report.counter.0,
        decision = ?report.decision,
        graceful_stop = ?report.graceful_stop,
        dispatch = ?report.dispatch,
        "tick finished"
    );

    Ok(())
}
