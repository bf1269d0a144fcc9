use std::{path::PathBuf, time::Duration};

use clap::Parser;
use spotguard_core::imds::DEFAULT_METADATA_BASE;

use crate::decision::DispatchPolicy;
use crate::store::{DEFAULT_COUNTER_FILE, DEFAULT_LAST_STOP_SENT_FILE};

pub const DEFAULT_STOP_THRESHOLD_MINUTES: u64 = 15;

#[derive(Debug, Parser)]
#[command(name = "spotguard-monitor")]
#[command(about = "Stops an idle game server instance by queueing a stop request")]
pub struct Args {
    #[arg(long, env = "RCON_HOST", default_value = "localhost")]
    pub rcon_host: String,

    #[arg(long, env = "RCON_PORT", default_value_t = 25575)]
    pub rcon_port: u16,

    #[arg(long, env = "RCON_PASSWORD", hide_env_values = true)]
    pub rcon_password: Option<String>,

    /// Bound on the RCON dial and on every read/write.
    #[arg(long, env = "RCON_TIMEOUT_SECS", default_value_t = 5)]
    pub rcon_timeout_secs: u64,

    #[arg(long, env = "SQS_QUEUE_URL")]
    pub sqs_queue_url: Option<String>,

    /// Falls back to the AWS SDK's default region chain when unset.
    #[arg(long, env = "AWS_REGION")]
    pub aws_region: Option<String>,

    /// Consecutive idle ticks (one per minute) before stopping. 0 means default.
    #[arg(long, env = "STOP_THRESHOLD_MINUTES", default_value_t = DEFAULT_STOP_THRESHOLD_MINUTES)]
    pub stop_threshold_minutes: u64,

    /// Minimum gap between stop requests. Defaults to the threshold in seconds.
    #[arg(long, env = "STOP_COOLDOWN_SECONDS")]
    pub stop_cooldown_seconds: Option<u64>,

    #[arg(long, env = "COUNTER_FILE", default_value = DEFAULT_COUNTER_FILE)]
    pub counter_file: PathBuf,

    #[arg(long, env = "LAST_STOP_SENT_FILE", default_value = DEFAULT_LAST_STOP_SENT_FILE)]
    pub last_stop_sent_file: PathBuf,

    /// Skips the metadata lookup when set.
    #[arg(long, env = "INSTANCE_ID")]
    pub instance_id: Option<String>,

    #[arg(long, env = "METADATA_BASE_URL", default_value = DEFAULT_METADATA_BASE)]
    pub metadata_base_url: String,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub rcon_host: String,
    pub rcon_port: u16,
    pub rcon_password: String,
    pub rcon_timeout: Duration,
    pub queue_url: String,
    pub region: Option<String>,
    pub policy: DispatchPolicy,
    pub counter_file: PathBuf,
    pub last_stop_sent_file: PathBuf,
    pub instance_id: Option<String>,
    pub metadata_base: String,
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

impl MonitorConfig {
    pub fn from_args(args: Args) -> Result<Self, ConfigError> {
        let rcon_password =
            non_empty(args.rcon_password).ok_or(ConfigError::Missing("RCON_PASSWORD"))?;
        let queue_url =
            non_empty(args.sqs_queue_url).ok_or(ConfigError::Missing("SQS_QUEUE_URL"))?;

        let minutes = if args.stop_threshold_minutes == 0 {
            tracing::warn!(
                default = DEFAULT_STOP_THRESHOLD_MINUTES,
                "STOP_THRESHOLD_MINUTES is 0; using default"
            );
            DEFAULT_STOP_THRESHOLD_MINUTES
        } else {
            args.stop_threshold_minutes
        };
        let mut policy = DispatchPolicy::from_minutes(minutes);
        if let Some(secs) = args.stop_cooldown_seconds {
            policy = policy.with_cooldown(secs);
        }

        Ok(Self {
            rcon_host: args.rcon_host,
            rcon_port: args.rcon_port,
            rcon_password,
            rcon_timeout: Duration::from_secs(args.rcon_timeout_secs.max(1)),
            queue_url,
            region: non_empty(args.aws_region),
            policy,
            counter_file: args.counter_file,
            last_stop_sent_file: args.last_stop_sent_file,
            instance_id: non_empty(args.instance_id),
            metadata_base: args.metadata_base_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["spotguard-monitor"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn requires_password_and_queue() {
        let err = MonitorConfig::from_args(args(&["--rcon-password", "  ", "--sqs-queue-url", "q"]))
            .unwrap_err();
        assert_eq!(err, ConfigError::Missing("RCON_PASSWORD"));

        let err = MonitorConfig::from_args(args(&["--rcon-password", "pw", "--sqs-queue-url", ""]))
            .unwrap_err();
        assert_eq!(err, ConfigError::Missing("SQS_QUEUE_URL"));
    }

    #[test]
    fn cooldown_defaults_to_threshold_window() {
        let cfg = MonitorConfig::from_args(args(&[
            "--rcon-password",
            "pw",
            "--sqs-queue-url",
            "https://sqs.example/q",
            "--stop-threshold-minutes",
            "10",
        ]))
        .unwrap();
        assert_eq!(cfg.policy, DispatchPolicy::from_minutes(10));
        assert_eq!(cfg.policy.cooldown_secs, 600);
    }

    #[test]
    fn zero_threshold_falls_back_and_cooldown_overrides() {
        let cfg = MonitorConfig::from_args(args(&[
            "--rcon-password",
            "pw",
            "--sqs-queue-url",
            "q",
            "--stop-threshold-minutes",
            "0",
            "--stop-cooldown-seconds",
            "120",
        ]))
        .unwrap();
        assert_eq!(cfg.policy.idle_threshold, DEFAULT_STOP_THRESHOLD_MINUTES);
        assert_eq!(cfg.policy.cooldown_secs, 120);
    }
}
