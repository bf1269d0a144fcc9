use spotguard_core::{DispatchStamp, IdleCounter, StopRequest, format_error_chain};

use crate::decision::{Decision, DispatchPolicy, decide};
use crate::dispatch::{InstanceIdentity, StopQueue};
use crate::rcon::{GameServer, RconError};
use crate::store::CounterStore;

/// One reading of the server. A failed probe counts as idle but keeps its
/// failure kind so logs never confuse it with a confirmed empty server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sample {
    Players(u32),
    ProbeFailed { kind: &'static str, message: String },
}

impl Sample {
    pub fn from_probe(res: Result<u32, RconError>) -> Self {
        match res {
            Ok(n) => Sample::Players(n),
            Err(e) => Sample::ProbeFailed {
                kind: e.kind(),
                message: format_error_chain(&e),
            },
        }
    }

    pub fn counts_as_idle(&self) -> bool {
        matches!(self, Sample::Players(0) | Sample::ProbeFailed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    NotAttempted,
    Sent,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct TickReport {
    pub sample: Sample,
    pub counter: IdleCounter,
    pub decision: Decision,
    /// Result of the in-game `stop`, only when a dispatch was attempted.
    pub graceful_stop: Option<Result<(), String>>,
    pub dispatch: DispatchOutcome,
}

pub struct IdleMonitor<G, Q, I> {
    game: G,
    queue: Q,
    identity: I,
    store: CounterStore,
    policy: DispatchPolicy,
}

impl<G: GameServer, Q: StopQueue, I: InstanceIdentity> IdleMonitor<G, Q, I> {
    pub fn new(game: G, queue: Q, identity: I, store: CounterStore, policy: DispatchPolicy) -> Self {
        Self {
            game,
            queue,
            identity,
            store,
            policy,
        }
    }

    /// Runs one sampling tick. Never fails: every error is logged and folded
    /// into the report.
    pub async fn run_tick(&self, now: u64) -> TickReport {
        let sample = Sample::from_probe(self.game.player_count().await);
        match &sample {
            Sample::Players(0) => tracing::info!("player count is 0"),
            Sample::Players(n) => tracing::info!(players = n, "players online"),
            Sample::ProbeFailed { kind, message } => tracing::warn!(
                kind,
                error = %message,
                "could not get player count; treating as 0 for the idle counter"
            ),
        }

        let previous = self.store.load_counter().await;
        let last = self.store.load_last_dispatch().await;

        let counter = previous.observe(sample.counts_as_idle());
        if counter.0 == 0 {
            tracing::info!("resetting idle counter");
        } else {
            tracing::info!(consecutive_idle = counter.0, "idle counter advanced");
        }
        if let Err(e) = self.store.save_counter(counter).await {
            tracing::warn!(error = %format_error_chain(&e), "could not persist idle counter");
        }

        let decision = decide(&self.policy, counter, last, now);
        let mut report = TickReport {
            sample,
            counter,
            decision,
            graceful_stop: None,
            dispatch: DispatchOutcome::NotAttempted,
        };

        match decision {
            Decision::BelowThreshold { remaining } => {
                tracing::debug!(remaining, "below idle threshold");
            }
            Decision::AwaitingEffect { eligible_after } => {
                tracing::info!(
                    last_dispatch = last.0,
                    eligible_after,
                    "stop request already dispatched recently; waiting for the instance to stop"
                );
            }
            Decision::Dispatch => {
                tracing::info!(consecutive_idle = counter.0, "idle threshold reached; sending stop request");
                report.graceful_stop = Some(self.graceful_stop().await);
                report.dispatch = self.dispatch(now).await;
            }
        }

        report
    }

    async fn graceful_stop(&self) -> Result<(), String> {
        match self.game.stop_server().await {
            Ok(response) => {
                tracing::info!(%response, "server stop command sent");
                Ok(())
            }
            Err(e) => {
                let msg = format_error_chain(&e);
                tracing::warn!(kind = e.kind(), error = %msg, "failed to send server stop command");
                Err(msg)
            }
        }
    }

    async fn dispatch(&self, now: u64) -> DispatchOutcome {
        let instance_id = match self.identity.instance_id().await {
            Ok(id) => id,
            Err(e) => {
                let msg = format!("{e:#}");
                tracing::warn!(error = %msg, "could not resolve instance id; will retry on next tick");
                return DispatchOutcome::Failed(msg);
            }
        };
        let request = StopRequest::stop_server(instance_id);
        match self.queue.send(&request).await {
            Ok(()) => {
                if let Err(e) = self.store.save_last_dispatch(DispatchStamp(now)).await {
                    tracing::warn!(error = %format_error_chain(&e), "could not persist dispatch timestamp");
                }
                tracing::info!("stop request sent; instance should stop soon");
                DispatchOutcome::Sent
            }
            Err(e) => {
                let msg = format!("{e:#}");
                tracing::warn!(error = %msg, "failed to send stop request; will retry on next tick");
                DispatchOutcome::Failed(msg)
            }
        }
    }
}
