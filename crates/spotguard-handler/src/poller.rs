use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::notice::{Notice, NoticeChecker, NoticeError};
use crate::shutdown::{ShutdownAction, ShutdownReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Polling,
    NoticeReceived,
    ShuttingDown,
    Signaled,
    Exited,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    /// A reclamation notice arrived. `shutdown` is `None` when the action
    /// could not even be started.
    NoticeHandled {
        detail: String,
        shutdown: Option<ShutdownReport>,
    },
    Signaled,
}

pub struct Poller<A> {
    checker: NoticeChecker,
    action: A,
    interval: Duration,
    state: PollerState,
}

impl<A: ShutdownAction> Poller<A> {
    pub fn new(checker: NoticeChecker, action: A, interval: Duration) -> Self {
        Self {
            checker,
            action,
            interval,
            state: PollerState::Polling,
        }
    }

    fn transition(&mut self, next: PollerState) {
        tracing::debug!(from = ?self.state, to = ?next, "poller state change");
        self.state = next;
    }

    /// Polls until a notice is handled or `cancel` fires. The first check
    /// happens one full interval after start.
    pub async fn run(mut self, cancel: CancellationToken) -> ExitReason {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let ticked = tokio::select! {
                biased;
                _ = cancel.cancelled() => false,
                _ = ticker.tick() => true,
            };
            if !ticked {
                return self.signaled();
            }

            // A stalled metadata call must not delay a signal.
            let checked = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                res = self.checker.check() => Some(res),
            };
            let Some(result) = checked else {
                return self.signaled();
            };

            match result {
                Ok(Notice::Absent) => {
                    tracing::info!("no interruption notice; continuing to poll");
                }
                Ok(Notice::Present { detail }) => {
                    tracing::info!(%detail, "interruption notice received");
                    self.transition(PollerState::NoticeReceived);
                    return self.shut_down(detail).await;
                }
                Err(NoticeError::Unauthorized) => {
                    tracing::warn!(
                        endpoint = self.checker.endpoint(),
                        "metadata service returned 401; token is likely required or invalid"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        endpoint = self.checker.endpoint(),
                        error = %spotguard_core::format_error_chain(&e),
                        "error checking for interruption"
                    );
                }
            }
        }
    }

    fn signaled(mut self) -> ExitReason {
        self.transition(PollerState::Signaled);
        self.transition(PollerState::Exited);
        ExitReason::Signaled
    }

    async fn shut_down(mut self, detail: String) -> ExitReason {
        self.transition(PollerState::ShuttingDown);
        let shutdown = match self.action.run().await {
            Ok(report) if report.success => {
                tracing::info!(output = %report.output, "shutdown script executed successfully");
                Some(report)
            }
            Ok(report) => {
                tracing::error!(
                    exit_code = ?report.exit_code,
                    output = %report.output,
                    "shutdown script failed"
                );
                Some(report)
            }
            Err(e) => {
                tracing::error!(error = %format!("{e:#}"), "could not execute shutdown script");
                None
            }
        };
        self.transition(PollerState::Exited);
        ExitReason::NoticeHandled { detail, shutdown }
    }
}
