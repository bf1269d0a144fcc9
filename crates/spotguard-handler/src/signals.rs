use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Cancels a token on the first SIGTERM or SIGINT.
pub struct SignalWatcher {
    _tracker: TaskTracker,
    token: CancellationToken,
}

impl SignalWatcher {
    pub fn try_new() -> std::io::Result<Self> {
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let token = CancellationToken::new();
        let inner = token.clone();
        let tracker = TaskTracker::new();
        tracker.spawn(async move {
            let name = tokio::select! {
                _ = sigterm.recv() => "SIGTERM",
                _ = sigint.recv() => "SIGINT",
            };
            tracing::info!(signal = name, "received signal; shutting down");
            inner.cancel();
        });
        tracker.close();
        Ok(Self {
            _tracker: tracker,
            token,
        })
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn sigterm_cancels_token() {
        let watcher = SignalWatcher::try_new().unwrap();
        let token = watcher.token();
        assert!(!token.is_cancelled());

        let status = tokio::process::Command::new("kill")
            .arg("-TERM")
            .arg(std::process::id().to_string())
            .status()
            .await
            .unwrap();
        assert!(status.success());

        tokio::time::timeout(Duration::from_secs(5), token.cancelled())
            .await
            .unwrap();
    }
}
