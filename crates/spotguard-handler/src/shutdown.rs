use std::{path::PathBuf, process::Stdio};

use anyhow::Context;
use async_trait::async_trait;
use tokio::process::Command;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    pub success: bool,
    pub exit_code: Option<i32>,
    /// stdout followed by stderr.
    pub output: String,
}

/// The local work to do once the instance is about to be reclaimed.
#[async_trait]
pub trait ShutdownAction: Send + Sync {
    async fn run(&self) -> anyhow::Result<ShutdownReport>;
}

#[derive(Debug, Clone)]
pub struct ScriptShutdown {
    shell: PathBuf,
    script: PathBuf,
}

impl ScriptShutdown {
    pub fn new(script: impl Into<PathBuf>) -> Self {
        Self {
            shell: PathBuf::from("/bin/sh"),
            script: script.into(),
        }
    }
}

#[async_trait]
impl ShutdownAction for ScriptShutdown {
    async fn run(&self) -> anyhow::Result<ShutdownReport> {
        tracing::info!(script = %self.script.display(), "executing shutdown script");
        let out = Command::new(&self.shell)
            .arg(&self.script)
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| {
                format!(
                    "spawn {} {}",
                    self.shell.display(),
                    self.script.display()
                )
            })?;

        let mut output = String::from_utf8_lossy(&out.stdout).into_owned();
        output.push_str(&String::from_utf8_lossy(&out.stderr));
        Ok(ShutdownReport {
            success: out.status.success(),
            exit_code: out.status.code(),
            output,
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn script(name: &str, body: &str) -> PathBuf {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let dir = std::env::temp_dir().join(format!(
            "spotguard-handler-{name}-{}-{n}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("shutdown.sh");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[tokio::test]
    async fn captures_stdout_and_stderr() {
        let path = script("ok", "echo saving world\necho flushed >&2\n");
        let report = ScriptShutdown::new(&path).run().await.unwrap();
        assert!(report.success);
        assert_eq!(report.exit_code, Some(0));
        assert!(report.output.contains("saving world"));
        assert!(report.output.contains("flushed"));
    }

    #[tokio::test]
    async fn failing_script_is_reported_not_raised() {
        let path = script("fail", "echo nope >&2\nexit 3\n");
        let report = ScriptShutdown::new(&path).run().await.unwrap();
        assert!(!report.success);
        assert_eq!(report.exit_code, Some(3));
        assert!(report.output.contains("nope"));
    }

    #[tokio::test]
    async fn missing_script_fails_in_shell() {
        let report = ScriptShutdown::new("/nonexistent/spotguard/shutdown.sh")
            .run()
            .await
            .unwrap();
        assert!(!report.success);
    }
}
