pub mod duration;
pub mod imds;

use std::time::{SystemTime, UNIX_EPOCH};

/// Action tag carried by every stop request; the orchestrator matches on it.
pub const STOP_ACTION: &str = "stop_minecraft_server";

/// Consecutive monitor ticks that observed an empty server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct IdleCounter(pub u64);

impl IdleCounter {
    /// Advances the streak for one tick: idle increments, anything else resets.
    pub fn observe(self, idle: bool) -> Self {
        if idle {
            Self(self.0.saturating_add(1))
        } else {
            Self(0)
        }
    }
}

/// Unix seconds of the last stop request the queue accepted. Zero means never.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct DispatchStamp(pub u64);

impl DispatchStamp {
    pub fn elapsed_until(self, now: u64) -> u64 {
        now.saturating_sub(self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StopRequest {
    #[serde(rename = "instanceId")]
    pub instance_id: String,
    pub action: String,
}

impl StopRequest {
    pub fn stop_server(instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            action: STOP_ACTION.to_string(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Flattens an error and its sources into one log-friendly line.
pub fn format_error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut parts = Vec::<String>::new();
    let mut cur: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = cur {
        let s = e.to_string();
        if !s.is_empty() && parts.last() != Some(&s) {
            parts.push(s);
        }
        cur = e.source();
    }
    if parts.is_empty() {
        "unknown error".to_string()
    } else {
        parts.join(": ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_counter_counts_streak_and_resets() {
        let mut c = IdleCounter::default();
        for _ in 0..7 {
            c = c.observe(true);
        }
        assert_eq!(c, IdleCounter(7));
        assert_eq!(c.observe(false), IdleCounter(0));
        assert_eq!(IdleCounter(u64::MAX).observe(true), IdleCounter(u64::MAX));
    }

    #[test]
    fn dispatch_stamp_elapsed_saturates() {
        assert_eq!(DispatchStamp(100).elapsed_until(160), 60);
        assert_eq!(DispatchStamp(200).elapsed_until(100), 0);
    }

    #[test]
    fn stop_request_json_shape() {
        let json = StopRequest::stop_server("i-0abc").to_json().unwrap();
        let v: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v["instanceId"], "i-0abc");
        assert_eq!(v["action"], "stop_minecraft_server");
    }

    #[test]
    fn error_chain_joins_sources() {
        let io = std::io::Error::other("disk gone");
        let err = anyhow::Error::new(io).context("write counter");
        let dyn_err: &(dyn std::error::Error + 'static) = err.as_ref();
        let s = format_error_chain(dyn_err);
        assert_eq!(s, "write counter: disk gone");
    }
}
