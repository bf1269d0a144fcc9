use spotguard_core::{DispatchStamp, IdleCounter};

/// When an idle streak turns into a stop request, and how long to hold off
/// repeating one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchPolicy {
    pub idle_threshold: u64,
    pub cooldown_secs: u64,
}

impl DispatchPolicy {
    /// One tick per minute, cooldown equal to the idle window.
    pub fn from_minutes(minutes: u64) -> Self {
        Self {
            idle_threshold: minutes,
            cooldown_secs: minutes.saturating_mul(60),
        }
    }

    pub fn with_cooldown(self, cooldown_secs: u64) -> Self {
        Self {
            cooldown_secs,
            ..self
        }
    }

    // A zero threshold still needs one idle sample.
    fn effective_threshold(&self) -> u64 {
        self.idle_threshold.max(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    BelowThreshold { remaining: u64 },
    Dispatch,
    AwaitingEffect { eligible_after: u64 },
}

pub fn decide(
    policy: &DispatchPolicy,
    counter: IdleCounter,
    last: DispatchStamp,
    now: u64,
) -> Decision {
    let threshold = policy.effective_threshold();
    if counter.0 < threshold {
        return Decision::BelowThreshold {
            remaining: threshold - counter.0,
        };
    }
    if last.elapsed_until(now) > policy.cooldown_secs {
        Decision::Dispatch
    } else {
        Decision::AwaitingEffect {
            eligible_after: last.0.saturating_add(policy.cooldown_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOURS_LATER: u64 = 1_700_000_000;

    #[test]
    fn dispatches_at_threshold_when_never_sent() {
        let p = DispatchPolicy::from_minutes(15);
        assert_eq!(
            decide(&p, IdleCounter(15), DispatchStamp(0), HOURS_LATER),
            Decision::Dispatch
        );
        assert_eq!(
            decide(&p, IdleCounter(40), DispatchStamp(0), HOURS_LATER),
            Decision::Dispatch
        );
        assert_eq!(
            decide(&p, IdleCounter(14), DispatchStamp(0), HOURS_LATER),
            Decision::BelowThreshold { remaining: 1 }
        );
    }

    #[test]
    fn cooldown_window_is_exclusive() {
        let p = DispatchPolicy::from_minutes(15);
        let t = HOURS_LATER;
        for now in [t + 1, t + 450, t + 900] {
            assert_eq!(
                decide(&p, IdleCounter(20), DispatchStamp(t), now),
                Decision::AwaitingEffect {
                    eligible_after: t + 900
                }
            );
        }
        assert_eq!(
            decide(&p, IdleCounter(20), DispatchStamp(t), t + 901),
            Decision::Dispatch
        );
    }

    #[test]
    fn zero_threshold_needs_one_idle_tick() {
        let p = DispatchPolicy::from_minutes(0);
        assert_eq!(
            decide(&p, IdleCounter(0), DispatchStamp(0), HOURS_LATER),
            Decision::BelowThreshold { remaining: 1 }
        );
        assert_eq!(
            decide(&p, IdleCounter(1), DispatchStamp(0), HOURS_LATER),
            Decision::Dispatch
        );
    }

    #[test]
    fn independent_cooldown() {
        let p = DispatchPolicy::from_minutes(15).with_cooldown(60);
        assert_eq!(
            decide(&p, IdleCounter(15), DispatchStamp(1000), 1061),
            Decision::Dispatch
        );
        assert_eq!(
            decide(&p, IdleCounter(15), DispatchStamp(1000), 1060),
            Decision::AwaitingEffect {
                eligible_after: 1060
            }
        );
    }

    #[test]
    fn clock_behind_last_dispatch_holds_off() {
        let p = DispatchPolicy::from_minutes(15);
        assert!(matches!(
            decide(&p, IdleCounter(30), DispatchStamp(5000), 4000),
            Decision::AwaitingEffect { .. }
        ));
    }
}
