use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Evaluation;

/// Minimum spacing between repeat notifications while alarming.
pub const DEFAULT_PUBLISH_INTERVAL: Duration = Duration::from_millis(120_000);

/// Notification policy, fixed when the scheduler is built.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Policy {
    /// Emit only while alarming, once strictly more than `interval` has
    /// passed since the last emission. Edges alone are never reported.
    #[default]
    Periodic,
    /// Emit on every alarm transition (onset and recovery), plus reminders
    /// while alarming once at least `interval` has passed.
    Edge,
}

impl Policy {
    pub fn should_emit(self, eval: Evaluation, since_last: Duration, interval: Duration) -> bool {
        match self {
            Policy::Periodic => eval.current && since_last > interval,
            Policy::Edge => eval.changed || (eval.current && since_last >= interval),
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Policy::Periodic => f.write_str("periodic"),
            Policy::Edge => f.write_str("edge"),
        }
    }
}

impl FromStr for Policy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "periodic" | "a" | "A" => Ok(Policy::Periodic),
            "edge" | "b" | "B" => Ok(Policy::Edge),
            other => Err(format!("unknown policy '{other}' (expected 'periodic' or 'edge')")),
        }
    }
}

/// Scheduler memory. `last_published_at` starts at power-up (zero).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PublishRecord {
    pub last_published_at: Duration,
    pub was_alarm_last_tick: bool,
}

#[derive(Clone, Debug)]
pub struct PublishScheduler {
    policy: Policy,
    interval: Duration,
    record: PublishRecord,
}

impl PublishScheduler {
    pub fn new(policy: Policy, interval: Duration) -> Self {
        Self {
            policy,
            interval,
            record: PublishRecord::default(),
        }
    }

    pub fn policy(&self) -> Policy {
        self.policy
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn record(&self) -> PublishRecord {
        self.record
    }

    /// Decide whether to emit at `now`. Records the emission when it says yes.
    /// Never emits while disarmed.
    pub fn decide(&mut self, eval: Evaluation, armed: bool, now: Duration) -> bool {
        let since_last = now.saturating_sub(self.record.last_published_at);
        let emit = armed && self.policy.should_emit(eval, since_last, self.interval);

        if emit && now >= self.record.last_published_at {
            self.record.last_published_at = now;
        }
        self.record.was_alarm_last_tick = eval.current;

        if emit {
            tracing::debug!(
                policy = %self.policy,
                alarm = eval.current,
                changed = eval.changed,
                since_last_ms = since_last.as_millis() as u64,
                "Publishing alarm notification"
            );
        }
        emit
    }
}
