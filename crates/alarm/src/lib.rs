//! Alarm evaluation and publish scheduling.
//!
//! The alarm condition is a pure function of the latest [`SensorSnapshot`]
//! and the current [`Threshold`]. [`PublishScheduler`] turns the stream of
//! evaluations into notification decisions according to a [`Policy`].

use sensors::SensorSnapshot;

mod notify;
mod scheduler;

pub use notify::{
    EventSettings, JsonLinesSink, MemorySink, MessageBody, NotificationMessage, NotificationSink,
    PublishedEvent, Scope, TEST_EVENT_TEXT,
};
pub use scheduler::{Policy, PublishRecord, PublishScheduler, DEFAULT_PUBLISH_INTERVAL};

/// Default pressure alarm threshold in mbar.
pub const DEFAULT_PRESSURE_LIMIT: f64 = 2500.0;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Threshold {
    pub pressure_limit: f64,
}

impl Default for Threshold {
    fn default() -> Self {
        Self {
            pressure_limit: DEFAULT_PRESSURE_LIMIT,
        }
    }
}

/// Result of one evaluation cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Evaluation {
    pub current: bool,
    pub previous: bool,
    pub changed: bool,
}

/// True when at least one monitored dimension is faulted. Pressure has to be
/// strictly below the limit to count as healthy.
pub fn is_alarm(snapshot: &SensorSnapshot, threshold: Threshold) -> bool {
    !(snapshot.power_ok && snapshot.backup_power_ok && snapshot.pressure < threshold.pressure_limit)
}

pub fn evaluate(snapshot: &SensorSnapshot, threshold: Threshold, previous: bool) -> Evaluation {
    let current = is_alarm(snapshot, threshold);
    Evaluation {
        current,
        previous,
        changed: current != previous,
    }
}

/// Carries the previous alarm condition between ticks. Starts clear.
#[derive(Clone, Debug, Default)]
pub struct AlarmEvaluator {
    previous: bool,
}

impl AlarmEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn previous(&self) -> bool {
        self.previous
    }

    pub fn evaluate(&mut self, snapshot: SensorSnapshot, threshold: Threshold) -> Evaluation {
        let eval = evaluate(&snapshot, threshold, self.previous);
        self.previous = eval.current;
        eval
    }
}
