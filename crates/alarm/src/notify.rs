//! Outbound notifications.
//!
//! Delivery is fire-and-forget: a sink that cannot deliver logs and drops
//! the message. Nothing is queued or retried.

use std::fmt;
use std::io::Write;
use std::sync::Mutex;

use sensors::SensorSnapshot;
use serde::{Deserialize, Serialize};

pub const TEST_EVENT_TEXT: &str = "TEST: This is a test event";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    #[default]
    Private,
    Public,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MessageBody {
    Alarm {
        power_ok: bool,
        backup_power_ok: bool,
        pressure: f64,
    },
    Test,
}

fn ok_down(v: bool) -> &'static str {
    if v {
        "OK"
    } else {
        "DOWN"
    }
}

impl fmt::Display for MessageBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            MessageBody::Alarm {
                power_ok,
                backup_power_ok,
                pressure,
            } => write!(
                f,
                "Power {}, UPS {}, Pressure {:.2} mbar",
                ok_down(power_ok),
                ok_down(backup_power_ok),
                pressure
            ),
            MessageBody::Test => f.write_str(TEST_EVENT_TEXT),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct NotificationMessage {
    pub event_name: String,
    pub body: MessageBody,
    pub ttl_seconds: u32,
    pub scope: Scope,
}

impl NotificationMessage {
    pub fn text(&self) -> String {
        self.body.to_string()
    }

    pub fn send_to(&self, sink: &dyn NotificationSink) {
        sink.publish(&self.event_name, &self.text(), self.ttl_seconds, self.scope);
    }
}

/// Event metadata shared by every notification the device sends.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSettings {
    pub event_name: String,
    pub ttl_seconds: u32,
    pub scope: Scope,
}

impl Default for EventSettings {
    fn default() -> Self {
        Self {
            event_name: "external_power".to_string(),
            ttl_seconds: 60,
            scope: Scope::Private,
        }
    }
}

impl EventSettings {
    pub fn alarm(&self, snapshot: &SensorSnapshot) -> NotificationMessage {
        self.message(MessageBody::Alarm {
            power_ok: snapshot.power_ok,
            backup_power_ok: snapshot.backup_power_ok,
            pressure: snapshot.pressure,
        })
    }

    pub fn test(&self) -> NotificationMessage {
        self.message(MessageBody::Test)
    }

    fn message(&self, body: MessageBody) -> NotificationMessage {
        NotificationMessage {
            event_name: self.event_name.clone(),
            body,
            ttl_seconds: self.ttl_seconds,
            scope: self.scope,
        }
    }
}

/// Remote notification channel. Implementations must not block for long
/// and must swallow their own delivery failures.
pub trait NotificationSink: Send + Sync {
    fn publish(&self, event_name: &str, data: &str, ttl_seconds: u32, scope: Scope);
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedEvent {
    pub event: String,
    pub data: String,
    pub ttl: u32,
    pub scope: Scope,
}

/// Writes one JSON object per notification.
pub struct JsonLinesSink<W> {
    out: Mutex<W>,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(|e| e.into_inner())
    }
}

impl<W: Write + Send> NotificationSink for JsonLinesSink<W> {
    fn publish(&self, event_name: &str, data: &str, ttl_seconds: u32, scope: Scope) {
        let event = PublishedEvent {
            event: event_name.to_string(),
            data: data.to_string(),
            ttl: ttl_seconds,
            scope,
        };
        let line = match serde_json::to_string(&event) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping notification: serialization failed");
                return;
            }
        };
        let mut out = self.out.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = writeln!(out, "{line}").and_then(|_| out.flush()) {
            tracing::warn!(error = %e, event = event_name, "Dropping notification: write failed");
        }
    }
}

/// Keeps every notification in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<PublishedEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PublishedEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl NotificationSink for MemorySink {
    fn publish(&self, event_name: &str, data: &str, ttl_seconds: u32, scope: Scope) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(PublishedEvent {
                event: event_name.to_string(),
                data: data.to_string(),
                ttl: ttl_seconds,
                scope,
            });
    }
}
