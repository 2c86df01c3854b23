//! Event intake data model (§3: EventEnvelope).

use super::Value;
use serde::{Deserialize, Serialize};

/// Category of incoming threat-vector event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vector {
    Sms,
    Voice,
    Irc,
    Esmtp,
    Discord,
    Webhook,
}

impl std::fmt::Display for Vector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Vector::Sms => "sms",
            Vector::Voice => "voice",
            Vector::Irc => "irc",
            Vector::Esmtp => "esmtp",
            Vector::Discord => "discord",
            Vector::Webhook => "webhook",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for Vector {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sms" => Ok(Vector::Sms),
            "voice" => Ok(Vector::Voice),
            "irc" => Ok(Vector::Irc),
            "esmtp" => Ok(Vector::Esmtp),
            "discord" => Ok(Vector::Discord),
            "webhook" => Ok(Vector::Webhook),
            other => Err(format!("unknown vector: {}", other)),
        }
    }
}

/// A normalized external event, ready for the Community Reviewer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub vector: Vector,
    pub source_id: String,
    pub received_ts: i64,
    pub payload: Value,
    pub correlation_id: String,
}

impl EventEnvelope {
    /// Rough topic derivation used to select a reviewer panel; the out-of-scope bridge is
    /// expected to supply a richer topic in `payload.topic` when available.
    pub fn topic(&self) -> String {
        if let Value::Map(map) = &self.payload {
            if let Some(Value::String(topic)) = map.get("topic") {
                return topic.clone();
            }
        }
        self.vector.to_string()
    }
}
