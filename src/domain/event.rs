use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Declared type of an inbound stream message
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    StreamEvent,
    KillswitchActivated,
    Heartbeat,
    Other(String),
}

impl EventKind {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "stream_event" | "redis_event" => EventKind::StreamEvent,
            "killswitch_activated" => EventKind::KillswitchActivated,
            "heartbeat" => EventKind::Heartbeat,
            _ => EventKind::Other(raw.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EventKind::StreamEvent => "stream_event",
            EventKind::KillswitchActivated => "killswitch_activated",
            EventKind::Heartbeat => "heartbeat",
            EventKind::Other(raw) => raw,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One event, either received on the stream or loaded from a data source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub kind: EventKind,
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub payload: Value,
}

impl InboundEvent {
    /// Build an event from a decoded stream frame.
    ///
    /// Returns `None` when the frame has no string `type` field.
    pub fn from_frame(frame: Value) -> Option<Self> {
        let kind = EventKind::parse(frame.get("type")?.as_str()?);
        let source = frame
            .get("source")
            .and_then(Value::as_str)
            .unwrap_or("stream")
            .to_string();
        let timestamp = frame
            .get("timestamp")
            .or_else(|| frame.get("ts"))
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        let id = frame.get("id").and_then(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        });

        Some(Self {
            id,
            kind,
            source,
            timestamp,
            payload: frame,
        })
    }

    /// Agent id carried by a heartbeat payload
    pub fn heartbeat_agent(&self) -> Option<&str> {
        if self.kind != EventKind::Heartbeat {
            return None;
        }
        self.payload
            .get("agent_id")
            .or_else(|| self.payload.get("payload").and_then(|p| p.get("agent_id")))
            .and_then(Value::as_str)
    }

    /// Build an event from a stored record (`{id, type, source, payload, ts}`).
    ///
    /// Unlike a stream frame, the payload is the record's `payload` field;
    /// payloads stored as text are parsed leniently.
    pub fn from_record(record: &Value) -> Option<Self> {
        let mut event = Self::from_frame(record.clone())?;
        event.payload = match record.get("payload") {
            Some(Value::String(raw)) => lenient_payload(raw),
            Some(Value::Null) | None => Value::Object(Default::default()),
            Some(other) => other.clone(),
        };
        Some(event)
    }
}

/// Parse stored payload text; text that is not JSON is kept as a JSON string.
pub fn lenient_payload(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_parsing() {
        assert_eq!(EventKind::parse("redis_event"), EventKind::StreamEvent);
        assert_eq!(EventKind::parse("stream-event"), EventKind::StreamEvent);
        assert_eq!(
            EventKind::parse("killswitch-activated"),
            EventKind::KillswitchActivated
        );
        assert_eq!(EventKind::parse("HEARTBEAT"), EventKind::Heartbeat);
        assert_eq!(
            EventKind::parse("quant.regime.state"),
            EventKind::Other("quant.regime.state".to_string())
        );
    }

    #[test]
    fn test_from_frame_requires_type() {
        assert!(InboundEvent::from_frame(json!({"source": "bus"})).is_none());
        assert!(InboundEvent::from_frame(json!({"type": 7})).is_none());

        let event = InboundEvent::from_frame(json!({
            "type": "redis_event",
            "source": "bus",
            "id": 42,
            "timestamp": "2026-03-01T12:00:00Z",
            "data": {"x": 1}
        }))
        .unwrap();
        assert_eq!(event.kind, EventKind::StreamEvent);
        assert_eq!(event.source, "bus");
        assert_eq!(event.id.as_deref(), Some("42"));
        assert_eq!(event.payload["data"]["x"], 1);
    }

    #[test]
    fn test_heartbeat_agent() {
        let event = InboundEvent::from_frame(json!({"type": "heartbeat", "agent_id": "a1"})).unwrap();
        assert_eq!(event.heartbeat_agent(), Some("a1"));

        let nested =
            InboundEvent::from_frame(json!({"type": "heartbeat", "payload": {"agent_id": "a2"}}))
                .unwrap();
        assert_eq!(nested.heartbeat_agent(), Some("a2"));

        let other = InboundEvent::from_frame(json!({"type": "redis_event", "agent_id": "a1"})).unwrap();
        assert_eq!(other.heartbeat_agent(), None);
    }

    #[test]
    fn test_from_record_parses_text_payload() {
        let event = InboundEvent::from_record(&json!({
            "id": 7,
            "type": "quant.regime.state",
            "source": "quant",
            "payload": "{\"regime\": \"bear\"}",
            "ts": "2026-03-01T12:00:00Z"
        }))
        .unwrap();
        assert_eq!(event.payload["regime"], "bear");
        assert_eq!(event.id.as_deref(), Some("7"));

        let raw = InboundEvent::from_record(&json!({"type": "note", "payload": "plain text"})).unwrap();
        assert_eq!(raw.payload, json!("plain text"));
        assert_eq!(raw.source, "stream");
    }
}
