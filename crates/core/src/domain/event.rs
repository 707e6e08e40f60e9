use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::domain::conversation::ConversationContext;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Message,
    Postback,
    Follow,
    Unfollow,
    Unsupported,
}

/// Platform-neutral inbound event, produced by the messenger adapter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_id: String,
    pub session_id: String,
    pub user_id: String,
    pub kind: EventKind,
    #[serde(default)]
    pub payload: Value,
    pub occurred_at: DateTime<Utc>,
}

impl Event {
    pub fn new(
        session_id: impl Into<String>,
        user_id: impl Into<String>,
        kind: EventKind,
        payload: Value,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            user_id: user_id.into(),
            kind,
            payload,
            occurred_at: Utc::now(),
        }
    }

    pub fn message(
        session_id: impl Into<String>,
        user_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        let mut payload = Map::new();
        payload.insert("text".to_owned(), Value::String(text.into()));
        Self::new(session_id, user_id, EventKind::Message, Value::Object(payload))
    }

    pub fn text(&self) -> Option<&str> {
        self.payload.get("text").and_then(Value::as_str)
    }

    /// The raw value this event offers for the parameter being confirmed.
    pub fn parameter_value(&self) -> Value {
        match self.kind {
            EventKind::Message => self.payload.get("text").cloned().unwrap_or(Value::Null),
            EventKind::Postback => self.payload.get("data").cloned().unwrap_or(Value::Null),
            _ => Value::Null,
        }
    }
}

/// The request that selected a skill.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub name: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl Intent {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(name.into(), value);
        self
    }
}

/// Outbound side of a turn: messages queued for the messenger adapter.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Bot {
    queued: Vec<Value>,
}

impl Bot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue(&mut self, message: Value) {
        self.queued.push(message);
    }

    pub fn queued(&self) -> &[Value] {
        &self.queued
    }

    pub fn take_queued(&mut self) -> Vec<Value> {
        std::mem::take(&mut self.queued)
    }
}

/// Everything a single turn works on. Handlers receive its fields split
/// into the `(bot, event, context)` triple.
#[derive(Clone, Debug)]
pub struct Turn {
    pub bot: Bot,
    pub event: Event,
    pub context: ConversationContext,
}

impl Turn {
    pub fn new(event: Event, context: ConversationContext) -> Self {
        Self { bot: Bot::new(), event, context }
    }
}
