use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::event::Turn;
use crate::domain::skill::ParameterKind;

/// Something the confirmation machinery did to a conversation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    ParameterApplied,
    ParameterRejected,
    ApplyFailed,
    BeginHookRan,
    FinishHookRan,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ParameterApplied => "confirmation.parameter_applied",
            Self::ParameterRejected => "confirmation.parameter_rejected",
            Self::ApplyFailed => "confirmation.apply_failed",
            Self::BeginHookRan => "flow.begin_hook",
            Self::FinishHookRan => "flow.finish_hook",
        }
    }

    pub fn outcome(&self) -> AuditOutcome {
        match self {
            Self::ParameterRejected => AuditOutcome::Rejected,
            Self::ApplyFailed => AuditOutcome::Failed,
            Self::ParameterApplied | Self::BeginHookRan | Self::FinishHookRan => AuditOutcome::Success,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditOutcome {
    Success,
    Rejected,
    Failed,
}

/// The conversation an audited action belongs to. `turn_id` is the id of
/// the inbound event and correlates every record written during one turn.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditScope {
    pub session_id: String,
    pub skill: String,
    pub turn_id: String,
    pub actor: String,
}

impl AuditScope {
    pub fn new(
        session_id: impl Into<String>,
        skill: impl Into<String>,
        turn_id: impl Into<String>,
        actor: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            skill: skill.into(),
            turn_id: turn_id.into(),
            actor: actor.into(),
        }
    }

    /// Scope of the skill currently active in `turn`.
    pub fn of_turn(turn: &Turn, actor: impl Into<String>) -> Self {
        Self::new(
            turn.context.session_id.clone(),
            turn.context.skill.name.clone(),
            turn.event.event_id.clone(),
            actor,
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    #[serde(flatten)]
    pub scope: AuditScope,
    pub action: AuditAction,
    pub outcome: AuditOutcome,
    pub parameter: Option<String>,
    pub container: Option<ParameterKind>,
    pub detail: BTreeMap<String, String>,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(scope: &AuditScope, action: AuditAction) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            scope: scope.clone(),
            action,
            outcome: action.outcome(),
            parameter: None,
            container: None,
            detail: BTreeMap::new(),
            occurred_at: Utc::now(),
        }
    }

    /// Ties the event to one parameter. `container` stays empty when the
    /// parameter could not be resolved.
    pub fn for_parameter(mut self, name: impl Into<String>, container: Option<ParameterKind>) -> Self {
        self.parameter = Some(name.into());
        self.container = container;
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.detail.insert(key.into(), value.into());
        self
    }

    pub fn event_type(&self) -> &'static str {
        self.action.as_str()
    }
}

pub trait AuditSink: Send + Sync {
    fn emit(&self, event: AuditEvent);
}

/// Drops every event. Used when a runner is built without an audit trail.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn emit(&self, _event: AuditEvent) {}
}

#[derive(Clone, Default)]
pub struct InMemoryAuditSink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl InMemoryAuditSink {
    pub fn events(&self) -> Vec<AuditEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Events about one parameter, oldest first.
    pub fn events_for(&self, parameter: &str) -> Vec<AuditEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.parameter.as_deref() == Some(parameter))
            .collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn emit(&self, event: AuditEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::audit::{AuditAction, AuditEvent, AuditOutcome, AuditScope, AuditSink, InMemoryAuditSink};
    use crate::domain::skill::ParameterKind;

    fn scope() -> AuditScope {
        AuditScope::new("U123:C456", "order_pizza", "req-123", "confirmation-engine")
    }

    #[test]
    fn in_memory_sink_records_parameter_and_container() {
        let sink = InMemoryAuditSink::default();
        sink.emit(
            AuditEvent::new(&scope(), AuditAction::ParameterApplied)
                .for_parameter("size", Some(ParameterKind::Required)),
        );
        sink.emit(AuditEvent::new(&scope(), AuditAction::FinishHookRan));

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].scope.turn_id, "req-123");
        assert_eq!(events[0].scope.session_id, "U123:C456");
        assert_eq!(events[0].container, Some(ParameterKind::Required));
        assert_eq!(events[1].parameter, None);

        let size = sink.events_for("size");
        assert_eq!(size.len(), 1);
        assert_eq!(size[0].event_type(), "confirmation.parameter_applied");
    }

    #[test]
    fn action_decides_outcome() {
        let rejected = AuditEvent::new(&scope(), AuditAction::ParameterRejected);
        let failed = AuditEvent::new(&scope(), AuditAction::ApplyFailed);
        let hook = AuditEvent::new(&scope(), AuditAction::BeginHookRan);

        assert_eq!(rejected.outcome, AuditOutcome::Rejected);
        assert_eq!(failed.outcome, AuditOutcome::Failed);
        assert_eq!(hook.outcome, AuditOutcome::Success);
    }

    #[test]
    fn serialized_event_names_its_container() {
        let event = AuditEvent::new(&scope(), AuditAction::ParameterRejected)
            .for_parameter("street", Some(ParameterKind::Sub))
            .with_detail("code", "too_short");

        let value = serde_json::to_value(&event).expect("serialize");
        assert_eq!(value["session_id"], json!("U123:C456"));
        assert_eq!(value["action"], json!("parameter_rejected"));
        assert_eq!(value["container"], json!("sub_parameter"));
        assert_eq!(value["detail"]["code"], json!("too_short"));
    }
}
