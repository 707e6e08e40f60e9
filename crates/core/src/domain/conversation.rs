use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::confirmation::changelog::ParamChangeRecord;
use crate::domain::event::Intent;
use crate::domain::skill::{ParameterKind, SkillDefinition};
use crate::flows::FlowFlags;

/// History of committed parameter names, newest first.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviousParameters {
    #[serde(default)]
    pub confirmed: Vec<String>,
    #[serde(default)]
    pub processed: Vec<String>,
}

/// Active sub-parameter frame: the parent being collected and the sub
/// values gathered so far.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParentParameter {
    pub kind: ParameterKind,
    pub name: String,
    #[serde(default)]
    pub collected: Map<String, Value>,
}

/// Per-session state carried between turns and persisted whole.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationContext {
    pub session_id: String,
    pub skill: SkillDefinition,
    #[serde(default)]
    pub intent: Intent,
    #[serde(default)]
    pub confirmed: Map<String, Value>,
    #[serde(default)]
    pub to_confirm: Vec<String>,
    #[serde(default)]
    pub confirming: Option<String>,
    #[serde(default)]
    pub previous: PreviousParameters,
    #[serde(default)]
    pub param_change_history: Vec<ParamChangeRecord>,
    #[serde(default)]
    pub parent_parameter: Option<ParentParameter>,
    #[serde(default)]
    pub flow: FlowFlags,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationContext {
    pub fn new(session_id: impl Into<String>, skill: SkillDefinition, intent: Intent) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            skill,
            intent,
            confirmed: Map::new(),
            to_confirm: Vec::new(),
            confirming: None,
            previous: PreviousParameters::default(),
            param_change_history: Vec::new(),
            parent_parameter: None,
            flow: FlowFlags::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Starts the skill over: collected values, queue, history and frame
    /// are dropped and `skill` replaces the runtime-modified definition.
    pub fn reset(&mut self, skill: SkillDefinition) {
        let session_id = std::mem::take(&mut self.session_id);
        let intent = std::mem::take(&mut self.intent);
        *self = Self::new(session_id, skill, intent);
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn is_confirmed(&self, name: &str) -> bool {
        self.confirmed.contains_key(name)
    }

    /// Required parameters without a confirmed value, in declaration order.
    pub fn missing_required(&self) -> Vec<String> {
        self.skill
            .required_parameter
            .names()
            .filter(|name| !self.is_confirmed(name))
            .map(str::to_owned)
            .collect()
    }
}
