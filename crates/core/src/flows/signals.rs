use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::domain::event::Intent;

/// What a reaction or lifecycle hook asks the orchestrator to do next.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum FlowSignal {
    #[default]
    Continue,
    Pause,
    Exit,
    Restart,
    SwitchSkill(Intent),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Turn-scoped flow flags. The orchestrator resets them when a turn starts
/// and reads them between parameter confirmations.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowFlags {
    #[serde(default)]
    pub pause: bool,
    #[serde(default)]
    pub exit: bool,
    #[serde(default)]
    pub init: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub switch_intent: Option<Intent>,
}

impl FlowFlags {
    /// Stop this turn, keep the context including `confirming`.
    pub fn pause(&mut self) {
        debug!(event_name = "flow.signal.raised", signal = "pause", "flow paused");
        self.pause = true;
    }

    /// Stop this turn and abandon the parameter being confirmed.
    pub fn exit(&mut self) {
        debug!(event_name = "flow.signal.raised", signal = "exit", "flow exited");
        self.exit = true;
    }

    /// Stop this turn and reset the whole context.
    pub fn init(&mut self) {
        debug!(event_name = "flow.signal.raised", signal = "init", "flow restart requested");
        self.init = true;
    }

    pub fn switch_skill(&mut self, intent: Intent) -> Result<(), FlowError> {
        self.exit();
        if intent.name.is_empty() {
            return Err(FlowError::InvalidArgument(
                "switch_skill requires intent.name to be a non-empty string".to_owned(),
            ));
        }
        debug!(
            event_name = "flow.signal.raised",
            signal = "switch_skill",
            intent = %intent.name,
            "skill switch requested"
        );
        self.switch_intent = Some(intent);
        Ok(())
    }

    pub fn raise(&mut self, signal: FlowSignal) -> Result<(), FlowError> {
        match signal {
            FlowSignal::Continue => {}
            FlowSignal::Pause => self.pause(),
            FlowSignal::Exit => self.exit(),
            FlowSignal::Restart => self.init(),
            FlowSignal::SwitchSkill(intent) => self.switch_skill(intent)?,
        }
        Ok(())
    }

    /// True once any signal has asked to stop processing this turn.
    pub fn halted(&self) -> bool {
        self.pause || self.exit || self.init
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
