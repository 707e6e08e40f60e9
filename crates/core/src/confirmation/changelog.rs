use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::domain::conversation::ConversationContext;
use crate::domain::skill::{DefinitionError, ParameterDefinition, ParameterKind};

/// A runtime change to a parameter definition, stored as plain data so it
/// survives persistence and can be replayed onto a freshly loaded skill.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParamChangeRecord {
    #[serde(rename = "type")]
    pub kind: ParameterKind,
    pub name: String,
    #[serde(rename = "param")]
    pub definition: Map<String, Value>,
    pub recorded_at: DateTime<Utc>,
}

impl ConversationContext {
    /// Prepends a change record; the history is newest first.
    pub fn record_change(
        &mut self,
        kind: ParameterKind,
        name: &str,
        definition: Map<String, Value>,
    ) -> &ParamChangeRecord {
        debug!(
            event_name = "confirmation.change_log.recorded",
            session_id = %self.session_id,
            skill = %self.skill.name,
            parameter = name,
            container = kind.as_str(),
            "parameter definition change recorded"
        );
        self.param_change_history.insert(
            0,
            ParamChangeRecord { kind, name: name.to_owned(), definition, recorded_at: Utc::now() },
        );
        &self.param_change_history[0]
    }

    /// Replaces the named definition with a typed one built by skill code.
    /// Every field is recorded, so replay yields the same definition instead
    /// of merging into whatever the pristine skill declared.
    pub fn record_definition(
        &mut self,
        kind: ParameterKind,
        name: &str,
        definition: &ParameterDefinition,
    ) -> Result<&ParamChangeRecord, DefinitionError> {
        let patch = definition.to_patch();
        self.skill.upsert_parameter(kind, name, &patch)?;
        Ok(self.record_change(kind, name, patch))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map, Value};

    use super::ParamChangeRecord;
    use crate::domain::conversation::ConversationContext;
    use crate::domain::event::Intent;
    use crate::domain::skill::{
        ListPolicy, ParameterDefinition, ParameterKind, Parser, SkillDefinition,
    };

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn records_are_prepended_newest_first() {
        let mut context =
            ConversationContext::new("s-1", SkillDefinition::new("k"), Intent::new("k"));
        context.record_change(ParameterKind::Dynamic, "first", object(json!({ "message": "1" })));
        context.record_change(ParameterKind::Required, "second", object(json!({ "message": "2" })));

        let names = context.param_change_history.iter().map(|r| r.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["second", "first"]);
    }

    #[test]
    fn typed_definition_is_recorded_with_handler_names() {
        let mut context =
            ConversationContext::new("s-1", SkillDefinition::new("k"), Intent::new("k"));
        let definition = ParameterDefinition::new().with_reaction("reaction_size");

        let record =
            context.record_definition(ParameterKind::Optional, "size", &definition).expect("record");
        assert_eq!(record.definition.get("reaction"), Some(&json!("reaction_size")));
        assert_eq!(record.definition.get("parser"), Some(&Value::Null));
        assert_eq!(context.skill.optional_parameter.get("size"), Some(&definition));
    }

    #[test]
    fn typed_definition_replaces_pristine_fields_on_replay() {
        let pristine = SkillDefinition::new("k").with_optional(
            "size",
            ParameterDefinition::new().with_parser(Parser::builtin("string")).with_list(ListPolicy::Newest),
        );
        let mut context = ConversationContext::new("s-1", pristine.clone(), Intent::new("k"));

        let replacement = ParameterDefinition::new().with_reaction("reaction_size");
        context.record_definition(ParameterKind::Optional, "size", &replacement).expect("record");
        assert_eq!(context.skill.optional_parameter.get("size"), Some(&replacement));

        let stored = serde_json::to_string(&context.param_change_history).expect("serialize");
        let history: Vec<ParamChangeRecord> = serde_json::from_str(&stored).expect("deserialize");
        let mut rehydrated = pristine;
        rehydrated.replay(&history).expect("replay");

        assert_eq!(rehydrated, context.skill);
    }

    #[test]
    fn typed_definition_cannot_target_sub_container() {
        let mut context =
            ConversationContext::new("s-1", SkillDefinition::new("k"), Intent::new("k"));

        let result = context.record_definition(ParameterKind::Sub, "zip", &ParameterDefinition::new());
        assert!(result.is_err());
        assert!(context.param_change_history.is_empty());
    }

    #[test]
    fn record_serializes_with_short_field_names() {
        let mut context =
            ConversationContext::new("s-1", SkillDefinition::new("k"), Intent::new("k"));
        context.record_change(ParameterKind::Dynamic, "c", object(json!({ "message": { "text": "?" } })));

        let raw = serde_json::to_value(&context.param_change_history[0]).expect("serialize");
        assert_eq!(raw["type"], json!("dynamic_parameter"));
        assert_eq!(raw["param"]["message"]["text"], json!("?"));

        let restored: ParamChangeRecord = serde_json::from_value(raw).expect("deserialize");
        assert_eq!(restored, context.param_change_history[0]);
    }

    #[test]
    fn replay_reproduces_runtime_changes_on_pristine_skill() {
        let pristine = SkillDefinition::new("k")
            .with_required("name", ParameterDefinition::new().with_message(json!({ "text": "Name?" })));
        let mut context = ConversationContext::new("s-1", pristine.clone(), Intent::new("k"));

        context
            .skill
            .upsert_parameter(ParameterKind::Required, "name", &object(json!({ "message": { "text": "Full name?" } })))
            .expect("patch");
        context.record_change(ParameterKind::Required, "name", object(json!({ "message": { "text": "Full name?" } })));
        context
            .skill
            .upsert_parameter(ParameterKind::Dynamic, "extra", &object(json!({ "parser": "string" })))
            .expect("define");
        context.record_change(ParameterKind::Dynamic, "extra", object(json!({ "parser": "string" })));

        let mut rehydrated = pristine;
        rehydrated.replay(&context.param_change_history).expect("replay");

        assert_eq!(rehydrated, context.skill);
    }
}
