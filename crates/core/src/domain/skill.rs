use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::confirmation::changelog::ParamChangeRecord;

/// Name of a handler registered with the skill's handler registry.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HandlerRef(pub String);

impl HandlerRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParameterKind {
    #[serde(rename = "required_parameter")]
    Required,
    #[serde(rename = "optional_parameter")]
    Optional,
    #[serde(rename = "dynamic_parameter")]
    Dynamic,
    #[serde(rename = "sub_parameter")]
    Sub,
    #[serde(rename = "not_applicable")]
    NotApplicable,
}

impl ParameterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Required => "required_parameter",
            Self::Optional => "optional_parameter",
            Self::Dynamic => "dynamic_parameter",
            Self::Sub => "sub_parameter",
            Self::NotApplicable => "not_applicable",
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ParserShapeError {
    #[error("invalid parser object: `type` must name a built-in parser")]
    InvalidParserObject,
    #[error("invalid parser: expected a built-in name, a handler reference, or a {{type, policy}} object")]
    InvalidParser,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DefinitionError {
    #[error(transparent)]
    Parser(#[from] ParserShapeError),
    #[error("`{field}` must be a handler name")]
    InvalidHandler { field: String },
    #[error("invalid sub_parameter container: {0}")]
    InvalidSubParameter(String),
    #[error("unknown parameter field `{0}`")]
    UnknownField(String),
    #[error("{0:?} does not name a top-level parameter container")]
    NotAContainer(ParameterKind),
    #[error("parameter `{name}` is defined in both {first:?} and {second:?}")]
    DuplicateParameter { name: String, first: ParameterKind, second: ParameterKind },
}

/// How a parameter value is validated before it is confirmed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum Parser {
    Inline(HandlerRef),
    BuiltIn(String),
    BuiltInWithPolicy { kind: String, policy: Map<String, Value> },
}

impl Parser {
    pub fn inline(handler: impl Into<String>) -> Self {
        Self::Inline(HandlerRef::new(handler))
    }

    pub fn builtin(kind: impl Into<String>) -> Self {
        Self::BuiltIn(kind.into())
    }

    pub fn with_policy(kind: impl Into<String>, policy: Map<String, Value>) -> Self {
        Self::BuiltInWithPolicy { kind: kind.into(), policy }
    }
}

impl TryFrom<Value> for Parser {
    type Error = ParserShapeError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::String(kind) => Ok(Self::BuiltIn(kind)),
            Value::Object(mut object) => {
                if let Some(Value::String(handler)) = object.get("handler") {
                    return Ok(Self::Inline(HandlerRef(handler.clone())));
                }
                let kind = match object.remove("type") {
                    Some(Value::String(kind)) if !kind.is_empty() => kind,
                    _ => return Err(ParserShapeError::InvalidParserObject),
                };
                let policy = match object.remove("policy") {
                    None | Some(Value::Null) => Map::new(),
                    Some(Value::Object(policy)) => policy,
                    Some(_) => return Err(ParserShapeError::InvalidParserObject),
                };
                Ok(Self::BuiltInWithPolicy { kind, policy })
            }
            _ => Err(ParserShapeError::InvalidParser),
        }
    }
}

impl From<Parser> for Value {
    fn from(parser: Parser) -> Self {
        match parser {
            Parser::Inline(handler) => json!({ "handler": handler.0 }),
            Parser::BuiltIn(kind) => Value::String(kind),
            Parser::BuiltInWithPolicy { kind, policy } => json!({ "type": kind, "policy": policy }),
        }
    }
}

/// Whether a parameter holds one value or accumulates many, and where new
/// values land in the accumulated sequence.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub enum ListPolicy {
    #[default]
    Scalar,
    Newest,
    Oldest,
}

impl ListPolicy {
    pub fn is_scalar(&self) -> bool {
        matches!(self, Self::Scalar)
    }
}

impl From<Value> for ListPolicy {
    fn from(value: Value) -> Self {
        if let Value::Object(object) = &value {
            return match object.get("order").and_then(Value::as_str) {
                Some("old") => Self::Oldest,
                _ => Self::Newest,
            };
        }
        if is_truthy(&value) {
            Self::Newest
        } else {
            Self::Scalar
        }
    }
}

impl From<ListPolicy> for Value {
    fn from(policy: ListPolicy) -> Self {
        match policy {
            ListPolicy::Scalar => Value::Bool(false),
            ListPolicy::Newest => json!({ "order": "new" }),
            ListPolicy::Oldest => json!({ "order": "old" }),
        }
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0 && !n.is_nan()),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parser: Option<Parser>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reaction: Option<HandlerRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<HandlerRef>,
    #[serde(default, skip_serializing_if = "ListPolicy::is_scalar")]
    pub list: ListPolicy,
    #[serde(default, skip_serializing_if = "ParameterContainer::is_empty")]
    pub sub_parameter: ParameterContainer,
}

impl ParameterDefinition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_message(mut self, message: Value) -> Self {
        self.message = Some(message);
        self
    }

    pub fn with_parser(mut self, parser: Parser) -> Self {
        self.parser = Some(parser);
        self
    }

    pub fn with_reaction(mut self, handler: impl Into<String>) -> Self {
        self.reaction = Some(HandlerRef::new(handler));
        self
    }

    pub fn with_condition(mut self, handler: impl Into<String>) -> Self {
        self.condition = Some(HandlerRef::new(handler));
        self
    }

    pub fn with_list(mut self, list: ListPolicy) -> Self {
        self.list = list;
        self
    }

    pub fn with_sub_parameter(mut self, name: impl Into<String>, definition: Self) -> Self {
        self.sub_parameter.insert(name, definition);
        self
    }

    /// Every field as an explicit patch entry, `null` for unset ones.
    /// Applying it to any definition yields a copy of `self`.
    pub fn to_patch(&self) -> Map<String, Value> {
        let handler = |handler: &Option<HandlerRef>| {
            handler.as_ref().map_or(Value::Null, |handler| Value::String(handler.0.clone()))
        };
        let sub_parameter = if self.sub_parameter.is_empty() {
            Value::Null
        } else {
            serde_json::to_value(&self.sub_parameter).unwrap_or(Value::Null)
        };

        let mut patch = Map::new();
        patch.insert("message".to_owned(), self.message.clone().unwrap_or(Value::Null));
        patch.insert("parser".to_owned(), self.parser.clone().map_or(Value::Null, Value::from));
        patch.insert("reaction".to_owned(), handler(&self.reaction));
        patch.insert("condition".to_owned(), handler(&self.condition));
        patch.insert("list".to_owned(), Value::from(self.list));
        patch.insert("sub_parameter".to_owned(), sub_parameter);
        patch
    }

    /// Overlays the fields present in `patch`; a `null` field clears it.
    pub fn apply_patch(&mut self, patch: &Map<String, Value>) -> Result<(), DefinitionError> {
        for (field, value) in patch {
            match field.as_str() {
                "message" => self.message = (!value.is_null()).then(|| value.clone()),
                "parser" => {
                    self.parser = match value {
                        Value::Null => None,
                        other => Some(Parser::try_from(other.clone())?),
                    };
                }
                "reaction" => self.reaction = handler_field(field, value)?,
                "condition" => self.condition = handler_field(field, value)?,
                "list" => self.list = ListPolicy::from(value.clone()),
                "sub_parameter" => {
                    self.sub_parameter = match value {
                        Value::Null => ParameterContainer::default(),
                        other => serde_json::from_value(other.clone())
                            .map_err(|error| DefinitionError::InvalidSubParameter(error.to_string()))?,
                    };
                }
                other => return Err(DefinitionError::UnknownField(other.to_owned())),
            }
        }
        Ok(())
    }
}

fn handler_field(field: &str, value: &Value) -> Result<Option<HandlerRef>, DefinitionError> {
    match value {
        Value::Null => Ok(None),
        Value::String(name) if !name.is_empty() => Ok(Some(HandlerRef(name.clone()))),
        _ => Err(DefinitionError::InvalidHandler { field: field.to_owned() }),
    }
}

/// Parameter definitions keyed by name, kept in declaration order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParameterContainer {
    entries: Vec<(String, ParameterDefinition)>,
}

impl ParameterContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&ParameterDefinition> {
        self.entries.iter().find(|(key, _)| key == name).map(|(_, definition)| definition)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut ParameterDefinition> {
        self.entries.iter_mut().find(|(key, _)| key == name).map(|(_, definition)| definition)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn insert(&mut self, name: impl Into<String>, definition: ParameterDefinition) {
        let name = name.into();
        match self.get_mut(&name) {
            Some(existing) => *existing = definition,
            None => self.entries.push((name, definition)),
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParameterDefinition)> + '_ {
        self.entries.iter().map(|(name, definition)| (name.as_str(), definition))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<N> FromIterator<(N, ParameterDefinition)> for ParameterContainer
where
    N: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (N, ParameterDefinition)>>(iter: I) -> Self {
        let mut container = Self::default();
        for (name, definition) in iter {
            container.insert(name, definition);
        }
        container
    }
}

impl Serialize for ParameterContainer {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, definition) in &self.entries {
            map.serialize_entry(name, definition)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ParameterContainer {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ContainerVisitor;

        impl<'de> Visitor<'de> for ContainerVisitor {
            type Value = ParameterContainer;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a map of parameter name to parameter definition")
            }

            fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut container = ParameterContainer::default();
                while let Some((name, definition)) =
                    access.next_entry::<String, ParameterDefinition>()?
                {
                    container.insert(name, definition);
                }
                Ok(container)
            }

            fn visit_unit<E>(self) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(ParameterContainer::default())
            }

            fn visit_none<E>(self) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(ParameterContainer::default())
            }
        }

        // `null` reads as an empty container, matching `apply_patch`.
        deserializer.deserialize_any(ContainerVisitor)
    }
}

/// The data half of a skill: its parameter containers. Executable behaviour
/// lives in the handler registry and is referenced by name.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SkillDefinition {
    pub name: String,
    #[serde(default)]
    pub required_parameter: ParameterContainer,
    #[serde(default)]
    pub optional_parameter: ParameterContainer,
    #[serde(default)]
    pub dynamic_parameter: ParameterContainer,
}

impl SkillDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }

    pub fn with_required(mut self, name: impl Into<String>, definition: ParameterDefinition) -> Self {
        self.required_parameter.insert(name, definition);
        self
    }

    pub fn with_optional(mut self, name: impl Into<String>, definition: ParameterDefinition) -> Self {
        self.optional_parameter.insert(name, definition);
        self
    }

    pub fn with_dynamic(mut self, name: impl Into<String>, definition: ParameterDefinition) -> Self {
        self.dynamic_parameter.insert(name, definition);
        self
    }

    pub fn container(&self, kind: ParameterKind) -> Option<&ParameterContainer> {
        match kind {
            ParameterKind::Required => Some(&self.required_parameter),
            ParameterKind::Optional => Some(&self.optional_parameter),
            ParameterKind::Dynamic => Some(&self.dynamic_parameter),
            ParameterKind::Sub | ParameterKind::NotApplicable => None,
        }
    }

    pub fn container_mut(&mut self, kind: ParameterKind) -> Option<&mut ParameterContainer> {
        match kind {
            ParameterKind::Required => Some(&mut self.required_parameter),
            ParameterKind::Optional => Some(&mut self.optional_parameter),
            ParameterKind::Dynamic => Some(&mut self.dynamic_parameter),
            ParameterKind::Sub | ParameterKind::NotApplicable => None,
        }
    }

    /// Merges `patch` into the named definition, creating it when absent.
    pub fn upsert_parameter(
        &mut self,
        kind: ParameterKind,
        name: &str,
        patch: &Map<String, Value>,
    ) -> Result<(), DefinitionError> {
        let container = self.container_mut(kind).ok_or(DefinitionError::NotAContainer(kind))?;
        if let Some(existing) = container.get_mut(name) {
            return existing.apply_patch(patch);
        }

        let mut definition = ParameterDefinition::default();
        definition.apply_patch(patch)?;
        container.insert(name, definition);
        Ok(())
    }

    /// Re-applies recorded runtime changes, oldest first.
    pub fn replay(&mut self, history: &[ParamChangeRecord]) -> Result<(), DefinitionError> {
        for record in history.iter().rev() {
            self.upsert_parameter(record.kind, &record.name, &record.definition)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), DefinitionError> {
        let kinds = [ParameterKind::Required, ParameterKind::Optional, ParameterKind::Dynamic];
        for (index, first) in kinds.iter().enumerate() {
            let Some(container) = self.container(*first) else {
                continue;
            };
            for name in container.names() {
                for second in &kinds[index + 1..] {
                    if self.container(*second).is_some_and(|other| other.contains(name)) {
                        return Err(DefinitionError::DuplicateParameter {
                            name: name.to_owned(),
                            first: *first,
                            second: *second,
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map, Value};

    use super::{
        DefinitionError, ListPolicy, ParameterContainer, ParameterDefinition, ParameterKind,
        Parser, ParserShapeError, SkillDefinition,
    };

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn parser_accepts_the_three_shapes() {
        assert_eq!(Parser::try_from(json!("number")), Ok(Parser::builtin("number")));
        assert_eq!(
            Parser::try_from(json!({ "handler": "parse_age" })),
            Ok(Parser::inline("parse_age"))
        );
        assert_eq!(
            Parser::try_from(json!({ "type": "list", "policy": { "list": ["a"] } })),
            Ok(Parser::with_policy("list", object(json!({ "list": ["a"] }))))
        );
        assert_eq!(
            Parser::try_from(json!({ "type": "string" })),
            Ok(Parser::with_policy("string", Map::new()))
        );
    }

    #[test]
    fn parser_object_without_type_is_invalid_parser_object() {
        assert_eq!(
            Parser::try_from(json!({ "policy": {} })),
            Err(ParserShapeError::InvalidParserObject)
        );
    }

    #[test]
    fn parser_of_other_shape_is_invalid_parser() {
        assert_eq!(Parser::try_from(json!(42)), Err(ParserShapeError::InvalidParser));
        assert_eq!(Parser::try_from(json!(["string"])), Err(ParserShapeError::InvalidParser));
    }

    #[test]
    fn list_policy_reads_bool_and_order_forms() {
        assert_eq!(ListPolicy::from(json!(true)), ListPolicy::Newest);
        assert_eq!(ListPolicy::from(json!(false)), ListPolicy::Scalar);
        assert_eq!(ListPolicy::from(json!({ "order": "new" })), ListPolicy::Newest);
        assert_eq!(ListPolicy::from(json!({ "order": "old" })), ListPolicy::Oldest);
        assert_eq!(ListPolicy::from(json!({ "order": "sideways" })), ListPolicy::Newest);
        assert_eq!(ListPolicy::from(json!("yes")), ListPolicy::Newest);
        assert_eq!(ListPolicy::from(json!(0)), ListPolicy::Scalar);
    }

    #[test]
    fn container_keeps_declaration_order_through_serde() {
        let raw = json!({
            "zip": {},
            "address": { "parser": "string" },
            "city": { "list": { "order": "old" } }
        });
        let container: ParameterContainer = serde_json::from_value(raw).expect("container");
        assert_eq!(container.names().collect::<Vec<_>>(), vec!["zip", "address", "city"]);
        assert_eq!(container.get("city").map(|d| d.list), Some(ListPolicy::Oldest));

        let round_trip = serde_json::to_string(&container).expect("serialize");
        assert!(round_trip.find("zip") < round_trip.find("city"));
    }

    #[test]
    fn patch_overrides_present_fields_only() {
        let mut definition = ParameterDefinition::new()
            .with_message(json!({ "text": "Name?" }))
            .with_parser(Parser::builtin("string"));

        definition
            .apply_patch(&object(json!({ "message": { "text": "Your full name?" } })))
            .expect("patch");

        assert_eq!(definition.message, Some(json!({ "text": "Your full name?" })));
        assert_eq!(definition.parser, Some(Parser::builtin("string")));
    }

    #[test]
    fn patch_rejects_malformed_parser_and_unknown_field() {
        let mut definition = ParameterDefinition::new();
        assert_eq!(
            definition.apply_patch(&object(json!({ "parser": { "policy": {} } }))),
            Err(DefinitionError::Parser(ParserShapeError::InvalidParserObject))
        );
        assert_eq!(
            definition.apply_patch(&object(json!({ "colour": "red" }))),
            Err(DefinitionError::UnknownField("colour".to_owned()))
        );
    }

    #[test]
    fn validate_detects_name_in_two_containers() {
        let skill = SkillDefinition::new("order")
            .with_required("item", ParameterDefinition::new())
            .with_dynamic("item", ParameterDefinition::new());

        assert!(matches!(
            skill.validate(),
            Err(DefinitionError::DuplicateParameter {
                first: ParameterKind::Required,
                second: ParameterKind::Dynamic,
                ..
            })
        ));
    }

    #[test]
    fn skill_definition_deserializes_from_json_document() {
        let skill: SkillDefinition = serde_json::from_value(json!({
            "name": "delivery",
            "required_parameter": {
                "address": {
                    "message": { "type": "text", "text": "Where to?" },
                    "parser": { "type": "string", "policy": { "min": 3 } },
                    "sub_parameter": { "zip": { "parser": "number" } }
                }
            },
            "optional_parameter": { "note": {} }
        }))
        .expect("skill");

        let address = skill.required_parameter.get("address").expect("address");
        assert!(address.sub_parameter.contains("zip"));
        assert!(skill.optional_parameter.contains("note"));
        assert!(skill.dynamic_parameter.is_empty());
        assert!(skill.validate().is_ok());
    }

    #[test]
    fn null_container_loads_as_empty_like_a_null_patch() {
        let skill: SkillDefinition = serde_json::from_value(json!({
            "name": "feedback",
            "required_parameter": { "rating": { "sub_parameter": null } },
            "optional_parameter": null
        }))
        .expect("skill");

        let rating = skill.required_parameter.get("rating").expect("rating");
        assert!(rating.sub_parameter.is_empty());
        assert!(skill.optional_parameter.is_empty());

        let mut patched = ParameterDefinition::new().with_sub_parameter("x", ParameterDefinition::new());
        let mut patch = Map::new();
        patch.insert("sub_parameter".to_owned(), Value::Null);
        patched.apply_patch(&patch).expect("patch");
        assert_eq!(&patched, rating);
    }

    #[test]
    fn full_patch_reproduces_definition() {
        let definition = ParameterDefinition::new()
            .with_message(json!({ "text": "Size?" }))
            .with_parser(Parser::with_policy("list", Map::new()))
            .with_condition("wants_pizza")
            .with_list(ListPolicy::Oldest)
            .with_sub_parameter("crust", ParameterDefinition::new().with_parser(Parser::inline("parse_crust")));

        let mut target = ParameterDefinition::new()
            .with_reaction("reaction_size")
            .with_parser(Parser::builtin("string"));
        target.apply_patch(&definition.to_patch()).expect("patch");

        assert_eq!(target, definition);
    }
}
