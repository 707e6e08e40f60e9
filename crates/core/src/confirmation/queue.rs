use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::confirmation::engine::ConfirmationError;
use crate::domain::conversation::{ConversationContext, ParentParameter};
use crate::domain::skill::{ListPolicy, ParameterKind};

/// Argument to [`ConversationContext::enqueue`]: an existing parameter name,
/// or a single-entry container defining/overriding one inline.
#[derive(Clone, Debug, PartialEq)]
pub enum EnqueueArg {
    Name(String),
    Container(Map<String, Value>),
}

impl From<&str> for EnqueueArg {
    fn from(name: &str) -> Self {
        Self::Name(name.to_owned())
    }
}

impl From<String> for EnqueueArg {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl From<Map<String, Value>> for EnqueueArg {
    fn from(container: Map<String, Value>) -> Self {
        Self::Container(container)
    }
}

impl TryFrom<Value> for EnqueueArg {
    type Error = ConfirmationError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::String(name) => Ok(Self::Name(name)),
            Value::Object(container) => Ok(Self::Container(container)),
            other => Err(ConfirmationError::MalformedContainer {
                reason: format!("expected a parameter name or container object, got {other}"),
            }),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EnqueueOptions {
    pub dedup: bool,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self { dedup: true }
    }
}

impl ConversationContext {
    /// Stores an accepted value. Rejected values never reach this point.
    pub fn commit(&mut self, name: &str, value: Value, is_change: bool) -> Result<(), ConfirmationError> {
        let kind = self.classify(name);
        let list = self.resolve(name)?.list;

        let store = match (kind, self.parent_parameter.as_mut()) {
            (ParameterKind::Sub, Some(parent)) => &mut parent.collected,
            _ => &mut self.confirmed,
        };
        store_value(store, name, value, list);

        if !is_change {
            self.previous.confirmed.insert(0, name.to_owned());
            self.previous.processed.insert(0, name.to_owned());
        }
        self.to_confirm.retain(|queued| queued != name);
        if self.confirming.as_deref() == Some(name) {
            self.confirming = None;
        }
        self.touch();

        info!(
            event_name = "confirmation.parameter.committed",
            session_id = %self.session_id,
            skill = %self.skill.name,
            parameter = name,
            container = kind.as_str(),
            is_change,
            "parameter committed"
        );
        Ok(())
    }

    /// Puts a parameter at the front of `to_confirm` and returns its name.
    pub fn enqueue(
        &mut self,
        arg: impl Into<EnqueueArg>,
        options: EnqueueOptions,
    ) -> Result<String, ConfirmationError> {
        let name = match arg.into() {
            EnqueueArg::Name(name) => {
                if self.classify(&name) == ParameterKind::NotApplicable {
                    return Err(ConfirmationError::ParameterNotFound { parameter: name });
                }
                name
            }
            EnqueueArg::Container(container) => self.define_inline(container)?,
        };

        if options.dedup {
            self.to_confirm.retain(|queued| queued != &name);
        }
        self.to_confirm.insert(0, name.clone());

        debug!(
            event_name = "confirmation.parameter.enqueued",
            session_id = %self.session_id,
            parameter = %name,
            queue_length = self.to_confirm.len(),
            "parameter enqueued"
        );
        Ok(name)
    }

    /// Applies `patch` to a top-level definition and logs the change so the
    /// customization survives rehydration.
    pub fn change_parameter(
        &mut self,
        name: &str,
        patch: Map<String, Value>,
    ) -> Result<ParameterKind, ConfirmationError> {
        let kind = match self.classify(name) {
            kind @ (ParameterKind::Required | ParameterKind::Optional | ParameterKind::Dynamic) => kind,
            ParameterKind::Sub => {
                return Err(ConfirmationError::SubParameterScope {
                    parameter: name.to_owned(),
                    reason: "sub parameters cannot be changed at runtime".to_owned(),
                })
            }
            ParameterKind::NotApplicable => {
                return Err(ConfirmationError::ParameterNotFound { parameter: name.to_owned() })
            }
        };

        self.skill.upsert_parameter(kind, name, &patch)?;
        self.record_change(kind, name, patch);
        Ok(kind)
    }

    fn define_inline(&mut self, container: Map<String, Value>) -> Result<String, ConfirmationError> {
        if container.len() != 1 {
            return Err(ConfirmationError::MalformedContainer {
                reason: format!("expected exactly one parameter, got {}", container.len()),
            });
        }
        let Some((name, raw)) = container.into_iter().next() else {
            return Err(ConfirmationError::MalformedContainer { reason: "empty container".to_owned() });
        };
        let Value::Object(patch) = raw else {
            return Err(ConfirmationError::MalformedContainer {
                reason: format!("definition of `{name}` must be an object"),
            });
        };

        let kind = match self.classify(&name) {
            kind @ (ParameterKind::Required | ParameterKind::Optional | ParameterKind::Dynamic) => kind,
            ParameterKind::Sub | ParameterKind::NotApplicable => ParameterKind::Dynamic,
        };
        self.skill.upsert_parameter(kind, &name, &patch)?;
        self.record_change(kind, &name, patch);
        Ok(name)
    }

    /// Opens a sub-parameter frame for `parent` and queues its sub
    /// parameters ahead of everything else, in declaration order.
    pub fn enter_sub_parameters(&mut self, parent: &str) -> Result<Vec<String>, ConfirmationError> {
        if let Some(active) = &self.parent_parameter {
            return Err(ConfirmationError::SubParameterScope {
                parameter: parent.to_owned(),
                reason: format!("sub parameters of `{}` are still being collected", active.name),
            });
        }

        let kind = self.classify(parent);
        let definition = self.resolve(parent)?;
        let names = definition.sub_parameter.names().map(str::to_owned).collect::<Vec<_>>();
        if names.is_empty() {
            return Err(ConfirmationError::SubParameterScope {
                parameter: parent.to_owned(),
                reason: "parameter has no sub parameters".to_owned(),
            });
        }

        self.parent_parameter =
            Some(ParentParameter { kind, name: parent.to_owned(), collected: Map::new() });
        for name in names.iter().rev() {
            self.to_confirm.retain(|queued| queued != name);
            self.to_confirm.insert(0, name.clone());
        }
        Ok(names)
    }

    /// Closes the active frame and commits the collected sub values as the
    /// parent's value. Returns the parent name, or `None` without a frame.
    pub fn exit_sub_parameters(&mut self) -> Result<Option<String>, ConfirmationError> {
        let sub_names = match self.parent_definition() {
            Some(parent) => parent.sub_parameter.names().map(str::to_owned).collect::<Vec<_>>(),
            None => Vec::new(),
        };
        let Some(parent) = self.parent_parameter.take() else {
            return Ok(None);
        };

        self.to_confirm.retain(|queued| !sub_names.contains(queued));
        self.commit(&parent.name, Value::Object(parent.collected), false)?;
        Ok(Some(parent.name))
    }

    /// Sub parameters of the active frame still awaiting a value.
    pub fn pending_sub_parameters(&self) -> Vec<String> {
        let (Some(parent), Some(definition)) = (&self.parent_parameter, self.parent_definition())
        else {
            return Vec::new();
        };
        definition
            .sub_parameter
            .names()
            .filter(|name| !parent.collected.contains_key(*name))
            .map(str::to_owned)
            .collect()
    }
}

fn store_value(store: &mut Map<String, Value>, name: &str, value: Value, list: ListPolicy) {
    if list.is_scalar() {
        store.insert(name.to_owned(), value);
        return;
    }

    let entry = store.entry(name.to_owned()).or_insert_with(|| Value::Array(Vec::new()));
    if !entry.is_array() {
        let existing = entry.take();
        *entry = Value::Array(vec![existing]);
    }
    if let Value::Array(items) = entry {
        match list {
            ListPolicy::Oldest => items.push(value),
            ListPolicy::Newest | ListPolicy::Scalar => items.insert(0, value),
        }
    }
}
