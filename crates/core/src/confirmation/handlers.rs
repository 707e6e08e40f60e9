use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::domain::conversation::ConversationContext;
use crate::domain::event::{Bot, Event};
use crate::flows::FlowSignal;

/// A parser declining a value. Carried into the reaction, never thrown past
/// `apply`.
#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("value for `{parameter}` rejected ({code}): {message}")]
pub struct Rejection {
    pub parameter: String,
    pub code: String,
    pub message: String,
}

impl Rejection {
    pub fn new(
        parameter: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self { parameter: parameter.into(), code: code.into(), message: message.into() }
    }

    pub fn value_not_set(parameter: impl Into<String>) -> Self {
        Self::new(parameter, "value_not_set", "value is not set")
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum HandlerError {
    #[error(transparent)]
    Rejected(#[from] Rejection),
    #[error("{0}")]
    Defect(String),
}

impl HandlerError {
    /// Rejection whose parameter name is filled in by the dispatcher.
    pub fn rejected(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rejected(Rejection::new(String::new(), code, message))
    }

    pub fn defect(message: impl Into<String>) -> Self {
        Self::Defect(message.into())
    }
}

#[async_trait]
pub trait ParserHandler: Send + Sync {
    async fn parse(
        &self,
        value: &Value,
        bot: &Bot,
        event: &Event,
        context: &ConversationContext,
    ) -> Result<Value, HandlerError>;
}

#[async_trait]
pub trait ReactionHandler: Send + Sync {
    async fn react(
        &self,
        error: Option<&Rejection>,
        value: &Value,
        bot: &mut Bot,
        event: &Event,
        context: &mut ConversationContext,
    ) -> Result<FlowSignal, HandlerError>;
}

#[async_trait]
pub trait ConditionHandler: Send + Sync {
    async fn evaluate(
        &self,
        bot: &Bot,
        event: &Event,
        context: &ConversationContext,
    ) -> Result<bool, HandlerError>;
}

#[async_trait]
pub trait LifecycleHook: Send + Sync {
    async fn run(
        &self,
        bot: &mut Bot,
        event: &Event,
        context: &mut ConversationContext,
    ) -> Result<FlowSignal, HandlerError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LifecycleStage {
    Begin,
    Finish,
}

pub struct FnParser<F>(pub F);

#[async_trait]
impl<F> ParserHandler for FnParser<F>
where
    F: Fn(&Value, &ConversationContext) -> Result<Value, HandlerError> + Send + Sync,
{
    async fn parse(
        &self,
        value: &Value,
        _bot: &Bot,
        _event: &Event,
        context: &ConversationContext,
    ) -> Result<Value, HandlerError> {
        (self.0)(value, context)
    }
}

pub struct FnReaction<F>(pub F);

#[async_trait]
impl<F> ReactionHandler for FnReaction<F>
where
    F: Fn(Option<&Rejection>, &Value, &mut Bot, &mut ConversationContext) -> Result<FlowSignal, HandlerError>
        + Send
        + Sync,
{
    async fn react(
        &self,
        error: Option<&Rejection>,
        value: &Value,
        bot: &mut Bot,
        _event: &Event,
        context: &mut ConversationContext,
    ) -> Result<FlowSignal, HandlerError> {
        (self.0)(error, value, bot, context)
    }
}

pub struct FnCondition<F>(pub F);

#[async_trait]
impl<F> ConditionHandler for FnCondition<F>
where
    F: Fn(&ConversationContext) -> bool + Send + Sync,
{
    async fn evaluate(
        &self,
        _bot: &Bot,
        _event: &Event,
        context: &ConversationContext,
    ) -> Result<bool, HandlerError> {
        Ok((self.0)(context))
    }
}

pub struct FnHook<F>(pub F);

#[async_trait]
impl<F> LifecycleHook for FnHook<F>
where
    F: Fn(&mut Bot, &mut ConversationContext) -> Result<FlowSignal, HandlerError> + Send + Sync,
{
    async fn run(
        &self,
        bot: &mut Bot,
        _event: &Event,
        context: &mut ConversationContext,
    ) -> Result<FlowSignal, HandlerError> {
        (self.0)(bot, context)
    }
}

/// Executable half of a skill. Parameter definitions point at entries here
/// by name; `parse_<param>` and `reaction_<param>` are found by convention.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    parsers: HashMap<String, Arc<dyn ParserHandler>>,
    reactions: HashMap<String, Arc<dyn ReactionHandler>>,
    conditions: HashMap<String, Arc<dyn ConditionHandler>>,
    hooks: HashMap<LifecycleStage, Arc<dyn LifecycleHook>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_parser<H>(&mut self, name: impl Into<String>, handler: H) -> &mut Self
    where
        H: ParserHandler + 'static,
    {
        self.parsers.insert(name.into(), Arc::new(handler));
        self
    }

    pub fn register_reaction<H>(&mut self, name: impl Into<String>, handler: H) -> &mut Self
    where
        H: ReactionHandler + 'static,
    {
        self.reactions.insert(name.into(), Arc::new(handler));
        self
    }

    pub fn register_condition<H>(&mut self, name: impl Into<String>, handler: H) -> &mut Self
    where
        H: ConditionHandler + 'static,
    {
        self.conditions.insert(name.into(), Arc::new(handler));
        self
    }

    pub fn register_hook<H>(&mut self, stage: LifecycleStage, hook: H) -> &mut Self
    where
        H: LifecycleHook + 'static,
    {
        self.hooks.insert(stage, Arc::new(hook));
        self
    }

    pub fn parser(&self, name: &str) -> Option<Arc<dyn ParserHandler>> {
        self.parsers.get(name).cloned()
    }

    pub fn reaction(&self, name: &str) -> Option<Arc<dyn ReactionHandler>> {
        self.reactions.get(name).cloned()
    }

    pub fn condition(&self, name: &str) -> Option<Arc<dyn ConditionHandler>> {
        self.conditions.get(name).cloned()
    }

    pub fn hook(&self, stage: LifecycleStage) -> Option<Arc<dyn LifecycleHook>> {
        self.hooks.get(&stage).cloned()
    }

    pub fn conventional_parser_name(parameter: &str) -> String {
        format!("parse_{parameter}")
    }

    pub fn conventional_reaction_name(parameter: &str) -> String {
        format!("reaction_{parameter}")
    }

    pub fn has_parser(&self, name: &str) -> bool {
        self.parsers.contains_key(name)
    }

    pub fn has_reaction(&self, name: &str) -> bool {
        self.reactions.contains_key(name)
    }

    pub fn has_condition(&self, name: &str) -> bool {
        self.conditions.contains_key(name)
    }
}
