use std::sync::Arc;

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::audit::{AuditAction, AuditEvent, AuditScope, AuditSink};
use crate::confirmation::builtin::{BuiltinParserRegistry, POLICY_PARAMETER_NAME};
use crate::confirmation::handlers::{HandlerError, HandlerRegistry, ReactionHandler, Rejection};
use crate::domain::event::Turn;
use crate::domain::skill::{DefinitionError, ParameterKind, Parser};
use crate::flows::{FlowError, FlowSignal};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConfirmationError {
    #[error("parameter not found: `{parameter}`")]
    ParameterNotFound { parameter: String },
    #[error("parser not found for parameter `{parameter}`")]
    ParserNotFound { parameter: String },
    #[error("unknown built-in parser `{kind}` for parameter `{parameter}`")]
    UnknownBuiltinParser { parameter: String, kind: String },
    #[error("handler `{handler}` is not registered for parameter `{parameter}`")]
    HandlerNotFound { parameter: String, handler: String },
    #[error("malformed parameter container: {reason}")]
    MalformedContainer { reason: String },
    #[error("sub parameter scope error for `{parameter}`: {reason}")]
    SubParameterScope { parameter: String, reason: String },
    #[error(transparent)]
    Definition(#[from] DefinitionError),
    #[error(transparent)]
    Rejected(#[from] Rejection),
    #[error("handler failed for parameter `{parameter}`: {message}")]
    Handler { parameter: String, message: String },
    #[error(transparent)]
    Flow(#[from] FlowError),
}

impl ConfirmationError {
    /// Configuration defects abort the turn; rejections do not.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ApplyOptions {
    pub parse: bool,
    pub react: bool,
}

impl ApplyOptions {
    pub fn parse_and_react() -> Self {
        Self { parse: true, react: true }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ReactionOutcome {
    NotRequested,
    /// A flow flag was already raised this turn; no skill code ran.
    Suppressed,
    NotDefined,
    Invoked(FlowSignal),
}

#[derive(Clone, Debug, PartialEq)]
pub struct ApplyOutcome {
    pub parameter: String,
    pub kind: ParameterKind,
    pub value: Value,
    pub rejection: Option<Rejection>,
    pub reaction: ReactionOutcome,
}

impl ApplyOutcome {
    pub fn accepted(&self) -> bool {
        self.rejection.is_none()
    }
}

/// Parser and reaction dispatch for one skill.
#[derive(Clone)]
pub struct ConfirmationEngine {
    handlers: Arc<HandlerRegistry>,
    builtins: Arc<BuiltinParserRegistry>,
    strict_parsing: bool,
}

impl ConfirmationEngine {
    pub fn new(handlers: Arc<HandlerRegistry>, builtins: Arc<BuiltinParserRegistry>) -> Self {
        Self { handlers, builtins, strict_parsing: false }
    }

    /// Makes `apply` treat a parameter without any parser as a defect.
    pub fn with_strict_parsing(mut self, strict_parsing: bool) -> Self {
        self.strict_parsing = strict_parsing;
        self
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    /// Accepts a turn's input for `name`: parse, then commit on acceptance,
    /// then react.
    pub async fn apply(
        &self,
        turn: &mut Turn,
        name: &str,
        value: Value,
        options: ApplyOptions,
    ) -> Result<ApplyOutcome, ConfirmationError> {
        let kind = turn.context.classify(name);
        if kind == ParameterKind::NotApplicable {
            return Err(ConfirmationError::ParameterNotFound { parameter: name.to_owned() });
        }

        let mut value = value;
        let mut rejection = None;
        if options.parse {
            match self.parse(turn, name, &value, self.strict_parsing).await {
                Ok(parsed) => value = parsed,
                Err(ConfirmationError::Rejected(rejected)) => {
                    info!(
                        event_name = "confirmation.parameter.rejected",
                        session_id = %turn.context.session_id,
                        skill = %turn.context.skill.name,
                        parameter = name,
                        code = %rejected.code,
                        "parser rejected value"
                    );
                    rejection = Some(rejected);
                }
                Err(error) => return Err(error),
            }
        }

        if rejection.is_none() {
            turn.context.commit(name, value.clone(), false)?;
        }

        let reaction = if options.react {
            self.react(turn, rejection.as_ref(), name, &value).await?
        } else {
            ReactionOutcome::NotRequested
        };

        info!(
            event_name = "confirmation.parameter.applied",
            session_id = %turn.context.session_id,
            skill = %turn.context.skill.name,
            parameter = name,
            container = kind.as_str(),
            accepted = rejection.is_none(),
            "parameter applied"
        );
        Ok(ApplyOutcome { parameter: name.to_owned(), kind, value, rejection, reaction })
    }

    pub async fn apply_with_audit<S>(
        &self,
        turn: &mut Turn,
        name: &str,
        value: Value,
        options: ApplyOptions,
        sink: &S,
        scope: &AuditScope,
    ) -> Result<ApplyOutcome, ConfirmationError>
    where
        S: AuditSink + ?Sized,
    {
        let container = Some(turn.context.classify(name)).filter(|kind| *kind != ParameterKind::NotApplicable);
        let result = self.apply(turn, name, value, options).await;
        let event = |action| AuditEvent::new(scope, action).for_parameter(name, container);

        match &result {
            Ok(outcome) if outcome.accepted() => sink.emit(
                event(AuditAction::ParameterApplied).with_detail("reaction", format!("{:?}", outcome.reaction)),
            ),
            Ok(outcome) => sink.emit(event(AuditAction::ParameterRejected).with_detail(
                "code",
                outcome.rejection.as_ref().map(|r| r.code.clone()).unwrap_or_default(),
            )),
            Err(error) => sink.emit(event(AuditAction::ApplyFailed).with_detail("error", error.to_string())),
        }
        result
    }

    /// Runs the parser configured for `name`. `strict` turns a missing
    /// parser into an error instead of accepting the raw value.
    pub async fn parse(
        &self,
        turn: &Turn,
        name: &str,
        value: &Value,
        strict: bool,
    ) -> Result<Value, ConfirmationError> {
        let definition = turn.context.resolve(name)?;
        let conventional = HandlerRegistry::conventional_parser_name(name);
        let parser = match &definition.parser {
            Some(parser) => Some(parser.clone()),
            None if self.handlers.has_parser(&conventional) => Some(Parser::inline(conventional)),
            None => None,
        };

        match parser {
            None => {
                if strict {
                    return Err(ConfirmationError::ParserNotFound { parameter: name.to_owned() });
                }
                if is_unset(value) {
                    return Err(Rejection::value_not_set(name).into());
                }
                Ok(value.clone())
            }
            Some(Parser::Inline(handler)) => {
                let parser = self.handlers.parser(handler.as_str()).ok_or_else(|| {
                    ConfirmationError::HandlerNotFound {
                        parameter: name.to_owned(),
                        handler: handler.0.clone(),
                    }
                })?;
                parser
                    .parse(value, &turn.bot, &turn.event, &turn.context)
                    .await
                    .map_err(|error| handler_failure(name, error))
            }
            Some(Parser::BuiltIn(kind)) => self.parse_builtin(name, &kind, Map::new(), value).await,
            Some(Parser::BuiltInWithPolicy { kind, policy }) => {
                self.parse_builtin(name, &kind, policy, value).await
            }
        }
    }

    async fn parse_builtin(
        &self,
        name: &str,
        kind: &str,
        mut policy: Map<String, Value>,
        value: &Value,
    ) -> Result<Value, ConfirmationError> {
        let parser = self.builtins.get(kind).ok_or_else(|| ConfirmationError::UnknownBuiltinParser {
            parameter: name.to_owned(),
            kind: kind.to_owned(),
        })?;
        policy
            .entry(POLICY_PARAMETER_NAME)
            .or_insert_with(|| Value::String(name.to_owned()));

        parser.parse(value, &policy).await.map_err(|error| handler_failure(name, error))
    }

    /// Runs the reaction for `name` unless the turn is already halting.
    pub async fn react(
        &self,
        turn: &mut Turn,
        error: Option<&Rejection>,
        name: &str,
        value: &Value,
    ) -> Result<ReactionOutcome, ConfirmationError> {
        if turn.context.flow.halted() {
            debug!(
                event_name = "confirmation.reaction.suppressed",
                session_id = %turn.context.session_id,
                parameter = name,
                "flow flag raised earlier in this turn; reaction skipped"
            );
            return Ok(ReactionOutcome::Suppressed);
        }

        let Some(handler) = self.resolve_reaction(turn, name)? else {
            return Ok(ReactionOutcome::NotDefined);
        };

        let signal = handler
            .react(error, value, &mut turn.bot, &turn.event, &mut turn.context)
            .await
            .map_err(|failure| {
                warn!(
                    event_name = "confirmation.reaction.failed",
                    parameter = name,
                    error = %failure,
                    "reaction handler failed"
                );
                ConfirmationError::Handler { parameter: name.to_owned(), message: failure.to_string() }
            })?;

        turn.context.flow.raise(signal.clone())?;
        Ok(ReactionOutcome::Invoked(signal))
    }

    fn resolve_reaction(
        &self,
        turn: &Turn,
        name: &str,
    ) -> Result<Option<Arc<dyn ReactionHandler>>, ConfirmationError> {
        let definition = turn.context.resolve(name)?;
        match &definition.reaction {
            Some(handler) => self.handlers.reaction(handler.as_str()).map(Some).ok_or_else(|| {
                ConfirmationError::HandlerNotFound {
                    parameter: name.to_owned(),
                    handler: handler.0.clone(),
                }
            }),
            None => Ok(self.handlers.reaction(&HandlerRegistry::conventional_reaction_name(name))),
        }
    }
}

fn is_unset(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(text) => text.is_empty(),
        _ => false,
    }
}

fn handler_failure(name: &str, error: HandlerError) -> ConfirmationError {
    match error {
        HandlerError::Rejected(mut rejection) => {
            if rejection.parameter.is_empty() {
                rejection.parameter = name.to_owned();
            }
            ConfirmationError::Rejected(rejection)
        }
        HandlerError::Defect(message) => {
            ConfirmationError::Handler { parameter: name.to_owned(), message }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use serde_json::{json, Map, Value};

    use super::{ApplyOptions, ConfirmationEngine, ConfirmationError, ReactionOutcome};
    use crate::audit::{AuditAction, AuditScope, InMemoryAuditSink};
    use crate::confirmation::builtin::BuiltinParserRegistry;
    use crate::confirmation::handlers::{
        FnParser, FnReaction, HandlerError, HandlerRegistry, Rejection,
    };
    use crate::confirmation::queue::EnqueueOptions;
    use crate::domain::conversation::ConversationContext;
    use crate::domain::event::{Bot, Event, Intent, Turn};
    use crate::domain::skill::{ParameterDefinition, ParameterKind, Parser, SkillDefinition};
    use crate::flows::FlowSignal;

    fn skill() -> SkillDefinition {
        SkillDefinition::new("survey")
            .with_required("param_a", ParameterDefinition::new())
            .with_required("param_b", ParameterDefinition::new())
            .with_optional(
                "color",
                ParameterDefinition::new().with_parser(Parser::with_policy("list", {
                    let mut policy = Map::new();
                    policy.insert("list".to_owned(), json!(["red", "blue"]));
                    policy
                })),
            )
            .with_optional("nickname", ParameterDefinition::new().with_parser(Parser::builtin("string")))
            .with_optional("mystery", ParameterDefinition::new().with_parser(Parser::builtin("runes")))
            .with_optional("orphan", ParameterDefinition::new().with_parser(Parser::inline("nobody")))
    }

    fn turn() -> Turn {
        let context = ConversationContext::new("session-1", skill(), Intent::new("survey"));
        Turn::new(Event::message("session-1", "user-1", "hi"), context)
    }

    fn engine(handlers: HandlerRegistry) -> ConfirmationEngine {
        ConfirmationEngine::new(Arc::new(handlers), Arc::new(BuiltinParserRegistry::default()))
    }

    fn numeric_parser(value: &Value, _context: &ConversationContext) -> Result<Value, HandlerError> {
        value
            .as_str()
            .and_then(|text| text.parse::<i64>().ok())
            .map(Value::from)
            .ok_or_else(|| HandlerError::rejected("not_numeric", "please send a number"))
    }

    /// Records every reaction call as `(error code, value)`.
    fn recording_reaction(
        calls: Arc<std::sync::Mutex<Vec<(Option<String>, Value)>>>,
        signal: FlowSignal,
    ) -> impl Fn(Option<&Rejection>, &Value, &mut Bot, &mut ConversationContext) -> Result<FlowSignal, HandlerError>
           + Send
           + Sync {
        move |error: Option<&Rejection>, value: &Value, _bot: &mut Bot, _context: &mut ConversationContext| {
            if let Ok(mut calls) = calls.lock() {
                calls.push((error.map(|e| e.code.clone()), value.clone()));
            }
            Ok(signal.clone())
        }
    }

    #[tokio::test]
    async fn raw_value_is_committed_and_reaction_sees_no_error() {
        let calls = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut handlers = HandlerRegistry::new();
        handlers.register_reaction(
            "reaction_param_a",
            FnReaction(recording_reaction(calls.clone(), FlowSignal::Continue)),
        );
        let engine = engine(handlers);
        let mut turn = turn();
        turn.context.enqueue("param_a", EnqueueOptions::default()).expect("enqueue");
        turn.context.confirming = Some("param_a".to_owned());

        let outcome = engine
            .apply(&mut turn, "param_a", json!("hello"), ApplyOptions { parse: false, react: true })
            .await
            .expect("apply");

        assert!(outcome.accepted());
        assert_eq!(turn.context.confirmed.get("param_a"), Some(&json!("hello")));
        assert!(!turn.context.to_confirm.contains(&"param_a".to_owned()));
        assert_eq!(turn.context.confirming, None);
        assert_eq!(outcome.reaction, ReactionOutcome::Invoked(FlowSignal::Continue));
        let calls = calls.lock().expect("calls").clone();
        assert_eq!(calls, vec![(None, json!("hello"))]);
    }

    #[tokio::test]
    async fn rejected_value_is_not_committed_and_reaction_gets_error() {
        let calls = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut handlers = HandlerRegistry::new();
        handlers.register_parser("parse_param_b", FnParser(numeric_parser));
        handlers.register_reaction(
            "reaction_param_b",
            FnReaction(recording_reaction(calls.clone(), FlowSignal::Continue)),
        );
        let engine = engine(handlers);
        let mut turn = turn();
        turn.context.enqueue("param_b", EnqueueOptions::default()).expect("enqueue");

        let outcome = engine
            .apply(&mut turn, "param_b", json!("abc"), ApplyOptions::parse_and_react())
            .await
            .expect("rejections do not escape apply");

        assert!(!outcome.accepted());
        assert_eq!(outcome.rejection.as_ref().map(|r| r.parameter.as_str()), Some("param_b"));
        assert!(!turn.context.confirmed.contains_key("param_b"));
        assert_eq!(turn.context.to_confirm, vec!["param_b"], "stays queued for a re-prompt");
        assert!(turn.context.previous.processed.is_empty());
        let calls = calls.lock().expect("calls").clone();
        assert_eq!(calls, vec![(Some("not_numeric".to_owned()), json!("abc"))]);
    }

    #[tokio::test]
    async fn accepted_parse_stores_parsed_value() {
        let mut handlers = HandlerRegistry::new();
        handlers.register_parser("parse_param_b", FnParser(numeric_parser));
        let engine = engine(handlers);
        let mut turn = turn();

        engine
            .apply(&mut turn, "param_b", json!("42"), ApplyOptions::parse_and_react())
            .await
            .expect("apply");

        assert_eq!(turn.context.confirmed.get("param_b"), Some(&json!(42)));
    }

    #[tokio::test]
    async fn missing_parser_accepts_non_empty_raw_value() {
        let engine = engine(HandlerRegistry::new());
        let turn = turn();

        assert_eq!(engine.parse(&turn, "param_a", &json!("x"), false).await, Ok(json!("x")));
        assert!(matches!(
            engine.parse(&turn, "param_a", &json!(""), false).await,
            Err(ConfirmationError::Rejected(ref rejection)) if rejection.code == "value_not_set"
        ));
        assert_eq!(
            engine.parse(&turn, "param_a", &json!("x"), true).await,
            Err(ConfirmationError::ParserNotFound { parameter: "param_a".to_owned() })
        );
    }

    #[tokio::test]
    async fn builtin_parsers_receive_parameter_name_in_policy() {
        let engine = engine(HandlerRegistry::new());
        let turn = turn();

        assert_eq!(engine.parse(&turn, "color", &json!("RED"), false).await, Ok(json!("red")));
        assert!(matches!(
            engine.parse(&turn, "nickname", &json!("  "), false).await,
            Err(ConfirmationError::Rejected(ref rejection)) if rejection.parameter == "nickname"
        ));
    }

    #[tokio::test]
    async fn configuration_defects_propagate_out_of_apply() {
        let engine = engine(HandlerRegistry::new());
        let mut turn = turn();

        assert!(matches!(
            engine.apply(&mut turn, "mystery", json!("x"), ApplyOptions::parse_and_react()).await,
            Err(ConfirmationError::UnknownBuiltinParser { .. })
        ));
        assert!(matches!(
            engine.apply(&mut turn, "orphan", json!("x"), ApplyOptions::parse_and_react()).await,
            Err(ConfirmationError::HandlerNotFound { .. })
        ));
        assert!(matches!(
            engine.apply(&mut turn, "ghost", json!("x"), ApplyOptions::parse_and_react()).await,
            Err(ConfirmationError::ParameterNotFound { .. })
        ));
        assert!(turn.context.confirmed.is_empty());
    }

    #[tokio::test]
    async fn parser_defect_is_not_treated_as_rejection() {
        let reactions = Arc::new(AtomicUsize::new(0));
        let counter = reactions.clone();
        let mut handlers = HandlerRegistry::new();
        handlers.register_parser(
            "parse_param_a",
            FnParser(|_: &Value, _: &ConversationContext| -> Result<Value, HandlerError> {
                Err(HandlerError::defect("database down"))
            }),
        );
        handlers.register_reaction(
            "reaction_param_a",
            FnReaction(move |_: Option<&Rejection>, _: &Value, _: &mut Bot, _: &mut ConversationContext| -> Result<FlowSignal, HandlerError> {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(FlowSignal::Continue)
            }),
        );
        let engine = engine(handlers);
        let mut turn = turn();

        let error = engine
            .apply(&mut turn, "param_a", json!("x"), ApplyOptions::parse_and_react())
            .await
            .expect_err("defects propagate");

        assert!(matches!(error, ConfirmationError::Handler { .. }));
        assert!(!error.is_rejection());
        assert_eq!(reactions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn raised_flags_suppress_reaction_without_side_effects() {
        for raise in [0, 1, 2] {
            let reactions = Arc::new(AtomicUsize::new(0));
            let counter = reactions.clone();
            let mut handlers = HandlerRegistry::new();
            handlers.register_reaction(
                "reaction_param_a",
                FnReaction(move |_: Option<&Rejection>, _: &Value, bot: &mut Bot, _: &mut ConversationContext| -> Result<FlowSignal, HandlerError> {
                    counter.fetch_add(1, Ordering::SeqCst);
                    bot.queue(json!({ "text": "should not be sent" }));
                    Ok(FlowSignal::Exit)
                }),
            );
            let engine = engine(handlers);
            let mut turn = turn();
            match raise {
                0 => turn.context.flow.pause(),
                1 => turn.context.flow.exit(),
                _ => turn.context.flow.init(),
            }
            let flags_before = turn.context.flow.clone();
            let context_before = turn.context.clone();

            let outcome = engine
                .react(&mut turn, None, "param_a", &json!("v"))
                .await
                .expect("react");

            assert_eq!(outcome, ReactionOutcome::Suppressed);
            assert_eq!(reactions.load(Ordering::SeqCst), 0);
            assert!(turn.bot.queued().is_empty());
            assert_eq!(turn.context.flow, flags_before);
            assert_eq!(turn.context, context_before);
        }
    }

    #[tokio::test]
    async fn reaction_signal_is_applied_to_flow_flags() {
        let mut handlers = HandlerRegistry::new();
        handlers.register_reaction(
            "reaction_param_a",
            FnReaction(|_: Option<&Rejection>, _: &Value, _: &mut Bot, _: &mut ConversationContext| -> Result<FlowSignal, HandlerError> {
                Ok(FlowSignal::SwitchSkill(Intent::new("handoff")))
            }),
        );
        let engine = engine(handlers);
        let mut turn = turn();

        engine
            .apply(&mut turn, "param_a", json!("v"), ApplyOptions { parse: false, react: true })
            .await
            .expect("apply");

        assert!(turn.context.flow.exit);
        assert_eq!(
            turn.context.flow.switch_intent.as_ref().map(|intent| intent.name.as_str()),
            Some("handoff")
        );
    }

    #[tokio::test]
    async fn invalid_switch_from_reaction_is_a_defect() {
        let mut handlers = HandlerRegistry::new();
        handlers.register_reaction(
            "reaction_param_a",
            FnReaction(|_: Option<&Rejection>, _: &Value, _: &mut Bot, _: &mut ConversationContext| -> Result<FlowSignal, HandlerError> {
                Ok(FlowSignal::SwitchSkill(Intent::default()))
            }),
        );
        let engine = engine(handlers);
        let mut turn = turn();

        let error = engine
            .apply(&mut turn, "param_a", json!("v"), ApplyOptions { parse: false, react: true })
            .await
            .expect_err("invalid argument");

        assert!(matches!(error, ConfirmationError::Flow(_)));
        assert!(turn.context.flow.switch_intent.is_none());
    }

    #[tokio::test]
    async fn reaction_can_enqueue_inline_parameter() {
        let mut handlers = HandlerRegistry::new();
        handlers.register_reaction(
            "reaction_param_a",
            FnReaction(|_: Option<&Rejection>, _: &Value, _: &mut Bot, context: &mut ConversationContext| -> Result<FlowSignal, HandlerError> {
                let mut container = Map::new();
                container.insert("param_c".to_owned(), json!({ "message": { "text": "And C?" } }));
                context
                    .enqueue(container, EnqueueOptions::default())
                    .map_err(|error| HandlerError::defect(error.to_string()))?;
                Ok(FlowSignal::Continue)
            }),
        );
        let engine = engine(handlers);
        let mut turn = turn();

        engine
            .apply(&mut turn, "param_a", json!("v"), ApplyOptions { parse: false, react: true })
            .await
            .expect("apply");

        assert_eq!(turn.context.classify("param_c"), ParameterKind::Dynamic);
        assert_eq!(turn.context.to_confirm.first().map(String::as_str), Some("param_c"));
        assert_eq!(turn.context.param_change_history.len(), 1);
    }

    #[tokio::test]
    async fn apply_with_audit_records_rejections() {
        let mut handlers = HandlerRegistry::new();
        handlers.register_parser("parse_param_b", FnParser(numeric_parser));
        let engine = engine(handlers);
        let sink = InMemoryAuditSink::default();
        let mut turn = turn();

        engine
            .apply_with_audit(
                &mut turn,
                "param_b",
                json!("abc"),
                ApplyOptions::parse_and_react(),
                &sink,
                &AuditScope::new("session-1", "survey", "req-7", "engine"),
            )
            .await
            .expect("apply");

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, AuditAction::ParameterRejected);
        assert_eq!(events[0].parameter.as_deref(), Some("param_b"));
        assert_eq!(events[0].container, Some(ParameterKind::Required));
        assert_eq!(events[0].detail.get("code").map(String::as_str), Some("not_numeric"));
        assert_eq!(events[0].scope.turn_id, "req-7");
    }
}
