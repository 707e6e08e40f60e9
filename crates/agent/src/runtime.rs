use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use skillflow_core::audit::{AuditAction, AuditEvent, AuditScope, AuditSink, NoopAuditSink};
use skillflow_core::config::RuntimeConfig;
use skillflow_core::confirmation::{
    ApplyOptions, ApplyOutcome, ConfirmationEngine, ConfirmationError, EnqueueOptions,
    HandlerRegistry, LifecycleStage, ReactionOutcome,
};
use skillflow_core::domain::conversation::ConversationContext;
use skillflow_core::domain::event::{Event, Intent, Turn};
use skillflow_core::domain::skill::ParameterKind;
use skillflow_db::ContextStore;

use crate::catalog::{RegisteredSkill, SkillCatalog};
use crate::error::RuntimeError;

const MAX_SKILL_SWITCHES_PER_TURN: usize = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RuntimeSettings {
    pub max_confirmations_per_turn: u32,
    pub dedup_queue: bool,
    pub strict_parsing: bool,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self::from(&RuntimeConfig {
            max_confirmations_per_turn: 10,
            dedup_queue: true,
            strict_parsing: false,
        })
    }
}

impl From<&RuntimeConfig> for RuntimeSettings {
    fn from(config: &RuntimeConfig) -> Self {
        Self {
            max_confirmations_per_turn: config.max_confirmations_per_turn,
            dedup_queue: config.dedup_queue,
            strict_parsing: config.strict_parsing,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TurnStatus {
    /// A parameter is being confirmed and the next event answers it.
    AwaitingInput,
    Paused,
    /// The skill stopped without finishing; the context is kept.
    Exited,
    /// Every queued parameter is confirmed; the context was dropped.
    Completed,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TurnReport {
    pub session_id: String,
    pub skill: String,
    pub status: TurnStatus,
    pub confirming: Option<String>,
    pub messages: Vec<Value>,
    pub confirmed: serde_json::Map<String, Value>,
}

/// Drives one inbound event through the active skill of its session.
pub struct TurnRunner<S> {
    catalog: Arc<SkillCatalog>,
    store: S,
    settings: RuntimeSettings,
    audit: Arc<dyn AuditSink>,
}

impl<S> TurnRunner<S>
where
    S: ContextStore,
{
    pub fn new(catalog: Arc<SkillCatalog>, store: S, settings: RuntimeSettings) -> Self {
        Self { catalog, store, settings, audit: Arc::new(NoopAuditSink) }
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Handles one event. `intent` selects a skill when the session has
    /// none, or replaces the active skill when it names a different one.
    pub async fn handle(
        &self,
        event: Event,
        intent: Option<Intent>,
    ) -> Result<TurnReport, RuntimeError> {
        let session_id = event.session_id.clone();
        info!(
            event_name = "runtime.turn.started",
            session_id = %session_id,
            intent = intent.as_ref().map(|i| i.name.as_str()).unwrap_or_default(),
            "turn started"
        );

        let stored = self.store.find(&session_id).await?;
        let (context, fresh) = match (stored, intent) {
            (Some(context), Some(intent)) if intent.name != context.skill.name => {
                (self.start_context(&session_id, intent)?, true)
            }
            (Some(context), _) => (self.rehydrate(context)?, false),
            (None, Some(intent)) => (self.start_context(&session_id, intent)?, true),
            (None, None) => return Err(RuntimeError::NoActiveSkill { session_id }),
        };

        let mut turn = Turn::new(event, context);
        turn.context.flow.reset();
        let mut fresh = fresh;
        let mut switches = 0;

        let status = loop {
            let skill = self.catalog.get(&turn.context.skill.name)?;
            let status = self.run_skill(skill, &mut turn, fresh).await?;

            let Some(next_intent) = turn.context.flow.switch_intent.take() else {
                break status;
            };
            switches += 1;
            if switches > MAX_SKILL_SWITCHES_PER_TURN {
                return Err(RuntimeError::SwitchLimit(MAX_SKILL_SWITCHES_PER_TURN));
            }
            info!(
                event_name = "runtime.skill.switched",
                session_id = %session_id,
                from = %turn.context.skill.name,
                to = %next_intent.name,
                "switching skill"
            );
            turn.context = self.start_context(&session_id, next_intent)?;
            fresh = true;
        };

        if status == TurnStatus::Completed {
            self.store.delete(&session_id).await?;
        } else {
            turn.context.touch();
            self.store.save(&turn.context).await?;
        }

        let report = TurnReport {
            session_id,
            skill: turn.context.skill.name.clone(),
            status,
            confirming: turn.context.confirming.clone(),
            messages: turn.bot.take_queued(),
            confirmed: turn.context.confirmed.clone(),
        };
        info!(
            event_name = "runtime.turn.completed",
            session_id = %report.session_id,
            skill = %report.skill,
            status = ?report.status,
            messages = report.messages.len(),
            "turn completed"
        );
        Ok(report)
    }

    fn start_context(
        &self,
        session_id: &str,
        intent: Intent,
    ) -> Result<ConversationContext, RuntimeError> {
        let skill = self.catalog.get(&intent.name)?;
        Ok(ConversationContext::new(session_id, skill.definition.clone(), intent))
    }

    /// Rebuilds the skill from the catalog and replays runtime changes onto
    /// it, so handler names resolve against the current registration.
    fn rehydrate(&self, mut context: ConversationContext) -> Result<ConversationContext, RuntimeError> {
        let skill = self.catalog.get(&context.skill.name)?;
        let mut definition = skill.definition.clone();
        definition.replay(&context.param_change_history)?;
        context.skill = definition;
        debug!(
            event_name = "runtime.context.rehydrated",
            session_id = %context.session_id,
            skill = %context.skill.name,
            changes = context.param_change_history.len(),
            "context rehydrated"
        );
        Ok(context)
    }

    async fn run_skill(
        &self,
        skill: &RegisteredSkill,
        turn: &mut Turn,
        fresh: bool,
    ) -> Result<TurnStatus, RuntimeError> {
        let engine = ConfirmationEngine::new(skill.handlers.clone(), self.catalog.builtins())
            .with_strict_parsing(self.settings.strict_parsing);
        let mut budget = self.settings.max_confirmations_per_turn;

        if fresh {
            self.begin(skill, turn).await?;
            self.apply_intent_parameters(&engine, turn, &mut budget).await?;
        } else if let Some(name) = turn.context.confirming.clone() {
            if !turn.context.flow.halted() {
                let value = turn.event.parameter_value();
                let outcome = self.apply(&engine, turn, &name, value).await?;
                if outcome.rejection.is_some() && matches!(outcome.reaction, ReactionOutcome::NotDefined) {
                    self.ask_again(turn, &name)?;
                }
            }
        }

        let mut restarted = false;
        let mut finished = false;
        loop {
            if turn.context.flow.init && !restarted {
                restarted = true;
                info!(
                    event_name = "runtime.skill.restarted",
                    session_id = %turn.context.session_id,
                    skill = %turn.context.skill.name,
                    "skill restarted"
                );
                turn.context.reset(skill.definition.clone());
                self.begin(skill, turn).await?;
                continue;
            }
            if turn.context.flow.pause {
                return Ok(TurnStatus::Paused);
            }
            if turn.context.flow.exit || turn.context.flow.init {
                turn.context.confirming = None;
                return Ok(TurnStatus::Exited);
            }

            if self.advance(&engine, skill, turn).await? {
                continue;
            }
            if turn.context.confirming.is_some() {
                return Ok(TurnStatus::AwaitingInput);
            }
            if finished {
                return Ok(TurnStatus::Completed);
            }

            finished = true;
            self.run_hook(&skill.handlers, LifecycleStage::Finish, turn).await?;
            if turn.context.flow.halted() || !turn.context.to_confirm.is_empty() {
                continue;
            }
            return Ok(TurnStatus::Completed);
        }
    }

    /// Seeds the queue with required parameters in declaration order and
    /// runs the begin hook.
    async fn begin(&self, skill: &RegisteredSkill, turn: &mut Turn) -> Result<(), RuntimeError> {
        let options = EnqueueOptions { dedup: self.settings.dedup_queue };
        let required =
            turn.context.skill.required_parameter.names().map(str::to_owned).collect::<Vec<_>>();
        for name in required.iter().rev() {
            turn.context.enqueue(name.as_str(), options)?;
        }
        self.run_hook(&skill.handlers, LifecycleStage::Begin, turn).await
    }

    async fn apply_intent_parameters(
        &self,
        engine: &ConfirmationEngine,
        turn: &mut Turn,
        budget: &mut u32,
    ) -> Result<(), RuntimeError> {
        let supplied = turn.context.intent.parameters.clone();
        for (name, value) in supplied {
            if turn.context.flow.halted() {
                break;
            }
            if turn.context.classify(&name) == ParameterKind::NotApplicable {
                debug!(
                    event_name = "runtime.intent.parameter_ignored",
                    session_id = %turn.context.session_id,
                    parameter = %name,
                    "intent parameter is not defined by the skill"
                );
                continue;
            }
            if *budget == 0 {
                warn!(
                    event_name = "runtime.turn.budget_exhausted",
                    session_id = %turn.context.session_id,
                    parameter = %name,
                    "confirmation budget exhausted; remaining values will be asked for"
                );
                break;
            }
            *budget -= 1;
            self.apply(engine, turn, &name, value).await?;
        }
        Ok(())
    }

    async fn apply(
        &self,
        engine: &ConfirmationEngine,
        turn: &mut Turn,
        name: &str,
        value: Value,
    ) -> Result<ApplyOutcome, ConfirmationError> {
        let scope = AuditScope::of_turn(turn, "turn-runner");
        engine
            .apply_with_audit(turn, name, value, ApplyOptions::parse_and_react(), self.audit.as_ref(), &scope)
            .await
    }

    /// Re-sends the prompt of a parameter whose value was rejected when no
    /// reaction exists to tell the user what went wrong.
    fn ask_again(&self, turn: &mut Turn, name: &str) -> Result<(), RuntimeError> {
        let Some(message) = turn.context.resolve(name)?.message.clone() else {
            return Ok(());
        };
        turn.bot.queue(message);
        debug!(
            event_name = "runtime.parameter.asked_again",
            session_id = %turn.context.session_id,
            parameter = %name,
            "value rejected; asking again"
        );
        Ok(())
    }

    /// Moves the queue forward by one step. Returns `true` when it changed
    /// state without asking anything and should be called again.
    async fn advance(
        &self,
        engine: &ConfirmationEngine,
        skill: &RegisteredSkill,
        turn: &mut Turn,
    ) -> Result<bool, RuntimeError> {
        let next = turn.context.to_confirm.first().cloned();

        let frame_done = turn.context.parent_parameter.is_some()
            && next.as_deref().map_or(true, |name| turn.context.classify(name) != ParameterKind::Sub);
        if frame_done {
            if let Some(parent) = turn.context.exit_sub_parameters()? {
                let value = turn.context.confirmed.get(&parent).cloned().unwrap_or(Value::Null);
                engine.react(turn, None, &parent, &value).await?;
            }
            return Ok(true);
        }

        let Some(name) = next else {
            return Ok(false);
        };
        if turn.context.confirming.as_deref() == Some(name.as_str()) {
            return Ok(false);
        }

        let definition = turn.context.resolve(&name)?.clone();
        if let Some(condition) = &definition.condition {
            if !self.evaluate_condition(&skill.handlers, condition.as_str(), turn).await? {
                debug!(
                    event_name = "runtime.parameter.skipped",
                    session_id = %turn.context.session_id,
                    parameter = %name,
                    condition = condition.as_str(),
                    "condition is false; parameter skipped"
                );
                turn.context.to_confirm.retain(|queued| queued != &name);
                return Ok(true);
            }
        }

        if !definition.sub_parameter.is_empty() && turn.context.parent_parameter.is_none() {
            turn.context.enter_sub_parameters(&name)?;
            return Ok(true);
        }

        turn.context.confirming = Some(name.clone());
        if let Some(message) = definition.message {
            turn.bot.queue(message);
        }
        debug!(
            event_name = "runtime.parameter.asked",
            session_id = %turn.context.session_id,
            parameter = %name,
            "asking for parameter"
        );
        Ok(false)
    }

    async fn evaluate_condition(
        &self,
        handlers: &HandlerRegistry,
        name: &str,
        turn: &Turn,
    ) -> Result<bool, RuntimeError> {
        let handler = handlers.condition(name).ok_or_else(|| RuntimeError::Condition {
            handler: name.to_owned(),
            message: "not registered".to_owned(),
        })?;
        handler
            .evaluate(&turn.bot, &turn.event, &turn.context)
            .await
            .map_err(|error| RuntimeError::Condition { handler: name.to_owned(), message: error.to_string() })
    }

    async fn run_hook(
        &self,
        handlers: &HandlerRegistry,
        stage: LifecycleStage,
        turn: &mut Turn,
    ) -> Result<(), RuntimeError> {
        let Some(hook) = handlers.hook(stage) else {
            return Ok(());
        };
        let stage_name = match stage {
            LifecycleStage::Begin => "begin",
            LifecycleStage::Finish => "finish",
        };

        let signal = hook
            .run(&mut turn.bot, &turn.event, &mut turn.context)
            .await
            .map_err(|error| RuntimeError::Hook { stage: stage_name.to_owned(), message: error.to_string() })?;
        turn.context.flow.raise(signal.clone())?;

        let action = match stage {
            LifecycleStage::Begin => AuditAction::BeginHookRan,
            LifecycleStage::Finish => AuditAction::FinishHookRan,
        };
        self.audit.emit(
            AuditEvent::new(&AuditScope::of_turn(turn, "turn-runner"), action)
                .with_detail("signal", format!("{signal:?}")),
        );
        Ok(())
    }
}
