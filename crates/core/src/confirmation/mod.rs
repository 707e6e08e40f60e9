//! Parameter confirmation: lookup, queueing, parsing and reactions.

pub mod builtin;
pub mod changelog;
pub mod engine;
pub mod handlers;
pub mod queue;
pub mod registry;

pub use builtin::{BuiltinParser, BuiltinParserRegistry, POLICY_PARAMETER_NAME};
pub use changelog::ParamChangeRecord;
pub use engine::{
    ApplyOptions, ApplyOutcome, ConfirmationEngine, ConfirmationError, ReactionOutcome,
};
pub use handlers::{
    ConditionHandler, FnCondition, FnHook, FnParser, FnReaction, HandlerError, HandlerRegistry,
    LifecycleHook, LifecycleStage, ParserHandler, ReactionHandler, Rejection,
};
pub use queue::{EnqueueArg, EnqueueOptions};
