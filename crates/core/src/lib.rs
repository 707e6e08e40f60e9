pub mod audit;
pub mod config;
pub mod confirmation;
pub mod domain;
pub mod errors;
pub mod flows;

pub use confirmation::{
    ApplyOptions, ApplyOutcome, BuiltinParserRegistry, ConfirmationEngine, ConfirmationError,
    EnqueueArg, EnqueueOptions, HandlerError, HandlerRegistry, LifecycleStage, ParamChangeRecord,
    ReactionOutcome, Rejection,
};
pub use domain::conversation::{ConversationContext, ParentParameter, PreviousParameters};
pub use domain::event::{Bot, Event, EventKind, Intent, Turn};
pub use domain::skill::{
    DefinitionError, HandlerRef, ListPolicy, ParameterContainer, ParameterDefinition,
    ParameterKind, Parser, SkillDefinition,
};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use flows::{FlowError, FlowFlags, FlowSignal};
