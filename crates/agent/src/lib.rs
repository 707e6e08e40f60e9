//! Turn orchestration for skill-based conversations.
//!
//! The core crate knows how to confirm one parameter. This crate drives a
//! whole turn around it:
//! 1. **Rehydration** (`runtime`) - load the stored context and replay its
//!    change log onto the catalog's pristine skill definition
//! 2. **Confirmation** - apply the inbound value to the parameter being
//!    confirmed, honouring flow flags raised by reactions
//! 3. **Advancement** - dequeue the next parameter, skipping those whose
//!    condition is false, and queue its prompt
//! 4. **Persistence** - save the context, or drop it once the skill finishes
//!
//! # Key Types
//!
//! - `SkillCatalog` - skill definitions paired with their handlers
//! - `TurnRunner` - the orchestrator, generic over the `ContextStore`
//! - `TurnReport` - outbound messages and where the conversation stands

pub mod catalog;
pub mod error;
pub mod runtime;

pub use catalog::{definition_issues, DefinitionIssue, RegisteredSkill, SkillCatalog};
pub use error::RuntimeError;
pub use runtime::{RuntimeSettings, TurnReport, TurnRunner, TurnStatus};
