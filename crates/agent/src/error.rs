use thiserror::Error;

use skillflow_core::confirmation::ConfirmationError;
use skillflow_core::domain::skill::DefinitionError;
use skillflow_core::errors::{ApplicationError, DomainError};
use skillflow_core::flows::FlowError;
use skillflow_db::RepositoryError;

use crate::catalog::DefinitionIssue;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("skill `{0}` is not registered")]
    UnknownSkill(String),
    #[error("session `{session_id}` has no active skill and no intent was supplied")]
    NoActiveSkill { session_id: String },
    #[error("skill `{skill}` failed validation: {}", format_issues(.issues))]
    InvalidSkill { skill: String, issues: Vec<DefinitionIssue> },
    #[error("{stage} hook failed: {message}")]
    Hook { stage: String, message: String },
    #[error("condition `{handler}` failed: {message}")]
    Condition { handler: String, message: String },
    #[error("skill switch limit of {0} reached within one turn")]
    SwitchLimit(usize),
    #[error(transparent)]
    Confirmation(#[from] ConfirmationError),
    #[error(transparent)]
    Definition(#[from] DefinitionError),
    #[error(transparent)]
    Flow(#[from] FlowError),
    #[error(transparent)]
    Store(#[from] RepositoryError),
}

fn format_issues(issues: &[DefinitionIssue]) -> String {
    issues.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

impl From<RuntimeError> for ApplicationError {
    fn from(value: RuntimeError) -> Self {
        match value {
            RuntimeError::Confirmation(error) => Self::Domain(DomainError::Confirmation(error)),
            RuntimeError::Definition(error) => Self::Domain(DomainError::Definition(error)),
            RuntimeError::Flow(error) => Self::Domain(DomainError::Flow(error)),
            RuntimeError::Store(error) => Self::Persistence(error.to_string()),
            RuntimeError::Hook { .. } | RuntimeError::Condition { .. } => {
                Self::Handler(value.to_string())
            }
            RuntimeError::NoActiveSkill { .. } | RuntimeError::SwitchLimit(_) => {
                Self::Domain(DomainError::InvariantViolation(value.to_string()))
            }
            RuntimeError::UnknownSkill(_) | RuntimeError::InvalidSkill { .. } => {
                Self::Configuration(value.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use skillflow_core::errors::{ApplicationError, DomainError};

    use super::RuntimeError;
    use crate::catalog::DefinitionIssue;

    #[test]
    fn runtime_errors_land_in_application_layers() {
        let unknown = ApplicationError::from(RuntimeError::UnknownSkill("order_sushi".to_owned()));
        assert!(matches!(unknown, ApplicationError::Configuration(message) if message.contains("order_sushi")));

        let hook = ApplicationError::from(RuntimeError::Hook {
            stage: "finish".to_owned(),
            message: "boom".to_owned(),
        });
        assert!(matches!(hook, ApplicationError::Handler(_)));

        let limit = ApplicationError::from(RuntimeError::SwitchLimit(4));
        assert!(matches!(limit, ApplicationError::Domain(DomainError::InvariantViolation(_))));
    }

    #[test]
    fn invalid_skill_lists_every_issue() {
        let error = RuntimeError::InvalidSkill {
            skill: "signup".to_owned(),
            issues: vec![
                DefinitionIssue::UnknownBuiltinParser {
                    parameter: "phone".to_owned(),
                    kind: "phone_number".to_owned(),
                },
                DefinitionIssue::MissingHandler {
                    parameter: "email".to_owned(),
                    field: "reaction",
                    handler: "on_email".to_owned(),
                },
            ],
        };

        let message = error.to_string();
        assert!(message.starts_with("skill `signup` failed validation"));
        assert!(message.contains("phone_number"));
        assert!(message.contains("on_email"));
    }
}
