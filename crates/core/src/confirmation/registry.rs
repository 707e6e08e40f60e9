use crate::confirmation::engine::ConfirmationError;
use crate::domain::conversation::ConversationContext;
use crate::domain::skill::{ParameterDefinition, ParameterKind};

const TOP_LEVEL: [ParameterKind; 3] =
    [ParameterKind::Required, ParameterKind::Optional, ParameterKind::Dynamic];

impl ConversationContext {
    /// Lookup order: required, optional, dynamic, then the active parent's
    /// sub parameters.
    pub fn classify(&self, name: &str) -> ParameterKind {
        for kind in TOP_LEVEL {
            if self.skill.container(kind).is_some_and(|container| container.contains(name)) {
                return kind;
            }
        }

        if self.parent_definition().is_some_and(|parent| parent.sub_parameter.contains(name)) {
            return ParameterKind::Sub;
        }

        ParameterKind::NotApplicable
    }

    pub fn resolve(&self, name: &str) -> Result<&ParameterDefinition, ConfirmationError> {
        let definition = match self.classify(name) {
            ParameterKind::NotApplicable => None,
            ParameterKind::Sub => {
                self.parent_definition().and_then(|parent| parent.sub_parameter.get(name))
            }
            kind => self.skill.container(kind).and_then(|container| container.get(name)),
        };

        definition.ok_or_else(|| ConfirmationError::ParameterNotFound { parameter: name.to_owned() })
    }

    pub(crate) fn parent_definition(&self) -> Option<&ParameterDefinition> {
        let parent = self.parent_parameter.as_ref()?;
        self.skill.container(parent.kind)?.get(&parent.name)
    }
}
