use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use skillflow_core::confirmation::{BuiltinParserRegistry, HandlerRegistry};
use skillflow_core::domain::skill::{ParameterContainer, ParameterKind, Parser, SkillDefinition};
use tracing::info;

use crate::error::RuntimeError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DefinitionIssue {
    DuplicateParameter { name: String, detail: String },
    UnknownBuiltinParser { parameter: String, kind: String },
    MissingHandler { parameter: String, field: &'static str, handler: String },
}

impl fmt::Display for DefinitionIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateParameter { name, detail } => {
                write!(f, "parameter `{name}` is declared more than once ({detail})")
            }
            Self::UnknownBuiltinParser { parameter, kind } => {
                write!(f, "parameter `{parameter}` uses unknown built-in parser `{kind}`")
            }
            Self::MissingHandler { parameter, field, handler } => {
                write!(f, "parameter `{parameter}` references unregistered {field} handler `{handler}`")
            }
        }
    }
}

/// Static checks a skill must pass before it can serve turns. Handler
/// references are only checked when `handlers` is given.
pub fn definition_issues(
    definition: &SkillDefinition,
    handlers: Option<&HandlerRegistry>,
    builtins: &BuiltinParserRegistry,
) -> Vec<DefinitionIssue> {
    let mut issues = Vec::new();
    if let Err(error) = definition.validate() {
        issues.push(DefinitionIssue::DuplicateParameter {
            name: definition.name.clone(),
            detail: error.to_string(),
        });
    }

    for kind in [ParameterKind::Required, ParameterKind::Optional, ParameterKind::Dynamic] {
        if let Some(container) = definition.container(kind) {
            collect_container_issues(container, handlers, builtins, &mut issues);
        }
    }
    issues
}

fn collect_container_issues(
    container: &ParameterContainer,
    handlers: Option<&HandlerRegistry>,
    builtins: &BuiltinParserRegistry,
    issues: &mut Vec<DefinitionIssue>,
) {
    for (name, definition) in container.iter() {
        match &definition.parser {
            Some(Parser::BuiltIn(kind)) | Some(Parser::BuiltInWithPolicy { kind, .. })
                if builtins.get(kind).is_none() =>
            {
                issues.push(DefinitionIssue::UnknownBuiltinParser {
                    parameter: name.to_owned(),
                    kind: kind.clone(),
                });
            }
            _ => {}
        }

        if let Some(handlers) = handlers {
            let references = [
                (
                    "parser",
                    definition.parser.as_ref().and_then(inline_handler),
                    HandlerRegistry::has_parser as fn(&HandlerRegistry, &str) -> bool,
                ),
                ("reaction", definition.reaction.as_ref().map(|h| h.as_str()), HandlerRegistry::has_reaction),
                ("condition", definition.condition.as_ref().map(|h| h.as_str()), HandlerRegistry::has_condition),
            ];
            for (field, handler, registered) in references {
                let Some(handler) = handler else { continue };
                if !registered(handlers, handler) {
                    issues.push(DefinitionIssue::MissingHandler {
                        parameter: name.to_owned(),
                        field,
                        handler: handler.to_owned(),
                    });
                }
            }
        }

        collect_container_issues(&definition.sub_parameter, handlers, builtins, issues);
    }
}

fn inline_handler(parser: &Parser) -> Option<&str> {
    match parser {
        Parser::Inline(handler) => Some(handler.as_str()),
        _ => None,
    }
}

/// A skill definition and the handlers its definitions point at.
#[derive(Clone)]
pub struct RegisteredSkill {
    pub definition: SkillDefinition,
    pub handlers: Arc<HandlerRegistry>,
}

#[derive(Clone)]
pub struct SkillCatalog {
    skills: BTreeMap<String, RegisteredSkill>,
    builtins: Arc<BuiltinParserRegistry>,
}

impl Default for SkillCatalog {
    fn default() -> Self {
        Self::new(Arc::new(BuiltinParserRegistry::default()))
    }
}

impl SkillCatalog {
    pub fn new(builtins: Arc<BuiltinParserRegistry>) -> Self {
        Self { skills: BTreeMap::new(), builtins }
    }

    pub fn builtins(&self) -> Arc<BuiltinParserRegistry> {
        self.builtins.clone()
    }

    /// Adds or replaces a skill after checking it against its handlers.
    pub fn register(
        &mut self,
        definition: SkillDefinition,
        handlers: HandlerRegistry,
    ) -> Result<&mut Self, RuntimeError> {
        let issues = definition_issues(&definition, Some(&handlers), &self.builtins);
        if !issues.is_empty() {
            return Err(RuntimeError::InvalidSkill { skill: definition.name.clone(), issues });
        }

        info!(
            event_name = "runtime.catalog.skill_registered",
            skill = %definition.name,
            required = definition.required_parameter.len(),
            optional = definition.optional_parameter.len(),
            "skill registered"
        );
        self.skills.insert(
            definition.name.clone(),
            RegisteredSkill { definition, handlers: Arc::new(handlers) },
        );
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Result<&RegisteredSkill, RuntimeError> {
        self.skills.get(name).ok_or_else(|| RuntimeError::UnknownSkill(name.to_owned()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.skills.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.skills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map, Value};

    use skillflow_core::confirmation::{
        BuiltinParserRegistry, FnCondition, FnParser, HandlerError, HandlerRegistry,
    };
    use skillflow_core::domain::conversation::ConversationContext;
    use skillflow_core::domain::skill::{ParameterDefinition, Parser, SkillDefinition};

    use super::{definition_issues, DefinitionIssue, SkillCatalog};
    use crate::error::RuntimeError;

    fn pizza() -> SkillDefinition {
        SkillDefinition::new("order_pizza")
            .with_required(
                "size",
                ParameterDefinition::new().with_parser(Parser::with_policy("list", {
                    let mut policy = Map::new();
                    policy.insert("list".to_owned(), json!(["S", "M", "L"]));
                    policy
                })),
            )
            .with_required("address", ParameterDefinition::new().with_parser(Parser::inline("parse_address")))
            .with_optional("coupon", ParameterDefinition::new().with_condition("has_coupon"))
    }

    fn handlers() -> HandlerRegistry {
        let mut handlers = HandlerRegistry::new();
        handlers
            .register_parser(
                "parse_address",
                FnParser(|value: &Value, _: &ConversationContext| -> Result<Value, HandlerError> {
                    Ok(value.clone())
                }),
            )
            .register_condition("has_coupon", FnCondition(|_: &ConversationContext| false));
        handlers
    }

    #[test]
    fn complete_skill_registers() {
        let mut catalog = SkillCatalog::default();
        catalog.register(pizza(), handlers()).expect("register");

        assert_eq!(catalog.names().collect::<Vec<_>>(), vec!["order_pizza"]);
        assert!(catalog.get("order_pizza").is_ok());
        assert!(matches!(catalog.get("order_sushi"), Err(RuntimeError::UnknownSkill(_))));
    }

    #[test]
    fn missing_handlers_block_registration() {
        let mut catalog = SkillCatalog::default();
        let error = match catalog.register(pizza(), HandlerRegistry::new()) {
            Err(error) => error,
            Ok(_) => panic!("registration should fail"),
        };

        let RuntimeError::InvalidSkill { issues, .. } = error else {
            panic!("expected InvalidSkill");
        };
        assert_eq!(issues.len(), 2);
        assert!(issues.iter().all(|issue| matches!(issue, DefinitionIssue::MissingHandler { .. })));
        assert!(catalog.is_empty());
    }

    #[test]
    fn static_check_reports_unknown_builtins_in_sub_parameters() {
        let skill = SkillDefinition::new("delivery").with_required(
            "address",
            ParameterDefinition::new()
                .with_sub_parameter("zip", ParameterDefinition::new().with_parser(Parser::builtin("postcode"))),
        );

        let issues = definition_issues(&skill, None, &BuiltinParserRegistry::default());
        assert_eq!(
            issues,
            vec![DefinitionIssue::UnknownBuiltinParser {
                parameter: "zip".to_owned(),
                kind: "postcode".to_owned()
            }]
        );
    }
}
