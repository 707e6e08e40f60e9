use std::fs;
use std::path::Path;

use anyhow::Context;
use serde_json::json;
use skillflow_agent::definition_issues;
use skillflow_core::confirmation::BuiltinParserRegistry;
use skillflow_core::domain::skill::SkillDefinition;

use crate::commands::CommandResult;

/// Reads a skill file; `.json` is parsed as JSON, anything else as TOML.
pub fn load_definition(path: &Path) -> anyhow::Result<SkillDefinition> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("could not read skill file `{}`", path.display()))?;

    let definition = match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => serde_json::from_str(&raw)
            .with_context(|| format!("`{}` is not a valid JSON skill definition", path.display()))?,
        _ => toml::from_str(&raw)
            .with_context(|| format!("`{}` is not a valid TOML skill definition", path.display()))?,
    };
    Ok(definition)
}

/// Static check only: handler names are not resolved because handlers live
/// in the embedding application, not in the file.
pub fn check(path: &Path) -> CommandResult {
    let definition = match load_definition(path) {
        Ok(definition) => definition,
        Err(error) => {
            return CommandResult::failure("skill check", "skill_load", format!("{error:#}"), 2);
        }
    };

    let issues = definition_issues(&definition, None, &BuiltinParserRegistry::default());
    if !issues.is_empty() {
        let details = issues.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ");
        return CommandResult::failure(
            "skill check",
            "skill_definition",
            format!("skill `{}` has {} issue(s): {details}", definition.name, issues.len()),
            6,
        );
    }

    CommandResult::success_with_data(
        "skill check",
        format!("skill `{}` is valid", definition.name),
        json!({
            "skill": definition.name,
            "required": definition.required_parameter.names().collect::<Vec<_>>(),
            "optional": definition.optional_parameter.names().collect::<Vec<_>>(),
            "dynamic": definition.dynamic_parameter.names().collect::<Vec<_>>(),
        }),
    )
}
