use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use skillflow_core::config::{AppConfig, LoadOptions};
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let fields = [
        ("database.url", config.database.url.clone(), &["SKILLFLOW_DATABASE_URL"][..]),
        (
            "database.max_connections",
            config.database.max_connections.to_string(),
            &["SKILLFLOW_DATABASE_MAX_CONNECTIONS"][..],
        ),
        (
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            &["SKILLFLOW_DATABASE_TIMEOUT_SECS"][..],
        ),
        (
            "runtime.max_confirmations_per_turn",
            config.runtime.max_confirmations_per_turn.to_string(),
            &["SKILLFLOW_RUNTIME_MAX_CONFIRMATIONS_PER_TURN"][..],
        ),
        (
            "runtime.dedup_queue",
            config.runtime.dedup_queue.to_string(),
            &["SKILLFLOW_RUNTIME_DEDUP_QUEUE"][..],
        ),
        (
            "runtime.strict_parsing",
            config.runtime.strict_parsing.to_string(),
            &["SKILLFLOW_RUNTIME_STRICT_PARSING"][..],
        ),
        (
            "logging.level",
            config.logging.level.clone(),
            &["SKILLFLOW_LOGGING_LEVEL", "SKILLFLOW_LOG_LEVEL"][..],
        ),
        (
            "logging.format",
            format!("{:?}", config.logging.format),
            &["SKILLFLOW_LOGGING_FORMAT", "SKILLFLOW_LOG_FORMAT"][..],
        ),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key, value, env_keys) in fields {
        let source =
            field_source(key, env_keys, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(key, &value, source));
    }
    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    ["skillflow.toml", "config/skillflow.toml"].into_iter().map(PathBuf::from).find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let raw = fs::read_to_string(path?).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}
