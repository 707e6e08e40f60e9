use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::{Map, Value};

use crate::confirmation::handlers::{HandlerError, Rejection};

pub const POLICY_PARAMETER_NAME: &str = "parameter_name";

/// Parser shipped with the runtime, selected by name from a definition.
/// `policy` always carries `parameter_name`.
#[async_trait]
pub trait BuiltinParser: Send + Sync {
    fn kind(&self) -> &'static str;
    async fn parse(&self, value: &Value, policy: &Map<String, Value>) -> Result<Value, HandlerError>;
}

#[derive(Clone)]
pub struct BuiltinParserRegistry {
    parsers: HashMap<String, Arc<dyn BuiltinParser>>,
}

impl Default for BuiltinParserRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(StringParser);
        registry.register(NumberParser);
        registry.register(EmailParser);
        registry.register(ListParser);
        registry
    }
}

impl BuiltinParserRegistry {
    pub fn empty() -> Self {
        Self { parsers: HashMap::new() }
    }

    pub fn register<P>(&mut self, parser: P)
    where
        P: BuiltinParser + 'static,
    {
        self.parsers.insert(parser.kind().to_owned(), Arc::new(parser));
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn BuiltinParser>> {
        self.parsers.get(kind).cloned()
    }

    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds = self.parsers.keys().map(String::as_str).collect::<Vec<_>>();
        kinds.sort_unstable();
        kinds
    }
}

fn parameter_name(policy: &Map<String, Value>) -> &str {
    policy.get(POLICY_PARAMETER_NAME).and_then(Value::as_str).unwrap_or_default()
}

fn reject(policy: &Map<String, Value>, code: &str, message: impl Into<String>) -> HandlerError {
    HandlerError::Rejected(Rejection::new(parameter_name(policy), code, message))
}

fn text_of<'a>(value: &'a Value, policy: &Map<String, Value>) -> Result<&'a str, HandlerError> {
    match value {
        Value::String(text) if !text.trim().is_empty() => Ok(text.trim()),
        Value::Null | Value::String(_) => Err(reject(policy, "value_not_set", "value is not set")),
        _ => Err(reject(policy, "not_text", "value must be text")),
    }
}

fn decimal_of(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(number) => Decimal::from_str(&number.to_string()).ok(),
        Value::String(text) => Decimal::from_str(text.trim().replace(',', "").as_str()).ok(),
        _ => None,
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct StringParser;

#[async_trait]
impl BuiltinParser for StringParser {
    fn kind(&self) -> &'static str {
        "string"
    }

    async fn parse(&self, value: &Value, policy: &Map<String, Value>) -> Result<Value, HandlerError> {
        let text = text_of(value, policy)?;
        let length = text.chars().count() as u64;

        if let Some(min) = policy.get("min").and_then(Value::as_u64) {
            if length < min {
                return Err(reject(policy, "too_short", format!("must be at least {min} characters")));
            }
        }
        if let Some(max) = policy.get("max").and_then(Value::as_u64) {
            if length > max {
                return Err(reject(policy, "too_long", format!("must be at most {max} characters")));
            }
        }
        if let Some(Value::Array(excluded)) = policy.get("exclude") {
            if excluded.iter().filter_map(Value::as_str).any(|word| word == text) {
                return Err(reject(policy, "excluded", format!("`{text}` is not accepted")));
            }
        }

        Ok(Value::String(text.to_owned()))
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NumberParser;

#[async_trait]
impl BuiltinParser for NumberParser {
    fn kind(&self) -> &'static str {
        "number"
    }

    async fn parse(&self, value: &Value, policy: &Map<String, Value>) -> Result<Value, HandlerError> {
        if value.is_null() || value.as_str().is_some_and(|text| text.trim().is_empty()) {
            return Err(reject(policy, "value_not_set", "value is not set"));
        }
        let number =
            decimal_of(value).ok_or_else(|| reject(policy, "not_a_number", "value must be a number"))?;

        if let Some(min) = policy.get("min").and_then(decimal_of) {
            if number < min {
                return Err(reject(policy, "below_min", format!("must be at least {min}")));
            }
        }
        if let Some(max) = policy.get("max").and_then(decimal_of) {
            if number > max {
                return Err(reject(policy, "above_max", format!("must be at most {max}")));
            }
        }

        let normalized = number.normalize();
        match normalized.fract().is_zero().then(|| normalized.to_i64()).flatten() {
            Some(whole) => Ok(Value::from(whole)),
            None => Ok(Value::String(normalized.to_string())),
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct EmailParser;

#[async_trait]
impl BuiltinParser for EmailParser {
    fn kind(&self) -> &'static str {
        "email"
    }

    async fn parse(&self, value: &Value, policy: &Map<String, Value>) -> Result<Value, HandlerError> {
        let text = text_of(value, policy)?;
        let invalid = || reject(policy, "invalid_email", format!("`{text}` is not an email address"));

        if text.chars().any(char::is_whitespace) {
            return Err(invalid());
        }
        let Some((local, domain)) = text.split_once('@') else {
            return Err(invalid());
        };
        let domain_ok = domain.contains('.')
            && !domain.starts_with('.')
            && !domain.ends_with('.')
            && !domain.contains('@');
        if local.is_empty() || !domain_ok {
            return Err(invalid());
        }

        Ok(Value::String(format!("{local}@{}", domain.to_ascii_lowercase())))
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ListParser;

#[async_trait]
impl BuiltinParser for ListParser {
    fn kind(&self) -> &'static str {
        "list"
    }

    async fn parse(&self, value: &Value, policy: &Map<String, Value>) -> Result<Value, HandlerError> {
        let Some(Value::Array(accepted)) = policy.get("list") else {
            return Err(HandlerError::defect("list parser requires an array `policy.list`"));
        };
        let text = text_of(value, policy)?;

        accepted
            .iter()
            .filter_map(Value::as_str)
            .find(|candidate| candidate.eq_ignore_ascii_case(text))
            .map(|candidate| Value::String(candidate.to_owned()))
            .ok_or_else(|| reject(policy, "not_in_list", format!("`{text}` is not one of the options")))
    }
}
