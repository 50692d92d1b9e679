//! Per-scenario variable store and `{{var}}` templating

use rand::Rng;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::ExtractionError;

/// Names generated fresh on every substitution
pub const BUILTINS: [&str; 3] = ["$uuid", "$random", "$timestamp"];

/// Values extracted by earlier steps, owned by exactly one scenario run
#[derive(Debug, Clone, Default)]
pub struct ScenarioContext {
    vars: BTreeMap<String, Value>,
}

impl ScenarioContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seeded(vars: BTreeMap<String, Value>) -> Self {
        Self { vars }
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.vars.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    pub fn vars(&self) -> &BTreeMap<String, Value> {
        &self.vars
    }

    fn resolve(&self, name: &str) -> Result<Value, ExtractionError> {
        match name {
            "$uuid" => Ok(Value::String(uuid::Uuid::new_v4().to_string())),
            "$random" => Ok(Value::from(rand::thread_rng().gen_range(0..1000u32))),
            "$timestamp" => Ok(Value::from(chrono::Utc::now().timestamp())),
            _ => self
                .vars
                .get(name)
                .cloned()
                .ok_or_else(|| ExtractionError::UnsetVariable {
                    name: name.to_string(),
                }),
        }
    }

    /// Replace every placeholder in `text` with the textual form of its value
    pub fn substitute_str(&self, text: &str) -> Result<String, ExtractionError> {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        while let Some((before, name, after)) = split_placeholder(rest) {
            out.push_str(before);
            match self.resolve(name)? {
                Value::String(s) => out.push_str(&s),
                other => out.push_str(&other.to_string()),
            }
            rest = after;
        }
        out.push_str(rest);
        Ok(out)
    }

    /// Substitute recursively. A string that is exactly one placeholder
    /// takes the stored value with its original type.
    pub fn substitute_value(&self, value: &Value) -> Result<Value, ExtractionError> {
        match value {
            Value::String(text) => match whole_placeholder(text) {
                Some(name) => self.resolve(name),
                None => self.substitute_str(text).map(Value::String),
            },
            Value::Array(items) => items
                .iter()
                .map(|item| self.substitute_value(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Value::Object(map) => {
                let mut out = serde_json::Map::with_capacity(map.len());
                for (key, item) in map {
                    out.insert(key.clone(), self.substitute_value(item)?);
                }
                Ok(Value::Object(out))
            }
            other => Ok(other.clone()),
        }
    }
}

fn split_placeholder(text: &str) -> Option<(&str, &str, &str)> {
    let start = text.find("{{")?;
    let end = text[start + 2..].find("}}")? + start + 2;
    Some((&text[..start], text[start + 2..end].trim(), &text[end + 2..]))
}

fn whole_placeholder(text: &str) -> Option<&str> {
    let (before, name, after) = split_placeholder(text)?;
    (before.is_empty() && after.is_empty()).then_some(name)
}

/// Variable names referenced in `text`, builtins excluded
pub fn placeholders_in_str(text: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut rest = text;
    while let Some((_, name, after)) = split_placeholder(rest) {
        if !BUILTINS.contains(&name) {
            names.push(name.to_string());
        }
        rest = after;
    }
    names
}

pub fn placeholders_in_value(value: &Value) -> Vec<String> {
    match value {
        Value::String(text) => placeholders_in_str(text),
        Value::Array(items) => items.iter().flat_map(placeholders_in_value).collect(),
        Value::Object(map) => map.values().flat_map(placeholders_in_value).collect(),
        _ => Vec::new(),
    }
}
