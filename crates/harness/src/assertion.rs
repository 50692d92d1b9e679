//! Contract checks over a [`ResponseEnvelope`]
//!
//! Every check returns an [`AssertionResult`] instead of panicking or
//! returning an error, so one step can report all of its failures at once.
//! A body that could not be parsed is reported as its own failure reason
//! rather than as a missing field.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

use crate::context::{self, ScenarioContext};
use crate::envelope::{lookup_path, ResponseEnvelope};
use crate::error::ExtractionError;
use crate::status::StatusSet;

/// Outcome of a single check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssertionResult {
    passed: bool,
    description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    actual: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expected: Option<Value>,
}

impl AssertionResult {
    pub fn pass(description: impl Into<String>) -> Self {
        Self {
            passed: true,
            description: description.into(),
            subject: None,
            actual: None,
            expected: None,
        }
    }

    pub fn fail(description: impl Into<String>) -> Self {
        Self {
            passed: false,
            ..Self::pass(description)
        }
    }

    pub fn check(passed: bool, description: impl Into<String>) -> Self {
        if passed {
            Self::pass(description)
        } else {
            Self::fail(description)
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_actual(mut self, actual: Value) -> Self {
        self.actual = Some(actual);
        self
    }

    pub fn with_expected(mut self, expected: Value) -> Self {
        self.expected = Some(expected);
        self
    }

    pub fn passed(&self) -> bool {
        self.passed
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Field path the check looked at, if any
    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    pub fn actual(&self) -> Option<&Value> {
        self.actual.as_ref()
    }

    pub fn expected(&self) -> Option<&Value> {
        self.expected.as_ref()
    }

    /// Prefix the description, e.g. to tell two calls of a probe apart
    pub fn labelled(mut self, label: &str) -> Self {
        self.description = format!("{}: {}", label, self.description);
        self
    }

    /// Apply `f` to the actual and expected values; results without a
    /// subject are passed an empty one
    pub(crate) fn map_values(mut self, f: impl Fn(&str, Value) -> Value) -> Self {
        let subject = self.subject.clone().unwrap_or_default();
        self.actual = self.actual.map(|v| f(&subject, v));
        self.expected = self.expected.map(|v| f(&subject, v));
        self
    }
}

impl fmt::Display for AssertionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mark = if self.passed { "ok" } else { "FAILED" };
        write!(f, "{} [{}]", self.description, mark)?;
        if !self.passed {
            if let Some(expected) = &self.expected {
                write!(f, " expected {}", expected)?;
            }
            if let Some(actual) = &self.actual {
                write!(f, " got {}", actual)?;
            }
        }
        Ok(())
    }
}

/// Logical type categories used by field-type checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Number,
    #[serde(alias = "string")]
    Text,
    #[serde(alias = "bool")]
    Boolean,
    #[serde(alias = "structured_object", alias = "map")]
    Object,
    #[serde(alias = "array", alias = "list")]
    Sequence,
    Null,
}

impl ValueKind {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Number(_) => ValueKind::Number,
            Value::String(_) => ValueKind::Text,
            Value::Bool(_) => ValueKind::Boolean,
            Value::Object(_) => ValueKind::Object,
            Value::Array(_) => ValueKind::Sequence,
            Value::Null => ValueKind::Null,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKind::Number => "number",
            ValueKind::Text => "text",
            ValueKind::Boolean => "boolean",
            ValueKind::Object => "object",
            ValueKind::Sequence => "sequence",
            ValueKind::Null => "null",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// JSON equality where `50` and `50.0` are the same number
pub fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => a == b || x == y,
            _ => a == b,
        },
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(k, v)| b.get(k).is_some_and(|other| values_equal(v, other)))
        }
        _ => left == right,
    }
}

fn unparsed(envelope: &ResponseEnvelope, description: String) -> AssertionResult {
    let reason = envelope
        .parse_error()
        .map(|e| e.to_string())
        .unwrap_or_else(|| "body not parsed".to_string());
    AssertionResult::fail(description).with_actual(json!({ "unparsed": reason }))
}

fn display_path(path: &str) -> &str {
    if path.is_empty() {
        "$"
    } else {
        path
    }
}

pub fn status_in(envelope: &ResponseEnvelope, expected: &StatusSet) -> AssertionResult {
    AssertionResult::check(
        expected.contains(envelope.status()),
        format!("status in {}", expected),
    )
    .with_actual(json!(envelope.status()))
    .with_expected(json!(expected))
}

pub fn parsed(envelope: &ResponseEnvelope) -> AssertionResult {
    let description = "body is structured data".to_string();
    if envelope.is_parsed() {
        AssertionResult::pass(description)
    } else {
        unparsed(envelope, description)
    }
}

pub fn has_field(envelope: &ResponseEnvelope, path: &str, kind: Option<ValueKind>) -> AssertionResult {
    let description = match kind {
        Some(kind) => format!("'{}' is a {}", display_path(path), kind),
        None => format!("'{}' is present", display_path(path)),
    };
    let Some(body) = envelope.parsed_body() else {
        return unparsed(envelope, description).with_subject(path);
    };

    let result = match lookup_path(body, path) {
        None => AssertionResult::fail(description).with_actual(Value::Null),
        Some(value) => match kind {
            Some(kind) => AssertionResult::check(ValueKind::of(value) == kind, description)
                .with_actual(json!(ValueKind::of(value)))
                .with_expected(json!(kind)),
            None => AssertionResult::pass(description),
        },
    };
    result.with_subject(path)
}

pub fn field_equals(envelope: &ResponseEnvelope, path: &str, expected: &Value) -> AssertionResult {
    let description = format!("'{}' equals {}", display_path(path), expected);
    let Some(body) = envelope.parsed_body() else {
        return unparsed(envelope, description)
            .with_subject(path)
            .with_expected(expected.clone());
    };

    let actual = lookup_path(body, path);
    AssertionResult::check(actual.is_some_and(|a| values_equal(a, expected)), description)
        .with_subject(path)
        .with_actual(actual.cloned().unwrap_or(Value::Null))
        .with_expected(expected.clone())
}

/// Every element of the sequence at `at` satisfies `predicate`.
///
/// The failing indices are reported as the actual value. An empty sequence
/// passes.
pub fn all_items_satisfy<F>(envelope: &ResponseEnvelope, at: &str, description: &str, predicate: F) -> AssertionResult
where
    F: Fn(&Value) -> bool,
{
    let description = format!("every item of '{}' {}", display_path(at), description);
    let Some(body) = envelope.parsed_body() else {
        return unparsed(envelope, description);
    };

    match lookup_path(body, at) {
        Some(Value::Array(items)) => {
            let failing: Vec<usize> = items
                .iter()
                .enumerate()
                .filter(|(_, item)| !predicate(item))
                .map(|(i, _)| i)
                .collect();
            if failing.is_empty() {
                AssertionResult::pass(description)
            } else {
                AssertionResult::fail(description).with_actual(json!({ "failing_indices": failing }))
            }
        }
        other => AssertionResult::fail(description)
            .with_actual(json!(other.map(ValueKind::of).map(|k| k.as_str()).unwrap_or("missing")))
            .with_expected(json!(ValueKind::Sequence)),
    }
}

/// The whole parsed body equals `other`, typically another envelope's body
pub fn body_equals(envelope: &ResponseEnvelope, other: Option<&Value>) -> AssertionResult {
    let description = "body equals reference".to_string();
    let Some(body) = envelope.parsed_body() else {
        return unparsed(envelope, description);
    };
    match other {
        Some(other) => AssertionResult::check(values_equal(body, other), description)
            .with_actual(body.clone())
            .with_expected(other.clone()),
        None => AssertionResult::fail(description).with_expected(Value::Null),
    }
}

/// Length of the sequence, text or object at `path` lies in `[min, max]`
pub fn length_within(envelope: &ResponseEnvelope, path: &str, min: Option<usize>, max: Option<usize>) -> AssertionResult {
    let bounds = match (min, max) {
        (Some(lo), Some(hi)) => format!("between {} and {}", lo, hi),
        (Some(lo), None) => format!("at least {}", lo),
        (None, Some(hi)) => format!("at most {}", hi),
        (None, None) => "any".to_string(),
    };
    let description = format!("length of '{}' is {}", display_path(path), bounds);
    let Some(body) = envelope.parsed_body() else {
        return unparsed(envelope, description).with_subject(path);
    };

    let len = match lookup_path(body, path) {
        Some(Value::Array(items)) => Some(items.len()),
        Some(Value::Object(map)) => Some(map.len()),
        Some(Value::String(text)) => Some(text.chars().count()),
        _ => None,
    };
    match len {
        Some(len) => {
            let ok = min.map_or(true, |lo| len >= lo) && max.map_or(true, |hi| len <= hi);
            AssertionResult::check(ok, description)
                .with_subject(path)
                .with_actual(json!(len))
        }
        None => AssertionResult::fail(description)
            .with_subject(path)
            .with_actual(Value::Null),
    }
}

/// Text field at `path` has at least `min` characters
pub fn text_min_length(envelope: &ResponseEnvelope, path: &str, min: usize) -> AssertionResult {
    let description = format!("'{}' is text of at least {} chars", display_path(path), min);
    let Some(body) = envelope.parsed_body() else {
        return unparsed(envelope, description).with_subject(path);
    };

    match lookup_path(body, path) {
        Some(Value::String(text)) => {
            let len = text.chars().count();
            AssertionResult::check(len >= min, description)
                .with_subject(path)
                .with_actual(json!(len))
        }
        other => AssertionResult::fail(description)
            .with_subject(path)
            .with_actual(json!(other.map(ValueKind::of))),
    }
}

pub fn field_contains(envelope: &ResponseEnvelope, path: &str, needle: &str) -> AssertionResult {
    let description = format!("'{}' contains \"{}\"", display_path(path), needle);
    let Some(body) = envelope.parsed_body() else {
        return unparsed(envelope, description).with_subject(path);
    };

    let actual = lookup_path(body, path);
    let ok = matches!(actual, Some(Value::String(text)) if text.contains(needle));
    AssertionResult::check(ok, description)
        .with_subject(path)
        .with_actual(actual.cloned().unwrap_or(Value::Null))
}

/// Substring search over the raw body; works for unparsed error bodies too.
///
/// The parsed body is reported as the actual value so it can be redacted;
/// raw text is never copied into the result.
pub fn body_contains(envelope: &ResponseEnvelope, needle: &str) -> AssertionResult {
    let text = envelope.body_text();
    let actual = match envelope.parsed_body() {
        Some(body) => body.clone(),
        None => json!({ "unparsed_chars": text.chars().count() }),
    };
    AssertionResult::check(text.contains(needle), format!("raw body contains \"{}\"", needle)).with_actual(actual)
}

pub fn header_contains(envelope: &ResponseEnvelope, name: &str, needle: &str) -> AssertionResult {
    let actual = envelope.header(name);
    AssertionResult::check(
        actual.is_some_and(|value| value.contains(needle)),
        format!("header '{}' contains \"{}\"", name, needle),
    )
    .with_actual(json!(actual))
}

/// Condition each element must meet in [`Check::AllItems`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemPredicate {
    pub field: String,
    #[serde(default)]
    pub kind: Option<ValueKind>,
    #[serde(default)]
    pub equals: Option<Value>,
}

impl ItemPredicate {
    pub fn holds(&self, item: &Value) -> bool {
        let Some(value) = lookup_path(item, &self.field) else {
            return false;
        };
        self.kind.map_or(true, |kind| ValueKind::of(value) == kind)
            && self.equals.as_ref().map_or(true, |expected| values_equal(value, expected))
    }

    fn describe(&self) -> String {
        let mut parts = vec![format!("has '{}'", self.field)];
        if let Some(kind) = self.kind {
            parts.push(format!("of type {}", kind));
        }
        if let Some(expected) = &self.equals {
            parts.push(format!("equal to {}", expected));
        }
        parts.join(" ")
    }
}

/// Declarative form of the checks above, as written in definition files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum Check {
    Status {
        #[serde(rename = "in")]
        expected: StatusSet,
    },
    Parsed,
    HasField {
        path: String,
        #[serde(default)]
        kind: Option<ValueKind>,
    },
    FieldEquals {
        path: String,
        value: Value,
    },
    AllItems {
        #[serde(default)]
        at: String,
        items: Vec<ItemPredicate>,
    },
    BodyEquals {
        value: Value,
    },
    Length {
        #[serde(default)]
        path: String,
        #[serde(default)]
        min: Option<usize>,
        #[serde(default)]
        max: Option<usize>,
    },
    TextMinLength {
        path: String,
        min: usize,
    },
    FieldContains {
        path: String,
        text: String,
    },
    BodyContains {
        text: String,
    },
    HeaderContains {
        name: String,
        text: String,
    },
}

impl Check {
    pub fn evaluate(&self, envelope: &ResponseEnvelope) -> AssertionResult {
        match self {
            Check::Status { expected } => status_in(envelope, expected),
            Check::Parsed => parsed(envelope),
            Check::HasField { path, kind } => has_field(envelope, path, *kind),
            Check::FieldEquals { path, value } => field_equals(envelope, path, value),
            Check::AllItems { at, items } => {
                let description = items
                    .iter()
                    .map(ItemPredicate::describe)
                    .collect::<Vec<_>>()
                    .join(", ");
                all_items_satisfy(envelope, at, &description, |item| {
                    items.iter().all(|p| p.holds(item))
                })
            }
            Check::BodyEquals { value } => body_equals(envelope, Some(value)),
            Check::Length { path, min, max } => length_within(envelope, path, *min, *max),
            Check::TextMinLength { path, min } => text_min_length(envelope, path, *min),
            Check::FieldContains { path, text } => field_contains(envelope, path, text),
            Check::BodyContains { text } => body_contains(envelope, text),
            Check::HeaderContains { name, text } => header_contains(envelope, name, text),
        }
    }

    /// Copy of this check with `{{var}}` placeholders in its expectations filled in
    pub fn resolve(&self, ctx: &ScenarioContext) -> Result<Check, ExtractionError> {
        Ok(match self {
            Check::FieldEquals { path, value } => Check::FieldEquals {
                path: path.clone(),
                value: ctx.substitute_value(value)?,
            },
            Check::BodyEquals { value } => Check::BodyEquals {
                value: ctx.substitute_value(value)?,
            },
            Check::AllItems { at, items } => Check::AllItems {
                at: at.clone(),
                items: items
                    .iter()
                    .map(|p| -> Result<ItemPredicate, ExtractionError> {
                        Ok(ItemPredicate {
                            field: p.field.clone(),
                            kind: p.kind,
                            equals: p.equals.as_ref().map(|v| ctx.substitute_value(v)).transpose()?,
                        })
                    })
                    .collect::<Result<_, ExtractionError>>()?,
            },
            Check::FieldContains { path, text } => Check::FieldContains {
                path: path.clone(),
                text: ctx.substitute_str(text)?,
            },
            Check::BodyContains { text } => Check::BodyContains {
                text: ctx.substitute_str(text)?,
            },
            Check::HeaderContains { name, text } => Check::HeaderContains {
                name: name.clone(),
                text: ctx.substitute_str(text)?,
            },
            other => other.clone(),
        })
    }

    /// Context variables this check refers to
    pub fn references(&self) -> Vec<String> {
        match self {
            Check::FieldEquals { value, .. } | Check::BodyEquals { value } => {
                context::placeholders_in_value(value)
            }
            Check::AllItems { items, .. } => items
                .iter()
                .filter_map(|p| p.equals.as_ref())
                .flat_map(context::placeholders_in_value)
                .collect(),
            Check::FieldContains { text, .. }
            | Check::BodyContains { text }
            | Check::HeaderContains { text, .. } => context::placeholders_in_str(text),
            _ => Vec::new(),
        }
    }
}
