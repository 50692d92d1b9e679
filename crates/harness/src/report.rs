//! Step, scenario and suite reports

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::assertion::AssertionResult;
use crate::error::ParseError;
use crate::probe::{IdempotencyReport, RateLimitReport};
use crate::scenario::ScenarioStep;
use crate::transport::Method;

/// Lifecycle of one scenario run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ScenarioState {
    Pending,
    Running { step_index: usize },
    Completed,
    Failed { step_index: usize },
}

impl fmt::Display for ScenarioState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScenarioState::Pending => write!(f, "PENDING"),
            ScenarioState::Running { step_index } => write!(f, "RUNNING({})", step_index),
            ScenarioState::Completed => write!(f, "COMPLETED"),
            ScenarioState::Failed { step_index } => write!(f, "FAILED({})", step_index),
        }
    }
}

/// Reason code attached to a failed step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    AssertionFailure,
    ExtractionError,
    Transport,
    Timeout,
    Cancelled,
}

impl FailureReason {
    /// Whether the scenario stops issuing steps, independent or not
    pub fn halts(&self) -> bool {
        !matches!(self, FailureReason::AssertionFailure)
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            FailureReason::AssertionFailure => "AssertionFailure",
            FailureReason::ExtractionError => "ExtractionError",
            FailureReason::Transport => "TransportError",
            FailureReason::Timeout => "Timeout",
            FailureReason::Cancelled => "Cancelled",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum StepStatus {
    Passed,
    Failed(FailureReason),
    Skipped,
}

/// What happened to one step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOutcome {
    pub index: usize,
    pub name: String,
    pub method: Method,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    pub duration_ms: u64,
    #[serde(default)]
    pub assertions: Vec<AssertionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parse_error: Option<ParseError>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extracted: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepOutcome {
    pub fn new(index: usize, step: &ScenarioStep, status: StepStatus) -> Self {
        Self {
            index,
            name: step.name.clone(),
            method: step.request.method,
            url: None,
            status,
            http_status: None,
            duration_ms: 0,
            assertions: Vec::new(),
            parse_error: None,
            extracted: BTreeMap::new(),
            error: None,
        }
    }

    pub fn skipped(index: usize, step: &ScenarioStep, why: &str) -> Self {
        Self {
            error: Some(why.to_string()),
            ..Self::new(index, step, StepStatus::Skipped)
        }
    }

    pub fn failed(index: usize, step: &ScenarioStep, reason: FailureReason, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(index, step, StepStatus::Failed(reason))
        }
    }

    pub fn passed(&self) -> bool {
        self.status == StepStatus::Passed
    }

    pub fn failure_reason(&self) -> Option<FailureReason> {
        match self.status {
            StepStatus::Failed(reason) => Some(reason),
            _ => None,
        }
    }
}

/// Every step outcome and assertion of one scenario run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioReport {
    pub name: String,
    pub state: ScenarioState,
    pub duration_ms: u64,
    pub steps: Vec<StepOutcome>,
}

impl ScenarioReport {
    pub fn passed(&self) -> bool {
        self.state == ScenarioState::Completed
    }

    pub fn failed_assertions(&self) -> impl Iterator<Item = (&StepOutcome, &AssertionResult)> {
        self.steps
            .iter()
            .flat_map(|step| step.assertions.iter().map(move |a| (step, a)))
            .filter(|(_, a)| !a.passed())
    }

    pub fn step(&self, name: &str) -> Option<&StepOutcome> {
        self.steps.iter().find(|s| s.name == name)
    }
}

/// Report of any runnable definition
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DefinitionReport {
    Scenario(ScenarioReport),
    Idempotency(IdempotencyReport),
    RateLimit(RateLimitReport),
}

impl DefinitionReport {
    pub fn name(&self) -> &str {
        match self {
            DefinitionReport::Scenario(r) => &r.name,
            DefinitionReport::Idempotency(r) => &r.name,
            DefinitionReport::RateLimit(r) => &r.name,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            DefinitionReport::Scenario(_) => "scenario",
            DefinitionReport::Idempotency(_) => "idempotency",
            DefinitionReport::RateLimit(_) => "rate_limit",
        }
    }

    pub fn passed(&self) -> bool {
        match self {
            DefinitionReport::Scenario(r) => r.passed(),
            DefinitionReport::Idempotency(r) => r.passed,
            DefinitionReport::RateLimit(r) => r.passed,
        }
    }

    pub fn duration_ms(&self) -> u64 {
        match self {
            DefinitionReport::Scenario(r) => r.duration_ms,
            DefinitionReport::Idempotency(r) => r.duration_ms,
            DefinitionReport::RateLimit(r) => r.duration_ms,
        }
    }

    /// One-line reason for a failed definition
    pub fn summary(&self) -> String {
        match self {
            DefinitionReport::Scenario(r) => match r.state {
                ScenarioState::Failed { step_index } => {
                    let failures = r.failed_assertions().count();
                    match r.steps.get(step_index) {
                        Some(step) => format!(
                            "step '{}' failed ({}), {} failed assertion(s)",
                            step.name,
                            step.failure_reason()
                                .map(|reason| reason.to_string())
                                .unwrap_or_default(),
                            failures
                        ),
                        None => format!("{} failed assertion(s)", failures),
                    }
                }
                state => state.to_string(),
            },
            DefinitionReport::Idempotency(r) => match &r.error {
                Some(error) => error.clone(),
                None => format!(
                    "{} of {} assertion(s) passed",
                    r.assertions.iter().filter(|a| a.passed()).count(),
                    r.assertions.len()
                ),
            },
            DefinitionReport::RateLimit(r) => match &r.error {
                Some(error) => error.clone(),
                None => format!(
                    "{} expected, {} degraded, {} unexpected (offending attempts: {:?})",
                    r.expected, r.degraded, r.unexpected, r.offending
                ),
            },
        }
    }
}

/// Result of running a set of definitions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteReport {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub duration_ms: u64,
    pub started_at: DateTime<Utc>,
    pub results: Vec<DefinitionReport>,
}

impl SuiteReport {
    pub fn from_results(results: Vec<DefinitionReport>, started_at: DateTime<Utc>, duration_ms: u64) -> Self {
        let passed = results.iter().filter(|r| r.passed()).count();
        Self {
            total: results.len(),
            passed,
            failed: results.len() - passed,
            duration_ms,
            started_at,
            results,
        }
    }

    pub fn success(&self) -> bool {
        self.failed == 0
    }
}

/// Masks sensitive values before they reach logs or reports
#[derive(Debug, Clone, Default)]
pub struct Redactor {
    keys: Vec<String>,
}

impl Redactor {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            keys: keys
                .into_iter()
                .map(|k| k.as_ref().to_ascii_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }

    /// Whether the last segment of `path` names a sensitive key
    pub fn is_sensitive(&self, path: &str) -> bool {
        let leaf = path.rsplit('.').next().unwrap_or(path).to_ascii_lowercase();
        self.keys.iter().any(|key| leaf.contains(key.as_str()))
    }

    pub fn mask(value: &Value) -> Value {
        let len = match value {
            Value::String(s) => s.chars().count(),
            other => other.to_string().len(),
        };
        Value::String(format!("<redacted:{} chars>", len))
    }

    /// Mask sensitive keys anywhere inside `value`
    pub fn redact_value(&self, value: &Value) -> Value {
        match value {
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| {
                        let v = if self.is_sensitive(k) {
                            Self::mask(v)
                        } else {
                            self.redact_value(v)
                        };
                        (k.clone(), v)
                    })
                    .collect(),
            ),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.redact_value(v)).collect()),
            other => other.clone(),
        }
    }

    pub fn redact_named(&self, name: &str, value: &Value) -> Value {
        if self.is_sensitive(name) {
            Self::mask(value)
        } else {
            self.redact_value(value)
        }
    }

    pub fn redact_assertion(&self, result: AssertionResult) -> AssertionResult {
        result.map_values(|subject, value| {
            if self.is_sensitive(subject) && value.is_string() {
                Self::mask(&value)
            } else {
                self.redact_value(&value)
            }
        })
    }
}
