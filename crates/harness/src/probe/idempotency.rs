//! Replay a request under one idempotency token and compare the results

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use super::CallSummary;
use crate::assertion::{self, values_equal, AssertionResult};
use crate::context::ScenarioContext;
use crate::envelope::ResponseEnvelope;
use crate::error::DefinitionError;
use crate::runner::Executor;
use crate::scenario::{validate_probe_references, RequestTemplate};
use crate::status::StatusSet;

/// Context variable holding the generated token, usable in the template
pub const TOKEN_VARIABLE: &str = "idempotency_token";

fn default_token_header() -> Option<String> {
    Some("Idempotency-Key".to_string())
}

/// Where the token comes from
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenSource {
    #[default]
    Uuid,
    Fixed(String),
}

impl TokenSource {
    pub fn generate(&self) -> String {
        match self {
            TokenSource::Uuid => Uuid::new_v4().to_string(),
            TokenSource::Fixed(token) => token.clone(),
        }
    }
}

/// What must hold between the first and the replayed response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Equivalence {
    /// Same value at this body path, e.g. the created resource's id
    Field(String),
    /// Deeply equal bodies
    Body,
    /// Same status code; bodies are not inspected
    Status,
}

impl Default for Equivalence {
    fn default() -> Self {
        Equivalence::Field("id".to_string())
    }
}

impl Equivalence {
    pub fn evaluate(&self, first: &ResponseEnvelope, second: &ResponseEnvelope) -> AssertionResult {
        match self {
            Equivalence::Field(path) => {
                let description = format!("replay returns the same '{}'", path);
                match (first.field(path), second.field(path)) {
                    (Some(a), Some(b)) => AssertionResult::check(values_equal(a, b), description)
                        .with_subject(path.clone())
                        .with_actual(b.clone())
                        .with_expected(a.clone()),
                    (a, b) => AssertionResult::fail(description)
                        .with_subject(path.clone())
                        .with_actual(json!({
                            "first": a.cloned().unwrap_or(Value::Null),
                            "second": b.cloned().unwrap_or(Value::Null),
                        })),
                }
            }
            Equivalence::Body => assertion::body_equals(second, first.parsed_body()).labelled("replay"),
            Equivalence::Status => {
                AssertionResult::check(first.status() == second.status(), "replay returns the same status")
                    .with_actual(json!(second.status()))
                    .with_expected(json!(first.status()))
            }
        }
    }
}

/// Issues the same request twice with one token and checks the replay
/// is equivalent to the original
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyProbe {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default)]
    pub variables: BTreeMap<String, Value>,

    pub request: RequestTemplate,

    /// `null` sends no token header; the request is replayed as is
    #[serde(default = "default_token_header")]
    pub token_header: Option<String>,

    #[serde(default)]
    pub token: TokenSource,

    #[serde(default)]
    pub equivalence: Equivalence,

    #[serde(default = "StatusSet::success")]
    pub expect_status: StatusSet,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyReport {
    pub name: String,
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first: Option<CallSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub second: Option<CallSummary>,
    pub assertions: Vec<AssertionResult>,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl IdempotencyProbe {
    pub fn new(name: impl Into<String>, request: RequestTemplate) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            tags: Vec::new(),
            base_url: None,
            variables: BTreeMap::new(),
            request,
            token_header: default_token_header(),
            token: TokenSource::default(),
            equivalence: Equivalence::default(),
            expect_status: StatusSet::success(),
        }
    }

    pub fn validate(&self) -> Result<(), DefinitionError> {
        validate_probe_references(&self.name, &self.request, &self.variables, &[TOKEN_VARIABLE])
    }

    /// Run with the declared token source and equivalence
    pub async fn run(&self, executor: &Executor) -> IdempotencyReport {
        let token = self.token.generate();
        self.execute(executor, token, |first, second| self.equivalence.evaluate(first, second))
            .await
    }

    /// Run with a caller-supplied token generator and a predicate over the
    /// two parsed bodies
    pub async fn run_with<G, P>(&self, executor: &Executor, generate: G, equivalent: P) -> IdempotencyReport
    where
        G: FnOnce() -> String,
        P: Fn(&Value, &Value) -> bool,
    {
        let token = generate();
        self.execute(executor, token, |first, second| {
            let description = "replay satisfies the equivalence predicate";
            match (first.parsed_body(), second.parsed_body()) {
                (Some(a), Some(b)) => AssertionResult::check(equivalent(a, b), description),
                _ => AssertionResult::fail(description).with_actual(json!({
                    "first_parsed": first.is_parsed(),
                    "second_parsed": second.is_parsed(),
                })),
            }
        })
        .await
    }

    async fn execute<F>(&self, executor: &Executor, token: String, evaluate: F) -> IdempotencyReport
    where
        F: FnOnce(&ResponseEnvelope, &ResponseEnvelope) -> AssertionResult,
    {
        let start = Instant::now();
        let mut report = IdempotencyReport {
            name: self.name.clone(),
            token: token.clone(),
            first: None,
            second: None,
            assertions: Vec::new(),
            passed: false,
            error: None,
            duration_ms: 0,
        };

        let mut ctx = ScenarioContext::seeded(self.variables.clone());
        ctx.set(TOKEN_VARIABLE, Value::String(token.clone()));
        let mut template = self.request.clone();
        if let Some(header) = &self.token_header {
            template.headers.insert(header.clone(), token);
        }

        info!(
            "Idempotency probe '{}': {} {} twice",
            self.name, template.method, template.path
        );

        let timeout = executor.config().timeout();
        let mut envelopes = Vec::with_capacity(2);
        match executor.prepare(&template, &ctx, self.base_url.as_deref(), timeout) {
            Ok(request) => {
                // Both calls carry the same rendered request
                for label in ["first call", "replay"] {
                    match executor.send(request.clone()).await {
                        Ok(envelope) => envelopes.push(envelope),
                        Err(e) => {
                            warn!("Idempotency probe '{}' {} failed: {}", self.name, label, e);
                            report.error = Some(format!("{}: {}", label, e));
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                warn!("Idempotency probe '{}' could not be prepared: {}", self.name, e);
                report.error = Some(format!("first call: {}", e));
            }
        }
        report.first = envelopes.first().map(CallSummary::from);
        report.second = envelopes.get(1).map(CallSummary::from);

        if let [first, second] = envelopes.as_slice() {
            let redactor = executor.redactor();
            report.assertions = [
                assertion::status_in(first, &self.expect_status).labelled("first call"),
                assertion::status_in(second, &self.expect_status).labelled("replay"),
                evaluate(first, second),
            ]
            .into_iter()
            .map(|a| redactor.redact_assertion(a))
            .collect();
            report.passed = report.assertions.iter().all(AssertionResult::passed);
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        if report.passed {
            info!("Idempotency probe '{}' passed ({} ms)", self.name, report.duration_ms);
        } else {
            for failure in report.assertions.iter().filter(|a| !a.passed()) {
                warn!("{}: {}", self.name, failure);
            }
        }
        report
    }
}
