//! Sequential burst against one endpoint, with every status classified

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::context::ScenarioContext;
use crate::error::DefinitionError;
use crate::runner::Executor;
use crate::scenario::{validate_probe_references, RequestTemplate};
use crate::status::StatusSet;

/// Upper bound on `attempts` accepted from a definition
pub const MAX_ATTEMPTS: usize = 10_000;

/// A named bucket of acceptable statuses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusClass {
    pub name: String,
    pub statuses: StatusSet,
    /// Accepted, but worth a warning (e.g. 429 once the limit kicks in)
    #[serde(default)]
    pub degraded: bool,
}

impl StatusClass {
    pub fn new(name: impl Into<String>, statuses: StatusSet) -> Self {
        Self {
            name: name.into(),
            statuses,
            degraded: false,
        }
    }

    pub fn degraded(mut self) -> Self {
        self.degraded = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Expected,
    Degraded,
    Unexpected,
    TransportFailed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
    pub outcome: AttemptOutcome,
    pub duration_ms: u64,
}

/// Issues `attempts` calls one after another and requires every status to
/// fall in one of `classes`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitProbe {
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

    pub attempts: usize,

    /// Checked in order; the first class containing the status wins
    pub classes: Vec<StatusClass>,

    /// Pause between attempts
    #[serde(default)]
    pub interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitReport {
    pub name: String,
    pub attempts: Vec<AttemptRecord>,
    /// Attempts per declared class, zero counts included
    pub distribution: BTreeMap<String, usize>,
    pub expected: usize,
    pub degraded: usize,
    pub unexpected: usize,
    /// Indices of attempts whose status matched no class
    pub offending: Vec<usize>,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl RateLimitProbe {
    pub fn new(name: impl Into<String>, request: RequestTemplate, attempts: usize) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            tags: Vec::new(),
            base_url: None,
            variables: BTreeMap::new(),
            request,
            attempts,
            classes: Vec::new(),
            interval_ms: None,
        }
    }

    pub fn class(mut self, class: StatusClass) -> Self {
        self.classes.push(class);
        self
    }

    pub fn validate(&self) -> Result<(), DefinitionError> {
        if self.attempts == 0 || self.classes.is_empty() {
            return Err(DefinitionError::EmptyRateProbe(self.name.clone()));
        }
        if self.attempts > MAX_ATTEMPTS {
            return Err(DefinitionError::TooManyAttempts {
                name: self.name.clone(),
                attempts: self.attempts,
                max: MAX_ATTEMPTS,
            });
        }
        validate_probe_references(&self.name, &self.request, &self.variables, &[])
    }

    pub fn classify(&self, status: u16) -> Option<&StatusClass> {
        self.classes.iter().find(|class| class.statuses.contains(status))
    }

    /// Run every attempt in order. A transport failure ends the burst.
    pub async fn run(&self, executor: &Executor) -> RateLimitReport {
        let start = Instant::now();
        let ctx = ScenarioContext::seeded(self.variables.clone());
        let base_url = self.base_url.as_deref();
        let mut records = Vec::with_capacity(self.attempts.min(MAX_ATTEMPTS));
        let mut error = None;

        info!(
            "Rate-limit probe '{}': {} x {} {}",
            self.name, self.attempts, self.request.method, self.request.path
        );

        for index in 0..self.attempts {
            if index > 0 {
                if let Some(ms) = self.interval_ms {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                }
            }

            let attempt_start = Instant::now();
            let envelope = match executor.call(&self.request, &ctx, base_url).await {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!("Rate-limit probe '{}' attempt {} failed: {}", self.name, index, e);
                    records.push(AttemptRecord {
                        index,
                        status: None,
                        class: None,
                        outcome: AttemptOutcome::TransportFailed,
                        duration_ms: attempt_start.elapsed().as_millis() as u64,
                    });
                    error = Some(format!("attempt {}: {}", index, e));
                    break;
                }
            };

            let status = envelope.status();
            let class = self.classify(status);
            let outcome = match class {
                Some(class) if class.degraded => {
                    warn!("{} attempt {}: {} is in degraded class '{}'", self.name, index, status, class.name);
                    AttemptOutcome::Degraded
                }
                Some(_) => AttemptOutcome::Expected,
                None => {
                    warn!("{} attempt {}: {} matches no declared class", self.name, index, status);
                    AttemptOutcome::Unexpected
                }
            };
            debug!("{} attempt {} -> {} ({:?})", self.name, index, status, outcome);

            records.push(AttemptRecord {
                index,
                status: Some(status),
                class: class.map(|c| c.name.clone()),
                outcome,
                duration_ms: attempt_start.elapsed().as_millis() as u64,
            });
        }

        let mut distribution: BTreeMap<String, usize> =
            self.classes.iter().map(|class| (class.name.clone(), 0)).collect();
        for class in records.iter().filter_map(|r| r.class.as_ref()) {
            *distribution.entry(class.clone()).or_default() += 1;
        }
        let count = |outcome: AttemptOutcome| records.iter().filter(|r| r.outcome == outcome).count();
        let offending: Vec<usize> = records
            .iter()
            .filter(|r| r.outcome == AttemptOutcome::Unexpected)
            .map(|r| r.index)
            .collect();

        let report = RateLimitReport {
            name: self.name.clone(),
            expected: count(AttemptOutcome::Expected),
            degraded: count(AttemptOutcome::Degraded),
            unexpected: offending.len(),
            passed: offending.is_empty() && error.is_none(),
            offending,
            distribution,
            attempts: records,
            error,
            duration_ms: start.elapsed().as_millis() as u64,
        };

        info!(
            "Rate-limit probe '{}': {:?} ({} ms)",
            self.name, report.distribution, report.duration_ms
        );
        report
    }
}
