//! Scenario and suite execution

use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::assertion;
use crate::config::HarnessConfig;
use crate::context::ScenarioContext;
use crate::envelope::ResponseEnvelope;
use crate::error::{CallError, HarnessResult, TransportError};
use crate::report::{
    DefinitionReport, FailureReason, Redactor, ScenarioReport, ScenarioState, StepOutcome, StepStatus, SuiteReport,
};
use crate::scenario::{join_url, Definition, RequestTemplate, Scenario, ScenarioStep};
use crate::transport::{HttpRequest, ReqwestTransport, Transport};

/// Turns templates into requests and responses into envelopes.
///
/// Shared by the scenario runner and both probes; cheap to clone.
#[derive(Clone)]
pub struct Executor {
    transport: Arc<dyn Transport>,
    config: Arc<HarnessConfig>,
    redactor: Redactor,
}

impl Executor {
    pub fn new(transport: Arc<dyn Transport>, config: HarnessConfig) -> Self {
        let redactor = Redactor::new(&config.redact);
        Self {
            transport,
            config: Arc::new(config),
            redactor,
        }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn redactor(&self) -> &Redactor {
        &self.redactor
    }

    /// Substitute the template and resolve its URL against `base_url`
    /// (falling back to the configured base URL)
    pub fn prepare(
        &self,
        template: &RequestTemplate,
        ctx: &ScenarioContext,
        base_url: Option<&str>,
        timeout: Duration,
    ) -> Result<HttpRequest, CallError> {
        let rendered = template.render(ctx)?;
        let base = base_url.or(self.config.base_url.as_deref());
        let url = join_url(base, &rendered.path)?;

        let mut headers = self.config.default_headers.clone();
        headers.extend(rendered.headers);

        Ok(HttpRequest {
            method: rendered.method,
            url,
            body: rendered.body,
            headers,
            timeout,
        })
    }

    /// Issue the request with a bounded wait. Never retries.
    pub async fn send(&self, request: HttpRequest) -> Result<ResponseEnvelope, TransportError> {
        let timeout = request.timeout;
        match &request.body {
            Some(body) => debug!(
                "-> {} {} {}",
                request.method,
                request.url,
                self.redactor.redact_value(body)
            ),
            None => debug!("-> {} {}", request.method, request.url),
        }

        let raw = match tokio::time::timeout(timeout, self.transport.send(request)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(TransportError::Timeout {
                    after_ms: timeout.as_millis() as u64,
                })
            }
        };

        let envelope = ResponseEnvelope::from_raw(raw);
        debug!("<- {} in {} ms", envelope.status(), envelope.elapsed().as_millis());
        Ok(envelope)
    }

    /// `prepare` followed by `send`, with the configured timeout
    pub async fn call(
        &self,
        template: &RequestTemplate,
        ctx: &ScenarioContext,
        base_url: Option<&str>,
    ) -> Result<ResponseEnvelope, CallError> {
        let request = self.prepare(template, ctx, base_url, self.config.timeout())?;
        Ok(self.send(request).await?)
    }
}

/// Runs one scenario's steps strictly in declaration order
#[derive(Clone)]
pub struct ScenarioRunner {
    executor: Executor,
}

impl ScenarioRunner {
    pub fn new(transport: Arc<dyn Transport>, config: HarnessConfig) -> Self {
        Self::from_executor(Executor::new(transport, config))
    }

    pub fn from_executor(executor: Executor) -> Self {
        Self { executor }
    }

    pub async fn run(&self, scenario: &Scenario) -> ScenarioReport {
        self.run_until(scenario, CancellationToken::new()).await
    }

    /// Run until completion, a halting failure, or `cancel` firing.
    ///
    /// After an assertion failure only steps marked `independent` still
    /// run; transport, timeout, extraction and cancellation failures stop
    /// the scenario outright.
    pub async fn run_until(&self, scenario: &Scenario, cancel: CancellationToken) -> ScenarioReport {
        let start = Instant::now();
        let base_url = scenario.base_url.as_deref();
        let mut ctx = ScenarioContext::seeded(scenario.variables.clone());
        let mut state = ScenarioState::Pending;
        let mut first_failure: Option<usize> = None;
        let mut halted = false;
        let mut steps = Vec::with_capacity(scenario.steps.len());

        info!("Scenario '{}' {}: {} step(s)", scenario.name, state, scenario.steps.len());

        for (index, step) in scenario.steps.iter().enumerate() {
            if halted {
                steps.push(StepOutcome::skipped(index, step, "scenario halted"));
                continue;
            }
            if first_failure.is_some() && !step.independent {
                steps.push(StepOutcome::skipped(index, step, "an earlier step failed"));
                continue;
            }

            state = ScenarioState::Running { step_index: index };
            debug!("Scenario '{}' {}: {}", scenario.name, state, step.name);

            let outcome = if cancel.is_cancelled() {
                StepOutcome::failed(index, step, FailureReason::Cancelled, "scenario cancelled")
            } else {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        StepOutcome::failed(index, step, FailureReason::Cancelled, "scenario cancelled")
                    }
                    outcome = self.run_step(index, step, &mut ctx, base_url) => outcome,
                }
            };

            if let Some(reason) = outcome.failure_reason() {
                error!(
                    "✗ {} / {} ({}): {}",
                    scenario.name,
                    step.name,
                    reason,
                    outcome.error.as_deref().unwrap_or("failed")
                );
                first_failure.get_or_insert(index);
                halted = reason.halts();
            }
            steps.push(outcome);
        }

        state = match first_failure {
            Some(step_index) => ScenarioState::Failed { step_index },
            None => ScenarioState::Completed,
        };
        let duration_ms = start.elapsed().as_millis() as u64;
        info!("Scenario '{}' {} ({} ms)", scenario.name, state, duration_ms);

        ScenarioReport {
            name: scenario.name.clone(),
            state,
            duration_ms,
            steps,
        }
    }

    async fn run_step(
        &self,
        index: usize,
        step: &ScenarioStep,
        ctx: &mut ScenarioContext,
        base_url: Option<&str>,
    ) -> StepOutcome {
        let start = Instant::now();
        let elapsed_ms = |start: Instant| start.elapsed().as_millis() as u64;
        let timeout = step
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.executor.config().timeout());

        let request = match self.executor.prepare(&step.request, ctx, base_url, timeout) {
            Ok(request) => request,
            Err(CallError::Extraction(e)) => {
                return StepOutcome::failed(index, step, FailureReason::ExtractionError, e.to_string())
            }
            Err(CallError::Transport(e)) => {
                return StepOutcome::failed(index, step, FailureReason::Transport, e.to_string())
            }
        };
        let checks = match step
            .checks
            .iter()
            .map(|check| check.resolve(ctx))
            .collect::<Result<Vec<_>, _>>()
        {
            Ok(checks) => checks,
            Err(e) => return StepOutcome::failed(index, step, FailureReason::ExtractionError, e.to_string()),
        };

        let url = request.url.clone();
        let envelope = match self.executor.send(request).await {
            Ok(envelope) => envelope,
            Err(e) => {
                let reason = if e.is_timeout() {
                    FailureReason::Timeout
                } else {
                    FailureReason::Transport
                };
                let mut outcome = StepOutcome::failed(index, step, reason, e.to_string());
                outcome.url = Some(url);
                outcome.duration_ms = elapsed_ms(start);
                return outcome;
            }
        };

        let redactor = self.executor.redactor();
        let mut assertions = Vec::with_capacity(checks.len() + 1);
        assertions.push(assertion::status_in(&envelope, &step.expect_status));
        assertions.extend(checks.iter().map(|check| check.evaluate(&envelope)));
        let assertions: Vec<_> = assertions
            .into_iter()
            .map(|a| redactor.redact_assertion(a))
            .collect();

        let mut outcome = StepOutcome::new(index, step, StepStatus::Passed);
        outcome.url = Some(url);
        outcome.http_status = Some(envelope.status());
        outcome.parse_error = envelope.parse_error().cloned();

        let failed = assertions.iter().filter(|a| !a.passed()).count();
        if failed > 0 {
            for failure in assertions.iter().filter(|a| !a.passed()) {
                warn!("{} / {}: {}", step.name, envelope.status(), failure);
            }
            outcome.status = StepStatus::Failed(FailureReason::AssertionFailure);
            outcome.error = Some(format!("{} of {} assertion(s) failed", failed, assertions.len()));
        } else {
            for extraction in &step.extract {
                match extraction.apply(&envelope) {
                    Ok(value) => {
                        outcome
                            .extracted
                            .insert(extraction.name.clone(), redactor.redact_named(&extraction.name, &value));
                        ctx.set(extraction.name.clone(), value);
                    }
                    Err(e) => {
                        outcome.status = StepStatus::Failed(FailureReason::ExtractionError);
                        outcome.error = Some(e.to_string());
                        break;
                    }
                }
            }
        }

        outcome.assertions = assertions;
        outcome.duration_ms = elapsed_ms(start);
        outcome
    }
}

/// Runs many definitions, several scenarios at once, each with its own context
pub struct SuiteRunner {
    executor: Executor,
}

impl SuiteRunner {
    pub fn new(transport: Arc<dyn Transport>, config: HarnessConfig) -> Self {
        Self {
            executor: Executor::new(transport, config),
        }
    }

    /// Suite runner backed by a reqwest client
    pub fn with_reqwest(config: HarnessConfig) -> HarnessResult<Self> {
        let transport = ReqwestTransport::new(&config.user_agent)?;
        Ok(Self::new(Arc::new(transport), config))
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    /// Run a single definition
    pub async fn run_definition(&self, definition: &Definition) -> DefinitionReport {
        match definition {
            Definition::Scenario(scenario) => {
                let runner = ScenarioRunner::from_executor(self.executor.clone());
                let Some(budget) = self.executor.config().scenario_budget() else {
                    return DefinitionReport::Scenario(runner.run(scenario).await);
                };

                let cancel = CancellationToken::new();
                let run = runner.run_until(scenario, cancel.clone());
                tokio::pin!(run);
                let report = tokio::select! {
                    report = &mut run => report,
                    _ = tokio::time::sleep(budget) => {
                        warn!("Scenario '{}' exceeded its {} ms budget", scenario.name, budget.as_millis());
                        cancel.cancel();
                        run.await
                    }
                };
                DefinitionReport::Scenario(report)
            }
            Definition::Idempotency(probe) => DefinitionReport::Idempotency(probe.run(&self.executor).await),
            Definition::RateLimit(probe) => DefinitionReport::RateLimit(probe.run(&self.executor).await),
        }
    }

    /// Run a list of definitions, keeping their order in the report
    pub async fn run_all(&self, definitions: &[Definition]) -> SuiteReport {
        let started_at = Utc::now();
        let start = Instant::now();
        let concurrency = self.executor.config().concurrency.max(1);

        info!("Running {} definition(s), {} at a time...", definitions.len(), concurrency);

        let results: Vec<DefinitionReport> = stream::iter(definitions)
            .map(|definition| self.run_definition(definition))
            .buffered(concurrency)
            .collect()
            .await;

        for result in &results {
            if result.passed() {
                info!("✓ {} ({} ms)", result.name(), result.duration_ms());
            } else {
                error!("✗ {} - {}", result.name(), result.summary());
            }
        }

        let report = SuiteReport::from_results(results, started_at, start.elapsed().as_millis() as u64);
        info!(
            "Results: {} passed, {} failed ({} ms)",
            report.passed, report.failed, report.duration_ms
        );
        report
    }

    /// Write suite results to JSON file
    pub fn write_results(&self, report: &SuiteReport) -> HarnessResult<PathBuf> {
        let output_dir = &self.executor.config().output_dir;
        std::fs::create_dir_all(output_dir)?;

        let path = output_dir.join("apiprobe-results.json");
        let json = serde_json::to_string_pretty(report)?;
        std::fs::write(&path, json)?;

        info!("Results written to: {}", path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assertion::Check;
    use crate::scenario::Extraction;
    use crate::status::StatusSet;
    use crate::testing::{Scripted, ScriptedTransport};
    use crate::transport::Method;
    use serde_json::{json, Value};

    fn config() -> HarnessConfig {
        HarnessConfig {
            base_url: Some("http://store.test".into()),
            timeout_ms: 200,
            ..Default::default()
        }
    }

    fn crud() -> Scenario {
        Scenario::new("crud")
            .step(
                ScenarioStep::new("create", Method::Post, "/products")
                    .body(json!({"title": "X", "price": 50}))
                    .expect(StatusSet::codes(&[200, 201]))
                    .extract(Extraction::field("productId", "id")),
            )
            .step(
                ScenarioStep::new("update", Method::Put, "/products/{{productId}}")
                    .body(json!({"title": "Y"}))
                    .check(Check::FieldEquals {
                        path: "id".into(),
                        value: json!("{{productId}}"),
                    }),
            )
            .step(ScenarioStep::new("delete", Method::Delete, "/products/{{productId}}").expect(StatusSet::codes(&[200, 204])))
    }

    #[tokio::test]
    async fn test_threads_extracted_values_between_steps() {
        let transport = ScriptedTransport::new(vec![
            Scripted::Json(201, json!({"id": 21, "title": "X"})),
            Scripted::Json(200, json!({"id": 21, "title": "Y"})),
            Scripted::Json(200, json!({})),
        ]);
        let runner = ScenarioRunner::new(transport.clone(), config());

        let report = runner.run(&crud()).await;

        assert!(report.passed(), "{:?}", report);
        assert_eq!(report.state, ScenarioState::Completed);
        let urls: Vec<String> = transport.seen().into_iter().map(|r| r.url).collect();
        assert_eq!(
            urls,
            vec![
                "http://store.test/products",
                "http://store.test/products/21",
                "http://store.test/products/21"
            ]
        );
        assert_eq!(report.steps[0].extracted["productId"], json!(21));
    }

    #[tokio::test]
    async fn test_stops_on_first_assertion_failure_by_default() {
        let transport = ScriptedTransport::new(vec![
            Scripted::Json(201, json!({"id": 21})),
            Scripted::Json(200, json!({"id": 22})),
        ]);
        let runner = ScenarioRunner::new(transport.clone(), config());

        let report = runner.run(&crud()).await;

        assert_eq!(report.state, ScenarioState::Failed { step_index: 1 });
        assert_eq!(
            report.steps[1].failure_reason(),
            Some(FailureReason::AssertionFailure)
        );
        assert_eq!(report.steps[2].status, StepStatus::Skipped);
        assert_eq!(transport.seen().len(), 2);
    }

    #[tokio::test]
    async fn test_independent_steps_still_run_and_all_failures_are_reported() {
        let scenario = Scenario::new("catalog")
            .step(ScenarioStep::new("missing", Method::Get, "/products/9999").expect(StatusSet::codes(&[404])))
            .step(
                ScenarioStep::new("list", Method::Get, "/products")
                    .independent()
                    .check(Check::Length {
                        path: String::new(),
                        min: Some(1),
                        max: None,
                    }),
            );
        let transport = ScriptedTransport::new(vec![
            Scripted::Json(200, json!({})),
            Scripted::Json(200, json!([])),
        ]);
        let runner = ScenarioRunner::new(transport, config());

        let report = runner.run(&scenario).await;

        assert_eq!(report.state, ScenarioState::Failed { step_index: 0 });
        assert_eq!(report.failed_assertions().count(), 2);
        assert_eq!(report.steps[1].failure_reason(), Some(FailureReason::AssertionFailure));
    }

    #[tokio::test]
    async fn test_missing_extraction_source_is_extraction_error() {
        let scenario = Scenario::new("no-id")
            .step(ScenarioStep::new("create", Method::Post, "/carts").extract(Extraction::field("cartId", "id")))
            .step(ScenarioStep::new("read", Method::Get, "/carts/{{cartId}}").independent());
        let transport = ScriptedTransport::new(vec![Scripted::Json(200, json!({"ok": true}))]);
        let runner = ScenarioRunner::new(transport.clone(), config());

        let report = runner.run(&scenario).await;

        assert_eq!(report.steps[0].failure_reason(), Some(FailureReason::ExtractionError));
        assert_eq!(report.steps[1].status, StepStatus::Skipped);
        assert_eq!(transport.seen().len(), 1);
    }

    #[tokio::test]
    async fn test_unset_reference_is_extraction_error_not_panic() {
        let scenario = Scenario::new("dangling")
            .step(ScenarioStep::new("create", Method::Post, "/products").expect(StatusSet::codes(&[201])).extract(Extraction::field("id", "id")))
            .step(ScenarioStep::new("read", Method::Get, "/products/{{id}}").independent());
        // create fails its status check, so `id` is never extracted
        let transport = ScriptedTransport::new(vec![Scripted::Json(500, json!({}))]);
        let runner = ScenarioRunner::new(transport.clone(), config());

        let report = runner.run(&scenario).await;

        assert_eq!(report.steps[0].failure_reason(), Some(FailureReason::AssertionFailure));
        assert_eq!(report.steps[1].failure_reason(), Some(FailureReason::ExtractionError));
        assert!(report.steps[1].error.as_deref().unwrap().contains("'id'"));
        assert_eq!(transport.seen().len(), 1);
    }

    #[tokio::test]
    async fn test_timeout_halts_even_independent_steps() {
        let scenario = Scenario::new("slow")
            .step(ScenarioStep::new("slow", Method::Get, "/slow").timeout_ms(20))
            .step(ScenarioStep::new("after", Method::Get, "/products").independent());
        let transport = ScriptedTransport::new(vec![Scripted::Hang, Scripted::Json(200, json!([]))]);
        let runner = ScenarioRunner::new(transport.clone(), config());

        let report = runner.run(&scenario).await;

        assert_eq!(report.steps[0].failure_reason(), Some(FailureReason::Timeout));
        assert_eq!(report.steps[1].status, StepStatus::Skipped);
        assert_eq!(transport.seen().len(), 1);
    }

    #[tokio::test]
    async fn test_transport_error_is_not_retried() {
        let scenario = Scenario::new("down").step(ScenarioStep::new("list", Method::Get, "/products"));
        let transport = ScriptedTransport::new(vec![
            Scripted::Fail(TransportError::Connect("refused".into())),
            Scripted::Json(200, json!([])),
        ]);
        let runner = ScenarioRunner::new(transport.clone(), config());

        let report = runner.run(&scenario).await;

        assert_eq!(report.steps[0].failure_reason(), Some(FailureReason::Transport));
        assert_eq!(transport.seen().len(), 1);
    }

    #[tokio::test]
    async fn test_cancellation_stops_issuing_steps() {
        let scenario = Scenario::new("cancelled")
            .step(ScenarioStep::new("hang", Method::Get, "/hang").timeout_ms(60_000))
            .step(ScenarioStep::new("next", Method::Get, "/products"));
        let transport = ScriptedTransport::new(vec![Scripted::Hang, Scripted::Json(200, json!([]))]);
        let runner = ScenarioRunner::new(transport.clone(), config());
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let report = runner.run_until(&scenario, cancel).await;

        assert_eq!(report.state, ScenarioState::Failed { step_index: 0 });
        assert_eq!(report.steps[0].failure_reason(), Some(FailureReason::Cancelled));
        assert_eq!(report.steps[1].status, StepStatus::Skipped);
        assert_eq!(transport.seen().len(), 1);
    }

    #[tokio::test]
    async fn test_default_headers_and_redacted_extraction() {
        let scenario = Scenario::new("login")
            .variable("password", json!("83r5^_"))
            .step(
                ScenarioStep::new("login", Method::Post, "/auth/login")
                    .body(json!({"username": "mor_2314", "password": "{{password}}"}))
                    .header("x-trace", "abc")
                    .extract(Extraction::field("token", "token")),
            );
        let transport = ScriptedTransport::new(vec![Scripted::Json(200, json!({"token": "eyJhbGciOiJIUzI1NiJ9"}))]);
        let mut cfg = config();
        cfg.default_headers.insert("accept".into(), "application/json".into());
        let runner = ScenarioRunner::new(transport.clone(), cfg);

        let report = runner.run(&scenario).await;

        assert!(report.passed());
        let sent = &transport.seen()[0];
        assert_eq!(sent.headers["accept"], "application/json");
        assert_eq!(sent.headers["x-trace"], "abc");
        assert_eq!(sent.body.as_ref().unwrap()["password"], "83r5^_");
        assert_eq!(report.steps[0].extracted["token"], json!("<redacted:20 chars>"));
    }

    #[tokio::test]
    async fn test_suite_runs_definitions_in_order_with_budget() {
        let slow = Scenario::new("slow").step(ScenarioStep::new("hang", Method::Get, "/hang").timeout_ms(60_000));
        let transport = ScriptedTransport::new(vec![Scripted::Hang]);
        let cfg = HarnessConfig {
            scenario_budget_ms: Some(30),
            ..config()
        };
        let suite = SuiteRunner::new(transport, cfg);

        let report = suite.run_all(&[Definition::Scenario(slow)]).await;

        assert_eq!(report.total, 1);
        assert_eq!(report.failed, 1);
        let DefinitionReport::Scenario(scenario) = &report.results[0] else {
            panic!("expected scenario report");
        };
        assert_eq!(scenario.steps[0].failure_reason(), Some(FailureReason::Cancelled));
    }

    #[test]
    fn test_write_results() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = HarnessConfig {
            output_dir: dir.path().join("out"),
            ..config()
        };
        let suite = SuiteRunner::new(ScriptedTransport::new(vec![]), cfg);
        let report = SuiteReport::from_results(vec![], Utc::now(), 0);

        let path = suite.write_results(&report).unwrap();

        let written: Value = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(written["total"], 0);
    }
}
