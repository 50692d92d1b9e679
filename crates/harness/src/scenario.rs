//! Declarative scenario and probe definitions (YAML)

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::assertion::Check;
use crate::context::{self, ScenarioContext};
use crate::envelope::ResponseEnvelope;
use crate::error::{DefinitionError, ExtractionError, HarnessResult, TransportError};
use crate::probe::{IdempotencyProbe, RateLimitProbe};
use crate::status::StatusSet;
use crate::transport::Method;

/// Method, path, body and headers of a request, with `{{var}}` placeholders
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestTemplate {
    #[serde(default)]
    pub method: Method,

    /// Relative to the base URL unless it starts with `http://` or `https://`
    pub path: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

/// A template after substitution
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
    pub headers: BTreeMap<String, String>,
}

impl RequestTemplate {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            headers: BTreeMap::new(),
        }
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn render(&self, ctx: &ScenarioContext) -> Result<RenderedRequest, ExtractionError> {
        let headers = self
            .headers
            .iter()
            .map(|(name, value)| Ok((name.clone(), ctx.substitute_str(value)?)))
            .collect::<Result<BTreeMap<_, _>, ExtractionError>>()?;

        Ok(RenderedRequest {
            method: self.method,
            path: ctx.substitute_str(&self.path)?,
            body: self
                .body
                .as_ref()
                .map(|body| ctx.substitute_value(body))
                .transpose()?,
            headers,
        })
    }

    pub fn references(&self) -> Vec<String> {
        let mut names = context::placeholders_in_str(&self.path);
        names.extend(self.headers.values().flat_map(|v| context::placeholders_in_str(v)));
        if let Some(body) = &self.body {
            names.extend(context::placeholders_in_value(body));
        }
        names
    }

    pub fn is_absolute(&self) -> bool {
        is_absolute(&self.path)
    }
}

fn is_absolute(path: &str) -> bool {
    path.starts_with("http://") || path.starts_with("https://")
}

/// Join a base URL and a path, leaving absolute paths untouched
pub fn join_url(base: Option<&str>, path: &str) -> Result<String, TransportError> {
    if is_absolute(path) {
        return Ok(path.to_string());
    }
    let base = base.ok_or_else(|| {
        TransportError::InvalidUrl(format!("no base URL for relative path '{}'", path))
    })?;
    Ok(format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    ))
}

/// Capture a value from a response into the scenario context.
///
/// Reads the body field at `field` (defaulting to `name`) unless `header`
/// is given.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,
}

impl Extraction {
    pub fn field(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field: Some(path.into()),
            header: None,
        }
    }

    pub fn header(name: impl Into<String>, header: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field: None,
            header: Some(header.into()),
        }
    }

    pub fn apply(&self, envelope: &ResponseEnvelope) -> Result<Value, ExtractionError> {
        if let Some(header) = &self.header {
            return envelope
                .header(header)
                .map(|v| Value::String(v.to_string()))
                .ok_or_else(|| ExtractionError::MissingHeader {
                    name: self.name.clone(),
                    header: header.clone(),
                });
        }
        let path = self.field.as_deref().unwrap_or(&self.name);
        envelope
            .field(path)
            .cloned()
            .ok_or_else(|| ExtractionError::MissingField {
                name: self.name.clone(),
                path: path.to_string(),
            })
    }
}

/// One HTTP call in a scenario
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioStep {
    pub name: String,

    #[serde(flatten)]
    pub request: RequestTemplate,

    #[serde(default = "StatusSet::success")]
    pub expect_status: StatusSet,

    #[serde(default)]
    pub checks: Vec<Check>,

    #[serde(default)]
    pub extract: Vec<Extraction>,

    /// Still runs after an earlier step's assertions failed
    #[serde(default)]
    pub independent: bool,

    /// Overrides the configured per-call timeout
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl ScenarioStep {
    pub fn new(name: impl Into<String>, method: Method, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            request: RequestTemplate::new(method, path),
            expect_status: StatusSet::success(),
            checks: Vec::new(),
            extract: Vec::new(),
            independent: false,
            timeout_ms: None,
        }
    }

    pub fn body(mut self, body: Value) -> Self {
        self.request.body = Some(body);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.request.headers.insert(name.into(), value.into());
        self
    }

    pub fn expect(mut self, statuses: StatusSet) -> Self {
        self.expect_status = statuses;
        self
    }

    pub fn check(mut self, check: Check) -> Self {
        self.checks.push(check);
        self
    }

    pub fn extract(mut self, extraction: Extraction) -> Self {
        self.extract.push(extraction);
        self
    }

    pub fn independent(mut self) -> Self {
        self.independent = true;
        self
    }

    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = Some(ms);
        self
    }

    /// Context variables this step needs before it can be sent
    pub fn references(&self) -> Vec<String> {
        let mut names = self.request.references();
        names.extend(self.checks.iter().flat_map(Check::references));
        names
    }
}

/// An ordered business flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub base_url: Option<String>,

    /// Pre-seeded context values
    #[serde(default)]
    pub variables: BTreeMap<String, Value>,

    pub steps: Vec<ScenarioStep>,
}

impl Scenario {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            tags: Vec::new(),
            base_url: None,
            variables: BTreeMap::new(),
            steps: Vec::new(),
        }
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn variable(mut self, name: impl Into<String>, value: Value) -> Self {
        self.variables.insert(name.into(), value);
        self
    }

    pub fn step(mut self, step: ScenarioStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Every referenced variable is seeded or extracted by a strictly earlier step
    pub fn validate(&self) -> Result<(), DefinitionError> {
        if self.steps.is_empty() {
            return Err(DefinitionError::NoSteps(self.name.clone()));
        }

        let mut available: BTreeSet<&str> = self.variables.keys().map(String::as_str).collect();
        for (index, step) in self.steps.iter().enumerate() {
            if step.timeout_ms == Some(0) {
                return Err(DefinitionError::ZeroTimeout {
                    step: step.name.clone(),
                });
            }
            for extraction in &step.extract {
                if extraction.field.is_some() && extraction.header.is_some() {
                    return Err(DefinitionError::Parse(format!(
                        "step '{}': extraction '{}' names both a field and a header",
                        step.name, extraction.name
                    )));
                }
            }

            for variable in step.references() {
                if available.contains(variable.as_str()) {
                    continue;
                }
                let produced_later = self.steps[index..]
                    .iter()
                    .any(|later| later.extract.iter().any(|e| e.name == variable));
                return Err(if produced_later {
                    DefinitionError::ForwardReference {
                        step: step.name.clone(),
                        variable,
                    }
                } else {
                    DefinitionError::UnknownVariable {
                        step: step.name.clone(),
                        variable,
                    }
                });
            }
            available.extend(step.extract.iter().map(|e| e.name.as_str()));
        }
        Ok(())
    }
}

/// Anything the harness can run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Definition {
    Scenario(Scenario),
    Idempotency(IdempotencyProbe),
    RateLimit(RateLimitProbe),
}

impl Definition {
    pub fn name(&self) -> &str {
        match self {
            Definition::Scenario(s) => &s.name,
            Definition::Idempotency(p) => &p.name,
            Definition::RateLimit(p) => &p.name,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Definition::Scenario(_) => "scenario",
            Definition::Idempotency(_) => "idempotency",
            Definition::RateLimit(_) => "rate_limit",
        }
    }

    pub fn description(&self) -> &str {
        match self {
            Definition::Scenario(s) => &s.description,
            Definition::Idempotency(p) => &p.description,
            Definition::RateLimit(p) => &p.description,
        }
    }

    pub fn tags(&self) -> &[String] {
        match self {
            Definition::Scenario(s) => &s.tags,
            Definition::Idempotency(p) => &p.tags,
            Definition::RateLimit(p) => &p.tags,
        }
    }

    pub fn base_url(&self) -> Option<&str> {
        match self {
            Definition::Scenario(s) => s.base_url.as_deref(),
            Definition::Idempotency(p) => p.base_url.as_deref(),
            Definition::RateLimit(p) => p.base_url.as_deref(),
        }
    }

    fn templates(&self) -> Vec<&RequestTemplate> {
        match self {
            Definition::Scenario(s) => s.steps.iter().map(|step| &step.request).collect(),
            Definition::Idempotency(p) => vec![&p.request],
            Definition::RateLimit(p) => vec![&p.request],
        }
    }

    /// Parse a definition from a YAML string
    pub fn from_yaml(yaml: &str) -> HarnessResult<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Parse a definition from a YAML file
    pub fn from_file(path: &Path) -> HarnessResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content).map_err(|e| {
            DefinitionError::Parse(format!("{}: {}", path.display(), e)).into()
        })
    }

    /// Load and validate every `.yaml`/`.yml` file under `dir`, in path order
    pub fn load_all(dir: &Path) -> HarnessResult<Vec<Self>> {
        let mut definitions = Vec::new();

        for entry in walkdir::WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.file_type().is_file()
                    && e.path()
                        .extension()
                        .map(|ext| ext == "yaml" || ext == "yml")
                        .unwrap_or(false)
            })
        {
            let definition = Self::from_file(entry.path())?;
            definition.validate()?;
            definitions.push(definition);
        }

        Ok(definitions)
    }

    /// Filter definitions by tag
    pub fn filter_by_tag<'a>(definitions: &'a [Self], tag: &str) -> Vec<&'a Self> {
        definitions
            .iter()
            .filter(|d| d.tags().iter().any(|t| t == tag))
            .collect()
    }

    pub fn validate(&self) -> Result<(), DefinitionError> {
        match self {
            Definition::Scenario(s) => s.validate(),
            Definition::Idempotency(p) => p.validate(),
            Definition::RateLimit(p) => p.validate(),
        }
    }

    /// Every relative path has a base URL, from the definition or `fallback`
    pub fn check_base_url(&self, fallback: Option<&str>) -> Result<(), DefinitionError> {
        if self.base_url().or(fallback).is_some() {
            return Ok(());
        }
        match self.templates().into_iter().find(|t| !t.is_absolute()) {
            Some(template) => Err(DefinitionError::MissingBaseUrl(template.path.clone())),
            None => Ok(()),
        }
    }
}

/// Template references must be seeded in `variables` or be one of `provided`;
/// probes have no extraction
pub(crate) fn validate_probe_references(
    name: &str,
    request: &RequestTemplate,
    variables: &BTreeMap<String, Value>,
    provided: &[&str],
) -> Result<(), DefinitionError> {
    match request
        .references()
        .into_iter()
        .find(|v| !variables.contains_key(v) && !provided.contains(&v.as_str()))
    {
        Some(variable) => Err(DefinitionError::UnknownVariable {
            step: name.to_string(),
            variable,
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const CRUD: &str = r#"
kind: scenario
name: product-crud
description: Create, update and delete a product
tags: [products, crud]
base_url: https://fakestoreapi.com
steps:
  - name: create
    method: POST
    path: /products
    body:
      title: E2E Test Product
      price: 50
    expect_status: [200, 201]
    checks:
      - check: has_field
        path: id
    extract:
      - name: productId
        field: id
  - name: update
    method: PUT
    path: /products/{{productId}}
    body:
      title: Updated E2E Product
      price: 99.99
    expect_status: [200, 201]
    checks:
      - check: field_equals
        path: id
        value: "{{productId}}"
  - name: delete
    method: DELETE
    path: /products/{{productId}}
    expect_status: [200, 204]
"#;

    #[test]
    fn test_parse_scenario() {
        let def = Definition::from_yaml(CRUD).unwrap();
        assert_eq!(def.name(), "product-crud");
        assert_eq!(def.kind(), "scenario");
        let Definition::Scenario(scenario) = &def else {
            panic!("expected scenario");
        };
        assert_eq!(scenario.steps.len(), 3);
        assert_eq!(scenario.steps[0].request.method, Method::Post);
        assert!(scenario.steps[2].expect_status.contains(204));
        assert!(!scenario.steps[0].independent);
        def.validate().unwrap();
    }

    #[test]
    fn test_default_expect_status_is_success_family() {
        let step: ScenarioStep = serde_yaml::from_str("name: list\npath: /products").unwrap();
        assert_eq!(step.request.method, Method::Get);
        assert!(step.expect_status.contains(200));
        assert!(step.expect_status.contains(204));
        assert!(!step.expect_status.contains(404));
    }

    #[test]
    fn test_forward_reference_is_rejected() {
        let scenario = Scenario::new("backwards")
            .step(ScenarioStep::new("read", Method::Get, "/products/{{id}}"))
            .step(ScenarioStep::new("create", Method::Post, "/products").extract(Extraction::field("id", "id")));
        let err = scenario.validate().unwrap_err();
        assert!(matches!(err, DefinitionError::ForwardReference { ref variable, .. } if variable == "id"));
    }

    #[test]
    fn test_self_reference_is_forward() {
        let scenario = Scenario::new("self").step(
            ScenarioStep::new("loop", Method::Get, "/x/{{id}}").extract(Extraction::field("id", "id")),
        );
        assert!(matches!(scenario.validate(), Err(DefinitionError::ForwardReference { .. })));
    }

    #[test]
    fn test_unknown_and_seeded_variables() {
        let unknown = Scenario::new("unknown").step(ScenarioStep::new("login", Method::Post, "/auth/{{who}}"));
        assert!(matches!(unknown.validate(), Err(DefinitionError::UnknownVariable { .. })));

        let seeded = unknown.clone().variable("who", json!("mor_2314"));
        seeded.validate().unwrap();
    }

    #[test]
    fn test_zero_step_timeout_is_rejected() {
        let yaml = r#"
name: instant
steps:
  - name: list
    path: /products
    timeout_ms: 0
"#;
        let scenario: Scenario = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(
            scenario.validate(),
            Err(DefinitionError::ZeroTimeout { ref step }) if step == "list"
        ));

        let mut ok = scenario.clone();
        ok.steps[0].timeout_ms = Some(1);
        ok.validate().unwrap();
    }

    #[test]
    fn test_empty_scenario_is_rejected() {
        assert!(matches!(Scenario::new("empty").validate(), Err(DefinitionError::NoSteps(_))));
    }

    #[test]
    fn test_join_url() {
        assert_eq!(
            join_url(Some("https://api.test/"), "/products/1").unwrap(),
            "https://api.test/products/1"
        );
        assert_eq!(
            join_url(None, "https://reqres.in/api/login").unwrap(),
            "https://reqres.in/api/login"
        );
        assert!(join_url(None, "/products").is_err());
    }

    #[test]
    fn test_check_base_url() {
        let def = Definition::from_yaml(CRUD).unwrap();
        def.check_base_url(None).unwrap();

        let relative = Definition::Scenario(Scenario::new("rel").step(ScenarioStep::new("s", Method::Get, "/x")));
        assert!(matches!(relative.check_base_url(None), Err(DefinitionError::MissingBaseUrl(_))));
        relative.check_base_url(Some("http://localhost")).unwrap();
    }

    #[test]
    fn test_extraction_sources() {
        let env = ResponseEnvelope::new(
            201,
            [("content-type", "application/json"), ("Location", "/products/21")],
            r#"{"id": 21}"#,
        );
        assert_eq!(Extraction::field("productId", "id").apply(&env).unwrap(), json!(21));
        assert_eq!(
            Extraction::header("loc", "location").apply(&env).unwrap(),
            json!("/products/21")
        );
        let missing = Extraction::field("token", "token").apply(&env).unwrap_err();
        assert!(matches!(missing, ExtractionError::MissingField { .. }));
    }

    #[test]
    fn test_load_all_and_filter() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b-crud.yaml"), CRUD).unwrap();
        std::fs::write(
            dir.path().join("a-list.yml"),
            "kind: scenario\nname: list\ntags: [smoke]\nsteps:\n  - name: list\n    path: /products\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let defs = Definition::load_all(dir.path()).unwrap();
        let names: Vec<&str> = defs.iter().map(Definition::name).collect();
        assert_eq!(names, vec!["list", "product-crud"]);
        assert_eq!(Definition::filter_by_tag(&defs, "crud").len(), 1);
    }
}
