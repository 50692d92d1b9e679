//! Error types for the harness
//!
//! Only [`TransportError`] and [`ExtractionError`] stop a scenario. A
//! [`ParseError`] is recorded on the envelope and assertion failures are
//! plain [`crate::AssertionResult`] values, so neither is raised.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure of the HTTP call itself
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum TransportError {
    #[error("Request timed out after {after_ms} ms")]
    Timeout { after_ms: u64 },

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Request failed: {0}")]
    Request(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl TransportError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout { .. })
    }
}

/// Why a response body was not parsed
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ParseError {
    #[error("Body not parsed for error status {0}")]
    SkippedErrorStatus(u16),

    #[error("Response has no content-type header")]
    MissingContentType,

    #[error("Content-type is not structured: {0}")]
    UnstructuredContentType(String),

    #[error("Malformed body: {0}")]
    Malformed(String),
}

/// A value a step needs was never produced
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExtractionError {
    #[error("Variable '{name}' is not set in the scenario context")]
    UnsetVariable { name: String },

    #[error("Cannot extract '{name}': response has no field at '{path}'")]
    MissingField { name: String, path: String },

    #[error("Cannot extract '{name}': response has no '{header}' header")]
    MissingHeader { name: String, header: String },
}

/// Problems with a definition file, found before anything is sent
#[derive(Error, Debug)]
pub enum DefinitionError {
    #[error("Definition parse error: {0}")]
    Parse(String),

    #[error("Invalid status pattern: {0}")]
    InvalidStatus(String),

    #[error("Step '{step}' references '{variable}' before the step that extracts it")]
    ForwardReference { step: String, variable: String },

    #[error("Step '{step}' references '{variable}', which no earlier step extracts")]
    UnknownVariable { step: String, variable: String },

    #[error("'{0}' has no steps")]
    NoSteps(String),

    #[error("Rate-limit probe '{0}' needs at least one attempt and one class")]
    EmptyRateProbe(String),

    #[error("Rate-limit probe '{name}' asks for {attempts} attempts, at most {max} allowed")]
    TooManyAttempts { name: String, attempts: usize, max: usize },

    #[error("Step '{step}' has a zero timeout")]
    ZeroTimeout { step: String },

    #[error("No base URL for relative path '{0}'")]
    MissingBaseUrl(String),
}

/// Why a single templated call could not produce an envelope
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Definition(#[from] DefinitionError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type HarnessResult<T> = Result<T, HarnessError>;
