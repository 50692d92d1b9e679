//! Harness configuration

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{HarnessError, HarnessResult};

/// Configuration shared by every scenario and probe in a run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Base URL for relative paths; a definition's own `base_url` wins
    pub base_url: Option<String>,

    /// Bounded wait for each HTTP call
    pub timeout_ms: u64,

    /// Headers sent with every request (step headers override)
    pub default_headers: BTreeMap<String, String>,

    /// Keys whose values never appear in logs or reports
    pub redact: Vec<String>,

    /// Scenarios run in parallel
    pub concurrency: usize,

    /// Whole-scenario budget; steps stop being issued once exceeded
    pub scenario_budget_ms: Option<u64>,

    pub user_agent: String,

    /// Output directory for results
    pub output_dir: PathBuf,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_ms: 10_000,
            default_headers: BTreeMap::new(),
            redact: vec![
                "token".to_string(),
                "password".to_string(),
                "authorization".to_string(),
            ],
            concurrency: 4,
            scenario_budget_ms: None,
            user_agent: format!("apiprobe/{}", env!("CARGO_PKG_VERSION")),
            output_dir: PathBuf::from("test-results"),
        }
    }
}

impl HarnessConfig {
    pub fn from_toml(text: &str) -> HarnessResult<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> HarnessResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn validate(&self) -> HarnessResult<()> {
        if self.timeout_ms == 0 {
            return Err(HarnessError::Config("timeout_ms must be positive".into()));
        }
        if self.concurrency == 0 {
            return Err(HarnessError::Config("concurrency must be at least 1".into()));
        }
        if let Some(base) = &self.base_url {
            if !base.starts_with("http://") && !base.starts_with("https://") {
                return Err(HarnessError::Config(format!(
                    "base_url must be an http(s) URL: {}",
                    base
                )));
            }
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn scenario_budget(&self) -> Option<Duration> {
        self.scenario_budget_ms.map(Duration::from_millis)
    }
}
