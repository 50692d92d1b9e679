//! CLI Commands

pub mod list;
pub mod run;
pub mod validate;

use anyhow::{bail, Context, Result};
use clap::Args;
use std::path::{Path, PathBuf};
use tracing::debug;

use apiprobe_harness::{Definition, HarnessConfig};

/// Config file picked up from the working directory when `--config` is absent
const DEFAULT_CONFIG: &str = "apiprobe.toml";

/// Where definitions come from and which of them to use
#[derive(Args, Debug, Clone)]
pub struct SourceArgs {
    /// Path to definitions directory
    #[arg(short, long, default_value = "scenarios")]
    pub specs: PathBuf,

    /// Use only definitions with this tag
    #[arg(short, long)]
    pub tag: Option<String>,

    /// Use only the definition with this name
    #[arg(short, long)]
    pub name: Option<String>,

    /// Harness configuration file (TOML)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Base URL for definitions that do not declare one
    #[arg(long, env = "APIPROBE_BASE_URL")]
    pub base_url: Option<String>,
}

impl SourceArgs {
    /// Config file values, with `--base-url` on top
    pub fn load_config(&self) -> Result<HarnessConfig> {
        let mut config = match &self.config {
            Some(path) => HarnessConfig::from_file(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None if Path::new(DEFAULT_CONFIG).is_file() => {
                debug!("Using {}", DEFAULT_CONFIG);
                HarnessConfig::from_file(Path::new(DEFAULT_CONFIG))?
            }
            None => HarnessConfig::default(),
        };
        if let Some(base_url) = &self.base_url {
            config.base_url = Some(base_url.clone());
        }
        config.validate()?;
        Ok(config)
    }

    /// Load, validate and filter the definitions
    pub fn load_definitions(&self) -> Result<Vec<Definition>> {
        let definitions = Definition::load_all(&self.specs)
            .with_context(|| format!("failed to load definitions from {}", self.specs.display()))?;
        let selected = select(definitions, self.tag.as_deref(), self.name.as_deref());
        if selected.is_empty() {
            bail!("no definitions selected from {}", self.specs.display());
        }
        Ok(selected)
    }
}

pub fn select(definitions: Vec<Definition>, tag: Option<&str>, name: Option<&str>) -> Vec<Definition> {
    definitions
        .into_iter()
        .filter(|d| tag.map_or(true, |tag| d.tags().iter().any(|t| t == tag)))
        .filter(|d| name.map_or(true, |name| d.name() == name))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use apiprobe_harness::{Method, Scenario, ScenarioStep};

    fn scenario(name: &str, tags: &[&str]) -> Definition {
        let mut scenario = Scenario::new(name).step(ScenarioStep::new("list", Method::Get, "/products"));
        scenario.tags = tags.iter().map(|t| t.to_string()).collect();
        Definition::Scenario(scenario)
    }

    #[test]
    fn test_select_by_tag_and_name() {
        let all = vec![
            scenario("catalog", &["smoke", "products"]),
            scenario("crud", &["products"]),
            scenario("login", &["auth"]),
        ];

        let names = |defs: Vec<Definition>| defs.iter().map(|d| d.name().to_string()).collect::<Vec<_>>();
        assert_eq!(names(select(all.clone(), Some("products"), None)), vec!["catalog", "crud"]);
        assert_eq!(names(select(all.clone(), Some("products"), Some("crud"))), vec!["crud"]);
        assert_eq!(names(select(all.clone(), None, None)).len(), 3);
        assert!(select(all, Some("payments"), None).is_empty());
    }

    #[test]
    fn test_base_url_flag_overrides_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("apiprobe.toml");
        std::fs::write(&path, "base_url = \"https://fakestoreapi.com\"\ntimeout_ms = 5000\n").unwrap();

        let mut args = SourceArgs {
            specs: dir.path().to_path_buf(),
            tag: None,
            name: None,
            config: Some(path),
            base_url: None,
        };
        let config = args.load_config().unwrap();
        assert_eq!(config.base_url.as_deref(), Some("https://fakestoreapi.com"));
        assert_eq!(config.timeout_ms, 5000);

        args.base_url = Some("http://127.0.0.1:3000".into());
        assert_eq!(
            args.load_config().unwrap().base_url.as_deref(),
            Some("http://127.0.0.1:3000")
        );
    }

    #[test]
    fn test_empty_selection_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let args = SourceArgs {
            specs: dir.path().to_path_buf(),
            tag: None,
            name: None,
            config: None,
            base_url: None,
        };
        assert!(args.load_definitions().is_err());
    }
}
