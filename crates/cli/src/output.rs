//! Output formatting for CLI

use clap::ValueEnum;
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};
use serde::Serialize;

use apiprobe_harness::report::DefinitionReport;
use apiprobe_harness::{Definition, SuiteReport};

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format
    Json,
    /// YAML format
    Yaml,
}

/// Trait for items that can be displayed in a table
pub trait TableDisplay {
    fn headers() -> Vec<&'static str>;
    fn row(&self) -> Vec<String>;
}

fn table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// Print a serializable value as JSON or YAML
pub fn print_structured<T: Serialize + ?Sized>(value: &T, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
        _ => println!("{}", serde_json::to_string_pretty(value)?),
    }
    Ok(())
}

/// Print a list of items
pub fn print_list<T: Serialize + TableDisplay>(items: &[T], format: OutputFormat) -> anyhow::Result<()> {
    if items.is_empty() && format == OutputFormat::Table {
        println!("No items found.");
        return Ok(());
    }

    match format {
        OutputFormat::Table => {
            let mut table = table();
            table.set_header(T::headers());
            for item in items {
                table.add_row(item.row());
            }
            println!("{table}");
            Ok(())
        }
        _ => print_structured(items, format),
    }
}

/// Row view of a loaded definition
#[derive(Serialize)]
pub struct DefinitionDisplay {
    pub name: String,
    pub kind: &'static str,
    pub tags: Vec<String>,
    pub calls: String,
    pub description: String,
}

impl From<&Definition> for DefinitionDisplay {
    fn from(definition: &Definition) -> Self {
        let calls = match definition {
            Definition::Scenario(s) => format!("{} step(s)", s.steps.len()),
            Definition::Idempotency(p) => format!("2 x {} {}", p.request.method, p.request.path),
            Definition::RateLimit(p) => format!("{} x {} {}", p.attempts, p.request.method, p.request.path),
        };
        Self {
            name: definition.name().to_string(),
            kind: definition.kind(),
            tags: definition.tags().to_vec(),
            calls,
            description: definition.description().to_string(),
        }
    }
}

impl TableDisplay for DefinitionDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Name", "Kind", "Tags", "Calls", "Description"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            self.kind.to_string(),
            self.tags.join(", "),
            self.calls.clone(),
            self.description.clone(),
        ]
    }
}

/// Print a suite report: a results table plus the failed assertions
pub fn print_report(report: &SuiteReport, format: OutputFormat) -> anyhow::Result<()> {
    if format != OutputFormat::Table {
        return print_structured(report, format);
    }

    let mut table = table();
    table.set_header(vec!["Name", "Kind", "Result", "Duration", "Detail"]);
    for result in &report.results {
        let (label, color) = if result.passed() {
            ("PASS", Color::Green)
        } else {
            ("FAIL", Color::Red)
        };
        table.add_row(vec![
            Cell::new(result.name()),
            Cell::new(result.kind()),
            Cell::new(label).fg(color),
            Cell::new(format!("{} ms", result.duration_ms())),
            Cell::new(if result.passed() { String::new() } else { result.summary() }),
        ]);
    }
    println!("{table}");

    for result in report.results.iter().filter(|r| !r.passed()) {
        print_failures(result);
    }

    let summary = format!(
        "{} passed, {} failed, {} total in {} ms (started {})",
        report.passed,
        report.failed,
        report.total,
        report.duration_ms,
        report.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    if report.success() {
        print_success(&summary);
    } else {
        print_error(&summary);
    }
    Ok(())
}

fn print_failures(result: &DefinitionReport) {
    println!("\n{}", result.name().bold());
    match result {
        DefinitionReport::Scenario(scenario) => {
            for step in &scenario.steps {
                if let Some(reason) = step.failure_reason() {
                    let target = step.url.as_deref().unwrap_or("-");
                    println!("  {} {} {} ({})", "✗".red(), step.name, target.dimmed(), reason);
                    for assertion in step.assertions.iter().filter(|a| !a.passed()) {
                        println!("      {}", assertion);
                    }
                    if let Some(error) = &step.error {
                        println!("      {}", error.dimmed());
                    }
                }
            }
        }
        DefinitionReport::Idempotency(probe) => {
            for assertion in probe.assertions.iter().filter(|a| !a.passed()) {
                println!("  {} {}", "✗".red(), assertion);
            }
            if let Some(error) = &probe.error {
                println!("  {} {}", "✗".red(), error);
            }
        }
        DefinitionReport::RateLimit(probe) => {
            for attempt in probe.attempts.iter().filter(|a| probe.offending.contains(&a.index)) {
                let status = attempt.status.map(|s| s.to_string()).unwrap_or_default();
                println!("  {} attempt {} returned {}", "✗".red(), attempt.index, status);
            }
            if let Some(error) = &probe.error {
                println!("  {} {}", "✗".red(), error);
            }
        }
    }
}

/// Print success message
pub fn print_success(message: &str) {
    println!("✅ {}", message);
}

/// Print error message
pub fn print_error(message: &str) {
    eprintln!("❌ {}", message);
}

/// Print warning message
pub fn print_warning(message: &str) {
    println!("⚠️  {}", message);
}
