//! Output formatting for benchctl

use anyhow::Result;
use clap::ValueEnum;
use colored::*;
use comfy_table::{presets::UTF8_FULL, Attribute, Cell, Color, ContentArrangement, Table};
use serde::Serialize;

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format
    Json,
    /// YAML format
    Yaml,
    /// Compact text format
    Text,
}

/// Types that can be rendered as a table row or a key-value block
pub trait Formattable {
    fn table_headers() -> Vec<String>;
    fn table_row(&self) -> Vec<String>;

    /// Key-value pairs for the detailed view
    fn key_value_pairs(&self) -> Vec<(String, String)>;
}

/// Output formatter
pub struct OutputFormatter {
    format: OutputFormat,
}

impl OutputFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn is_structured(&self) -> bool {
        matches!(self.format, OutputFormat::Json | OutputFormat::Yaml)
    }

    /// Print any serializable value in a structured format. Tabular
    /// formats fall back to YAML.
    pub fn print_value<T: Serialize>(&self, value: &T) -> Result<()> {
        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
            OutputFormat::Yaml | OutputFormat::Table | OutputFormat::Text => {
                print!("{}", serde_yaml::to_string(value)?)
            }
        }
        Ok(())
    }

    /// Format and print a single item
    pub fn print_item<T>(&self, item: &T) -> Result<()>
    where
        T: Serialize + Formattable,
    {
        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(item)?),
            OutputFormat::Yaml => print!("{}", serde_yaml::to_string(item)?),
            OutputFormat::Table => {
                for (key, value) in item.key_value_pairs() {
                    println!("{}: {}", key.bold().cyan(), value);
                }
            }
            OutputFormat::Text => {
                for (key, value) in item.key_value_pairs() {
                    println!("{}: {}", key, value);
                }
            }
        }
        Ok(())
    }

    /// Format and print a list of items
    pub fn print_list<T>(&self, items: &[T]) -> Result<()>
    where
        T: Serialize + Formattable,
    {
        if items.is_empty() {
            match self.format {
                OutputFormat::Json | OutputFormat::Yaml => println!("[]"),
                OutputFormat::Table | OutputFormat::Text => {
                    println!("{}", "No items found".dimmed());
                }
            }
            return Ok(());
        }

        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(items)?),
            OutputFormat::Yaml => print!("{}", serde_yaml::to_string(items)?),
            OutputFormat::Table => self.print_table(items),
            OutputFormat::Text => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        println!();
                    }
                    for (key, value) in item.key_value_pairs() {
                        println!("{}: {}", key, value);
                    }
                }
            }
        }
        Ok(())
    }

    fn print_table<T: Formattable>(&self, items: &[T]) {
        println!("{}", render_table(items));
    }

    /// Status lines go to human formats only, keeping structured output
    /// a single parseable document.
    pub fn print_success(&self, message: &str) {
        if !self.is_structured() {
            println!("{} {}", "✓".green().bold(), message.green());
        }
    }

    pub fn print_warning(&self, message: &str) {
        if !self.is_structured() {
            eprintln!("{} {}", "⚠".yellow().bold(), message.yellow());
        }
    }

    pub fn print_info(&self, message: &str) {
        if !self.is_structured() {
            println!("{} {}", "ℹ".blue().bold(), message.blue());
        }
    }

    /// Print a progress message (only for interactive formats)
    pub fn print_progress(&self, message: &str) {
        if !self.is_structured() {
            eprintln!("{} {}...", "⏳".yellow(), message);
        }
    }
}

/// Render items as a UTF-8 table with bold cyan headers
pub fn render_table<T: Formattable>(items: &[T]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);

    let headers: Vec<Cell> = T::table_headers()
        .into_iter()
        .map(|h| Cell::new(h).add_attribute(Attribute::Bold).fg(Color::Cyan))
        .collect();
    table.set_header(headers);

    for item in items {
        table.add_row(item.table_row());
    }
    table
}

/// Pair each table header with its column value
pub fn row_pairs<T: Formattable>(item: &T) -> Vec<(String, String)> {
    T::table_headers().into_iter().zip(item.table_row()).collect()
}

/// Format a duration in seconds as `1h 2m`, `3m 4s` or `5.0s`
pub fn format_duration(seconds: f64) -> String {
    let whole = seconds as u64;
    if whole < 60 {
        format!("{:.1}s", seconds)
    } else if whole < 3600 {
        format!("{}m {}s", whole / 60, whole % 60)
    } else {
        format!("{}h {}m", whole / 3600, (whole % 3600) / 60)
    }
}

/// Colorize a state or verdict label
pub fn colorize_status(status: &str) -> ColoredString {
    match status.to_lowercase().as_str() {
        "pass" | "succeeded" | "ready" | "joined" | "clean" => status.green(),
        "fail" | "failed" | "executionfailed" | "timedout" | "unschedulable" | "podstarttimeout"
        | "orchestratorunreachable" | "unreachable" => status.red(),
        "warn" | "running" | "pending" | "partially-initialized" | "partially-joined" => status.yellow(),
        "unknown" => status.dimmed(),
        _ => status.normal(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Row {
        name: String,
        state: String,
    }

    impl Formattable for Row {
        fn table_headers() -> Vec<String> {
            vec!["Name".to_string(), "State".to_string()]
        }

        fn table_row(&self) -> Vec<String> {
            vec![self.name.clone(), self.state.clone()]
        }

        fn key_value_pairs(&self) -> Vec<(String, String)> {
            vec![
                ("Name".to_string(), self.name.clone()),
                ("State".to_string(), self.state.clone()),
            ]
        }
    }

    #[test]
    fn test_default_format_is_table() {
        assert_eq!(OutputFormat::default(), OutputFormat::Table);
        assert!(OutputFormatter::new(OutputFormat::Json).is_structured());
        assert!(!OutputFormatter::new(OutputFormat::Text).is_structured());
    }

    #[test]
    fn test_render_table_contains_rows() {
        let rows = vec![
            Row {
                name: "mmlu".to_string(),
                state: "Succeeded".to_string(),
            },
            Row {
                name: "inference".to_string(),
                state: "TimedOut".to_string(),
            },
        ];
        let rendered = render_table(&rows).to_string();
        assert!(rendered.contains("mmlu"));
        assert!(rendered.contains("TimedOut"));
        assert!(rendered.contains("State"));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(4.0), "4.0s");
        assert_eq!(format_duration(125.0), "2m 5s");
        assert_eq!(format_duration(3723.0), "1h 2m");
    }
}
