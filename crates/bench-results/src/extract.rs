//! Per-kind metric extraction rules

use bench_core::{MetricRecord, MetricValue};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};

/// Where the number sits relative to the marker text
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Anchor {
    /// First number following the marker (`ROUGE-L: 0.2457`)
    After(String),
    /// Last number preceding the marker (`62.44 tok/s`)
    Before(String),
}

/// A named, line-matching rule producing one metric
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionRule {
    pub metric: String,
    pub anchor: Anchor,
    /// Only lines containing this text are considered
    pub line_filter: Option<String>,
    /// Convert `NN%` to a fraction
    pub percent: bool,
}

impl ExtractionRule {
    pub fn after(metric: &str, marker: &str) -> Self {
        Self {
            metric: metric.to_string(),
            anchor: Anchor::After(marker.to_string()),
            line_filter: None,
            percent: false,
        }
    }

    pub fn before(metric: &str, marker: &str) -> Self {
        Self {
            metric: metric.to_string(),
            anchor: Anchor::Before(marker.to_string()),
            line_filter: None,
            percent: false,
        }
    }

    pub fn on_lines_containing(mut self, filter: &str) -> Self {
        self.line_filter = Some(filter.to_string());
        self
    }

    pub fn percent(mut self) -> Self {
        self.percent = true;
        self
    }

    /// Value this rule produces for a single line, if it matches
    pub fn apply(&self, line: &str) -> Option<f64> {
        if let Some(filter) = &self.line_filter {
            if !line.contains(filter.as_str()) {
                return None;
            }
        }

        let (number, rest) = match &self.anchor {
            Anchor::After(marker) => {
                let start = line.find(marker.as_str())? + marker.len();
                leading_number(&line[start..])?
            }
            Anchor::Before(marker) => {
                let end = line.find(marker.as_str())?;
                (trailing_number(&line[..end])?, &line[end..])
            }
        };

        let value: f64 = number.parse().ok()?;
        if self.percent && rest.starts_with('%') {
            Some(value / 100.0)
        } else {
            Some(value)
        }
    }
}

fn is_number_char(c: char) -> bool {
    c.is_ascii_digit() || c == '.' || c == '-'
}

/// Number at the start of `text` (after whitespace) and whatever follows it
fn leading_number(text: &str) -> Option<(&str, &str)> {
    let text = text.trim_start();
    let end = text
        .char_indices()
        .find(|(_, c)| !is_number_char(*c))
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    if end == 0 {
        return None;
    }
    Some((&text[..end], &text[end..]))
}

/// Number at the end of `text` (before trailing whitespace)
fn trailing_number(text: &str) -> Option<&str> {
    let text = text.trim_end();
    let start = text
        .char_indices()
        .rev()
        .take_while(|(_, c)| is_number_char(*c))
        .last()
        .map(|(i, _)| i)?;
    Some(&text[start..])
}

/// Extraction rules keyed by benchmark kind
#[derive(Debug, Clone, Default)]
pub struct ExtractorRegistry {
    rules: BTreeMap<String, Vec<ExtractionRule>>,
}

impl ExtractorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with rules for every built-in benchmark kind
    pub fn builtin() -> Self {
        let mut registry = Self::new();

        registry.register(
            "mlperf-summarization",
            vec![
                ExtractionRule::after("rouge1", "ROUGE-1:"),
                ExtractionRule::after("rouge2", "ROUGE-2:"),
                ExtractionRule::after("rougeL", "ROUGE-L:"),
                ExtractionRule::after("samples", "Samples:"),
                ExtractionRule::after("samples_per_s", "Throughput:").on_lines_containing("Samples:"),
            ],
        );

        registry.register(
            "mmlu-pro",
            vec![
                ExtractionRule::after("accuracy", "Overall Accuracy:").percent(),
                ExtractionRule::after("questions_per_s", "Throughput:").on_lines_containing("Time:"),
            ],
        );

        registry.register(
            "mmlu",
            vec![
                ExtractionRule::after("accuracy", "Overall accuracy:"),
                ExtractionRule::after("completion_rate", "Completion rate:").percent(),
                ExtractionRule::after("failed_questions", "Questions failed:"),
                ExtractionRule::after("avg_response_time_s", "Average response time:"),
            ],
        );

        registry.register(
            "inference-throughput",
            vec![
                ExtractionRule::before("single_tokens_per_s", " tok/s").on_lines_containing("Tokens:"),
                ExtractionRule::after("batch_tokens_per_s", "Throughput:"),
            ],
        );

        registry
    }

    /// Register (or replace) the rules for a kind
    pub fn register(&mut self, kind: &str, rules: Vec<ExtractionRule>) {
        self.rules.insert(kind.to_string(), rules);
    }

    pub fn rules_for(&self, kind: &str) -> Option<&[ExtractionRule]> {
        self.rules.get(kind).map(Vec::as_slice)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.rules.keys().map(String::as_str)
    }

    /// Apply every rule for `kind` to `text`. The last matching line wins;
    /// metrics whose rule never matched are recorded as unavailable.
    pub fn extract(&self, kind: &str, text: &str) -> MetricRecord {
        let Some(rules) = self.rules.get(kind) else {
            debug!(kind, "no extraction rules registered");
            return MetricRecord::new();
        };

        let mut record = MetricRecord::new();
        for rule in rules {
            let value = text.lines().filter_map(|line| rule.apply(line)).last();
            match value {
                Some(v) => record.insert(rule.metric.as_str(), MetricValue::Value(v)),
                None => {
                    debug!(kind, metric = %rule.metric, "metric line not found");
                    record.insert(rule.metric.as_str(), MetricValue::Unavailable);
                }
            }
        }
        record
    }

    /// Extract from a log artifact. An unreadable artifact yields all metrics unavailable.
    pub fn extract_file(&self, kind: &str, path: &Path) -> MetricRecord {
        match std::fs::read(path) {
            Ok(bytes) => self.extract(kind, &String::from_utf8_lossy(&bytes)),
            Err(e) => {
                warn!(kind, path = %path.display(), error = %e, "log artifact unreadable");
                self.extract(kind, "")
            }
        }
    }
}
