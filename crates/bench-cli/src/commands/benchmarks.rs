//! Benchmark catalog listing

use crate::output::{row_pairs, Formattable, OutputFormat, OutputFormatter};
use anyhow::Result;
use bench_core::Config;
use serde::Serialize;

#[derive(Debug, Serialize)]
struct BenchmarkRow {
    name: String,
    kind: String,
    image: String,
    accelerators: u32,
    memory: String,
    timeout_secs: u64,
    smoke_samples: Option<u32>,
    threshold: Option<String>,
}

impl BenchmarkRow {
    fn collect(config: &Config) -> Vec<Self> {
        config
            .benchmarks
            .iter()
            .map(|b| Self {
                name: b.name.clone(),
                kind: b.kind.clone(),
                image: b.image.clone(),
                accelerators: b.accelerators,
                memory: b.memory.clone(),
                timeout_secs: b.timeout_secs,
                smoke_samples: b.smoke_samples,
                threshold: config
                    .threshold(&b.kind)
                    .map(|t| format!("{} >= {}", t.metric, t.min)),
            })
            .collect()
    }
}

impl Formattable for BenchmarkRow {
    fn table_headers() -> Vec<String> {
        vec![
            "Name".to_string(),
            "Kind".to_string(),
            "Image".to_string(),
            "Accelerators".to_string(),
            "Memory".to_string(),
            "Timeout".to_string(),
            "Smoke Samples".to_string(),
            "Threshold".to_string(),
        ]
    }

    fn table_row(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            self.kind.clone(),
            self.image.clone(),
            self.accelerators.to_string(),
            self.memory.clone(),
            format!("{}s", self.timeout_secs),
            self.smoke_samples.map(|n| n.to_string()).unwrap_or_else(|| "-".to_string()),
            self.threshold.clone().unwrap_or_else(|| "-".to_string()),
        ]
    }

    fn key_value_pairs(&self) -> Vec<(String, String)> {
        row_pairs(self)
    }
}

/// List the configured benchmark catalog
pub fn list_benchmarks(config: &Config, output_format: OutputFormat) -> Result<()> {
    let formatter = OutputFormatter::new(output_format);
    formatter.print_list(&BenchmarkRow::collect(config))
}
