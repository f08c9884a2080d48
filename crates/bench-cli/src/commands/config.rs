//! Configuration commands

use crate::output::{OutputFormat, OutputFormatter};
use crate::ConfigCommands;
use anyhow::Result;
use bench_core::Config;
use std::path::Path;

/// Handle config commands
pub fn handle_config_command(
    config: &Config,
    source: Option<&Path>,
    action: ConfigCommands,
    output_format: OutputFormat,
) -> Result<()> {
    let formatter = OutputFormatter::new(output_format);

    match action {
        ConfigCommands::Show => {
            formatter.print_value(config)?;
        }
        ConfigCommands::Validate => {
            config.validate()?;
            let origin = match source {
                Some(path) => path.display().to_string(),
                None => "defaults, standard locations and BENCHCTL_* environment".to_string(),
            };
            if formatter.is_structured() {
                formatter.print_value(&serde_json::json!({
                    "valid": true,
                    "source": origin,
                    "benchmarks": config.benchmarks.len(),
                }))?;
            } else {
                formatter.print_success(&format!(
                    "Configuration is valid ({} benchmark(s), loaded from {})",
                    config.benchmarks.len(),
                    origin
                ));
            }
        }
    }

    Ok(())
}
