//! Default-config command implementation

use anyhow::{Context, Result};

use crate::pipeline_config::PipelineConfig;

pub fn run() -> Result<()> {
    let json = serde_json::to_string_pretty(&PipelineConfig::default())
        .context("Failed to serialize the default configuration")?;
    println!("{json}");
    Ok(())
}
