//! Run command implementation

use std::{
    panic,
    sync::{Arc, Mutex, PoisonError},
    time::Instant,
};

use anyhow::{Context, Result};
use millrace::{ContinuationStage, DataStage, Deferred, Stage, TerminationStage};
use serde::Serialize;

use crate::pipeline_config::PipelineConfig;

#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub inputs: usize,
    pub stages: Vec<String>,
    /// Values that made it through every step, in input order.
    pub values: Vec<i64>,
    /// Messages of the items that failed in some step, in input order.
    pub failures: Vec<String>,
    pub elapsed_ms: u128,
}

pub fn run(config_path: Option<String>, inputs: Vec<i64>) -> Result<()> {
    let mut config = match config_path {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };
    if !inputs.is_empty() {
        config.inputs = inputs;
    }

    let summary = with_quiet_panics(|| run_pipeline(&config));
    let json =
        serde_json::to_string_pretty(&summary?).context("Failed to serialize run summary")?;
    println!("{json}");
    Ok(())
}

/// Runs `f` with panics reported through `log::debug!` instead of stderr, then
/// reinstalls whatever hook was in place before.
///
/// Failing items are part of the expected output of a run.
pub fn with_quiet_panics<R>(f: impl FnOnce() -> R) -> R {
    let previous = panic::take_hook();
    panic::set_hook(Box::new(|info| log::debug!("item failed: {info}")));
    let result = f();
    panic::set_hook(previous);
    result
}

/// Builds the configured pipeline, pushes every input through it and collects
/// what reaches the sink.
pub fn run_pipeline(config: &PipelineConfig) -> Result<RunSummary> {
    let start = Instant::now();

    let source = DataStage::with_options(
        config.source.workers,
        config.source.options.clone(),
        |x: i64| x,
    )
    .context("Failed to build the source stage")?;
    let mut stages = vec![source.name().to_string()];

    let mut steps: Vec<ContinuationStage<i64, i64>> = Vec::with_capacity(config.steps.len());
    for (i, step) in config.steps.iter().enumerate() {
        let (op, operand) = (step.op, step.operand);
        let transform = move |d: Deferred<i64>| op.apply(d.join(), operand);
        let stage = match steps.last() {
            Some(prev) => {
                ContinuationStage::with_options(step.workers, step.options.clone(), prev, transform)
            }
            None => ContinuationStage::with_options(
                step.workers,
                step.options.clone(),
                &source,
                transform,
            ),
        }
        .with_context(|| format!("Failed to build step {i}"))?;
        stages.push(stage.name().to_string());
        steps.push(stage);
    }

    let collected = Arc::new(Mutex::new((Vec::new(), Vec::new())));
    let collect = {
        let collected = collected.clone();
        move |d: Deferred<i64>| {
            let outcome = d.wait();
            let mut collected = collected.lock().unwrap_or_else(PoisonError::into_inner);
            match outcome {
                Ok(value) => collected.0.push(value),
                Err(failure) => collected.1.push(failure.to_string()),
            }
        }
    };
    let sink = match steps.last() {
        Some(last) => TerminationStage::with_options(config.sink.clone(), last, collect),
        None => TerminationStage::with_options(config.sink.clone(), &source, collect),
    }
    .context("Failed to build the sink stage")?;
    stages.push(sink.name().to_string());
    log::info!("running pipeline: {}", stages.join(" -> "));

    for &input in &config.inputs {
        source.push(input)?;
    }
    source.cancel();
    sink.wait();

    let (values, failures) =
        std::mem::take(&mut *collected.lock().unwrap_or_else(PoisonError::into_inner));
    Ok(RunSummary {
        inputs: config.inputs.len(),
        stages,
        values,
        failures,
        elapsed_ms: start.elapsed().as_millis(),
    })
}
