//! JSON configuration of the numeric pipeline run by `millrace-cmd run`.

use std::{fs, path::Path};

use anyhow::{Context, Result};
use millrace::StageOptions;
use serde::{Deserialize, Serialize};

/// A source stage followed by a chain of arithmetic steps.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub inputs: Vec<i64>,
    pub source: SourceConfig,
    pub steps: Vec<StepConfig>,
    /// Options of the termination stage.
    pub sink: StageOptions,
}

impl PipelineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<PipelineConfig> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration: {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse configuration: {}", path.display()))
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            inputs: vec![23, 5, 7, 5, 42],
            source: SourceConfig::default(),
            steps: vec![
                StepConfig::new("double", Op::Mul, 2),
                StepConfig::new("reject-ten", Op::FailIf, 10),
                StepConfig::new("add-one", Op::Add, 1),
            ],
            sink: StageOptions::new().with_name("sink"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub workers: usize,
    #[serde(flatten)]
    pub options: StageOptions,
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig {
            workers: 2,
            options: StageOptions::new().with_name("source"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepConfig {
    pub op: Op,
    pub operand: i64,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(flatten)]
    pub options: StageOptions,
}

impl StepConfig {
    pub fn new(name: &str, op: Op, operand: i64) -> StepConfig {
        StepConfig {
            op,
            operand,
            workers: default_workers(),
            options: StageOptions::new().with_name(name),
        }
    }
}

fn default_workers() -> usize {
    2
}

/// The arithmetic applied by one step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Op {
    Add,
    Mul,
    /// Passes the value through, failing the item when it equals the operand.
    FailIf,
}

impl Op {
    /// Applies the step to `value`. Panics on rejection or overflow; the stage
    /// captures the panic as the item's failure.
    pub fn apply(self, value: i64, operand: i64) -> i64 {
        match self {
            Op::Add => match value.checked_add(operand) {
                Some(v) => v,
                None => panic!("{value} + {operand} overflows"),
            },
            Op::Mul => match value.checked_mul(operand) {
                Some(v) => v,
                None => panic!("{value} * {operand} overflows"),
            },
            Op::FailIf => {
                if value == operand {
                    panic!("value {value} rejected");
                }
                value
            }
        }
    }
}
