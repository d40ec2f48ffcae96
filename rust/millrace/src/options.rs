//! Stage configuration.

use std::time::Duration;

use millrace_workflow::worker_pool::DEFAULT_POLL_INTERVAL;
use serde::{Deserialize, Serialize};

/// Options shared by all stage types.
///
/// The worker count is not part of the options: it is a required constructor
/// argument of every stage that owns a pool.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageOptions {
    /// Stage name, used in error messages, log records and thread names
    /// (`{name}-worker-{i}`, `{name}-bridge`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// How long idle workers and bridging threads block before re-checking
    /// cancellation. Bounds the shutdown latency of a stage.
    #[serde(rename = "poll_interval_ms", with = "duration_ms")]
    pub poll_interval: Duration,
}

impl StageOptions {
    pub fn new() -> StageOptions {
        StageOptions::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> StageOptions {
        self.name = Some(name.into());
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> StageOptions {
        self.poll_interval = poll_interval;
        self
    }

    /// The configured name, or `default` when none is set.
    pub(crate) fn name_or(&self, default: &str) -> String {
        self.name.clone().unwrap_or_else(|| default.to_string())
    }
}

impl Default for StageOptions {
    fn default() -> Self {
        StageOptions {
            name: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
