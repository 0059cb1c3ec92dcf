//! Engine-wide tuning knobs.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

const DEFAULT_POLL_INTERVAL_MS: u64 = 10;
const DEFAULT_QUEUE_WARN_LEN: usize = 10_000;

/// Tuning knobs shared by every stage's worker loop.
///
/// The poll interval is the one constant spec.md calls out as arbitrary
/// (§4.2, §9): the worker loop pops from its queue, and only sleeps for
/// this long when the queue was empty and the stage isn't flushing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// How long an idle worker sleeps between polls of its input queue.
    pub poll_interval_ms: u64,
    /// Queue length at which [`crate::core::StageCore::has_inputs`] backlog
    /// is logged as a warning. Diagnostic only: the queue is unbounded and
    /// this never rejects or blocks an enqueue.
    pub queue_warn_len: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            queue_warn_len: DEFAULT_QUEUE_WARN_LEN,
        }
    }
}

impl EngineConfig {
    /// Builds a config from `PIPELINE_POLL_INTERVAL_MS` /
    /// `PIPELINE_QUEUE_WARN_LEN`, falling back to defaults when either is
    /// unset.
    pub fn from_env() -> Result<Self, PipelineError> {
        let mut config = Self::default();

        if let Ok(raw) = std::env::var("PIPELINE_POLL_INTERVAL_MS") {
            config.poll_interval_ms =
                raw.parse()
                    .map_err(|source| PipelineError::InvalidEnvVar {
                        var: "PIPELINE_POLL_INTERVAL_MS".to_string(),
                        source,
                    })?;
        }

        if let Ok(raw) = std::env::var("PIPELINE_QUEUE_WARN_LEN") {
            config.queue_warn_len =
                raw.parse()
                    .map_err(|source| PipelineError::InvalidEnvVar {
                        var: "PIPELINE_QUEUE_WARN_LEN".to_string(),
                        source,
                    })?;
        }

        Ok(config)
    }

    /// The poll interval as a [`Duration`].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_spec_poll_interval() {
        let config = EngineConfig::default();
        assert_eq!(config.poll_interval(), Duration::from_millis(10));
    }

    #[test]
    fn from_env_falls_back_to_defaults_when_unset() {
        std::env::remove_var("PIPELINE_POLL_INTERVAL_MS");
        std::env::remove_var("PIPELINE_QUEUE_WARN_LEN");
        let config = EngineConfig::from_env().unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn from_env_rejects_malformed_values() {
        std::env::set_var("PIPELINE_POLL_INTERVAL_MS", "not-a-number");
        let result = EngineConfig::from_env();
        std::env::remove_var("PIPELINE_POLL_INTERVAL_MS");
        assert!(result.is_err());
    }
}
