use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Host-side scheduling and liveness settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Seconds without a heartbeat before a runner is declared dead
    pub heartbeat_grace_secs: u64,
    /// Seconds between liveness sweeps
    pub sweep_interval_secs: u64,
    /// Times a file is requeued after its runner died before it is marked
    /// failed. `None` requeues forever.
    pub max_reclaims: Option<u32>,
    /// Honour per-library processing orders other than as-found
    pub ordering_entitled: bool,
    /// Runner budget given to nodes that register without one
    pub default_max_runners: usize,
}

impl SchedulerConfig {
    pub fn heartbeat_grace(&self) -> Duration {
        Duration::from_secs(self.heartbeat_grace_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            heartbeat_grace_secs: 60,
            sweep_interval_secs: 15,
            max_reclaims: Some(3),
            ordering_entitled: true,
            default_max_runners: 1,
        }
    }
}
