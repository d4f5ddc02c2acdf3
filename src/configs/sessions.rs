use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Limits for the session store.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SessionsConfig {
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    #[serde(default = "default_max_queue_length")]
    pub max_queue_length: usize,
    /// Sessions untouched for longer than this are swept unless playing.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Size of the recently-played ring used by auto-continue.
    #[serde(default = "default_recent_history")]
    pub recent_history: usize,
}

impl SessionsConfig {
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            max_sessions: default_max_sessions(),
            max_queue_length: default_max_queue_length(),
            stale_after_secs: default_stale_after_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            recent_history: default_recent_history(),
        }
    }
}

fn default_max_sessions() -> usize {
    5000
}

fn default_max_queue_length() -> usize {
    1000
}

fn default_stale_after_secs() -> u64 {
    3600
}

fn default_sweep_interval_secs() -> u64 {
    300
}

fn default_recent_history() -> usize {
    20
}
