use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct VotesConfig {
    /// Fraction of listeners whose votes are required.
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default = "default_min_votes")]
    pub min_votes: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl VotesConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for VotesConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            min_votes: default_min_votes(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_threshold() -> f64 {
    0.5
}

fn default_min_votes() -> usize {
    2
}

fn default_timeout_secs() -> u64 {
    30
}
