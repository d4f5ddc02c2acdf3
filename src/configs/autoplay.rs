use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AutoplayConfig {
    #[serde(default)]
    pub enabled_by_default: bool,
    /// Minimum gap between two continuation searches for one community.
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
    #[serde(default = "default_max_strategies")]
    pub max_strategies: usize,
    /// A result is picked at random among this many survivors.
    #[serde(default = "default_pick_from_top")]
    pub pick_from_top: usize,
    #[serde(default = "default_search_timeout_ms")]
    pub search_timeout_ms: u64,
    /// Identifier prefix understood by the search source (e.g. `ytsearch`).
    #[serde(default = "default_search_prefix")]
    pub search_prefix: String,
    #[serde(default = "default_fallback_queries")]
    pub fallback_queries: Vec<String>,
}

impl AutoplayConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn search_timeout(&self) -> Duration {
        Duration::from_millis(self.search_timeout_ms)
    }
}

impl Default for AutoplayConfig {
    fn default() -> Self {
        Self {
            enabled_by_default: false,
            cooldown_ms: default_cooldown_ms(),
            max_strategies: default_max_strategies(),
            pick_from_top: default_pick_from_top(),
            search_timeout_ms: default_search_timeout_ms(),
            search_prefix: default_search_prefix(),
            fallback_queries: default_fallback_queries(),
        }
    }
}

fn default_cooldown_ms() -> u64 {
    3000
}

fn default_max_strategies() -> usize {
    4
}

fn default_pick_from_top() -> usize {
    3
}

fn default_search_timeout_ms() -> u64 {
    5000
}

fn default_search_prefix() -> String {
    "ytsearch".to_string()
}

fn default_fallback_queries() -> Vec<String> {
    vec![
        "popular music".to_string(),
        "top hits".to_string(),
        "trending songs".to_string(),
    ]
}
