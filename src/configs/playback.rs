use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PlaybackConfig {
    /// Bound on waiting for a community lock before the operation is dropped.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
    /// Delay between a natural track end and the advance it triggers.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    #[serde(default = "default_node_command_timeout_ms")]
    pub node_command_timeout_ms: u64,
    #[serde(default = "default_inactivity_timeout_secs")]
    pub inactivity_timeout_secs: u64,
    #[serde(default = "default_listener_poll_secs")]
    pub listener_poll_secs: u64,
    #[serde(default = "default_volume")]
    pub default_volume: u16,
    #[serde(default = "default_max_volume")]
    pub max_volume: u16,
}

impl PlaybackConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn node_command_timeout(&self) -> Duration {
        Duration::from_millis(self.node_command_timeout_ms)
    }

    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_secs(self.inactivity_timeout_secs)
    }

    pub fn listener_poll(&self) -> Duration {
        Duration::from_secs(self.listener_poll_secs.max(1))
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: default_lock_timeout_ms(),
            settle_delay_ms: default_settle_delay_ms(),
            node_command_timeout_ms: default_node_command_timeout_ms(),
            inactivity_timeout_secs: default_inactivity_timeout_secs(),
            listener_poll_secs: default_listener_poll_secs(),
            default_volume: default_volume(),
            max_volume: default_max_volume(),
        }
    }
}

/// Delivery of presentation refreshes to the rendering sink.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PresentationConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for PresentationConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

fn default_lock_timeout_ms() -> u64 {
    3000
}

fn default_settle_delay_ms() -> u64 {
    250
}

fn default_node_command_timeout_ms() -> u64 {
    5000
}

fn default_inactivity_timeout_secs() -> u64 {
    180
}

fn default_listener_poll_secs() -> u64 {
    30
}

fn default_volume() -> u16 {
    100
}

fn default_max_volume() -> u16 {
    200
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    200
}
