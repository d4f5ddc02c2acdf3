use serde::{Deserialize, Serialize};

use crate::{common::types::AnyResult, configs::*};

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
  #[serde(default)]
  pub sessions: SessionsConfig,
  #[serde(default)]
  pub playback: PlaybackConfig,
  #[serde(default)]
  pub votes: VotesConfig,
  #[serde(default)]
  pub autoplay: AutoplayConfig,
  #[serde(default)]
  pub presentation: PresentationConfig,
  pub logging: Option<LoggingConfig>,
}

impl Config {
  pub fn load() -> AnyResult<Self> {
    let config_path = if std::path::Path::new("config.toml").exists() {
      "config.toml"
    } else if std::path::Path::new("config.default.toml").exists() {
      "config.default.toml"
    } else {
      crate::log_println!("No config.toml found, using built-in defaults");
      return Ok(Self::default());
    };

    crate::log_println!("Loading configuration from: {}", config_path);

    let config_str = std::fs::read_to_string(config_path)?;
    if config_str.trim().is_empty() {
      return Err(format!("{} is empty", config_path).into());
    }

    Self::from_toml(&config_str)
  }

  pub fn from_toml(s: &str) -> AnyResult<Self> {
    let config: Config = toml::from_str(s)?;
    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> AnyResult<()> {
    if self.sessions.max_sessions == 0 {
      return Err("sessions.max_sessions must be at least 1".into());
    }
    if !(0.0..=1.0).contains(&self.votes.threshold) || self.votes.threshold == 0.0 {
      return Err("votes.threshold must be in (0, 1]".into());
    }
    if self.playback.default_volume > self.playback.max_volume {
      return Err("playback.default_volume exceeds playback.max_volume".into());
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn empty_sections_fall_back_to_defaults() {
    let config = Config::from_toml("").unwrap();
    assert_eq!(config.sessions.max_sessions, 5000);
    assert_eq!(config.playback.max_volume, 200);
    assert_eq!(config.votes.min_votes, 2);
    assert!(config.logging.is_none());
  }

  #[test]
  fn partial_sections_merge_with_defaults() {
    let config = Config::from_toml(
      r#"
      [sessions]
      max_sessions = 10

      [votes]
      threshold = 0.75

      [logging]
      level = "debug"
      "#,
    )
    .unwrap();
    assert_eq!(config.sessions.max_sessions, 10);
    assert_eq!(config.sessions.max_queue_length, 1000);
    assert_eq!(config.votes.threshold, 0.75);
    assert_eq!(config.logging.unwrap().level.as_deref(), Some("debug"));
  }

  #[test]
  fn rejects_zero_threshold() {
    assert!(Config::from_toml("[votes]\nthreshold = 0.0").is_err());
  }
}
