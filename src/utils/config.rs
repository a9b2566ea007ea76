// This code is licensed under Elastic License 2.0
// https://www.elastic.co/licensing/elastic-license

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

use crate::ladder::level::{Ladder, LevelConfig};
use crate::utils::error::TsKvError;

const DEFAULT_CONFIG_FILE_NAME: &str = "default.toml";

#[derive(Debug, Deserialize)]
/// Ladder used by a single metric instead of the default one.
pub struct MetricLadderSettings {
  metric_id: u32,
  levels: Vec<LevelConfig>,
}

impl MetricLadderSettings {
  pub fn get_metric_id(&self) -> u32 {
    self.metric_id
  }

  pub fn get_levels(&self) -> &[LevelConfig] {
    &self.levels
  }
}

#[derive(Debug, Deserialize)]
/// Settings for tskv.
pub struct TsKvSettings {
  /// Size budget of each metric, in estimated bytes. No budget if absent.
  #[serde(default)]
  max_bytes_per_metric: Option<u64>,

  promotion_interval_ms: u64,
  eviction_interval_ms: u64,

  /// Default ladder, raw level first.
  levels: Vec<LevelConfig>,

  #[serde(default)]
  metric_ladders: Vec<MetricLadderSettings>,
}

impl TsKvSettings {
  pub fn get_default_config_file_name() -> &'static str {
    DEFAULT_CONFIG_FILE_NAME
  }

  pub fn get_max_bytes_per_metric(&self) -> Option<u64> {
    self.max_bytes_per_metric
  }

  pub fn get_promotion_interval_ms(&self) -> u64 {
    self.promotion_interval_ms
  }

  pub fn get_eviction_interval_ms(&self) -> u64 {
    self.eviction_interval_ms
  }

  pub fn get_levels(&self) -> &[LevelConfig] {
    &self.levels
  }

  pub fn get_metric_ladder_settings(&self) -> &[MetricLadderSettings] {
    &self.metric_ladders
  }

  /// Validate the default ladder.
  pub fn get_ladder(&self) -> Result<Ladder, TsKvError> {
    Ladder::new(self.levels.clone())
  }

  /// Validate the per-metric ladders.
  pub fn get_metric_ladders(&self) -> Result<Vec<(u32, Ladder)>, TsKvError> {
    let mut ladders: Vec<(u32, Ladder)> = Vec::with_capacity(self.metric_ladders.len());
    for metric_ladder in &self.metric_ladders {
      let metric_id = metric_ladder.get_metric_id();
      if ladders.iter().any(|(id, _)| *id == metric_id) {
        return Err(TsKvError::InvalidConfiguration(format!(
          "metric {} has more than one ladder",
          metric_id
        )));
      }
      let ladder = Ladder::new(metric_ladder.levels.clone()).map_err(|e| {
        TsKvError::InvalidConfiguration(format!("ladder of metric {}: {}", metric_id, e))
      })?;
      ladders.push((metric_id, ladder));
    }
    Ok(ladders)
  }
}

#[derive(Debug, Deserialize)]
/// Settings for tskv, read from config file.
pub struct Settings {
  tskv: TsKvSettings,
}

impl Settings {
  /// Create Settings from given configuration directory path.
  pub fn new(config_dir_path: &str) -> Result<Self, ConfigError> {
    let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());
    let config_default_file_name = format!("{}/{}", config_dir_path, DEFAULT_CONFIG_FILE_NAME);
    let config_environment_file_name = format!("{}/{}.toml", config_dir_path, run_mode);

    let config = Config::builder()
      // Start off by merging in the "default" configuration file
      .add_source(File::with_name(&config_default_file_name))
      // Add in the current environment file
      // Default to 'development' env
      // Note that this file is _optional_
      .add_source(File::with_name(&config_environment_file_name).required(false))
      // Add in settings from the environment (with a prefix of TSKV)
      .add_source(Environment::with_prefix("tskv"))
      .build()?;

    config.try_deserialize()
  }

  /// Get tskv settings.
  pub fn get_tskv_settings(&self) -> &TsKvSettings {
    &self.tskv
  }
}
