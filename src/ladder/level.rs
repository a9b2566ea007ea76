// This code is licensed under Elastic License 2.0
// https://www.elastic.co/licensing/elastic-license

use serde::{Deserialize, Serialize};

use crate::model::constants::RAW_GRANULARITY;
use crate::model::merge_function::MergeFunction;
use crate::model::meta::Meta;
use crate::utils::error::TsKvError;

/// Settings of one step of the granularity ladder.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct LevelConfig {
  granularity: u64,
  merge_function: MergeFunction,
  max_size: u64,
  max_time: u64,
  #[serde(default)]
  ttl: u64,
  #[serde(default)]
  memory_only: bool,
}

impl LevelConfig {
  pub fn new(
    granularity: u64,
    merge_function: MergeFunction,
    max_size: u64,
    max_time: u64,
  ) -> Self {
    LevelConfig {
      granularity,
      merge_function,
      max_size,
      max_time,
      ttl: 0,
      memory_only: false,
    }
  }

  pub fn with_ttl(mut self, ttl: u64) -> Self {
    self.ttl = ttl;
    self
  }

  pub fn with_memory_only(mut self, memory_only: bool) -> Self {
    self.memory_only = memory_only;
    self
  }

  pub fn get_granularity(&self) -> u64 {
    self.granularity
  }

  pub fn get_merge_function(&self) -> MergeFunction {
    self.merge_function
  }

  pub fn get_max_size(&self) -> u64 {
    self.max_size
  }

  pub fn get_max_time(&self) -> u64 {
    self.max_time
  }

  pub fn get_ttl(&self) -> u64 {
    self.ttl
  }

  pub fn is_memory_only(&self) -> bool {
    self.memory_only
  }

  pub fn is_raw(&self) -> bool {
    self.granularity == RAW_GRANULARITY
  }

  /// Meta for a new blob of this level starting at first_timestamp.
  pub fn new_meta(&self, metric_id: u32, first_timestamp: u64) -> Meta {
    Meta::new(
      metric_id,
      self.granularity,
      first_timestamp,
      self.merge_function,
    )
    .with_limits(self.max_size, self.max_time)
    .with_ttl(self.ttl)
    .with_memory_only(self.memory_only)
    .with_aggregated(!self.is_raw())
  }

  /// Maximum number of target buckets one merged blob of this level may span.
  pub(crate) fn get_max_buckets_per_blob(&self) -> u64 {
    if self.is_raw() {
      return self.max_size;
    }
    let by_time = (self.max_time / self.granularity).saturating_add(1);
    self.max_size.min(by_time).max(1)
  }
}

/// Ordered sequence of levels, raw first, each coarser than the previous.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Ladder {
  levels: Vec<LevelConfig>,
}

impl Ladder {
  /// Create a ladder, validating that the levels form a consistent rollup chain.
  pub fn new(levels: Vec<LevelConfig>) -> Result<Self, TsKvError> {
    let first = levels.first().ok_or_else(|| {
      TsKvError::InvalidConfiguration("the granularity ladder has no levels".to_owned())
    })?;
    if !first.is_raw() {
      return Err(TsKvError::InvalidConfiguration(format!(
        "the first level must be raw (granularity 0), found granularity {}",
        first.granularity
      )));
    }

    for (index, level) in levels.iter().enumerate() {
      if level.max_size == 0 {
        return Err(TsKvError::InvalidConfiguration(format!(
          "level {} has max_size 0, a blob could never hold a sample",
          index
        )));
      }
      if !level.is_raw() && level.max_time < level.granularity {
        return Err(TsKvError::InvalidConfiguration(format!(
          "level {} has max_time {} narrower than its granularity {}",
          index, level.max_time, level.granularity
        )));
      }
    }

    for (index, pair) in levels.windows(2).enumerate() {
      let (finer, coarser) = (&pair[0], &pair[1]);
      if coarser.granularity <= finer.granularity {
        return Err(TsKvError::InvalidConfiguration(format!(
          "level {} granularity {} is not coarser than {}",
          index + 1,
          coarser.granularity,
          finer.granularity
        )));
      }
      if !finer.is_raw() && coarser.granularity % finer.granularity != 0 {
        return Err(TsKvError::InvalidConfiguration(format!(
          "level {} granularity {} is not a multiple of {}",
          index + 1,
          coarser.granularity,
          finer.granularity
        )));
      }
      let source = if finer.is_raw() {
        None
      } else {
        Some(finer.merge_function)
      };
      if !coarser.merge_function.is_composable_from(source) {
        return Err(TsKvError::InvalidConfiguration(format!(
          "level {} merge function {} cannot be computed from {} buckets",
          index + 1,
          coarser.merge_function,
          finer.merge_function
        )));
      }
    }

    Ok(Ladder { levels })
  }

  pub fn get_levels(&self) -> &[LevelConfig] {
    &self.levels
  }

  pub fn get_level(&self, index: usize) -> Option<&LevelConfig> {
    self.levels.get(index)
  }

  pub fn get_raw_level(&self) -> &LevelConfig {
    // Never empty, checked in new().
    &self.levels[0]
  }

  pub fn len(&self) -> usize {
    self.levels.len()
  }

  pub fn is_empty(&self) -> bool {
    self.levels.is_empty()
  }

  /// Index of the level with exactly this granularity.
  pub fn get_level_index(&self, granularity: u64) -> Option<usize> {
    self
      .levels
      .iter()
      .position(|level| level.granularity == granularity)
  }

  /// Index of the finest level whose granularity is at least the requested one.
  pub fn get_best_level_index(&self, granularity: u64) -> Option<usize> {
    self
      .levels
      .iter()
      .position(|level| level.granularity >= granularity)
  }
}
