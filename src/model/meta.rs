// This code is licensed under Elastic License 2.0
// https://www.elastic.co/licensing/elastic-license

use serde::{Deserialize, Serialize};

use crate::model::merge_function::MergeFunction;

/// Descriptor of one blob.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Meta {
  /// Series this blob belongs to.
  metric_id: u32,

  /// Width of a bucket in milliseconds. Zero means raw timestamps, no aggregation.
  granularity: u64,

  /// Inclusive start of the covered interval.
  first_timestamp: u64,

  merge_function: MergeFunction,

  /// Maximum number of buckets (or raw samples) before the blob must seal.
  max_size: u64,

  /// Maximum distance between the last timestamp and first_timestamp before the blob must seal.
  max_time: u64,

  is_aggregated: bool,

  /// Set while the blob is not eligible for durable persistence.
  is_memory_only: bool,

  /// Time after the end of the covered interval when the blob may be evicted. Zero keeps it forever.
  ttl: u64,
}

impl Meta {
  /// Create a meta without limits, TTL or storage flags.
  pub fn new(
    metric_id: u32,
    granularity: u64,
    first_timestamp: u64,
    merge_function: MergeFunction,
  ) -> Self {
    Meta {
      metric_id,
      granularity,
      first_timestamp,
      merge_function,
      max_size: u64::MAX,
      max_time: u64::MAX,
      is_aggregated: false,
      is_memory_only: false,
      ttl: 0,
    }
  }

  pub fn with_limits(mut self, max_size: u64, max_time: u64) -> Self {
    self.max_size = max_size;
    self.max_time = max_time;
    self
  }

  pub fn with_ttl(mut self, ttl: u64) -> Self {
    self.ttl = ttl;
    self
  }

  pub fn with_memory_only(mut self, is_memory_only: bool) -> Self {
    self.is_memory_only = is_memory_only;
    self
  }

  pub fn with_aggregated(mut self, is_aggregated: bool) -> Self {
    self.is_aggregated = is_aggregated;
    self
  }

  pub fn get_metric_id(&self) -> u32 {
    self.metric_id
  }

  pub fn get_granularity(&self) -> u64 {
    self.granularity
  }

  /// Whether the blob holds raw samples rather than buckets.
  pub fn is_raw(&self) -> bool {
    self.granularity == 0
  }

  pub fn get_first_timestamp(&self) -> u64 {
    self.first_timestamp
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

  pub fn is_aggregated(&self) -> bool {
    self.is_aggregated
  }

  pub fn is_memory_only(&self) -> bool {
    self.is_memory_only
  }

  pub fn get_ttl(&self) -> u64 {
    self.ttl
  }
}
