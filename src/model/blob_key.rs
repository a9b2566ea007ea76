// This code is licensed under Elastic License 2.0
// https://www.elastic.co/licensing/elastic-license

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::blob::Blob;

/// Identifies a blob within a store: no two blobs of one metric and granularity share a start.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct BlobKey {
  metric_id: u32,
  granularity: u64,
  first_timestamp: u64,
}

impl BlobKey {
  pub fn new(metric_id: u32, granularity: u64, first_timestamp: u64) -> Self {
    BlobKey {
      metric_id,
      granularity,
      first_timestamp,
    }
  }

  pub fn get_metric_id(&self) -> u32 {
    self.metric_id
  }

  pub fn get_granularity(&self) -> u64 {
    self.granularity
  }

  pub fn get_first_timestamp(&self) -> u64 {
    self.first_timestamp
  }
}

impl From<&Blob> for BlobKey {
  fn from(blob: &Blob) -> Self {
    let meta = blob.get_meta();
    BlobKey::new(
      meta.get_metric_id(),
      meta.get_granularity(),
      meta.get_first_timestamp(),
    )
  }
}

impl fmt::Display for BlobKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{}_{}_{}",
      self.metric_id, self.granularity, self.first_timestamp
    )
  }
}
