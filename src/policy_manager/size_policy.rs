// This code is licensed under Elastic License 2.0
// https://www.elastic.co/licensing/elastic-license

use crate::model::blob_key::BlobKey;
use crate::policy_manager::blob_summary::BlobSummary;
use crate::policy_manager::retention_policy::RetentionPolicy;

/// Keeps the total size of a metric under a budget.
///
/// Blobs that already have a coarser representation (promoted) go first, then finer levels
/// before coarser ones, oldest first within a level. The coarsest aggregates are the last to go.
pub struct SizeBasedRetention {
  max_bytes: u64,
}

impl SizeBasedRetention {
  pub fn new(max_bytes: u64) -> Self {
    SizeBasedRetention { max_bytes }
  }

  pub fn get_max_bytes(&self) -> u64 {
    self.max_bytes
  }
}

impl RetentionPolicy for SizeBasedRetention {
  fn apply(&self, blob_summaries: &[BlobSummary], _now: u64) -> Vec<BlobKey> {
    let mut total_size: u64 = blob_summaries
      .iter()
      .map(|summary| summary.get_size_in_bytes())
      .sum();
    if total_size <= self.max_bytes {
      return Vec::new();
    }

    let mut candidates: Vec<&BlobSummary> = blob_summaries
      .iter()
      .filter(|summary| !summary.is_open())
      .collect();
    candidates.sort_by_key(|summary| {
      (
        !summary.is_promoted(),
        summary.get_level_index(),
        summary.get_key().get_first_timestamp(),
      )
    });

    let mut keys_to_evict: Vec<BlobKey> = Vec::new();
    for summary in candidates {
      if total_size <= self.max_bytes {
        break; // Early exit once we're under budget
      }
      keys_to_evict.push(summary.get_key());
      total_size -= summary.get_size_in_bytes();
    }

    keys_to_evict
  }
}
