// This code is licensed under Elastic License 2.0
// https://www.elastic.co/licensing/elastic-license

use crate::model::blob_key::BlobKey;
use crate::policy_manager::blob_summary::BlobSummary;

/// Decides which blobs of one metric to evict.
pub trait RetentionPolicy: Send + Sync {
  /// Return the keys of the blobs to evict at time `now`. Open blobs are never returned.
  fn apply(&self, blob_summaries: &[BlobSummary], now: u64) -> Vec<BlobKey>;
}

/// Evicts blobs whose TTL has elapsed, measured from the end of the covered interval
/// (`first_timestamp + span`). A TTL of 0 keeps the blob forever.
pub struct TtlRetention;

impl TtlRetention {
  pub fn new() -> Self {
    TtlRetention
  }
}

impl Default for TtlRetention {
  fn default() -> Self {
    Self::new()
  }
}

impl RetentionPolicy for TtlRetention {
  fn apply(&self, blob_summaries: &[BlobSummary], now: u64) -> Vec<BlobKey> {
    let mut keys_to_evict: Vec<BlobKey> = Vec::new();
    for blob_summary in blob_summaries {
      if blob_summary.is_open() || blob_summary.get_ttl() == 0 {
        continue;
      }
      if now.saturating_sub(blob_summary.get_end_time()) > blob_summary.get_ttl() {
        keys_to_evict.push(blob_summary.get_key());
      }
    }
    keys_to_evict
  }
}
