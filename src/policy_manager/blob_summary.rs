// This code is licensed under Elastic License 2.0
// https://www.elastic.co/licensing/elastic-license

use crate::model::blob::Blob;
use crate::model::blob_key::BlobKey;

/// What retention policies need to know about a blob, without holding the blob itself.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BlobSummary {
  key: BlobKey,

  /// Position of the blob's granularity in the ladder, 0 being raw.
  level_index: usize,

  end_time: u64,
  ttl: u64,
  size_in_bytes: u64,
  is_promoted: bool,

  /// Open blobs count towards the size of a metric but are never evicted.
  is_open: bool,
}

impl BlobSummary {
  pub fn new(blob: &Blob, level_index: usize, is_promoted: bool) -> Self {
    BlobSummary {
      key: BlobKey::from(blob),
      level_index,
      end_time: blob.get_end_time(),
      ttl: blob.get_meta().get_ttl(),
      size_in_bytes: blob.get_size_in_bytes(),
      is_promoted,
      is_open: !blob.is_sealed(),
    }
  }

  pub fn get_key(&self) -> BlobKey {
    self.key
  }

  pub fn get_level_index(&self) -> usize {
    self.level_index
  }

  pub fn get_end_time(&self) -> u64 {
    self.end_time
  }

  pub fn get_ttl(&self) -> u64 {
    self.ttl
  }

  pub fn get_size_in_bytes(&self) -> u64 {
    self.size_in_bytes
  }

  pub fn is_promoted(&self) -> bool {
    self.is_promoted
  }

  pub fn is_open(&self) -> bool {
    self.is_open
  }

  #[cfg(test)]
  pub fn new_for_test(
    key: BlobKey,
    level_index: usize,
    end_time: u64,
    ttl: u64,
    size_in_bytes: u64,
    is_promoted: bool,
  ) -> Self {
    BlobSummary {
      key,
      level_index,
      end_time,
      ttl,
      size_in_bytes,
      is_promoted,
      is_open: false,
    }
  }

  #[cfg(test)]
  pub fn set_open_for_test(mut self) -> Self {
    self.is_open = true;
    self
  }
}
