// This code is licensed under Elastic License 2.0
// https://www.elastic.co/licensing/elastic-license

use log::debug;
use serde::{Deserialize, Serialize};

use crate::model::constants::BYTES_PER_BUCKET;
use crate::model::data::{Bucket, Data};
use crate::model::meta::Meta;
use crate::utils::error::TsKvError;
use crate::utils::range::is_overlap;

/// Whether a blob still accepts appends.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum BlobState {
  Open,
  Sealed,
}

/// The unit of storage: a descriptor plus its columnar data.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Blob {
  meta: Meta,
  data: Data,
  state: BlobState,
}

impl Blob {
  /// Create an empty open blob.
  pub fn new(meta: Meta) -> Self {
    let capacity = meta.get_max_size().min(1024) as usize;
    Blob {
      meta,
      data: Data::with_capacity(capacity),
      state: BlobState::Open,
    }
  }

  /// Create a sealed blob from already built data, checking every blob invariant.
  pub fn new_sealed(meta: Meta, data: Data) -> Result<Self, TsKvError> {
    if !data.is_well_formed() {
      return Err(TsKvError::MergeInputError(
        "columns are not aligned or timestamps are not strictly increasing".to_owned(),
      ));
    }

    if let (Some(first), Some(last)) = (data.get_first_timestamp(), data.get_last_timestamp()) {
      if first < meta.get_first_timestamp() {
        return Err(TsKvError::MergeInputError(format!(
          "first bucket {} precedes first_timestamp {}",
          first,
          meta.get_first_timestamp()
        )));
      }
      if data.len() as u64 > meta.get_max_size()
        || last - meta.get_first_timestamp() > meta.get_max_time()
      {
        return Err(TsKvError::CapacityFull(
          meta.get_max_size(),
          meta.get_max_time(),
        ));
      }
    }

    Ok(Blob {
      meta,
      data,
      state: BlobState::Sealed,
    })
  }

  /// Append a sample. The timestamp must be greater than the last stored one, and the blob
  /// must be open and within its size and time limits.
  pub fn append(&mut self, timestamp: u64, value: f64) -> Result<(), TsKvError> {
    if self.state == BlobState::Sealed {
      debug!(
        "Capacity full error while appending time/value {}/{} to sealed blob of metric {}",
        timestamp,
        value,
        self.meta.get_metric_id()
      );
      return Err(TsKvError::CapacityFull(
        self.meta.get_max_size(),
        self.meta.get_max_time(),
      ));
    }

    match self.data.get_last_timestamp() {
      Some(last) if timestamp <= last => return Err(TsKvError::OutOfOrder(timestamp, last)),
      None if timestamp < self.meta.get_first_timestamp() => {
        return Err(TsKvError::OutOfOrder(
          timestamp,
          self.meta.get_first_timestamp(),
        ))
      }
      _ => {}
    }

    if self.data.len() as u64 >= self.meta.get_max_size()
      || timestamp - self.meta.get_first_timestamp() > self.meta.get_max_time()
    {
      debug!(
        "Capacity full error while appending time/value {}/{} to metric {}. Typically a new blob will now be created.",
        timestamp,
        value,
        self.meta.get_metric_id()
      );
      return Err(TsKvError::CapacityFull(
        self.meta.get_max_size(),
        self.meta.get_max_time(),
      ));
    }

    self.data.push(Bucket::raw(timestamp, value));
    Ok(())
  }

  /// Close the blob for appends. Calling it again has no effect.
  pub fn seal(&mut self) {
    self.state = BlobState::Sealed;
  }

  pub fn is_sealed(&self) -> bool {
    self.state == BlobState::Sealed
  }

  pub fn get_state(&self) -> BlobState {
    self.state
  }

  pub fn get_meta(&self) -> &Meta {
    &self.meta
  }

  pub fn get_data(&self) -> &Data {
    &self.data
  }

  pub fn len(&self) -> usize {
    self.data.len()
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }

  /// End of the covered interval: the last timestamp plus the bucket width, saturating at
  /// `u64::MAX`. A bucket starting at `s` covers samples up to `s + granularity`.
  pub fn get_end_time(&self) -> u64 {
    match self.data.get_last_timestamp() {
      Some(last) => last.saturating_add(self.meta.get_granularity()),
      None => self.meta.get_first_timestamp(),
    }
  }

  /// Length of the covered interval, measured from first_timestamp.
  pub fn get_span(&self) -> u64 {
    self.get_end_time() - self.meta.get_first_timestamp()
  }

  /// Estimated memory footprint, used for size budgets.
  pub fn get_size_in_bytes(&self) -> u64 {
    self.data.len() as u64 * BYTES_PER_BUCKET
  }

  /// Check whether the covered interval overlaps the inclusive range [range_start_time, range_end_time].
  ///
  /// Raw blobs cover `[first_timestamp, last timestamp]`. Buckets are closed on the right, so an
  /// aggregated blob covers `(first_timestamp, end_time]`, except that the epoch bucket also
  /// holds timestamp 0.
  pub fn is_overlap(&self, range_start_time: u64, range_end_time: u64) -> bool {
    let first_timestamp = self.meta.get_first_timestamp();
    let covered_start = if self.meta.is_raw() || first_timestamp == 0 {
      first_timestamp
    } else {
      first_timestamp + 1
    };

    !self.is_empty()
      && is_overlap(
        covered_start,
        self.get_end_time(),
        range_start_time,
        range_end_time,
      )
  }

  /// Get the rows whose timestamp lies in the specified range (both ends inclusive).
  pub fn get_buckets_in_range(&self, range_start_time: u64, range_end_time: u64) -> Vec<Bucket> {
    self
      .data
      .iter()
      .filter(|bucket| {
        bucket.get_timestamp() >= range_start_time && bucket.get_timestamp() <= range_end_time
      })
      .collect()
  }
}
