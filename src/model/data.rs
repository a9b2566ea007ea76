// This code is licensed under Elastic License 2.0
// https://www.elastic.co/licensing/elastic-license

use serde::{Deserialize, Serialize};

/// One row of a blob: a raw sample or an aggregated bucket.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct Bucket {
  timestamp: u64,
  value: f64,
  count: u64,
  min: f64,
  max: f64,
  last: f64,
}

impl Bucket {
  pub fn new(timestamp: u64, value: f64, count: u64, min: f64, max: f64, last: f64) -> Self {
    Bucket {
      timestamp,
      value,
      count,
      min,
      max,
      last,
    }
  }

  /// A single raw sample. Its auxiliary aggregates all equal the value.
  pub fn raw(timestamp: u64, value: f64) -> Self {
    Bucket::new(timestamp, value, 1, value, value, value)
  }

  pub fn get_timestamp(&self) -> u64 {
    self.timestamp
  }

  pub fn get_value(&self) -> f64 {
    self.value
  }

  pub fn get_count(&self) -> u64 {
    self.count
  }

  pub fn get_min(&self) -> f64 {
    self.min
  }

  pub fn get_max(&self) -> f64 {
    self.max
  }

  pub fn get_last(&self) -> f64 {
    self.last
  }
}

/// Columnar storage of a blob. All columns are index-aligned and have the same length.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Data {
  values: Vec<f64>,
  timestamps: Vec<u64>,
  counts: Vec<u64>,
  mins: Vec<f64>,
  maxs: Vec<f64>,
  lasts: Vec<f64>,
}

impl Data {
  pub fn new() -> Self {
    Data::default()
  }

  pub fn with_capacity(capacity: usize) -> Self {
    Data {
      values: Vec::with_capacity(capacity),
      timestamps: Vec::with_capacity(capacity),
      counts: Vec::with_capacity(capacity),
      mins: Vec::with_capacity(capacity),
      maxs: Vec::with_capacity(capacity),
      lasts: Vec::with_capacity(capacity),
    }
  }

  /// Push a row at the end. Ordering is checked by the owning blob.
  pub(crate) fn push(&mut self, bucket: Bucket) {
    self.values.push(bucket.value);
    self.timestamps.push(bucket.timestamp);
    self.counts.push(bucket.count);
    self.mins.push(bucket.min);
    self.maxs.push(bucket.max);
    self.lasts.push(bucket.last);
  }

  pub fn len(&self) -> usize {
    self.timestamps.len()
  }

  pub fn is_empty(&self) -> bool {
    self.timestamps.is_empty()
  }

  pub fn get(&self, index: usize) -> Option<Bucket> {
    if index >= self.len() {
      return None;
    }

    Some(Bucket::new(
      self.timestamps[index],
      self.values[index],
      self.counts[index],
      self.mins[index],
      self.maxs[index],
      self.lasts[index],
    ))
  }

  pub fn iter(&self) -> impl Iterator<Item = Bucket> + '_ {
    (0..self.len()).filter_map(move |i| self.get(i))
  }

  pub fn get_first_timestamp(&self) -> Option<u64> {
    self.timestamps.first().copied()
  }

  pub fn get_last_timestamp(&self) -> Option<u64> {
    self.timestamps.last().copied()
  }

  pub fn get_values(&self) -> &[f64] {
    &self.values
  }

  pub fn get_timestamps(&self) -> &[u64] {
    &self.timestamps
  }

  pub fn get_counts(&self) -> &[u64] {
    &self.counts
  }

  pub fn get_mins(&self) -> &[f64] {
    &self.mins
  }

  pub fn get_maxs(&self) -> &[f64] {
    &self.maxs
  }

  pub fn get_lasts(&self) -> &[f64] {
    &self.lasts
  }

  /// Check that all the columns have the same length and that timestamps strictly increase.
  pub fn is_well_formed(&self) -> bool {
    let len = self.timestamps.len();
    let aligned = self.values.len() == len
      && self.counts.len() == len
      && self.mins.len() == len
      && self.maxs.len() == len
      && self.lasts.len() == len;

    aligned && self.timestamps.windows(2).all(|pair| pair[0] < pair[1])
  }
}
