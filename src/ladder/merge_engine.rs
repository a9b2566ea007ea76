// This code is licensed under Elastic License 2.0
// https://www.elastic.co/licensing/elastic-license

//! Rollup of sealed blobs into coarser buckets.
//!
//! Buckets of width `G` are aligned on the epoch and closed on the right: bucket `k` covers
//! `(k*G, (k+1)*G]`, and bucket 0 also holds timestamp 0. The bucket is stored under its start
//! `k*G`. A source row covers everything up to its *upper edge* (`timestamp + granularity`
//! of its blob), which decides the target bucket. Because ladder granularities divide each
//! other, a source bucket always falls entirely into one target bucket.

use std::ops::Range;

use log::debug;

use crate::ladder::level::LevelConfig;
use crate::model::blob::Blob;
use crate::model::data::{Bucket, Data};
use crate::model::merge_function::MergeFunction;
use crate::model::meta::Meta;
use crate::utils::error::TsKvError;

/// Index of the target bucket holding a row with the given upper edge.
pub fn get_bucket_index(upper_edge: u64, granularity: u64) -> u64 {
  upper_edge.saturating_sub(1) / granularity
}

/// Start timestamp of the bucket with the given index.
pub fn get_bucket_start(index: u64, granularity: u64) -> u64 {
  index.saturating_mul(granularity)
}

/// Upper edge of a row of the given blob. Saturates at `u64::MAX`, so a row near the end of
/// the time range never completes its target bucket.
pub(crate) fn get_upper_edge(blob: &Blob, bucket: &Bucket) -> u64 {
  bucket
    .get_timestamp()
    .saturating_add(blob.get_meta().get_granularity())
}

/// Merge the sealed source blobs into one aggregated blob of the target granularity.
///
/// The sources must belong to one metric, share a granularity, be time-ordered and must not
/// overlap. The result is sealed, sparse (empty buckets are omitted) and a pure function of
/// the inputs.
pub fn merge(
  source_blobs: &[&Blob],
  target_granularity: u64,
  merge_function: MergeFunction,
) -> Result<Blob, TsKvError> {
  let metric_id = check_sources(source_blobs, target_granularity, merge_function)?;
  let data = merge_buckets(
    source_blobs,
    target_granularity,
    merge_function,
    0..u64::MAX,
  );

  let first_timestamp = data
    .get_first_timestamp()
    .ok_or_else(|| TsKvError::MergeInputError("source blobs hold no samples".to_owned()))?;
  let meta = Meta::new(
    metric_id,
    target_granularity,
    first_timestamp,
    merge_function,
  )
  .with_aggregated(true);

  Blob::new_sealed(meta, data)
}

/// Merge the rows of the source blobs that fall into the target buckets `buckets` into one
/// blob of the given level. Returns `None` when no row falls into the window.
pub fn merge_window(
  source_blobs: &[&Blob],
  level: &LevelConfig,
  buckets: Range<u64>,
) -> Result<Option<Blob>, TsKvError> {
  let metric_id = check_sources(
    source_blobs,
    level.get_granularity(),
    level.get_merge_function(),
  )?;
  let data = merge_buckets(
    source_blobs,
    level.get_granularity(),
    level.get_merge_function(),
    buckets.clone(),
  );

  let first_timestamp = match data.get_first_timestamp() {
    Some(first_timestamp) => first_timestamp,
    None => return Ok(None),
  };

  debug!(
    "Merged {} buckets for metric {} at granularity {} from window {:?}",
    data.len(),
    metric_id,
    level.get_granularity(),
    buckets
  );

  let meta = level.new_meta(metric_id, first_timestamp);
  match Blob::new_sealed(meta, data) {
    Ok(blob) => Ok(Some(blob)),
    Err(TsKvError::CapacityFull(max_size, max_time)) => Err(TsKvError::MergeInputError(format!(
      "window {:?} does not fit in a blob with max_size {} and max_time {}",
      buckets, max_size, max_time
    ))),
    Err(e) => Err(e),
  }
}

/// Check the merge preconditions and return the common metric id.
fn check_sources(
  source_blobs: &[&Blob],
  target_granularity: u64,
  merge_function: MergeFunction,
) -> Result<u32, TsKvError> {
  let first = source_blobs
    .first()
    .ok_or_else(|| TsKvError::MergeInputError("no source blobs".to_owned()))?;
  let metric_id = first.get_meta().get_metric_id();
  let source_granularity = first.get_meta().get_granularity();

  if target_granularity <= source_granularity {
    return Err(TsKvError::MergeInputError(format!(
      "target granularity {} is not coarser than source granularity {}",
      target_granularity, source_granularity
    )));
  }
  if source_granularity > 0 && target_granularity % source_granularity != 0 {
    return Err(TsKvError::MergeInputError(format!(
      "target granularity {} is not a multiple of source granularity {}",
      target_granularity, source_granularity
    )));
  }

  let mut previous_last: Option<u64> = None;
  for blob in source_blobs {
    let meta = blob.get_meta();
    if !blob.is_sealed() {
      return Err(TsKvError::MergeInputError(format!(
        "blob of metric {} starting at {} is not sealed",
        meta.get_metric_id(),
        meta.get_first_timestamp()
      )));
    }
    if meta.get_metric_id() != metric_id {
      return Err(TsKvError::MergeInputError(format!(
        "blobs of metrics {} and {} cannot be merged together",
        metric_id,
        meta.get_metric_id()
      )));
    }
    if meta.get_granularity() != source_granularity {
      return Err(TsKvError::MergeInputError(format!(
        "blobs of granularities {} and {} cannot be merged together",
        source_granularity,
        meta.get_granularity()
      )));
    }
    let source_function = if meta.is_raw() {
      None
    } else {
      Some(meta.get_merge_function())
    };
    if !merge_function.is_composable_from(source_function) {
      return Err(TsKvError::MergeInputError(format!(
        "{} cannot be computed from {} buckets",
        merge_function,
        meta.get_merge_function()
      )));
    }

    let data = blob.get_data();
    if let (Some(first_timestamp), Some(last_timestamp)) =
      (data.get_first_timestamp(), data.get_last_timestamp())
    {
      if let Some(previous) = previous_last {
        if first_timestamp <= previous {
          return Err(TsKvError::MergeInputError(format!(
            "blob starting at {} overlaps or precedes the previous blob ending at {}",
            first_timestamp, previous
          )));
        }
      }
      previous_last = Some(last_timestamp);
    }
  }

  Ok(metric_id)
}

/// Running aggregate of one target bucket.
struct BucketAccumulator {
  index: u64,
  total: f64,
  count: u64,
  min: f64,
  max: f64,
  last: f64,
  last_timestamp: u64,
}

impl BucketAccumulator {
  fn new(index: u64) -> Self {
    BucketAccumulator {
      index,
      total: 0.0,
      count: 0,
      min: f64::INFINITY,
      max: f64::NEG_INFINITY,
      last: f64::NAN,
      last_timestamp: 0,
    }
  }

  fn add(&mut self, bucket: &Bucket, source_function: Option<MergeFunction>) {
    self.total += match source_function {
      None => bucket.get_value(),
      Some(function) => function.bucket_total(bucket.get_value(), bucket.get_count()),
    };
    self.count += bucket.get_count();
    self.min = self.min.min(bucket.get_min());
    self.max = self.max.max(bucket.get_max());

    // Later rows win ties, so the most recently ingested sample is the last one.
    if bucket.get_timestamp() >= self.last_timestamp {
      self.last = bucket.get_last();
      self.last_timestamp = bucket.get_timestamp();
    }
  }

  fn finish(self, granularity: u64, merge_function: MergeFunction) -> Bucket {
    let value = match merge_function {
      MergeFunction::Sum => self.total,
      MergeFunction::Avg => self.total / self.count as f64,
      MergeFunction::Min => self.min,
      MergeFunction::Max => self.max,
      MergeFunction::Last => self.last,
      MergeFunction::Count => self.count as f64,
    };

    Bucket::new(
      get_bucket_start(self.index, granularity),
      value,
      self.count,
      self.min,
      self.max,
      self.last,
    )
  }
}

/// Fold the rows of the sources into target buckets whose index is within `buckets`.
fn merge_buckets(
  source_blobs: &[&Blob],
  target_granularity: u64,
  merge_function: MergeFunction,
  buckets: Range<u64>,
) -> Data {
  let mut data = Data::new();
  let mut current: Option<BucketAccumulator> = None;

  for blob in source_blobs {
    let meta = blob.get_meta();
    let source_function = if meta.is_raw() {
      None
    } else {
      Some(meta.get_merge_function())
    };

    for bucket in blob.get_data().iter() {
      let index = get_bucket_index(get_upper_edge(blob, &bucket), target_granularity);
      if !buckets.contains(&index) {
        continue;
      }

      // Rows arrive in time order, so bucket indexes never decrease.
      let accumulator = match current.take() {
        Some(accumulator) if accumulator.index == index => accumulator,
        Some(accumulator) => {
          data.push(accumulator.finish(target_granularity, merge_function));
          BucketAccumulator::new(index)
        }
        None => BucketAccumulator::new(index),
      };
      let accumulator = current.insert(accumulator);
      accumulator.add(&bucket, source_function);
    }
  }

  if let Some(accumulator) = current {
    data.push(accumulator.finish(target_granularity, merge_function));
  }

  data
}
