// This code is licensed under Elastic License 2.0
// https://www.elastic.co/licensing/elastic-license

//! Decide which target buckets are ready to be rolled up.
//!
//! Rows reach a level in time order, so once the latest sealed row of a level has upper edge
//! `H`, no later row can fall into a target bucket `k` with `(k+1)*G <= H`. Such buckets are
//! complete and can be merged; the rest wait for more history.

use std::ops::Range;

use crate::ladder::level::LevelConfig;
use crate::ladder::merge_engine::{get_bucket_index, get_upper_edge};
use crate::model::blob::Blob;

/// Target buckets to merge in one promotion pass of a level.
#[derive(Debug, Eq, PartialEq)]
pub struct PromotionPlan {
  /// Bucket index ranges, one merged blob each. Ranges never hold an empty prefix.
  windows: Vec<Range<u64>>,

  /// First bucket index that is not complete yet.
  watermark: u64,
}

impl PromotionPlan {
  pub fn get_windows(&self) -> &[Range<u64>] {
    &self.windows
  }

  pub fn get_watermark(&self) -> u64 {
    self.watermark
  }
}

/// Upper edge of the latest row of the blob, if any.
pub(crate) fn get_last_upper_edge(blob: &Blob) -> Option<u64> {
  blob
    .get_data()
    .get_last_timestamp()
    .map(|last| last.saturating_add(blob.get_meta().get_granularity()))
}

/// Plan the rollup of the time-ordered sealed `source_blobs` into `target`, skipping target
/// buckets below `start_index`. Returns `None` when no complete bucket holds data.
pub fn plan_promotion(
  source_blobs: &[&Blob],
  target: &LevelConfig,
  start_index: u64,
) -> Option<PromotionPlan> {
  let granularity = target.get_granularity();
  let horizon = source_blobs
    .iter()
    .filter_map(|blob| get_last_upper_edge(blob))
    .max()?;
  let watermark = horizon / granularity;
  if start_index >= watermark {
    return None;
  }

  let max_buckets = target.get_max_buckets_per_blob();
  let mut windows: Vec<Range<u64>> = Vec::new();
  for blob in source_blobs {
    for bucket in blob.get_data().iter() {
      let index = get_bucket_index(get_upper_edge(blob, &bucket), granularity);
      if index < start_index {
        continue;
      }
      if index >= watermark {
        break;
      }
      match windows.last() {
        Some(window) if window.contains(&index) => {}
        _ => windows.push(index..index.saturating_add(max_buckets).min(watermark)),
      }
    }
  }

  if windows.is_empty() {
    return None;
  }

  Some(PromotionPlan {
    windows,
    watermark,
  })
}

/// Whether an open raw blob already holds a complete bucket of the target granularity, in
/// which case it is sealed so that the bucket can be promoted.
pub fn has_complete_bucket(open_blob: &Blob, target_granularity: u64) -> bool {
  let first_row = match open_blob.get_data().get(0) {
    Some(first_row) => first_row,
    None => return false,
  };
  let first_index = get_bucket_index(get_upper_edge(open_blob, &first_row), target_granularity);

  // The end of the first bucket may lie past u64::MAX, in which case it never completes.
  let first_bucket_end = first_index
    .checked_add(1)
    .and_then(|next_index| next_index.checked_mul(target_granularity));
  match (first_bucket_end, get_last_upper_edge(open_blob)) {
    (Some(first_bucket_end), Some(horizon)) => first_bucket_end <= horizon,
    _ => false,
  }
}

/// Whether every row of the blob lies in a bucket below the watermark.
pub fn is_fully_promoted(blob: &Blob, target_granularity: u64, watermark: u64) -> bool {
  match get_last_upper_edge(blob) {
    Some(upper_edge) => get_bucket_index(upper_edge, target_granularity) < watermark,
    None => true,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::merge_function::MergeFunction;
  use crate::model::meta::Meta;
  use crate::utils::time::{hours, minutes, seconds};

  fn raw_blob(points: &[u64], sealed: bool) -> Blob {
    let first_timestamp = points.first().copied().unwrap_or(0);
    let mut blob = Blob::new(Meta::new(1, 0, first_timestamp, MergeFunction::Sum));
    for time in points {
      blob.append(*time, 1.0).unwrap();
    }
    if sealed {
      blob.seal();
    }
    blob
  }

  fn ten_minutes() -> LevelConfig {
    LevelConfig::new(minutes(10), MergeFunction::Sum, 1000, hours(24))
  }

  #[test]
  fn test_boundary_sample_completes_bucket() {
    let blob = raw_blob(&[0, seconds(300), seconds(600)], true);
    let plan = plan_promotion(&[&blob], &ten_minutes(), 0).unwrap();
    assert_eq!(plan.get_windows(), &[0..1]);
    assert_eq!(plan.get_watermark(), 1);
    assert!(is_fully_promoted(&blob, minutes(10), 1));
  }

  #[test]
  fn test_incomplete_bucket_waits() {
    let blob = raw_blob(&[seconds(10), seconds(300)], true);
    assert!(plan_promotion(&[&blob], &ten_minutes(), 0).is_none());
  }

  #[test]
  fn test_partial_blob() {
    // The last sample is in bucket 1, which is not complete yet.
    let blob = raw_blob(&[seconds(10), seconds(590), seconds(700)], true);
    let plan = plan_promotion(&[&blob], &ten_minutes(), 0).unwrap();
    assert_eq!(plan.get_windows(), &[0..1]);
    assert!(!is_fully_promoted(&blob, minutes(10), plan.get_watermark()));
  }

  #[test]
  fn test_start_index() {
    let first = raw_blob(&[seconds(10), seconds(590)], true);
    let second = raw_blob(&[seconds(700), minutes(40)], true);
    let plan = plan_promotion(&[&first, &second], &ten_minutes(), 1).unwrap();
    assert_eq!(plan.get_windows(), &[1..4]);
    assert_eq!(plan.get_watermark(), 4);

    assert!(plan_promotion(&[&first, &second], &ten_minutes(), 4).is_none());
  }

  #[test]
  fn test_windows_respect_level_limits() {
    // At most 3 buckets per merged blob, sparse gaps start a new window.
    let target = LevelConfig::new(seconds(10), MergeFunction::Sum, 3, hours(1));
    let blob = raw_blob(
      &[
        seconds(5),
        seconds(15),
        seconds(25),
        seconds(35),
        seconds(305),
        seconds(400),
      ],
      true,
    );
    let plan = plan_promotion(&[&blob], &target, 0).unwrap();
    assert_eq!(plan.get_windows(), &[0..3, 3..6, 30..33, 39..40]);
    assert_eq!(plan.get_watermark(), 40);
  }

  #[test]
  fn test_has_complete_bucket() {
    assert!(has_complete_bucket(
      &raw_blob(&[0, seconds(300), seconds(600)], false),
      minutes(10)
    ));
    assert!(!has_complete_bucket(
      &raw_blob(&[seconds(1), seconds(599)], false),
      minutes(10)
    ));
    assert!(has_complete_bucket(
      &raw_blob(&[seconds(1), seconds(600)], false),
      minutes(10)
    ));
    assert!(!has_complete_bucket(&raw_blob(&[], false), minutes(10)));
  }

  #[test]
  fn test_timestamps_near_max() {
    // The bucket holding these samples ends past u64::MAX, so it is never complete.
    let open = raw_blob(&[u64::MAX - 10, u64::MAX - 1], false);
    assert!(!has_complete_bucket(&open, minutes(10)));

    let sealed = raw_blob(&[u64::MAX - 10, u64::MAX - 1], true);
    assert!(plan_promotion(&[&sealed], &ten_minutes(), 0).is_none());
    assert!(!is_fully_promoted(&sealed, minutes(10), u64::MAX / minutes(10)));

    // Unbounded level limits do not overflow the window end.
    let unbounded = LevelConfig::new(minutes(10), MergeFunction::Sum, u64::MAX, u64::MAX);
    let blob = raw_blob(&[seconds(10), minutes(25)], true);
    let plan = plan_promotion(&[&blob], &unbounded, 0).unwrap();
    assert_eq!(plan.get_windows(), &[0..2]);
  }
}
