// This code is licensed under Elastic License 2.0
// https://www.elastic.co/licensing/elastic-license

use std::collections::BTreeMap;

use rand::Rng;
use test_case::test_case;

use tskv::ladder::merge_engine::{get_bucket_index, merge};
use tskv::ladder::{Ladder, LevelConfig};
use tskv::model::blob::Blob;
use tskv::model::blob_key::BlobKey;
use tskv::model::merge_function::MergeFunction;
use tskv::model::meta::Meta;
use tskv::store::BlobStore;
use tskv::utils::error::TsKvError;
use tskv::utils::time::{get_current_time_in_millis, hours, minutes, seconds};

fn init_logging() {
  let _ = env_logger::builder().is_test(true).try_init();
}

fn default_ladder(merge_function: MergeFunction) -> Ladder {
  Ladder::new(vec![
    LevelConfig::new(0, merge_function, 1000, hours(1)),
    LevelConfig::new(minutes(10), merge_function, 1000, hours(24)),
    LevelConfig::new(hours(1), merge_function, 1000, hours(24 * 30)),
  ])
  .unwrap()
}

#[test]
fn test_last_rollup() {
  init_logging();
  let store = BlobStore::new(default_ladder(MergeFunction::Last));
  store.ingest(1, seconds(0), 1.0).unwrap();
  store.ingest(1, seconds(300), 2.0).unwrap();
  store.ingest(1, seconds(600), 3.0).unwrap();

  assert_eq!(store.promote(1).unwrap(), 1);

  let blobs = store.query(1, 0, seconds(600), minutes(10)).unwrap();
  assert_eq!(blobs.len(), 1);
  let blob = &blobs[0];
  assert_eq!(blob.len(), 1);
  assert!(blob.is_sealed());
  assert!(blob.get_meta().is_aggregated());
  assert_eq!(blob.get_meta().get_granularity(), minutes(10));

  let bucket = blob.get_data().get(0).unwrap();
  assert_eq!(bucket.get_value(), 3.0);
  assert_eq!(bucket.get_count(), 3);
  assert_eq!(bucket.get_min(), 1.0);
  assert_eq!(bucket.get_max(), 3.0);
  assert_eq!(bucket.get_last(), 3.0);
}

#[test]
fn test_max_time_seals_blob() {
  init_logging();
  let ladder = Ladder::new(vec![
    LevelConfig::new(0, MergeFunction::Sum, 1000, minutes(10)),
    LevelConfig::new(hours(1), MergeFunction::Sum, 1000, hours(24)),
  ])
  .unwrap();
  let store = BlobStore::new(ladder);
  store.ingest(1, 0, 1.0).unwrap();
  store.ingest(1, minutes(5), 2.0).unwrap();
  store.ingest(1, minutes(11), 3.0).unwrap();

  let blobs = store.query(1, 0, minutes(11), 0).unwrap();
  assert_eq!(blobs.len(), 2);

  let sealed = &blobs[0];
  assert!(sealed.is_sealed());
  assert_eq!(sealed.get_data().get_timestamps(), &[0, minutes(5)]);

  let open = &blobs[1];
  assert!(!open.is_sealed());
  assert_eq!(open.get_meta().get_first_timestamp(), minutes(11));
  assert_eq!(open.get_data().get_values(), &[3.0]);
}

#[test]
fn test_ttl_eviction() {
  init_logging();
  let ladder = Ladder::new(vec![
    LevelConfig::new(0, MergeFunction::Max, 1000, hours(1)).with_ttl(hours(1)),
    LevelConfig::new(hours(1), MergeFunction::Max, 1000, hours(24)),
  ])
  .unwrap();
  let store = BlobStore::new(ladder);

  let now = get_current_time_in_millis();
  let two_hours_ago = now - hours(2);
  let thirty_minutes_ago = now - minutes(30);
  store.ingest(1, two_hours_ago, 1.0).unwrap();
  store.seal(1).unwrap();
  store.ingest(2, thirty_minutes_ago, 1.0).unwrap();
  store.seal(2).unwrap();

  let evicted = store.evict();
  assert_eq!(evicted, vec![BlobKey::new(1, 0, two_hours_ago)]);
  assert!(matches!(
    store.query(1, 0, now, 0),
    Err(TsKvError::NotFound(_))
  ));
  assert_eq!(store.query(2, 0, now, 0).unwrap().len(), 1);

  // Nothing more to evict.
  assert!(store.evict().is_empty());
}

#[test]
fn test_query_unknown_metric() {
  let store = BlobStore::new(default_ladder(MergeFunction::Avg));
  assert!(matches!(
    store.query(42, 0, u64::MAX, 0),
    Err(TsKvError::NotFound(_))
  ));

  store.ingest(1, seconds(1), 1.0).unwrap();
  assert!(matches!(
    store.query(42, 0, u64::MAX, 0),
    Err(TsKvError::NotFound(_))
  ));
  assert!(store.query(1, 0, u64::MAX, 0).is_ok());
}

#[test]
fn test_in_order_appends() {
  let mut rng = rand::thread_rng();
  let mut blob = Blob::new(Meta::new(1, 0, 0, MergeFunction::Sum));
  let mut timestamps = Vec::new();
  let mut values = Vec::new();

  let mut timestamp = 0;
  for _ in 0..1000 {
    timestamp += rng.gen_range(1..1000);
    let value: f64 = rng.gen();
    blob.append(timestamp, value).unwrap();
    timestamps.push(timestamp);
    values.push(value);
  }
  assert_eq!(blob.get_data().get_timestamps(), timestamps.as_slice());
  assert_eq!(blob.get_data().get_values(), values.as_slice());

  // Out of order appends fail and leave the blob as it was.
  let before = blob.clone();
  assert_eq!(
    blob.append(timestamp, 1.0),
    Err(TsKvError::OutOfOrder(timestamp, timestamp))
  );
  assert!(blob.append(rng.gen_range(0..timestamp), 1.0).is_err());
  assert_eq!(blob, before);
}

#[test_case(MergeFunction::Sum; "sum")]
#[test_case(MergeFunction::Avg; "avg")]
#[test_case(MergeFunction::Last; "last")]
#[test_case(MergeFunction::Count; "count")]
fn test_promoted_counts_match_raw(merge_function: MergeFunction) {
  init_logging();
  let store = BlobStore::new(default_ladder(merge_function));
  let mut rng = rand::thread_rng();

  // Expected number of samples per ten-minute bucket.
  let mut expected: BTreeMap<u64, u64> = BTreeMap::new();
  let mut timestamp = 0;
  while timestamp < hours(5) {
    timestamp += rng.gen_range(1..seconds(90));
    store.ingest(1, timestamp, rng.gen_range(0.0..100.0)).unwrap();
    *expected
      .entry(get_bucket_index(timestamp, minutes(10)))
      .or_default() += 1;

    if rng.gen_range(0..50) == 0 {
      store.promote(1).unwrap();
    }
  }
  store.seal(1).unwrap();
  store.promote(1).unwrap();

  let blobs = store.query(1, 0, timestamp, minutes(10)).unwrap();
  let mut promoted = 0;
  for blob in blobs.iter().filter(|blob| blob.get_meta().is_aggregated()) {
    for bucket in blob.get_data().iter() {
      let index = bucket.get_timestamp() / minutes(10);
      assert_eq!(Some(&bucket.get_count()), expected.get(&index));
      promoted += 1;
    }
  }
  // Every bucket that ends at or before the last sample has been promoted.
  let watermark = timestamp / minutes(10);
  assert_eq!(promoted, expected.range(..watermark).count());

  let hourly = store.query(1, 0, timestamp, hours(1)).unwrap();
  for bucket in hourly.iter().flat_map(|blob| blob.get_data().iter()) {
    let hour = bucket.get_timestamp() / hours(1);
    let raw_count: u64 = expected
      .iter()
      .filter(|(index, _)| *index / 6 == hour)
      .map(|(_, count)| count)
      .sum();
    assert_eq!(bucket.get_count(), raw_count);
  }
}

#[test]
fn test_merge_is_deterministic() {
  let mut rng = rand::thread_rng();
  let mut sources = Vec::new();
  let mut timestamp = 0;
  for _ in 0..4 {
    let mut blob = Blob::new(Meta::new(1, 0, timestamp + 1, MergeFunction::Avg));
    for _ in 0..200 {
      timestamp += rng.gen_range(1..seconds(30));
      blob.append(timestamp, rng.gen_range(-1000.0..1000.0)).unwrap();
    }
    blob.seal();
    sources.push(blob);
  }
  let source_refs: Vec<&Blob> = sources.iter().collect();

  let first = merge(&source_refs, minutes(10), MergeFunction::Avg).unwrap();
  let second = merge(&source_refs, minutes(10), MergeFunction::Avg).unwrap();
  let bits = |blob: &Blob| -> Vec<u64> {
    blob
      .get_data()
      .get_values()
      .iter()
      .map(|value| value.to_bits())
      .collect()
  };
  assert_eq!(bits(&first), bits(&second));
  assert_eq!(first, second);

  let total: u64 = first.get_data().get_counts().iter().sum();
  assert_eq!(total, 800);
}

#[test]
fn test_promote_near_end_of_time() {
  init_logging();
  let ladder = Ladder::new(vec![
    LevelConfig::new(0, MergeFunction::Sum, 1000, hours(1)),
    LevelConfig::new(minutes(10), MergeFunction::Sum, 1000, hours(24)),
  ])
  .unwrap();
  let store = BlobStore::new(ladder);
  store.ingest(1, u64::MAX - 1, 1.0).unwrap();

  // The bucket of this sample never completes, so nothing is promoted.
  assert_eq!(store.promote(1).unwrap(), 0);
  store.seal(1).unwrap();
  assert_eq!(store.promote(1).unwrap(), 0);

  let blobs = store.query(1, u64::MAX - 1, u64::MAX, 0).unwrap();
  assert_eq!(blobs.len(), 1);
  assert_eq!(blobs[0].get_data().get_values(), &[1.0]);
}
