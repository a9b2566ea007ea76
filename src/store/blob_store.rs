// This code is licensed under Elastic License 2.0
// https://www.elastic.co/licensing/elastic-license

use std::collections::HashMap;

use dashmap::DashMap;
use log::{error, info};

use crate::ladder::level::Ladder;
use crate::model::blob::Blob;
use crate::model::blob_key::BlobKey;
use crate::storage_manager::persistence::{BlobHandle, BlobPersistence};
use crate::store::metric_blobs::MetricBlobs;
use crate::utils::error::TsKvError;
use crate::utils::sync::{Arc, AtomicCell, RwLock};
use crate::utils::time::get_current_time_in_millis;

/// Blobs of all metrics. Each metric sits behind its own lock, so different metrics are
/// ingested, promoted and evicted in parallel.
#[derive(Debug)]
pub struct BlobStore {
  metrics: DashMap<u32, Arc<RwLock<MetricBlobs>>>,

  /// Ladder for metrics without an override.
  ladder: Ladder,

  metric_ladders: HashMap<u32, Ladder>,

  max_bytes_per_metric: Option<u64>,

  /// Set on shutdown. Store-wide passes stop between metrics once it is set.
  is_shutdown: AtomicCell<bool>,
}

impl BlobStore {
  pub fn new(ladder: Ladder) -> Self {
    BlobStore {
      metrics: DashMap::new(),
      ladder,
      metric_ladders: HashMap::new(),
      max_bytes_per_metric: None,
      is_shutdown: AtomicCell::new(false),
    }
  }

  /// Use a dedicated ladder for the given metric.
  pub fn with_metric_ladder(mut self, metric_id: u32, ladder: Ladder) -> Self {
    self.metric_ladders.insert(metric_id, ladder);
    self
  }

  pub fn with_max_bytes_per_metric(mut self, max_bytes_per_metric: u64) -> Self {
    self.max_bytes_per_metric = Some(max_bytes_per_metric);
    self
  }

  /// The ladder the given metric uses.
  pub fn get_ladder(&self, metric_id: u32) -> &Ladder {
    self.metric_ladders.get(&metric_id).unwrap_or(&self.ladder)
  }

  pub fn get_max_bytes_per_metric(&self) -> Option<u64> {
    self.max_bytes_per_metric
  }

  fn get_metric(&self, metric_id: u32) -> Result<Arc<RwLock<MetricBlobs>>, TsKvError> {
    self
      .metrics
      .get(&metric_id)
      .map(|entry| entry.value().clone())
      .ok_or_else(|| TsKvError::NotFound(format!("metric {}", metric_id)))
  }

  fn get_or_create_metric(&self, metric_id: u32) -> Arc<RwLock<MetricBlobs>> {
    self
      .metrics
      .entry(metric_id)
      .or_insert_with(|| {
        Arc::new(RwLock::new(MetricBlobs::new(
          metric_id,
          self.get_ladder(metric_id).clone(),
        )))
      })
      .value()
      .clone()
  }

  /// Snapshot of all metrics, sorted by id so that store-wide passes are deterministic.
  fn get_metrics(&self) -> Vec<(u32, Arc<RwLock<MetricBlobs>>)> {
    let mut metrics: Vec<(u32, Arc<RwLock<MetricBlobs>>)> = self
      .metrics
      .iter()
      .map(|entry| (*entry.key(), entry.value().clone()))
      .collect();
    metrics.sort_by_key(|(metric_id, _)| *metric_id);
    metrics
  }

  /// Append a sample to the metric, creating it on first use.
  pub fn ingest(&self, metric_id: u32, timestamp: u64, value: f64) -> Result<(), TsKvError> {
    let metric = self.get_or_create_metric(metric_id);
    let mut metric = metric.write();
    metric.ingest(timestamp, value)
  }

  /// Seal the open raw blob of the metric. Returns false if it had none.
  pub fn seal(&self, metric_id: u32) -> Result<bool, TsKvError> {
    let metric = self.get_metric(metric_id)?;
    let sealed = metric.write().seal();
    Ok(sealed)
  }

  /// Seal the open raw blobs of all metrics. Returns the number of blobs sealed.
  pub fn seal_all(&self) -> usize {
    self
      .get_metrics()
      .iter()
      .filter(|(_, metric)| metric.write().seal())
      .count()
  }

  /// Promote complete buckets of the metric up its ladder. Returns the number of blobs created.
  pub fn promote(&self, metric_id: u32) -> Result<usize, TsKvError> {
    let metric = self.get_metric(metric_id)?;
    promote_metric(&metric)
  }

  /// Promote all metrics. A failing metric is logged and skipped. Returns the number of blobs created.
  pub fn promote_all(&self) -> usize {
    let mut created = 0;
    for (metric_id, metric) in self.get_metrics() {
      if self.is_shutdown() {
        info!("Shutdown requested, stopping promotion");
        break;
      }
      match promote_metric(&metric) {
        Ok(count) => created += count,
        Err(e) => error!("Could not promote metric {}: {}", metric_id, e),
      }
    }
    created
  }

  /// Evict blobs of all metrics at the current time.
  pub fn evict(&self) -> Vec<BlobKey> {
    self.evict_at(get_current_time_in_millis())
  }

  /// Evict blobs of all metrics whose TTL elapsed at `now`, then the ones over the size
  /// budget. Returns the keys of the evicted blobs.
  pub fn evict_at(&self, now: u64) -> Vec<BlobKey> {
    let mut evicted = Vec::new();
    for (_, metric) in self.get_metrics() {
      if self.is_shutdown() {
        info!("Shutdown requested, stopping eviction");
        break;
      }
      evicted.extend(metric.write().evict(now, self.max_bytes_per_metric));
    }
    evicted
  }

  /// Blobs of the metric overlapping `[start, end]`, at the finest level of at least
  /// the requested granularity that holds data in the range.
  pub fn query(
    &self,
    metric_id: u32,
    start: u64,
    end: u64,
    granularity: u64,
  ) -> Result<Vec<Arc<Blob>>, TsKvError> {
    let metric = self.get_metric(metric_id)?;
    let blobs = metric.read().query(start, end, granularity);
    blobs
  }

  /// Persist every sealed blob that is not memory-only and not persisted yet.
  pub fn flush(&self, persistence: &dyn BlobPersistence) -> Result<usize, TsKvError> {
    let mut flushed = 0;
    for (_, metric) in self.get_metrics() {
      flushed += metric.write().flush(persistence, false)?;
    }
    Ok(flushed)
  }

  /// Persist the sealed memory-only blobs of the metric.
  pub fn flush_memory_only(
    &self,
    metric_id: u32,
    persistence: &dyn BlobPersistence,
  ) -> Result<usize, TsKvError> {
    let metric = self.get_metric(metric_id)?;
    let flushed = metric.write().flush(persistence, true)?;
    Ok(flushed)
  }

  /// Load previously persisted blobs back into the store. Returns the number of blobs added.
  pub fn restore(
    &self,
    persistence: &dyn BlobPersistence,
    handles: &[BlobHandle],
  ) -> Result<usize, TsKvError> {
    let mut restored = 0;
    for handle in handles {
      let blob = persistence.load(handle)?;
      let metric = self.get_or_create_metric(blob.get_meta().get_metric_id());
      if metric.write().restore(blob, handle.clone())? {
        restored += 1;
      }
    }
    info!("Restored {} of {} persisted blobs", restored, handles.len());
    Ok(restored)
  }

  /// Ids of all metrics in the store, sorted.
  pub fn get_metric_ids(&self) -> Vec<u32> {
    let mut metric_ids: Vec<u32> = self.metrics.iter().map(|entry| *entry.key()).collect();
    metric_ids.sort_unstable();
    metric_ids
  }

  pub fn get_size_in_bytes(&self, metric_id: u32) -> Result<u64, TsKvError> {
    let metric = self.get_metric(metric_id)?;
    let size = metric.read().get_size_in_bytes();
    Ok(size)
  }

  pub fn get_blob_count(&self, metric_id: u32) -> Result<usize, TsKvError> {
    let metric = self.get_metric(metric_id)?;
    let count = metric.read().get_blob_count();
    Ok(count)
  }

  pub fn shutdown(&self) {
    self.is_shutdown.store(true);
  }

  pub fn is_shutdown(&self) -> bool {
    self.is_shutdown.load()
  }
}

/// Promote one metric level by level. The write lock is only taken to seal the open blob and
/// to install the merged blobs; merges run on shared sealed blobs without holding the lock, so
/// queries and ingestion of the metric proceed meanwhile.
fn promote_metric(metric: &RwLock<MetricBlobs>) -> Result<usize, TsKvError> {
  let num_steps = {
    let mut metric = metric.write();
    metric.seal_for_promotion();
    metric.get_promotion_level_count()
  };

  let mut created = 0;
  for index in 0..num_steps {
    let task = match metric.read().get_promotion_task(index) {
      Some(task) => task,
      None => break,
    };
    let result = task.run()?;
    created += metric.write().install_promotion(result);
  }
  Ok(created)
}

#[cfg(test)]
mod tests {
  use rand::Rng;

  use super::*;
  use crate::ladder::level::LevelConfig;
  use crate::model::merge_function::MergeFunction;
  use crate::storage_manager::persistence::MemoryPersistence;
  use crate::utils::sync::{is_sync_send, thread};
  use crate::utils::time::{hours, minutes, seconds};

  fn ladder(merge_function: MergeFunction) -> Ladder {
    Ladder::new(vec![
      LevelConfig::new(0, merge_function, 1000, hours(1)),
      LevelConfig::new(minutes(10), merge_function, 1000, hours(24)),
      LevelConfig::new(hours(1), merge_function, 1000, hours(24 * 30)),
    ])
    .unwrap()
  }

  #[test]
  fn test_empty_store() {
    is_sync_send::<BlobStore>();

    let store = BlobStore::new(ladder(MergeFunction::Last));
    assert!(store.get_metric_ids().is_empty());
    assert_eq!(
      store.query(1, 0, 100, 0),
      Err(TsKvError::NotFound("metric 1".to_owned()))
    );
    assert!(matches!(store.promote(1), Err(TsKvError::NotFound(_))));
    assert!(matches!(store.seal(1), Err(TsKvError::NotFound(_))));
    assert!(matches!(
      store.get_size_in_bytes(1),
      Err(TsKvError::NotFound(_))
    ));
    assert_eq!(store.promote_all(), 0);
    assert!(store.evict_at(hours(100)).is_empty());
  }

  #[test]
  fn test_metric_ladder_override() {
    let sum_ladder = ladder(MergeFunction::Sum);
    let store = BlobStore::new(ladder(MergeFunction::Last)).with_metric_ladder(7, sum_ladder);

    for metric_id in [1, 7] {
      store.ingest(metric_id, 0, 1.0).unwrap();
      store.ingest(metric_id, seconds(300), 2.0).unwrap();
      store.ingest(metric_id, seconds(600), 3.0).unwrap();
    }
    assert_eq!(store.promote_all(), 2);
    assert_eq!(store.get_metric_ids(), vec![1, 7]);

    let last = store.query(1, 0, seconds(600), minutes(10)).unwrap();
    assert_eq!(last[0].get_data().get_values(), &[3.0]);
    let sum = store.query(7, 0, seconds(600), minutes(10)).unwrap();
    assert_eq!(sum[0].get_data().get_values(), &[6.0]);
    assert_eq!(
      store.get_ladder(7).get_level(1).unwrap().get_merge_function(),
      MergeFunction::Sum
    );
  }

  #[test]
  fn test_concurrent_ingest() {
    let store = Arc::new(BlobStore::new(ladder(MergeFunction::Count)));
    let num_threads = 8;
    let num_samples = 500;

    let mut handles = Vec::new();
    for metric_id in 0..num_threads {
      let store = store.clone();
      handles.push(thread::spawn(move || {
        let mut rng = rand::thread_rng();
        let mut timestamp = 0;
        for _ in 0..num_samples {
          timestamp += rng.gen_range(1..seconds(10));
          store.ingest(metric_id, timestamp, rng.gen()).unwrap();
        }
        timestamp
      }));
    }
    let last_timestamps: Vec<u64> = handles
      .into_iter()
      .map(|handle| handle.join().unwrap())
      .collect();

    store.promote_all();
    for metric_id in 0..num_threads {
      let blobs = store
        .query(metric_id, 0, last_timestamps[metric_id as usize], 0)
        .unwrap();
      let count: usize = blobs.iter().map(|blob| blob.len()).sum();
      assert_eq!(count, num_samples);
      assert_eq!(
        store.get_size_in_bytes(metric_id).unwrap() % 48,
        0
      );
    }
  }

  #[test]
  fn test_promotion_merges_without_lock() {
    let store = BlobStore::new(ladder(MergeFunction::Sum));
    for i in 1..=20_000 {
      store.ingest(1, seconds(i), 1.0).unwrap();
    }
    store.seal(1).unwrap();

    let metric = store.get_metric(1).unwrap();
    let task = metric.read().get_promotion_task(0).unwrap();
    let stale_task = metric.read().get_promotion_task(0).unwrap();

    // Queries and ingestion proceed while the merge is pending.
    assert!(metric.try_write().is_some());
    let raw = store.query(1, 0, seconds(10), 0).unwrap();
    assert_eq!(raw.len(), 1);
    store.ingest(1, seconds(20_001), 1.0).unwrap();

    let result = task.run().unwrap();
    assert_eq!(metric.write().install_promotion(result), 1);

    // Thirty-three complete ten-minute buckets of 600 samples each.
    let ten_minutes = store.query(1, 0, hours(6), minutes(10)).unwrap();
    let counts: Vec<u64> = ten_minutes
      .iter()
      .flat_map(|blob| blob.get_data().get_counts().to_vec())
      .collect();
    assert_eq!(counts.len(), 33);
    assert!(counts.iter().all(|count| *count == 600));

    // A task taken before the install is outdated and does not count buckets twice.
    let result = stale_task.run().unwrap();
    assert_eq!(metric.write().install_promotion(result), 0);
    assert_eq!(store.query(1, 0, hours(6), minutes(10)).unwrap().len(), 1);
  }

  #[test]
  fn test_query_while_promoting() {
    let store = Arc::new(BlobStore::new(ladder(MergeFunction::Avg)));
    for i in 1..=200_000 {
      store.ingest(1, seconds(i), i as f64).unwrap();
    }
    store.seal(1).unwrap();

    let promoter = {
      let store = store.clone();
      thread::spawn(move || store.promote(1).unwrap())
    };

    // Sealed raw data stays readable, and new samples are accepted, during the promotion.
    let mut timestamp = seconds(200_000);
    while !promoter.is_finished() {
      let raw = store.query(1, 0, seconds(10), 0).unwrap();
      assert_eq!(raw[0].get_data().get_first_timestamp(), Some(seconds(1)));
      timestamp += 1;
      store.ingest(1, timestamp, 1.0).unwrap();
    }
    assert!(promoter.join().unwrap() > 0);

    let hourly = store.query(1, 0, hours(1), hours(1)).unwrap();
    assert_eq!(hourly[0].get_data().get_counts()[0], 3600);
  }

  #[test]
  fn test_evict_with_budget() {
    let store = BlobStore::new(ladder(MergeFunction::Max)).with_max_bytes_per_metric(48 * 4);
    assert_eq!(store.get_max_bytes_per_metric(), Some(48 * 4));
    for metric_id in [1, 2] {
      for i in 1..=8 {
        store.ingest(metric_id, minutes(1) * i, i as f64).unwrap();
      }
      store.seal(metric_id).unwrap();
    }

    let evicted = store.evict_at(0);
    assert_eq!(
      evicted,
      vec![BlobKey::new(1, 0, minutes(1)), BlobKey::new(2, 0, minutes(1))]
    );
    assert!(store.evict_at(0).is_empty());
    assert_eq!(store.get_blob_count(1).unwrap(), 0);
  }

  #[test]
  fn test_shutdown_stops_passes() {
    let store = BlobStore::new(ladder(MergeFunction::Last));
    store.ingest(1, 0, 1.0).unwrap();
    store.ingest(1, seconds(600), 1.0).unwrap();
    store.shutdown();
    assert!(store.is_shutdown());
    assert_eq!(store.promote_all(), 0);

    // Explicit calls still work.
    assert_eq!(store.promote(1).unwrap(), 1);
  }

  #[test]
  fn test_flush_and_restore() {
    let store = BlobStore::new(ladder(MergeFunction::Avg));
    for i in 1..=12 {
      store.ingest(3, minutes(5) * i, i as f64).unwrap();
    }
    assert_eq!(store.seal_all(), 1);
    store.promote(3).unwrap();

    let persistence = MemoryPersistence::new();
    let flushed = store.flush(&persistence).unwrap();
    assert_eq!(flushed, store.get_blob_count(3).unwrap());
    assert_eq!(store.flush_memory_only(3, &persistence).unwrap(), 0);

    let restored_store = BlobStore::new(ladder(MergeFunction::Avg));
    let handles = persistence.get_handles();
    assert_eq!(
      restored_store.restore(&persistence, &handles).unwrap(),
      flushed
    );
    assert_eq!(
      restored_store.query(3, 0, hours(1), hours(1)).unwrap(),
      store.query(3, 0, hours(1), hours(1)).unwrap()
    );
    assert_eq!(restored_store.restore(&persistence, &handles).unwrap(), 0);
  }
}
