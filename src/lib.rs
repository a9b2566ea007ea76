// This code is licensed under Elastic License 2.0
// https://www.elastic.co/licensing/elastic-license

//! Time-series blob storage core.
//!
//! Samples of each metric are appended to an open raw blob, which is sealed when it reaches
//! its size or time limit. Sealed blobs are rolled up into coarser blobs along a granularity
//! ladder and evicted once their TTL elapses or the metric exceeds its size budget.

pub mod ladder;
pub mod model;
pub mod policy_manager;
pub mod storage_manager;
pub mod store;
pub mod utils;

use log::info;
use tokio::task::JoinHandle;

use crate::model::blob::Blob;
use crate::model::blob_key::BlobKey;
use crate::storage_manager::persistence::{BlobHandle, BlobPersistence};
use crate::store::background::run_background_passes;
use crate::store::blob_store::BlobStore;
use crate::utils::config::Settings;
use crate::utils::error::TsKvError;
use crate::utils::sync::Arc;

/// Time-series blob store configured from a settings directory.
pub struct TsKv {
  store: Arc<BlobStore>,
  settings: Settings,
}

impl TsKv {
  /// Create a new TsKv from the settings in the given config directory.
  pub fn new(config_dir_path: &str) -> Result<Self, TsKvError> {
    let settings = Settings::new(config_dir_path)?;
    let tskv_settings = settings.get_tskv_settings();

    let mut store = BlobStore::new(tskv_settings.get_ladder()?);
    for (metric_id, ladder) in tskv_settings.get_metric_ladders()? {
      info!(
        "Metric {} uses its own ladder with {} levels",
        metric_id,
        ladder.len()
      );
      store = store.with_metric_ladder(metric_id, ladder);
    }
    if let Some(max_bytes_per_metric) = tskv_settings.get_max_bytes_per_metric() {
      store = store.with_max_bytes_per_metric(max_bytes_per_metric);
    }

    info!(
      "Created tskv from {} with {} default levels",
      config_dir_path,
      tskv_settings.get_levels().len()
    );

    Ok(TsKv {
      store: Arc::new(store),
      settings,
    })
  }

  /// Append a sample to the metric.
  pub fn ingest(&self, metric_id: u32, timestamp: u64, value: f64) -> Result<(), TsKvError> {
    self.store.ingest(metric_id, timestamp, value)
  }

  pub fn seal(&self, metric_id: u32) -> Result<bool, TsKvError> {
    self.store.seal(metric_id)
  }

  /// Get the blobs of the metric between the given start and end time (both inclusive), at the
  /// finest available granularity of at least `granularity`.
  pub fn query(
    &self,
    metric_id: u32,
    start: u64,
    end: u64,
    granularity: u64,
  ) -> Result<Vec<Arc<Blob>>, TsKvError> {
    self.store.query(metric_id, start, end, granularity)
  }

  pub fn promote(&self, metric_id: u32) -> Result<usize, TsKvError> {
    self.store.promote(metric_id)
  }

  pub fn promote_all(&self) -> usize {
    self.store.promote_all()
  }

  pub fn evict(&self) -> Vec<BlobKey> {
    self.store.evict()
  }

  pub fn evict_at(&self, now: u64) -> Vec<BlobKey> {
    self.store.evict_at(now)
  }

  pub fn flush(&self, persistence: &dyn BlobPersistence) -> Result<usize, TsKvError> {
    self.store.flush(persistence)
  }

  pub fn flush_memory_only(
    &self,
    metric_id: u32,
    persistence: &dyn BlobPersistence,
  ) -> Result<usize, TsKvError> {
    self.store.flush_memory_only(metric_id, persistence)
  }

  pub fn restore(
    &self,
    persistence: &dyn BlobPersistence,
    handles: &[BlobHandle],
  ) -> Result<usize, TsKvError> {
    self.store.restore(persistence, handles)
  }

  /// Start periodic promotion and eviction on the current tokio runtime. The returned task
  /// finishes after [TsKv::shutdown].
  pub fn start_background_passes(&self) -> JoinHandle<()> {
    let tskv_settings = self.settings.get_tskv_settings();
    tokio::spawn(run_background_passes(
      self.store.clone(),
      tskv_settings.get_promotion_interval_ms(),
      tskv_settings.get_eviction_interval_ms(),
    ))
  }

  /// Stop background passes and seal all open blobs so that they can be flushed.
  pub fn shutdown(&self) {
    self.store.shutdown();
    let sealed = self.store.seal_all();
    info!("Shutting down tskv, sealed {} open blobs", sealed);
  }

  pub fn get_store(&self) -> &Arc<BlobStore> {
    &self.store
  }

  pub fn get_settings(&self) -> &Settings {
    &self.settings
  }
}
