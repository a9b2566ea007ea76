// This code is licensed under Elastic License 2.0
// https://www.elastic.co/licensing/elastic-license

use std::collections::BTreeSet;

use log::{debug, info};

use crate::ladder::level::{Ladder, LevelConfig};
use crate::ladder::merge_engine::merge_window;
use crate::ladder::promotion::{has_complete_bucket, is_fully_promoted, plan_promotion};
use crate::model::blob::Blob;
use crate::model::blob_key::BlobKey;
use crate::policy_manager::blob_summary::BlobSummary;
use crate::policy_manager::retention_policy::{RetentionPolicy, TtlRetention};
use crate::policy_manager::size_policy::SizeBasedRetention;
use crate::storage_manager::persistence::{BlobHandle, BlobPersistence};
use crate::utils::error::TsKvError;
use crate::utils::sync::Arc;

/// A sealed blob held by the store.
#[derive(Debug)]
pub(crate) struct StoredBlob {
  blob: Arc<Blob>,

  /// Every row of the blob is represented at the next coarser level.
  is_promoted: bool,

  /// Set once the blob has been written to a persistence backend.
  handle: Option<BlobHandle>,
}

impl StoredBlob {
  fn new(blob: Blob) -> Self {
    StoredBlob {
      blob: Arc::new(blob),
      is_promoted: false,
      handle: None,
    }
  }
}

/// Promotion of one level into the next, detached from the metric so that the merges run
/// without holding its lock.
#[derive(Debug)]
pub(crate) struct PromotionTask {
  level_index: usize,
  target: LevelConfig,

  /// Start index of the target level when the task was taken.
  start_index: u64,

  /// Unpromoted sealed blobs of the source level, in time order.
  sources: Vec<Arc<Blob>>,
}

impl PromotionTask {
  /// Merge the complete buckets of the sources into blobs of the target level.
  pub(crate) fn run(self) -> Result<PromotionResult, TsKvError> {
    let mut result = PromotionResult {
      level_index: self.level_index,
      start_index: self.start_index,
      watermark: None,
      blobs: Vec::new(),
    };

    let sources: Vec<&Blob> = self.sources.iter().map(|blob| blob.as_ref()).collect();
    if sources.is_empty() {
      return Ok(result);
    }
    let plan = match plan_promotion(&sources, &self.target, self.start_index) {
      Some(plan) => plan,
      None => return Ok(result),
    };

    for window in plan.get_windows() {
      if let Some(blob) = merge_window(&sources, &self.target, window.clone())? {
        result.blobs.push(blob);
      }
    }
    result.watermark = Some(plan.get_watermark());
    Ok(result)
  }
}

/// Output of a [PromotionTask], installed with [MetricBlobs::install_promotion].
#[derive(Debug)]
pub(crate) struct PromotionResult {
  level_index: usize,
  start_index: u64,

  /// New watermark of the target level, if any bucket was complete.
  watermark: Option<u64>,

  blobs: Vec<Blob>,
}

/// All blobs of one metric: sealed blobs per ladder level, in time order, and the open raw blob.
#[derive(Debug)]
pub struct MetricBlobs {
  metric_id: u32,
  ladder: Ladder,

  /// Sealed blobs, indexed by ladder level and sorted by first timestamp.
  levels: Vec<Vec<StoredBlob>>,

  open_blob: Option<Blob>,

  /// Last ingested timestamp, kept across seals and evictions.
  last_timestamp: Option<u64>,

  /// Per level, the first target bucket index that has not been promoted into it yet.
  watermarks: Vec<Option<u64>>,
}

impl MetricBlobs {
  pub fn new(metric_id: u32, ladder: Ladder) -> Self {
    let num_levels = ladder.len();
    MetricBlobs {
      metric_id,
      ladder,
      levels: (0..num_levels).map(|_| Vec::new()).collect(),
      open_blob: None,
      last_timestamp: None,
      watermarks: vec![None; num_levels],
    }
  }

  pub fn get_metric_id(&self) -> u32 {
    self.metric_id
  }

  pub fn get_ladder(&self) -> &Ladder {
    &self.ladder
  }

  pub fn get_last_timestamp(&self) -> Option<u64> {
    self.last_timestamp
  }

  /// Append a sample to the open raw blob, sealing it and opening a new one when it is full.
  pub fn ingest(&mut self, timestamp: u64, value: f64) -> Result<(), TsKvError> {
    if let Some(last) = self.last_timestamp {
      if timestamp <= last {
        return Err(TsKvError::OutOfOrder(timestamp, last));
      }
    }

    let raw_level = self.ladder.get_raw_level().clone();
    let open_blob = self
      .open_blob
      .get_or_insert_with(|| Blob::new(raw_level.new_meta(self.metric_id, timestamp)));

    match open_blob.append(timestamp, value) {
      Ok(()) => {}
      Err(TsKvError::CapacityFull(_, _)) => {
        self.seal();
        let mut blob = Blob::new(raw_level.new_meta(self.metric_id, timestamp));
        match blob.append(timestamp, value) {
          Ok(()) => {}
          Err(TsKvError::CapacityFull(max_size, max_time)) => {
            return Err(TsKvError::InvalidConfiguration(format!(
              "a new raw blob of metric {} cannot hold a single sample (max_size {}, max_time {})",
              self.metric_id, max_size, max_time
            )))
          }
          Err(e) => return Err(e),
        }
        self.open_blob = Some(blob);
      }
      Err(e) => return Err(e),
    }

    self.last_timestamp = Some(timestamp);
    Ok(())
  }

  /// Seal the open raw blob. Returns false if there was nothing to seal.
  pub fn seal(&mut self) -> bool {
    let mut blob = match self.open_blob.take() {
      Some(blob) if !blob.is_empty() => blob,
      _ => return false,
    };
    blob.seal();
    info!(
      "Sealed raw blob of metric {} starting at {} with {} samples",
      self.metric_id,
      blob.get_meta().get_first_timestamp(),
      blob.len()
    );
    self.levels[0].push(StoredBlob::new(blob));
    true
  }

  /// Roll complete buckets up the ladder, one level after the other. Returns the number of
  /// blobs created. The blobs of a level are computed first and installed together.
  pub fn promote(&mut self) -> Result<usize, TsKvError> {
    self.seal_for_promotion();
    let mut created = 0;
    for index in 0..self.get_promotion_level_count() {
      if let Some(task) = self.get_promotion_task(index) {
        let result = task.run()?;
        created += self.install_promotion(result);
      }
    }
    Ok(created)
  }

  /// Number of promotion steps, one per pair of adjacent levels.
  pub(crate) fn get_promotion_level_count(&self) -> usize {
    self.ladder.len().saturating_sub(1)
  }

  /// Seal the open raw blob if it already holds a complete bucket of the first aggregated
  /// level. Returns true if it was sealed.
  pub(crate) fn seal_for_promotion(&mut self) -> bool {
    let target_granularity = match self.ladder.get_level(1) {
      Some(target) => target.get_granularity(),
      None => return false,
    };
    let should_seal = self
      .open_blob
      .as_ref()
      .map_or(false, |open_blob| has_complete_bucket(open_blob, target_granularity));
    should_seal && self.seal()
  }

  /// Snapshot what promoting level `index` into the next one needs. Sealed blobs are shared,
  /// so the task runs without access to the metric.
  pub(crate) fn get_promotion_task(&self, index: usize) -> Option<PromotionTask> {
    let target = self.ladder.get_level(index + 1)?.clone();
    let sources = self.levels[index]
      .iter()
      .filter(|stored| !stored.is_promoted)
      .map(|stored| stored.blob.clone())
      .collect();
    Some(PromotionTask {
      level_index: index,
      target,
      start_index: self.get_promotion_start_index(index + 1),
      sources,
    })
  }

  /// Install the blobs of a finished promotion task together with the new watermark, and flag
  /// the source blobs that are fully covered. Returns the number of blobs installed, zero if
  /// the target level changed since the task was taken.
  pub(crate) fn install_promotion(&mut self, result: PromotionResult) -> usize {
    let index = result.level_index;
    let target_index = index + 1;
    if self.get_promotion_start_index(target_index) != result.start_index {
      debug!(
        "Discarding promotion of metric {} into level {}: the level changed while merging",
        self.metric_id, target_index
      );
      return 0;
    }

    let target_granularity = self.ladder.get_levels()[target_index].get_granularity();
    let created = result.blobs.len();
    let watermark = match result.watermark {
      Some(watermark) => {
        info!(
          "Promoted metric {} into granularity {}: {} blobs, watermark {}",
          self.metric_id, target_granularity, created, watermark
        );
        self.levels[target_index].extend(result.blobs.into_iter().map(StoredBlob::new));
        self.watermarks[target_index] = Some(watermark);
        watermark
      }
      None => result.start_index,
    };

    for stored in self.levels[index].iter_mut() {
      if !stored.is_promoted && is_fully_promoted(&stored.blob, target_granularity, watermark) {
        stored.is_promoted = true;
      }
    }
    created
  }

  /// First target bucket of the given level that promotion may still produce.
  fn get_promotion_start_index(&self, level_index: usize) -> u64 {
    let watermark = self.watermarks[level_index].unwrap_or(0);
    let granularity = self.ladder.get_levels()[level_index].get_granularity();
    let past_last = self.levels[level_index]
      .last()
      .and_then(|stored| stored.blob.get_data().get_last_timestamp())
      .map_or(0, |last| (last / granularity).saturating_add(1));
    watermark.max(past_last)
  }

  fn get_blob_summaries(&self) -> Vec<BlobSummary> {
    let mut summaries: Vec<BlobSummary> = Vec::new();
    for (level_index, level) in self.levels.iter().enumerate() {
      for stored in level {
        summaries.push(BlobSummary::new(
          &stored.blob,
          level_index,
          stored.is_promoted,
        ));
      }
    }
    if let Some(open_blob) = &self.open_blob {
      summaries.push(BlobSummary::new(open_blob, 0, false));
    }
    summaries
  }

  /// Remove sealed blobs whose TTL elapsed at `now`, then the ones over the size budget.
  pub fn evict(&mut self, now: u64, max_bytes: Option<u64>) -> Vec<BlobKey> {
    let mut evicted = TtlRetention::new().apply(&self.get_blob_summaries(), now);
    self.remove_blobs(&evicted);

    if let Some(max_bytes) = max_bytes {
      let over_budget = SizeBasedRetention::new(max_bytes).apply(&self.get_blob_summaries(), now);
      self.remove_blobs(&over_budget);
      evicted.extend(over_budget);
    }

    if !evicted.is_empty() {
      info!(
        "Evicted {} blobs of metric {} at {}",
        evicted.len(),
        self.metric_id,
        now
      );
    }
    evicted
  }

  fn remove_blobs(&mut self, keys: &[BlobKey]) {
    if keys.is_empty() {
      return;
    }
    let keys: BTreeSet<&BlobKey> = keys.iter().collect();
    for level in self.levels.iter_mut() {
      level.retain(|stored| !keys.contains(&BlobKey::from(stored.blob.as_ref())));
    }
  }

  /// Blobs overlapping `[start, end]` at the finest level whose granularity is at least the
  /// requested one and that has overlapping data.
  pub fn query(&self, start: u64, end: u64, granularity: u64) -> Result<Vec<Arc<Blob>>, TsKvError> {
    let best_index = self.ladder.get_best_level_index(granularity).ok_or_else(|| {
      TsKvError::NotFound(format!(
        "no level of metric {} has granularity {} or coarser",
        self.metric_id, granularity
      ))
    })?;

    for index in best_index..self.levels.len() {
      let mut blobs: Vec<Arc<Blob>> = self.levels[index]
        .iter()
        .filter(|stored| stored.blob.is_overlap(start, end))
        .map(|stored| stored.blob.clone())
        .collect();
      if index == 0 {
        if let Some(open_blob) = &self.open_blob {
          if open_blob.is_overlap(start, end) {
            blobs.push(Arc::new(open_blob.clone()));
          }
        }
      }
      if !blobs.is_empty() {
        debug!(
          "Query on metric {} for [{}, {}] served {} blobs from level {}",
          self.metric_id,
          start,
          end,
          blobs.len(),
          index
        );
        return Ok(blobs);
      }
    }

    Err(TsKvError::NotFound(format!(
      "no data for metric {} between {} and {}",
      self.metric_id, start, end
    )))
  }

  /// Persist sealed blobs without a handle. With `memory_only` set, only blobs of memory-only
  /// levels are written; otherwise only the others are.
  pub fn flush(
    &mut self,
    persistence: &dyn BlobPersistence,
    memory_only: bool,
  ) -> Result<usize, TsKvError> {
    let mut flushed = 0;
    for level in self.levels.iter_mut() {
      for stored in level.iter_mut() {
        if stored.handle.is_some() || stored.blob.get_meta().is_memory_only() != memory_only {
          continue;
        }
        stored.handle = Some(persistence.persist(&stored.blob)?);
        flushed += 1;
      }
    }
    if flushed > 0 {
      info!("Flushed {} blobs of metric {}", flushed, self.metric_id);
    }
    Ok(flushed)
  }

  /// Add a previously persisted blob. Returns false if a blob with the same key is present.
  pub fn restore(&mut self, blob: Blob, handle: BlobHandle) -> Result<bool, TsKvError> {
    let key = BlobKey::from(&blob);
    if !blob.is_sealed() {
      return Err(TsKvError::StorageError(format!(
        "persisted blob {} is not sealed",
        key
      )));
    }
    if blob.is_empty() {
      return Err(TsKvError::StorageError(format!(
        "persisted blob {} holds no data",
        key
      )));
    }

    let meta = blob.get_meta();
    let index = self
      .ladder
      .get_level_index(meta.get_granularity())
      .ok_or_else(|| {
        TsKvError::InvalidConfiguration(format!(
          "no level of metric {} has granularity {}",
          self.metric_id,
          meta.get_granularity()
        ))
      })?;
    let level = &self.ladder.get_levels()[index];
    if !level.is_raw() && level.get_merge_function() != meta.get_merge_function() {
      return Err(TsKvError::InvalidConfiguration(format!(
        "blob {} uses {} but the level uses {}",
        key,
        meta.get_merge_function(),
        level.get_merge_function()
      )));
    }

    let stored_blobs = &self.levels[index];
    if stored_blobs
      .iter()
      .any(|stored| BlobKey::from(stored.blob.as_ref()) == key)
    {
      return Ok(false);
    }

    // Rows of a level must stay time-ordered across blobs.
    let (first, last) = match (
      blob.get_data().get_first_timestamp(),
      blob.get_data().get_last_timestamp(),
    ) {
      (Some(first), Some(last)) => (first, last),
      _ => return Ok(false),
    };
    let position = stored_blobs.partition_point(|stored| {
      stored.blob.get_meta().get_first_timestamp() < meta.get_first_timestamp()
    });
    let overlaps_previous = position > 0
      && stored_blobs[position - 1]
        .blob
        .get_data()
        .get_last_timestamp()
        .map_or(false, |previous| previous >= first);
    let overlaps_next = stored_blobs
      .get(position)
      .and_then(|next| next.blob.get_data().get_first_timestamp())
      .map_or(false, |next| next <= last);
    let overlaps_open = index == 0
      && self
        .open_blob
        .as_ref()
        .and_then(|open_blob| open_blob.get_data().get_first_timestamp())
        .map_or(false, |open_first| open_first <= last);
    if overlaps_previous || overlaps_next || overlaps_open {
      return Err(TsKvError::StorageError(format!(
        "persisted blob {} overlaps blobs already in the store",
        key
      )));
    }

    if index == 0 {
      self.last_timestamp = Some(self.last_timestamp.map_or(last, |current| current.max(last)));
    }
    let mut stored = StoredBlob::new(blob);
    stored.handle = Some(handle);
    self.levels[index].insert(position, stored);
    Ok(true)
  }

  /// Estimated size of all blobs of the metric, open blob included.
  pub fn get_size_in_bytes(&self) -> u64 {
    let sealed: u64 = self
      .levels
      .iter()
      .flatten()
      .map(|stored| stored.blob.get_size_in_bytes())
      .sum();
    sealed
      + self
        .open_blob
        .as_ref()
        .map_or(0, |open_blob| open_blob.get_size_in_bytes())
  }

  /// Number of blobs of the metric, a non-empty open blob included.
  pub fn get_blob_count(&self) -> usize {
    let sealed: usize = self.levels.iter().map(|level| level.len()).sum();
    let open = self
      .open_blob
      .as_ref()
      .map_or(0, |open_blob| usize::from(!open_blob.is_empty()));
    sealed + open
  }

  /// Number of sealed blobs at the given ladder level.
  pub fn get_sealed_blob_count(&self, level_index: usize) -> usize {
    self.levels.get(level_index).map_or(0, |level| level.len())
  }

  /// Number of sealed blobs at the given level flagged as promoted.
  pub fn get_promoted_blob_count(&self, level_index: usize) -> usize {
    self.levels.get(level_index).map_or(0, |level| {
      level.iter().filter(|stored| stored.is_promoted).count()
    })
  }

  pub fn has_open_blob(&self) -> bool {
    self.open_blob.is_some()
  }
}
