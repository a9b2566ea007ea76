// This code is licensed under Elastic License 2.0
// https://www.elastic.co/licensing/elastic-license

use log::{debug, error, info};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};

use crate::store::blob_store::BlobStore;
use crate::utils::sync::Arc;
use crate::utils::time::get_current_time_in_millis;

/// How often the loop checks for due passes and for shutdown.
const POLL_INTERVAL_MS: u64 = 50;

// Returns true if the specified join handle is not none and is not finished.
fn is_join_handle_running(handle: &Option<JoinHandle<()>>) -> bool {
  match handle {
    Some(handle) => !handle.is_finished(),
    None => false,
  }
}

/// Start a promotion pass over all metrics, unless one is still running.
/// Returns true if a new pass was started.
fn check_and_start_promotion_task(
  store: Arc<BlobStore>,
  promotion_handle: &mut Option<JoinHandle<()>>,
) -> bool {
  if is_join_handle_running(promotion_handle) {
    return false;
  }

  *promotion_handle = Some(tokio::task::spawn_blocking(move || {
    let created = store.promote_all();
    debug!("Background promotion created {} blobs", created);
  }));
  true
}

/// Start an eviction pass over all metrics, unless one is still running.
/// Returns true if a new pass was started.
fn check_and_start_eviction_task(
  store: Arc<BlobStore>,
  eviction_handle: &mut Option<JoinHandle<()>>,
) -> bool {
  if is_join_handle_running(eviction_handle) {
    return false;
  }

  *eviction_handle = Some(tokio::task::spawn_blocking(move || {
    let evicted = store.evict();
    debug!("Background eviction removed {} blobs", evicted.len());
  }));
  true
}

/// Periodically promotes and evicts blobs of the store until it is shut down. Passes run on
/// the blocking pool; a pass still running when the next one is due is not started twice.
pub async fn run_background_passes(
  store: Arc<BlobStore>,
  promotion_interval_ms: u64,
  eviction_interval_ms: u64,
) {
  let mut last_promotion_time = get_current_time_in_millis();
  let mut last_eviction_time = last_promotion_time;
  let mut promotion_handle: Option<JoinHandle<()>> = None;
  let mut eviction_handle: Option<JoinHandle<()>> = None;

  info!(
    "Starting background passes: promotion every {} ms, eviction every {} ms",
    promotion_interval_ms, eviction_interval_ms
  );

  loop {
    if store.is_shutdown() {
      // Wait for the running passes, which stop at the next metric boundary.
      let join_handles = promotion_handle.into_iter().chain(eviction_handle);
      for handle in join_handles {
        if let Err(e) = handle.await {
          error!("Error while joining background pass: {}", e);
        }
      }
      info!("Background passes stopped");
      break;
    }

    let current_time = get_current_time_in_millis();
    if current_time.saturating_sub(last_promotion_time) >= promotion_interval_ms
      && check_and_start_promotion_task(store.clone(), &mut promotion_handle)
    {
      last_promotion_time = current_time;
    }
    if current_time.saturating_sub(last_eviction_time) >= eviction_interval_ms
      && check_and_start_eviction_task(store.clone(), &mut eviction_handle)
    {
      last_eviction_time = current_time;
    }

    sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::ladder::level::{Ladder, LevelConfig};
  use crate::model::merge_function::MergeFunction;
  use crate::utils::time::{hours, minutes, seconds};

  fn store() -> Arc<BlobStore> {
    let ladder = Ladder::new(vec![
      LevelConfig::new(0, MergeFunction::Sum, 1000, hours(1)).with_ttl(hours(1)),
      LevelConfig::new(minutes(10), MergeFunction::Sum, 1000, hours(24)),
    ])
    .unwrap();
    Arc::new(BlobStore::new(ladder))
  }

  #[tokio::test]
  async fn test_background_passes() {
    let store = store();
    // Far in the past, so the raw blob expires as soon as it is sealed.
    store.ingest(1, seconds(1), 1.0).unwrap();
    store.ingest(1, seconds(2), 2.0).unwrap();
    store.ingest(1, minutes(10), 3.0).unwrap();

    let handle = tokio::spawn(run_background_passes(store.clone(), 10, 10));

    // Wait until the raw blob was promoted, sealed and then evicted.
    for _ in 0..100 {
      sleep(Duration::from_millis(20)).await;
      let is_done = matches!(
        store.query(1, 0, minutes(10), 0),
        Ok(blobs) if blobs[0].get_meta().get_granularity() == minutes(10)
      );
      if is_done {
        break;
      }
    }

    let blobs = store.query(1, 0, minutes(10), 0).unwrap();
    assert_eq!(blobs.len(), 1);
    assert_eq!(blobs[0].get_meta().get_granularity(), minutes(10));
    assert_eq!(blobs[0].get_data().get_values(), &[6.0]);
    assert_eq!(store.get_blob_count(1), Ok(1));

    store.shutdown();
    handle.await.unwrap();
  }

  #[tokio::test]
  async fn test_shutdown_before_start() {
    let store = store();
    store.shutdown();
    // Returns right away without running any pass.
    run_background_passes(store.clone(), 0, 0).await;
    assert!(store.get_metric_ids().is_empty());
  }
}
