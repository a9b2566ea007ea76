// This code is licensed under Elastic License 2.0
// https://www.elastic.co/licensing/elastic-license

use std::fmt;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::model::blob::Blob;
use crate::model::blob_key::BlobKey;
use crate::utils::error::TsKvError;

/// Opaque reference to a persisted blob, returned by [BlobPersistence::persist].
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct BlobHandle(String);

impl BlobHandle {
  pub fn new(id: &str) -> Self {
    BlobHandle(id.to_owned())
  }

  pub fn get_id(&self) -> &str {
    &self.0
  }
}

impl From<BlobKey> for BlobHandle {
  fn from(key: BlobKey) -> Self {
    BlobHandle(key.to_string())
  }
}

impl fmt::Display for BlobHandle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Durable home for sealed blobs. The store never assumes a particular backend.
pub trait BlobPersistence: Send + Sync {
  /// Write the blob and return a handle that loads it back.
  fn persist(&self, blob: &Blob) -> Result<BlobHandle, TsKvError>;

  fn load(&self, handle: &BlobHandle) -> Result<Blob, TsKvError>;

  fn delete(&self, handle: &BlobHandle) -> Result<(), TsKvError>;
}

/// Keeps persisted blobs in a map. Useful for tests and for processes without a disk.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
  blobs: DashMap<BlobHandle, Blob>,
}

impl MemoryPersistence {
  pub fn new() -> Self {
    MemoryPersistence {
      blobs: DashMap::new(),
    }
  }

  pub fn len(&self) -> usize {
    self.blobs.len()
  }

  pub fn is_empty(&self) -> bool {
    self.blobs.is_empty()
  }

  /// Handles of all persisted blobs, sorted.
  pub fn get_handles(&self) -> Vec<BlobHandle> {
    let mut handles: Vec<BlobHandle> = self.blobs.iter().map(|entry| entry.key().clone()).collect();
    handles.sort_by(|a, b| a.get_id().cmp(b.get_id()));
    handles
  }
}

impl BlobPersistence for MemoryPersistence {
  fn persist(&self, blob: &Blob) -> Result<BlobHandle, TsKvError> {
    let handle = BlobHandle::from(BlobKey::from(blob));
    self.blobs.insert(handle.clone(), blob.clone());
    Ok(handle)
  }

  fn load(&self, handle: &BlobHandle) -> Result<Blob, TsKvError> {
    self
      .blobs
      .get(handle)
      .map(|blob| blob.value().clone())
      .ok_or_else(|| TsKvError::NotFound(format!("persisted blob {}", handle)))
  }

  fn delete(&self, handle: &BlobHandle) -> Result<(), TsKvError> {
    match self.blobs.remove(handle) {
      Some(_) => Ok(()),
      None => Err(TsKvError::NotFound(format!("persisted blob {}", handle))),
    }
  }
}
