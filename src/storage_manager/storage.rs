// This code is licensed under Elastic License 2.0
// https://www.elastic.co/licensing/elastic-license

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use log::debug;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::model::blob::Blob;
use crate::model::blob_key::BlobKey;
use crate::storage_manager::persistence::{BlobHandle, BlobPersistence};
use crate::utils::error::TsKvError;

// Level for zstd compression. Higher level means higher compression ratio, at the expense of speed of compression and decompression.
pub const COMPRESSION_LEVEL: i32 = 15;

const BLOB_FILE_EXTENSION: &str = "blob";

/// Compress and write the value to the given file. Returns the number of bytes before and after compression.
pub fn write<T: Serialize>(
  to_write: &T,
  file_path: &Path,
  sync_after_write: bool,
) -> Result<(u64, u64), TsKvError> {
  let input = serde_json::to_string(to_write)?;
  let input = input.as_bytes();
  let uncompressed_length = input.len() as u64;

  let mut output = Vec::new();
  zstd::stream::copy_encode(input, &mut output, COMPRESSION_LEVEL)?;

  let mut file = File::options()
    .create(true)
    .write(true)
    .truncate(true)
    .open(file_path)?;
  file.write_all(output.as_slice())?;

  if sync_after_write {
    // Forcibly sync the file contents without relying on the OS to do so.
    file.sync_all()?;
  }

  Ok((uncompressed_length, output.len() as u64))
}

/// Read a value from the given file. Returns the value and the number of bytes after decompression.
pub fn read<T: DeserializeOwned>(file_path: &Path) -> Result<(T, u64), TsKvError> {
  let mut file = File::open(file_path)?;
  let mut compressed = Vec::new();
  file.read_to_end(&mut compressed)?;
  let data = zstd::decode_all(compressed.as_slice())?;
  let retval: T = serde_json::from_slice(&data)?;
  Ok((retval, data.len() as u64))
}

/// Stores each blob as a zstd-compressed JSON file named after its key.
#[derive(Debug)]
pub struct FilePersistence {
  dir_path: PathBuf,
  sync_after_write: bool,
}

impl FilePersistence {
  /// Create a persistence backed by the given directory, creating it if needed.
  pub fn new(dir_path: &str) -> Result<Self, TsKvError> {
    fs::create_dir_all(dir_path)?;
    Ok(FilePersistence {
      dir_path: PathBuf::from(dir_path),
      sync_after_write: false,
    })
  }

  /// Sync every file after writing it. Slower, mostly used in tests.
  pub fn with_sync_after_write(mut self, sync_after_write: bool) -> Self {
    self.sync_after_write = sync_after_write;
    self
  }

  pub fn get_dir_path(&self) -> &Path {
    &self.dir_path
  }

  /// Handles of all blob files in the directory, sorted.
  pub fn get_handles(&self) -> Result<Vec<BlobHandle>, TsKvError> {
    let mut handles = Vec::new();
    for entry in fs::read_dir(&self.dir_path)? {
      let path = entry?.path();
      if path.extension().and_then(|extension| extension.to_str()) != Some(BLOB_FILE_EXTENSION) {
        continue;
      }
      if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
        handles.push(BlobHandle::new(stem));
      }
    }
    handles.sort_by(|a, b| a.get_id().cmp(b.get_id()));
    Ok(handles)
  }

  fn get_file_path(&self, handle: &BlobHandle) -> PathBuf {
    self
      .dir_path
      .join(format!("{}.{}", handle.get_id(), BLOB_FILE_EXTENSION))
  }
}

impl BlobPersistence for FilePersistence {
  fn persist(&self, blob: &Blob) -> Result<BlobHandle, TsKvError> {
    let handle = BlobHandle::from(BlobKey::from(blob));
    let file_path = self.get_file_path(&handle);
    let (uncompressed, compressed) = write(blob, &file_path, self.sync_after_write)?;
    debug!(
      "Persisted blob {} to {:?}: {} bytes, {} compressed",
      handle, file_path, uncompressed, compressed
    );
    Ok(handle)
  }

  fn load(&self, handle: &BlobHandle) -> Result<Blob, TsKvError> {
    let file_path = self.get_file_path(handle);
    if !file_path.exists() {
      return Err(TsKvError::NotFound(format!("persisted blob {}", handle)));
    }
    let (blob, _): (Blob, u64) = read(&file_path)?;
    Ok(blob)
  }

  fn delete(&self, handle: &BlobHandle) -> Result<(), TsKvError> {
    let file_path = self.get_file_path(handle);
    if !file_path.exists() {
      return Err(TsKvError::NotFound(format!("persisted blob {}", handle)));
    }
    fs::remove_file(file_path)?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use std::collections::BTreeMap;

  use tempdir::TempDir;

  use super::*;
  use crate::ladder::level::LevelConfig;
  use crate::ladder::merge_engine::merge;
  use crate::model::merge_function::MergeFunction;
  use crate::model::meta::Meta;
  use crate::utils::time::{minutes, seconds};

  #[test]
  fn test_serialize_btree_map() {
    let dir = TempDir::new("storage_test").unwrap();
    let file_path = dir.path().join("map");
    let num_keys = 8;
    let prefix = "metric#";

    let mut expected: BTreeMap<String, u32> = BTreeMap::new();
    for i in 1..=num_keys {
      expected.insert(format!("{prefix}{i}"), i);
    }
    let (uncompressed, compressed) = write(&expected, &file_path, true).unwrap();
    assert!(uncompressed > 0);
    assert!(compressed > 0);

    let (received, num_bytes_read): (BTreeMap<String, u32>, _) = read(&file_path).unwrap();
    assert_eq!(received, expected);
    // The number of bytes read is uncompressed, so it matches the uncompressed number of bytes written.
    assert_eq!(num_bytes_read, uncompressed);
  }

  #[test]
  fn test_read_missing_file() {
    let dir = TempDir::new("storage_test").unwrap();
    let result: Result<(Vec<u32>, u64), TsKvError> = read(&dir.path().join("missing"));
    assert!(matches!(result, Err(TsKvError::IOError(_))));
  }

  #[test]
  fn test_file_persistence() {
    let dir = TempDir::new("file_persistence_test").unwrap();
    let dir_path = dir.path().join("blobs");
    let persistence = FilePersistence::new(dir_path.to_str().unwrap())
      .unwrap()
      .with_sync_after_write(true);
    assert_eq!(persistence.get_dir_path(), dir_path.as_path());
    assert!(persistence.get_handles().unwrap().is_empty());

    let mut raw = Blob::new(Meta::new(5, 0, 0, MergeFunction::Avg));
    for i in 0..20 {
      raw.append(seconds(30) * i, i as f64 * 0.5).unwrap();
    }
    raw.seal();
    let level = LevelConfig::new(minutes(5), MergeFunction::Avg, 100, minutes(60));
    let aggregated = merge(&[&raw], level.get_granularity(), MergeFunction::Avg).unwrap();

    let raw_handle = persistence.persist(&raw).unwrap();
    let aggregated_handle = persistence.persist(&aggregated).unwrap();
    assert_eq!(raw_handle.get_id(), "5_0_0");
    assert_eq!(aggregated_handle.get_id(), "5_300000_0");
    assert_eq!(
      persistence.get_handles().unwrap(),
      vec![raw_handle.clone(), aggregated_handle.clone()]
    );

    assert_eq!(persistence.load(&raw_handle).unwrap(), raw);
    assert_eq!(persistence.load(&aggregated_handle).unwrap(), aggregated);

    persistence.delete(&raw_handle).unwrap();
    assert_eq!(persistence.get_handles().unwrap(), vec![aggregated_handle]);
    assert!(matches!(
      persistence.load(&raw_handle),
      Err(TsKvError::NotFound(_))
    ));
    assert!(persistence.delete(&raw_handle).is_err());
  }
}
