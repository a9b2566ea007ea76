// This code is licensed under Elastic License 2.0
// https://www.elastic.co/licensing/elastic-license

use thiserror::Error;

#[derive(Debug, Error, Eq, PartialEq)]
/// Enum for various errors in tskv.
pub enum TsKvError {
  #[error("Out of order append. Received timestamp {0}, last timestamp {1}.")]
  OutOfOrder(u64, u64),

  #[error("Already at full capacity. Max size {0}, max time {1}.")]
  CapacityFull(u64, u64),

  #[error("Not found. {0}")]
  NotFound(String),

  #[error("Invalid merge input. {0}")]
  MergeInputError(String),

  #[error("Invalid configuration. {0}")]
  InvalidConfiguration(String),

  #[error("Storage Error: {0}")]
  StorageError(String),

  #[error("IO Error: {0}")]
  IOError(String),
}

impl From<std::io::Error> for TsKvError {
  fn from(error: std::io::Error) -> Self {
    TsKvError::IOError(error.to_string())
  }
}

impl From<serde_json::Error> for TsKvError {
  fn from(error: serde_json::Error) -> Self {
    TsKvError::StorageError(error.to_string())
  }
}

impl From<config::ConfigError> for TsKvError {
  fn from(error: config::ConfigError) -> Self {
    TsKvError::InvalidConfiguration(error.to_string())
  }
}
