// This code is licensed under Elastic License 2.0
// https://www.elastic.co/licensing/elastic-license

//! Durable storage of sealed blobs.

pub mod persistence;
pub mod storage;

pub use persistence::{BlobHandle, BlobPersistence, MemoryPersistence};
pub use storage::FilePersistence;
