// This code is licensed under Elastic License 2.0
// https://www.elastic.co/licensing/elastic-license

//! In-memory blob store: per-metric blob sets behind a concurrent map, and the background
//! passes that promote and evict them.

pub mod background;
pub mod blob_store;
pub mod metric_blobs;

pub use blob_store::BlobStore;
