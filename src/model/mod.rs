// This code is licensed under Elastic License 2.0
// https://www.elastic.co/licensing/elastic-license

//! Blob data model.
//!
//! A blob binds a [meta](meta::Meta) descriptor to columnar [data](data::Data): parallel
//! columns of values, timestamps and per-bucket aggregates (count, min, max, last). Raw blobs
//! are appended to while open; once sealed a blob is immutable and is shared read-only.

pub mod blob;
pub mod blob_key;
pub(crate) mod constants;
pub mod data;
pub mod merge_function;
pub mod meta;

pub use constants::RAW_GRANULARITY;
