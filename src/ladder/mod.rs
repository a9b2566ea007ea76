// This code is licensed under Elastic License 2.0
// https://www.elastic.co/licensing/elastic-license

//! The granularity ladder and the merge engine.
//!
//! A ladder lists the granularities a metric is kept at, raw first (e.g. raw → 10s → 1min →
//! 10min → 1h → 1d), each with its own merge function and blob limits. Sealed blobs of one
//! level are rolled up into the next level once they cover complete target buckets.

pub mod level;
pub mod merge_engine;
pub mod promotion;

pub use level::{Ladder, LevelConfig};
pub use merge_engine::{merge, merge_window};
