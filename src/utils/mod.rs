// This code is licensed under Elastic License 2.0
// https://www.elastic.co/licensing/elastic-license

//! Utilities for managing tskv.

pub(crate) mod range;

pub mod config;
pub mod error;
pub mod sync;
pub mod time;
