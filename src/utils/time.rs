// This code is licensed under Elastic License 2.0
// https://www.elastic.co/licensing/elastic-license

//! Time helpers. All timestamps and durations in tskv are milliseconds since the Unix epoch.

use chrono::Utc;

const MILLIS_PER_SECOND: u64 = 1000;

/// Current wall-clock time in milliseconds.
pub fn get_current_time_in_millis() -> u64 {
  Utc::now().timestamp_millis().max(0) as u64
}

pub fn seconds(n: u64) -> u64 {
  n * MILLIS_PER_SECOND
}

pub fn minutes(n: u64) -> u64 {
  seconds(n * 60)
}

pub fn hours(n: u64) -> u64 {
  minutes(n * 60)
}
