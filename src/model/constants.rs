// This code is licensed under Elastic License 2.0
// https://www.elastic.co/licensing/elastic-license

/// Estimated bytes per row: six 8-byte columns (value, timestamp, count, min, max, last).
pub(crate) const BYTES_PER_BUCKET: u64 = 48;

/// Granularity of the raw level of every ladder.
pub const RAW_GRANULARITY: u64 = 0;
