// This code is licensed under Elastic License 2.0
// https://www.elastic.co/licensing/elastic-license

pub mod blob_summary;
pub mod retention_policy;
pub mod size_policy;
