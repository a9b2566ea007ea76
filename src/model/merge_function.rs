// This code is licensed under Elastic License 2.0
// https://www.elastic.co/licensing/elastic-license

use std::fmt;

use serde::{Deserialize, Serialize};

/// How the samples falling into one bucket collapse into a single value.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeFunction {
  Sum,
  Avg,
  Min,
  Max,
  Last,
  Count,
}

impl MergeFunction {
  /// Whether a blob aggregated with this function can be built from buckets produced by
  /// `source`. `None` stands for raw samples.
  ///
  /// Min, max, last and count are recomputed from the auxiliary columns, which every blob
  /// carries. Sum and avg need the bucket totals, which only raw, sum and avg sources keep.
  pub fn is_composable_from(&self, source: Option<MergeFunction>) -> bool {
    match self {
      MergeFunction::Min | MergeFunction::Max | MergeFunction::Last | MergeFunction::Count => true,
      MergeFunction::Sum | MergeFunction::Avg => matches!(
        source,
        None | Some(MergeFunction::Sum) | Some(MergeFunction::Avg)
      ),
    }
  }

  /// Total of the raw samples behind a bucket whose value was computed with this function.
  /// Only meaningful for sum and avg buckets.
  pub(crate) fn bucket_total(&self, value: f64, count: u64) -> f64 {
    match self {
      MergeFunction::Avg => value * count as f64,
      _ => value,
    }
  }
}

impl fmt::Display for MergeFunction {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      MergeFunction::Sum => "sum",
      MergeFunction::Avg => "avg",
      MergeFunction::Min => "min",
      MergeFunction::Max => "max",
      MergeFunction::Last => "last",
      MergeFunction::Count => "count",
    };
    write!(f, "{}", name)
  }
}
