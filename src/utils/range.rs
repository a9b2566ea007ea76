// This code is licensed under Elastic License 2.0
// https://www.elastic.co/licensing/elastic-license

/// Check whether the inclusive ranges [start1, end1] and [start2, end2] overlap.
pub fn is_overlap(start1: u64, end1: u64, start2: u64, end2: u64) -> bool {
  start1 <= end2 && start2 <= end1
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_is_overlap() {
    assert!(is_overlap(0, 10, 5, 15));
    assert!(is_overlap(5, 15, 0, 10));
    assert!(is_overlap(0, 10, 10, 20));
    assert!(is_overlap(0, 100, 20, 30));
    assert!(!is_overlap(0, 9, 10, 20));
    assert!(!is_overlap(21, 30, 10, 20));
  }
}
