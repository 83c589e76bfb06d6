//! Tunable thresholds for mastery, review scheduling, staleness and
//! analytics.
//!
//! Every field has a serde default so a partial `[policy]` table in the
//! server configuration only overrides what it names.

use chrono::Duration;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Policy {
  /// Maximum individually scheduled pending reviews per graph; further
  /// reviews fold into the graph's batch schedule.
  pub review_cap:                 usize,
  /// How long after `fire_at` an unfired review stays valid.
  pub review_grace_hours:         i64,
  /// Longest gap SM-2 may put between two reviews of a node.
  pub max_interval_days:          f64,
  /// Flows idle for longer than this are abandoned on next contact.
  pub stale_after_days:           i64,
  pub reviewing_min_repetitions:  u32,
  pub mastery_min_repetitions:    u32,
  /// Number of most recent responses averaged for graduation to mastered.
  pub mastery_window:             usize,
  pub mastery_min_avg_quality:    f64,
  /// A node needs at least this many responses to be called struggling.
  pub struggling_min_responses:   usize,
  pub struggling_max_avg_quality: f64,
  /// Times the coordinator re-reads a flow after a version conflict.
  pub flow_retry_limit:           usize,
}

impl Default for Policy {
  fn default() -> Self {
    Self {
      review_cap:                 20,
      review_grace_hours:         24,
      max_interval_days:          36_500.0,
      stale_after_days:           30,
      reviewing_min_repetitions:  2,
      mastery_min_repetitions:    4,
      mastery_window:             3,
      mastery_min_avg_quality:    4.0,
      struggling_min_responses:   5,
      struggling_max_avg_quality: 2.5,
      flow_retry_limit:           3,
    }
  }
}

impl Policy {
  pub fn review_grace(&self) -> Duration { Duration::hours(self.review_grace_hours) }

  pub fn stale_after(&self) -> Duration { Duration::days(self.stale_after_days) }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn partial_table_keeps_defaults() {
    let policy: Policy =
      serde_json::from_str(r#"{ "review_cap": 5, "stale_after_days": 7 }"#).unwrap();
    assert_eq!(policy.review_cap, 5);
    assert_eq!(policy.stale_after(), Duration::days(7));
    assert_eq!(policy.mastery_window, 3);
    assert_eq!(policy.struggling_max_avg_quality, 2.5);
    assert_eq!(policy.max_interval_days, 36_500.0);
  }
}
