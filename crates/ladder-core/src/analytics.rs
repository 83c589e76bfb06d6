//! Daily per-graph analytics snapshots.
//!
//! [`compute`] turns a graph's nodes and response log into one metrics
//! bundle. It performs no I/O; the aggregator in `ladder-engine` gathers the
//! inputs and persists the resulting [`AnalyticsSnapshot`].

use std::collections::HashMap;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  graph::{MasteryStatus, Node},
  mastery::{QuizResponse, ResponseType},
  policy::Policy,
};

/// Node counts per mastery status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
  pub unseen:    usize,
  pub diagnosed: usize,
  pub learning:  usize,
  pub reviewing: usize,
  pub mastered:  usize,
}

impl StatusCounts {
  fn add(&mut self, status: MasteryStatus) {
    match status {
      MasteryStatus::Unseen => self.unseen += 1,
      MasteryStatus::Diagnosed => self.diagnosed += 1,
      MasteryStatus::Learning => self.learning += 1,
      MasteryStatus::Reviewing => self.reviewing += 1,
      MasteryStatus::Mastered => self.mastered += 1,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsMetrics {
  pub total_nodes:               usize,
  pub status_counts:             StatusCounts,
  pub avg_mastery_score:         f64,
  pub avg_ease_factor:           f64,
  /// Share of review answers with quality ≥ 3 over the last 7 days; `None`
  /// when there were no review answers in the window.
  pub retention_7d:              Option<f64>,
  pub retention_30d:             Option<f64>,
  /// Change in mastered-node count over the last 7 days.
  pub velocity:                  i64,
  /// Days until every node is mastered at the current velocity.
  pub estimated_completion_days: Option<u32>,
  pub struggling_nodes:          Vec<Uuid>,
}

/// One row per (graph, date); re-running a day overwrites it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsSnapshot {
  pub graph_id:    Uuid,
  pub date:        NaiveDate,
  pub metrics:     AnalyticsMetrics,
  pub computed_at: DateTime<Utc>,
}

/// Fraction of review answers with passing quality in `(now - window, now]`.
pub fn retention(
  responses: &[QuizResponse],
  now: DateTime<Utc>,
  window: Duration,
) -> Option<f64> {
  let since = now - window;
  let (passed, total) = responses
    .iter()
    .filter(|r| r.response_type == ResponseType::Review)
    .filter(|r| r.responded_at > since && r.responded_at <= now)
    .fold((0usize, 0usize), |(p, t), r| {
      (p + usize::from(r.quality.is_pass()), t + 1)
    });
  (total > 0).then(|| passed as f64 / total as f64)
}

/// Nodes whose recent non-diagnostic answers average below the policy
/// threshold, once they have enough answers to judge. Sorted by node id.
pub fn struggling_nodes(responses: &[QuizResponse], policy: &Policy) -> Vec<Uuid> {
  let mut by_node: HashMap<Uuid, Vec<&QuizResponse>> = HashMap::new();
  for r in responses
    .iter()
    .filter(|r| r.response_type != ResponseType::Diagnostic)
  {
    by_node.entry(r.node_id).or_default().push(r);
  }

  let window = policy.struggling_min_responses.max(1);
  let mut struggling: Vec<Uuid> = by_node
    .into_iter()
    .filter(|(_, rs)| rs.len() >= window)
    .filter_map(|(node_id, mut rs)| {
      rs.sort_by(|a, b| b.responded_at.cmp(&a.responded_at));
      let avg = rs
        .iter()
        .take(window)
        .map(|r| f64::from(r.quality.get()))
        .sum::<f64>()
        / window as f64;
      (avg < policy.struggling_max_avg_quality).then_some(node_id)
    })
    .collect();
  struggling.sort();
  struggling
}

/// Mastered count of the snapshot to measure velocity against on `date`:
/// the latest one at least 7 days old, else the earliest one before `date`.
pub fn baseline_mastered(snapshots: &[AnalyticsSnapshot], date: NaiveDate) -> Option<usize> {
  let week_ago = date - Duration::days(7);
  snapshots
    .iter()
    .filter(|s| s.date <= week_ago)
    .max_by_key(|s| s.date)
    .or_else(|| snapshots.iter().filter(|s| s.date < date).min_by_key(|s| s.date))
    .map(|s| s.metrics.status_counts.mastered)
}

/// Compute one day's metrics.
///
/// `baseline_mastered` is the mastered count of the comparison snapshot
/// (about 7 days earlier); without one, the graph is assumed to have started
/// from zero.
pub fn compute(
  nodes: &[Node],
  responses: &[QuizResponse],
  baseline_mastered: Option<usize>,
  policy: &Policy,
  now: DateTime<Utc>,
) -> AnalyticsMetrics {
  let mut status_counts = StatusCounts::default();
  for n in nodes {
    status_counts.add(n.mastery_status);
  }

  let total_nodes = nodes.len();
  let mean = |sum: f64| if total_nodes == 0 { 0.0 } else { sum / total_nodes as f64 };
  let avg_mastery_score = mean(nodes.iter().map(|n| n.mastery_score).sum());
  let avg_ease_factor = mean(nodes.iter().map(|n| n.sm2.ease_factor).sum());

  let velocity =
    status_counts.mastered as i64 - baseline_mastered.unwrap_or(0) as i64;
  let remaining = total_nodes - status_counts.mastered;
  // remaining / (velocity / 7 days), rounded up.
  let estimated_completion_days = (velocity > 0)
    .then(|| ((remaining as i64 * 7 + velocity - 1) / velocity) as u32);

  AnalyticsMetrics {
    total_nodes,
    status_counts,
    avg_mastery_score,
    avg_ease_factor,
    retention_7d: retention(responses, now, Duration::days(7)),
    retention_30d: retention(responses, now, Duration::days(30)),
    velocity,
    estimated_completion_days,
    struggling_nodes: struggling_nodes(responses, policy),
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;
  use crate::mastery::{Quality, Sm2State};

  fn now() -> DateTime<Utc> { Utc.with_ymd_and_hms(2026, 5, 20, 3, 0, 0).unwrap() }

  fn node(status: MasteryStatus, score: f64) -> Node {
    Node {
      node_id: Uuid::new_v4(),
      graph_id: Uuid::nil(),
      label: String::new(),
      description: None,
      depth: 0,
      mastery_score: score,
      mastery_status: status,
      sm2: Sm2State::default(),
      effort_estimate: None,
      sequence: None,
      created_at: now(),
      updated_at: now(),
    }
  }

  fn response(node_id: Uuid, quality: i64, kind: ResponseType, days_ago: i64) -> QuizResponse {
    QuizResponse {
      response_id: Uuid::new_v4(),
      node_id,
      graph_id: Uuid::nil(),
      question_text: String::new(),
      user_answer: String::new(),
      quality: Quality::new(quality).unwrap(),
      response_type: kind,
      responded_at: now() - Duration::days(days_ago) + Duration::minutes(1),
    }
  }

  #[test]
  fn retention_counts_reviews_only_inside_window() {
    let id = Uuid::new_v4();
    let responses = vec![
      response(id, 5, ResponseType::Review, 1),
      response(id, 1, ResponseType::Review, 2),
      response(id, 0, ResponseType::Teach, 1),
      response(id, 0, ResponseType::Diagnostic, 1),
      response(id, 4, ResponseType::Review, 20),
    ];

    assert_eq!(retention(&responses, now(), Duration::days(7)), Some(0.5));
    let month = retention(&responses, now(), Duration::days(30)).unwrap();
    assert!((month - 2.0 / 3.0).abs() < 1e-9);
    assert_eq!(retention(&[], now(), Duration::days(7)), None);
  }

  #[test]
  fn struggling_requires_enough_answers() {
    let weak = Uuid::new_v4();
    let new = Uuid::new_v4();
    let recovered = Uuid::new_v4();
    let mut responses = Vec::new();
    for d in 0..5 {
      responses.push(response(weak, 2, ResponseType::Teach, d));
      responses.push(response(recovered, 5, ResponseType::Review, d));
    }
    for d in 5..10 {
      responses.push(response(recovered, 0, ResponseType::Teach, d));
    }
    for d in 0..4 {
      responses.push(response(new, 0, ResponseType::Teach, d));
    }

    assert_eq!(struggling_nodes(&responses, &Policy::default()), vec![weak]);
  }

  #[test]
  fn velocity_and_completion_estimate() {
    let nodes = vec![
      node(MasteryStatus::Mastered, 0.9),
      node(MasteryStatus::Mastered, 0.8),
      node(MasteryStatus::Mastered, 0.9),
      node(MasteryStatus::Learning, 0.4),
      node(MasteryStatus::Unseen, 0.0),
    ];

    let m = compute(&nodes, &[], Some(1), &Policy::default(), now());
    assert_eq!(m.total_nodes, 5);
    assert_eq!(m.status_counts.mastered, 3);
    assert_eq!(m.velocity, 2);
    // 2 remaining at 2 per week.
    assert_eq!(m.estimated_completion_days, Some(7));
    assert!((m.avg_mastery_score - 0.6).abs() < 1e-9);
    assert!((m.avg_ease_factor - 2.5).abs() < 1e-9);

    let stalled = compute(&nodes, &[], Some(3), &Policy::default(), now());
    assert_eq!(stalled.velocity, 0);
    assert_eq!(stalled.estimated_completion_days, None);
  }

  #[test]
  fn baseline_prefers_week_old_snapshot() {
    let day = |d: u32| NaiveDate::from_ymd_opt(2026, 5, d).unwrap();
    let snap = |d: u32, mastered: usize| {
      let mut metrics = compute(&[], &[], None, &Policy::default(), now());
      metrics.status_counts.mastered = mastered;
      AnalyticsSnapshot { graph_id: Uuid::nil(), date: day(d), metrics, computed_at: now() }
    };
    let history = vec![snap(1, 1), snap(12, 4), snap(15, 6), snap(19, 7)];

    assert_eq!(baseline_mastered(&history, day(20)), Some(4));
    assert_eq!(baseline_mastered(&history[2..], day(20)), Some(6));
    assert_eq!(baseline_mastered(&history, day(1)), None);
  }

  #[test]
  fn empty_graph_has_zero_averages() {
    let m = compute(&[], &[], None, &Policy::default(), now());
    assert_eq!(m.total_nodes, 0);
    assert_eq!(m.avg_mastery_score, 0.0);
    assert_eq!(m.velocity, 0);
    assert_eq!(m.estimated_completion_days, None);
  }
}
