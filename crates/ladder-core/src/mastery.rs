//! Quiz responses and the SM-2 mastery update.
//!
//! Everything here is pure: given a node's prior state, one graded response
//! and the recent response history, [`assess`] returns the state to persist.
//! Stores call it inside the write transaction that persists the result, so
//! the prior state it reads is the one it replaces.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::{
  Error, Result,
  graph::{MasteryStatus, Node},
  policy::Policy,
};

/// Lower bound on the SM-2 ease factor.
pub const MIN_EASE_FACTOR: f64 = 1.3;

/// Ease factor assigned to a node that has never been reviewed.
pub const DEFAULT_EASE_FACTOR: f64 = 2.5;

// ─── Quality ─────────────────────────────────────────────────────────────────

/// A response grade in `0..=5`; `3` and above count as a successful recall.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(try_from = "i64", into = "u8")]
pub struct Quality(u8);

impl Quality {
  pub fn new(value: i64) -> Result<Self> {
    if (0..=5).contains(&value) {
      Ok(Self(value as u8))
    } else {
      Err(Error::InvalidQuality(value))
    }
  }

  pub fn get(self) -> u8 { self.0 }

  pub fn is_pass(self) -> bool { self.0 >= 3 }
}

impl TryFrom<i64> for Quality {
  type Error = Error;

  fn try_from(value: i64) -> Result<Self> { Self::new(value) }
}

impl From<Quality> for u8 {
  fn from(q: Quality) -> Self { q.0 }
}

// ─── Responses ───────────────────────────────────────────────────────────────

/// Why the question was asked.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ResponseType {
  /// Placement question asked before teaching; seeds the score only.
  Diagnostic,
  /// Comprehension check while the concept is being taught.
  Teach,
  /// Spaced-repetition review fired by the scheduler.
  Review,
}

impl ResponseType {
  pub fn parse(s: &str) -> Result<Self> {
    s.parse().map_err(|_| Error::invalid("response type", s))
  }
}

/// An immutable, append-only record of one answered question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizResponse {
  pub response_id:   Uuid,
  pub node_id:       Uuid,
  pub graph_id:      Uuid,
  pub question_text: String,
  pub user_answer:   String,
  pub quality:       Quality,
  pub response_type: ResponseType,
  /// Server-assigned; never changes after creation.
  pub responded_at:  DateTime<Utc>,
}

/// Input to [`crate::store::LearningStore::record_response`].
#[derive(Debug, Clone, Deserialize)]
pub struct NewQuizResponse {
  pub node_id:       Uuid,
  pub question_text: String,
  pub user_answer:   String,
  pub quality:       Quality,
  pub response_type: ResponseType,
}

/// What [`crate::store::LearningStore::record_response`] wrote.
#[derive(Debug, Clone)]
pub struct AppliedResponse {
  pub node:      Node,
  pub response:  QuizResponse,
  /// Whether the node got a new `next_review_at` for the review scheduler.
  pub scheduled: bool,
}

// ─── SM-2 state ──────────────────────────────────────────────────────────────

/// Spaced-repetition bookkeeping carried on every node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sm2State {
  pub ease_factor:        f64,
  pub repetitions:        u32,
  /// Interval (in days) that produced `next_review_at`; the base for the
  /// next successful repetition.
  pub last_interval_days: f64,
  pub next_review_at:     Option<DateTime<Utc>>,
  pub last_reviewed_at:   Option<DateTime<Utc>>,
}

impl Default for Sm2State {
  fn default() -> Self {
    Self {
      ease_factor:        DEFAULT_EASE_FACTOR,
      repetitions:        0,
      last_interval_days: 0.0,
      next_review_at:     None,
      last_reviewed_at:   None,
    }
  }
}

/// `max(1.3, e + 0.1 − (5−q)·(0.08 + (5−q)·0.02))`
pub fn next_ease_factor(ease_factor: f64, quality: Quality) -> f64 {
  let miss = f64::from(5 - quality.get());
  (ease_factor + 0.1 - miss * (0.08 + miss * 0.02)).max(MIN_EASE_FACTOR)
}

/// Interval in days for the repetition that just succeeded or failed,
/// capped at `max_days`.
pub fn next_interval_days(prior: &Sm2State, quality: Quality, max_days: f64) -> f64 {
  let days = if !quality.is_pass() {
    1.0
  } else {
    match prior.repetitions {
      0 => 1.0,
      1 => 6.0,
      // A missing base interval (e.g. imported data) restarts from one day.
      _ => prior.last_interval_days.max(1.0) * prior.ease_factor,
    }
  };
  days.min(max_days.max(1.0))
}

/// Convert a fractional day count to a duration, rounded to the millisecond.
pub fn interval_duration(days: f64) -> Duration {
  Duration::milliseconds((days * 86_400_000.0).round() as i64)
}

/// Apply one graded recall to `prior`, returning the next SM-2 state.
pub fn schedule(
  prior: &Sm2State,
  quality: Quality,
  now: DateTime<Utc>,
  max_interval_days: f64,
) -> Result<Sm2State> {
  let interval = next_interval_days(prior, quality, max_interval_days);
  let next_review_at = now
    .checked_add_signed(interval_duration(interval))
    .ok_or(Error::IntervalOutOfRange { days: interval })?;
  let repetitions = if quality.is_pass() { prior.repetitions.saturating_add(1) } else { 0 };

  Ok(Sm2State {
    ease_factor: next_ease_factor(prior.ease_factor, quality),
    repetitions,
    last_interval_days: interval,
    next_review_at: Some(next_review_at),
    last_reviewed_at: Some(now),
  })
}

// ─── Score and status ────────────────────────────────────────────────────────

/// Score seeded by a diagnostic answer; never exceeds 0.7.
pub fn diagnostic_seed(quality: Quality) -> f64 {
  (0.3 + 0.08 * f64::from(quality.get())).clamp(0.3, 0.7)
}

/// Exponentially weighted score: `0.7·score + 0.3·(q/5)`.
pub fn next_score(score: f64, quality: Quality) -> f64 {
  0.7 * score + 0.3 * (f64::from(quality.get()) / 5.0)
}

/// Status after a non-diagnostic response. At most one step per response.
///
/// `window_avg` is the mean quality of the most recent responses (this one
/// included) over the policy's mastery window.
pub fn next_status(
  current: MasteryStatus,
  quality: Quality,
  repetitions: u32,
  window_avg: f64,
  policy: &Policy,
) -> MasteryStatus {
  use MasteryStatus::*;

  match current {
    Reviewing | Mastered if !quality.is_pass() => Learning,
    Unseen | Diagnosed => Learning,
    Learning
      if repetitions >= policy.reviewing_min_repetitions && quality.is_pass() =>
    {
      Reviewing
    }
    Reviewing
      if repetitions >= policy.mastery_min_repetitions
        && window_avg >= policy.mastery_min_avg_quality =>
    {
      Mastered
    }
    other => other,
  }
}

/// The state to persist on a node after one response.
#[derive(Debug, Clone, PartialEq)]
pub struct MasteryUpdate {
  pub mastery_score:  f64,
  pub mastery_status: MasteryStatus,
  pub sm2:            Sm2State,
  /// Whether this response produced a new `next_review_at` that should be
  /// handed to the review scheduler.
  pub scheduled:      bool,
}

/// Compute the post-response state of `node`.
///
/// `history` holds the qualities of the node's earlier non-diagnostic
/// responses, most recent first; it does not include `quality`.
pub fn assess(
  node: &Node,
  quality: Quality,
  response_type: ResponseType,
  history: &[Quality],
  policy: &Policy,
  now: DateTime<Utc>,
) -> Result<MasteryUpdate> {
  if response_type == ResponseType::Diagnostic {
    return Ok(match node.mastery_status {
      MasteryStatus::Unseen | MasteryStatus::Diagnosed => MasteryUpdate {
        mastery_score:  diagnostic_seed(quality),
        mastery_status: MasteryStatus::Diagnosed,
        sm2:            node.sm2.clone(),
        scheduled:      false,
      },
      // Past diagnosis: the answer is logged but the node is left alone.
      _ => MasteryUpdate {
        mastery_score:  node.mastery_score,
        mastery_status: node.mastery_status,
        sm2:            node.sm2.clone(),
        scheduled:      false,
      },
    });
  }

  let sm2 = schedule(&node.sm2, quality, now, policy.max_interval_days)?;
  let window = std::iter::once(quality)
    .chain(history.iter().copied())
    .take(policy.mastery_window.max(1))
    .map(|q| f64::from(q.get()))
    .collect::<Vec<_>>();
  let window_avg = window.iter().sum::<f64>() / window.len() as f64;

  Ok(MasteryUpdate {
    mastery_score:  next_score(node.mastery_score, quality).clamp(0.0, 1.0),
    mastery_status: next_status(
      node.mastery_status,
      quality,
      sm2.repetitions,
      window_avg,
      policy,
    ),
    sm2,
    scheduled:      true,
  })
}

#[cfg(test)]
mod tests {
  use chrono::{Datelike, TimeZone};
  use proptest::prelude::*;

  use super::*;

  fn q(v: i64) -> Quality { Quality::new(v).unwrap() }

  fn now() -> DateTime<Utc> { Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap() }

  fn node(status: MasteryStatus, sm2: Sm2State) -> Node {
    Node {
      node_id: Uuid::new_v4(),
      graph_id: Uuid::new_v4(),
      label: "B".into(),
      description: None,
      depth: 1,
      mastery_score: 0.0,
      mastery_status: status,
      sm2,
      effort_estimate: None,
      sequence: None,
      created_at: now(),
      updated_at: now(),
    }
  }

  #[test]
  fn quality_bounds() {
    assert!(Quality::new(0).is_ok());
    assert!(Quality::new(5).is_ok());
    assert!(matches!(Quality::new(6), Err(Error::InvalidQuality(6))));
    assert!(matches!(Quality::new(-1), Err(Error::InvalidQuality(-1))));
  }

  #[test]
  fn quality_rejects_out_of_range_json() {
    assert!(serde_json::from_str::<Quality>("7").is_err());
    assert_eq!(serde_json::from_str::<Quality>("4").unwrap(), q(4));
  }

  #[test]
  fn first_success_is_one_day_and_learning() {
    let n = node(MasteryStatus::Unseen, Sm2State::default());
    let update = assess(&n, q(4), ResponseType::Teach, &[], &Policy::default(), now()).unwrap();

    assert_eq!(update.sm2.repetitions, 1);
    assert_eq!(update.sm2.last_interval_days, 1.0);
    assert_eq!(update.sm2.next_review_at, Some(now() + Duration::days(1)));
    assert_eq!(update.mastery_status, MasteryStatus::Learning);
    assert!((update.sm2.ease_factor - 2.5).abs() < 1e-9);
    assert!(update.scheduled);
  }

  #[test]
  fn second_success_is_six_days_then_multiplied() {
    let prior = Sm2State { repetitions: 1, last_interval_days: 1.0, ..Default::default() };
    assert_eq!(next_interval_days(&prior, q(5), 36_500.0), 6.0);

    let prior = Sm2State {
      repetitions: 2,
      last_interval_days: 6.0,
      ease_factor: 2.5,
      ..Default::default()
    };
    assert!((next_interval_days(&prior, q(4), 36_500.0) - 15.0).abs() < 1e-9);
  }

  #[test]
  fn failure_resets_repetitions_and_demotes() {
    let prior = Sm2State {
      repetitions: 5,
      last_interval_days: 40.0,
      ease_factor: 2.7,
      ..Default::default()
    };
    let n = node(MasteryStatus::Mastered, prior);
    let update = assess(&n, q(2), ResponseType::Review, &[q(5), q(5)], &Policy::default(), now()).unwrap();

    assert_eq!(update.sm2.repetitions, 0);
    assert_eq!(update.sm2.last_interval_days, 1.0);
    assert_eq!(update.mastery_status, MasteryStatus::Learning);
  }

  #[test]
  fn ease_factor_floor() {
    assert_eq!(next_ease_factor(1.3, q(0)), MIN_EASE_FACTOR);
    assert!((next_ease_factor(2.5, q(3)) - 2.36).abs() < 1e-9);
    assert!((next_ease_factor(2.5, q(5)) - 2.6).abs() < 1e-9);
  }

  #[test]
  fn diagnostic_seeds_score_without_interval() {
    let n = node(MasteryStatus::Unseen, Sm2State::default());
    let update = assess(&n, q(5), ResponseType::Diagnostic, &[], &Policy::default(), now()).unwrap();

    assert!((update.mastery_score - 0.7).abs() < 1e-9);
    assert_eq!(update.mastery_status, MasteryStatus::Diagnosed);
    assert_eq!(update.sm2, Sm2State::default());
    assert!(!update.scheduled);

    assert!((diagnostic_seed(q(0)) - 0.3).abs() < 1e-9);
    assert!((diagnostic_seed(q(2)) - 0.46).abs() < 1e-9);
  }

  #[test]
  fn diagnostic_after_teaching_leaves_node_alone() {
    let mut n = node(MasteryStatus::Learning, Sm2State::default());
    n.mastery_score = 0.55;
    let update = assess(&n, q(0), ResponseType::Diagnostic, &[], &Policy::default(), now()).unwrap();

    assert_eq!(update.mastery_status, MasteryStatus::Learning);
    assert!((update.mastery_score - 0.55).abs() < 1e-9);
  }

  #[test]
  fn status_ladder() {
    let p = Policy::default();
    use MasteryStatus::*;

    assert_eq!(next_status(Diagnosed, q(1), 0, 1.0, &p), Learning);
    assert_eq!(next_status(Learning, q(3), 1, 3.0, &p), Learning);
    assert_eq!(next_status(Learning, q(3), 2, 3.0, &p), Reviewing);
    assert_eq!(next_status(Reviewing, q(5), 3, 5.0, &p), Reviewing);
    assert_eq!(next_status(Reviewing, q(4), 4, 3.67, &p), Reviewing);
    assert_eq!(next_status(Reviewing, q(4), 4, 4.0, &p), Mastered);
    assert_eq!(next_status(Mastered, q(5), 6, 5.0, &p), Mastered);
    assert_eq!(next_status(Reviewing, q(2), 0, 2.0, &p), Learning);
  }

  #[test]
  fn mastery_window_includes_current_response() {
    let prior = Sm2State {
      repetitions: 3,
      last_interval_days: 15.0,
      ease_factor: 2.5,
      ..Default::default()
    };
    let n = node(MasteryStatus::Reviewing, prior);
    let p = Policy::default();

    let update = assess(&n, q(5), ResponseType::Review, &[q(4), q(3), q(0)], &p, now()).unwrap();
    assert_eq!(update.mastery_status, MasteryStatus::Mastered);

    let update = assess(&n, q(4), ResponseType::Review, &[q(3), q(4), q(5)], &p, now()).unwrap();
    assert_eq!(update.mastery_status, MasteryStatus::Reviewing);
  }

  #[test]
  fn score_is_exponentially_weighted() {
    assert!((next_score(0.5, q(5)) - 0.65).abs() < 1e-9);
    assert!((next_score(1.0, q(0)) - 0.7).abs() < 1e-9);
  }

  #[test]
  fn interval_is_capped_by_policy() {
    let prior = Sm2State {
      repetitions: 12,
      last_interval_days: 30_000.0,
      ease_factor: 2.8,
      ..Default::default()
    };
    let next = schedule(&prior, q(5), now(), 36_500.0).unwrap();
    assert_eq!(next.last_interval_days, 36_500.0);
    assert_eq!(next.next_review_at, Some(now() + Duration::days(36_500)));
  }

  #[test]
  fn review_past_the_calendar_is_an_error() {
    let end = DateTime::<Utc>::MAX_UTC - Duration::hours(1);
    let err = schedule(&Sm2State::default(), q(5), end, 36_500.0).unwrap_err();
    assert!(matches!(err, Error::IntervalOutOfRange { days } if days == 1.0));
  }

  proptest! {
    #[test]
    fn long_passing_streak_stays_in_range(
      qualities in proptest::collection::vec(3i64..=5, 50..80),
    ) {
      let policy = Policy::default();
      let mut n = node(MasteryStatus::Learning, Sm2State::default());
      let mut history = Vec::new();
      for value in qualities {
        let update = assess(&n, q(value), ResponseType::Review, &history, &policy, now()).unwrap();
        prop_assert!(update.sm2.last_interval_days <= policy.max_interval_days);
        let next = update.sm2.next_review_at.unwrap();
        prop_assert!(next <= now() + Duration::days(36_500));
        prop_assert!(next.year() <= 9999);
        n.sm2 = update.sm2;
        n.mastery_status = update.mastery_status;
        history.insert(0, q(value));
      }
    }

    #[test]
    fn passing_streak_never_shrinks_interval(
      qualities in proptest::collection::vec(3i64..=5, 1..12),
    ) {
      let mut state = Sm2State::default();
      let mut last_interval = 0.0;
      for value in qualities {
        state = schedule(&state, q(value), now(), 36_500.0).unwrap();
        prop_assert!(state.last_interval_days >= last_interval);
        prop_assert!(state.ease_factor >= MIN_EASE_FACTOR);
        last_interval = state.last_interval_days;
      }
    }

    #[test]
    fn strong_streak_never_lowers_ease(
      qualities in proptest::collection::vec(4i64..=5, 1..12),
    ) {
      let mut state = Sm2State::default();
      for value in qualities {
        let before = state.ease_factor;
        state = schedule(&state, q(value), now(), 36_500.0).unwrap();
        // Quality 4 leaves the ease unchanged up to rounding.
        prop_assert!(state.ease_factor >= before - 1e-9);
      }
    }

    #[test]
    fn any_failure_resets(
      reps in 0u32..20,
      ease in 1.3f64..3.5,
      interval in 0.0f64..200.0,
      fail in 0i64..3,
    ) {
      let prior = Sm2State {
        ease_factor: ease,
        repetitions: reps,
        last_interval_days: interval,
        ..Default::default()
      };
      let next = schedule(&prior, q(fail), now(), 36_500.0).unwrap();
      prop_assert_eq!(next.repetitions, 0);
      prop_assert_eq!(next.last_interval_days, 1.0);
      prop_assert_eq!(next.next_review_at, Some(now() + Duration::days(1)));
    }
  }
}
