//! The per-graph teaching flow: a durable state machine advanced one step per
//! invocation.
//!
//! ```text
//! pending → diagnosing → planning → teaching ⇄ quizzing → reviewing
//! reviewing → teaching   (frontier has more)
//! reviewing → completed  (everything mastered)
//! any non-terminal phase → abandoned;  abandoned → pending (restart)
//! ```
//!
//! [`FlowState::advance`] is pure. Side effects (recording answers, planning)
//! happen in the engine first; the resulting [`FlowStep`] carries their
//! outcome so the transition can be re-applied to a freshly read state after
//! an optimistic-concurrency conflict without repeating them.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::{
  Error, Result,
  graph::MasteryStatus,
  mastery::Quality,
};

// ─── Phase ───────────────────────────────────────────────────────────────────

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Default,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FlowPhase {
  #[default]
  Pending,
  Diagnosing,
  Planning,
  Teaching,
  Quizzing,
  Reviewing,
  Completed,
  Abandoned,
}

impl FlowPhase {
  pub fn parse(s: &str) -> Result<Self> {
    s.parse().map_err(|_| Error::invalid("flow phase", s))
  }

  /// Completed and abandoned flows never go stale.
  pub fn is_terminal(self) -> bool {
    matches!(self, Self::Completed | Self::Abandoned)
  }
}

// ─── Commands ────────────────────────────────────────────────────────────────

/// What the Tutor Session asks the coordinator to do on one invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum FlowCommand {
  StartDiagnosis,
  RecordDiagnostic {
    node_id:       Uuid,
    question_text: String,
    user_answer:   String,
    quality:       Quality,
  },
  FinishDiagnosis,
  Plan,
  AskQuiz,
  SubmitAnswer {
    question_text: String,
    user_answer:   String,
    quality:       Quality,
  },
  SubmitReview {
    node_id:       Uuid,
    question_text: String,
    user_answer:   String,
    quality:       Quality,
  },
  Continue,
  Abandon,
  Restart,
}

impl FlowCommand {
  /// Stable name used in errors and logs.
  pub fn name(&self) -> &'static str {
    match self {
      Self::StartDiagnosis => "start_diagnosis",
      Self::RecordDiagnostic { .. } => "record_diagnostic",
      Self::FinishDiagnosis => "finish_diagnosis",
      Self::Plan => "plan",
      Self::AskQuiz => "ask_quiz",
      Self::SubmitAnswer { .. } => "submit_answer",
      Self::SubmitReview { .. } => "submit_review",
      Self::Continue => "continue",
      Self::Abandon => "abandon",
      Self::Restart => "restart",
    }
  }

  /// Check that `phase` accepts this command, before any side effect runs.
  pub fn check(&self, phase: FlowPhase) -> Result<()> {
    use FlowPhase::*;

    let allowed = match self {
      Self::StartDiagnosis => phase == Pending,
      Self::RecordDiagnostic { .. } | Self::FinishDiagnosis => phase == Diagnosing,
      Self::Plan => phase == Planning,
      Self::AskQuiz => phase == Teaching,
      Self::SubmitAnswer { .. } => phase == Quizzing,
      Self::SubmitReview { .. } => matches!(phase, Teaching | Quizzing | Reviewing),
      Self::Continue => phase == Reviewing,
      Self::Abandon => !phase.is_terminal(),
      Self::Restart => phase == Abandoned,
    };
    if allowed {
      Ok(())
    } else {
      Err(Error::InvalidTransition { phase, step: self.name() })
    }
  }
}

/// A command together with the outcome of its side effects.
#[derive(Debug, Clone, PartialEq)]
pub enum FlowStep {
  StartDiagnosis,
  Diagnosed { node_id: Uuid, quality: Quality },
  FinishDiagnosis,
  /// `first` is the first node to teach, `None` if everything is mastered.
  Planned { first: Option<Uuid> },
  AskQuiz,
  /// The current node's status after the answer was recorded.
  Answered { status: MasteryStatus },
  Reviewed,
  /// `next` is the next node to teach, `None` if everything is mastered.
  Continued { next: Option<Uuid> },
  Abandon,
  Restart,
}

impl FlowStep {
  pub fn name(&self) -> &'static str {
    match self {
      Self::StartDiagnosis => "start_diagnosis",
      Self::Diagnosed { .. } => "record_diagnostic",
      Self::FinishDiagnosis => "finish_diagnosis",
      Self::Planned { .. } => "plan",
      Self::AskQuiz => "ask_quiz",
      Self::Answered { .. } => "submit_answer",
      Self::Reviewed => "submit_review",
      Self::Continued { .. } => "continue",
      Self::Abandon => "abandon",
      Self::Restart => "restart",
    }
  }
}

// ─── State ───────────────────────────────────────────────────────────────────

/// The durable coordination record for one graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowState {
  pub graph_id:           Uuid,
  pub phase:              FlowPhase,
  pub current_node_id:    Option<Uuid>,
  /// Diagnostic quality per node, as answered during `diagnosing`.
  pub diagnostic_results: BTreeMap<Uuid, Quality>,
  pub last_activity_at:   DateTime<Utc>,
  /// Phase the flow was in when it was last abandoned.
  pub abandoned_from:     Option<FlowPhase>,
  /// Incremented on every write; `0` means never persisted.
  pub version:            u64,
}

impl FlowState {
  /// A fresh, never-persisted flow.
  pub fn new(graph_id: Uuid, now: DateTime<Utc>) -> Self {
    Self {
      graph_id,
      phase: FlowPhase::Pending,
      current_node_id: None,
      diagnostic_results: BTreeMap::new(),
      last_activity_at: now,
      abandoned_from: None,
      version: 0,
    }
  }

  /// Whether the flow has been idle past `stale_after` and must be
  /// abandoned before anything else happens.
  pub fn is_stale(&self, now: DateTime<Utc>, stale_after: chrono::Duration) -> bool {
    !self.phase.is_terminal() && now - self.last_activity_at > stale_after
  }

  /// Apply one step, returning the next state. The version is left for the
  /// store to bump.
  pub fn advance(&self, step: &FlowStep, now: DateTime<Utc>) -> Result<Self> {
    use FlowPhase::*;

    let mut next = self.clone();
    next.last_activity_at = now;

    match (self.phase, step) {
      (Pending, FlowStep::StartDiagnosis) => next.phase = Diagnosing,
      (Diagnosing, FlowStep::Diagnosed { node_id, quality }) => {
        next.diagnostic_results.insert(*node_id, *quality);
      }
      (Diagnosing, FlowStep::FinishDiagnosis) => next.phase = Planning,
      (Planning, FlowStep::Planned { first }) | (Reviewing, FlowStep::Continued { next: first }) => {
        next.current_node_id = *first;
        next.phase = if first.is_some() { Teaching } else { Completed };
      }
      (Teaching, FlowStep::AskQuiz) => {
        if self.current_node_id.is_none() {
          return Err(Error::NoCurrentNode { graph_id: self.graph_id });
        }
        next.phase = Quizzing;
      }
      (Quizzing, FlowStep::Answered { status }) => {
        next.phase = match status {
          MasteryStatus::Reviewing | MasteryStatus::Mastered => Reviewing,
          _ => Teaching,
        };
      }
      (Teaching | Quizzing | Reviewing, FlowStep::Reviewed) => {}
      (phase, FlowStep::Abandon) if !phase.is_terminal() => {
        next.phase = Abandoned;
        next.abandoned_from = Some(phase);
      }
      (Abandoned, FlowStep::Restart) => {
        next.phase = Pending;
        next.current_node_id = None;
        next.diagnostic_results.clear();
      }
      (phase, step) => {
        return Err(Error::InvalidTransition { phase, step: step.name() });
      }
    }

    Ok(next)
  }
}

#[cfg(test)]
mod tests {
  use chrono::{Duration, TimeZone};

  use super::*;

  fn t0() -> DateTime<Utc> { Utc.with_ymd_and_hms(2026, 1, 10, 12, 0, 0).unwrap() }

  fn q(v: i64) -> Quality { Quality::new(v).unwrap() }

  #[test]
  fn happy_path_reaches_completion() {
    let node = Uuid::new_v4();
    let mut s = FlowState::new(Uuid::new_v4(), t0());

    for step in [
      FlowStep::StartDiagnosis,
      FlowStep::Diagnosed { node_id: node, quality: q(2) },
      FlowStep::FinishDiagnosis,
      FlowStep::Planned { first: Some(node) },
      FlowStep::AskQuiz,
      FlowStep::Answered { status: MasteryStatus::Learning },
      FlowStep::AskQuiz,
      FlowStep::Answered { status: MasteryStatus::Reviewing },
      FlowStep::Reviewed,
      FlowStep::Continued { next: None },
    ] {
      s = s.advance(&step, t0()).unwrap();
    }

    assert_eq!(s.phase, FlowPhase::Completed);
    assert_eq!(s.diagnostic_results.get(&node), Some(&q(2)));
    assert_eq!(s.current_node_id, None);
  }

  #[test]
  fn answer_below_reviewing_returns_to_teaching() {
    let mut s = FlowState::new(Uuid::new_v4(), t0());
    s.phase = FlowPhase::Quizzing;
    s.current_node_id = Some(Uuid::new_v4());
    let next = s
      .advance(&FlowStep::Answered { status: MasteryStatus::Learning }, t0())
      .unwrap();
    assert_eq!(next.phase, FlowPhase::Teaching);
    assert_eq!(next.current_node_id, s.current_node_id);
  }

  #[test]
  fn out_of_order_step_is_rejected() {
    let s = FlowState::new(Uuid::new_v4(), t0());
    let err = s.advance(&FlowStep::AskQuiz, t0()).unwrap_err();
    assert!(matches!(
      err,
      Error::InvalidTransition { phase: FlowPhase::Pending, step: "ask_quiz" }
    ));
    assert!(FlowCommand::Continue.check(FlowPhase::Teaching).is_err());
    assert!(FlowCommand::Abandon.check(FlowPhase::Quizzing).is_ok());
  }

  #[test]
  fn quiz_needs_a_current_node() {
    let mut s = FlowState::new(Uuid::new_v4(), t0());
    s.phase = FlowPhase::Teaching;
    assert!(matches!(
      s.advance(&FlowStep::AskQuiz, t0()),
      Err(Error::NoCurrentNode { .. })
    ));
  }

  #[test]
  fn abandon_remembers_prior_phase_and_restart_clears() {
    let mut s = FlowState::new(Uuid::new_v4(), t0());
    s.phase = FlowPhase::Teaching;
    s.current_node_id = Some(Uuid::new_v4());

    let abandoned = s.advance(&FlowStep::Abandon, t0()).unwrap();
    assert_eq!(abandoned.phase, FlowPhase::Abandoned);
    assert_eq!(abandoned.abandoned_from, Some(FlowPhase::Teaching));
    assert!(abandoned.advance(&FlowStep::Abandon, t0()).is_err());

    let restarted = abandoned.advance(&FlowStep::Restart, t0()).unwrap();
    assert_eq!(restarted.phase, FlowPhase::Pending);
    assert_eq!(restarted.current_node_id, None);
  }

  #[test]
  fn staleness_ignores_terminal_flows() {
    let mut s = FlowState::new(Uuid::new_v4(), t0());
    let later = t0() + Duration::days(31);
    assert!(s.is_stale(later, Duration::days(30)));
    assert!(!s.is_stale(t0() + Duration::days(30), Duration::days(30)));

    s.phase = FlowPhase::Completed;
    assert!(!s.is_stale(later, Duration::days(30)));
  }

  #[test]
  fn command_json_shape() {
    let cmd: FlowCommand = serde_json::from_str(
      r#"{"command":"submit_answer","question_text":"q","user_answer":"a","quality":4}"#,
    )
    .unwrap();
    assert_eq!(cmd.name(), "submit_answer");
    assert!(serde_json::from_str::<FlowCommand>(
      r#"{"command":"submit_answer","question_text":"q","user_answer":"a","quality":9}"#,
    )
    .is_err());
  }
}
