//! The mastery tracker: one graded response in, SM-2 state and status out.

use chrono::{DateTime, Utc};
use ladder_core::{
  graph::{MasteryStatus, Node},
  mastery::{AppliedResponse, NewQuizResponse, QuizResponse},
  review::{ReviewDispatcher, SlotKind},
  store::LearningStore,
};
use serde::Serialize;

use crate::{Engine, Error, Result};

/// What recording a response did.
#[derive(Debug, Clone, Serialize)]
pub struct RecordedResponse {
  pub ease_factor:    f64,
  pub repetitions:    u32,
  pub next_review_at: Option<DateTime<Utc>>,
  pub mastery_status: MasteryStatus,
  pub node:           Node,
  pub response:       QuizResponse,
  /// Present when the response produced a review date.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub review:         Option<ReviewOutcome>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReviewOutcome {
  Scheduled {
    kind:          SlotKind,
    schedule_name: String,
    fire_at:       DateTime<Utc>,
  },
  /// The response and mastery update stand; only the review request failed.
  Failed { error: String },
}

impl<S, R> Engine<S, R>
where
  S: LearningStore,
  R: ReviewDispatcher,
{
  /// Record a graded response, update the node's mastery and hand any new
  /// review date to the review scheduler.
  ///
  /// Completed graphs still take responses so their pending reviews land;
  /// abandoned graphs reject them.
  pub async fn record_response(&self, input: NewQuizResponse) -> Result<RecordedResponse> {
    let now = self.clock.now();
    let AppliedResponse { node, response, scheduled } = self
      .store
      .record_response(input, self.policy.as_ref().clone(), now)
      .await
      .map_err(Error::store)?;

    tracing::debug!(
      node_id = %node.node_id,
      quality = response.quality.get(),
      status = %node.mastery_status,
      repetitions = node.sm2.repetitions,
      "response recorded"
    );

    let review = match node.sm2.next_review_at {
      Some(fire_at) if scheduled => Some(match self.schedule_review(&node, fire_at).await {
        Ok(slot) => ReviewOutcome::Scheduled {
          kind:          slot.kind,
          schedule_name: slot.schedule_name,
          fire_at:       slot.fire_at,
        },
        Err(e) => {
          tracing::warn!(node_id = %node.node_id, error = %e, "review not scheduled");
          ReviewOutcome::Failed { error: e.to_string() }
        }
      }),
      _ => None,
    };

    Ok(RecordedResponse {
      ease_factor: node.sm2.ease_factor,
      repetitions: node.sm2.repetitions,
      next_review_at: node.sm2.next_review_at,
      mastery_status: node.mastery_status,
      node,
      response,
      review,
    })
  }
}
