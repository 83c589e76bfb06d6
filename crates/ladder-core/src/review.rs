//! Review scheduling types and the [`ReviewDispatcher`] trait.
//!
//! The engine keeps a local ledger of the reviews it has asked the external
//! scheduler to fire: one [`ReviewSlot`] per node, either scheduled on its
//! own or folded into the graph's single batch schedule. The ledger is what
//! the per-graph cap counts.

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Ledger ──────────────────────────────────────────────────────────────────

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
pub enum SlotKind {
  Individual,
  Batch,
}

impl SlotKind {
  pub fn parse(s: &str) -> Result<Self> {
    s.parse().map_err(|_| Error::invalid("review slot kind", s))
  }
}

/// Schedule name for a node's own review.
pub fn individual_schedule_name(node_id: Uuid) -> String { format!("review-{node_id}") }

/// Schedule name for a graph's batch review.
pub fn batch_schedule_name(graph_id: Uuid) -> String { format!("review-batch-{graph_id}") }

/// One pending review request recorded in the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewSlot {
  pub node_id:       Uuid,
  pub graph_id:      Uuid,
  pub kind:          SlotKind,
  pub schedule_name: String,
  pub fire_at:       DateTime<Utc>,
  pub until_at:      DateTime<Utc>,
  pub repetitions:   u32,
  pub ease_factor:   f64,
  pub created_at:    DateTime<Utc>,
}

/// Input to [`crate::store::LearningStore::reserve_review`].
#[derive(Debug, Clone)]
pub struct SlotRequest {
  pub node_id:     Uuid,
  pub graph_id:    Uuid,
  pub fire_at:     DateTime<Utc>,
  pub until_at:    DateTime<Utc>,
  pub repetitions: u32,
  pub ease_factor: f64,
  /// Maximum individual slots pending for the graph at `now`.
  pub cap:         usize,
  pub now:         DateTime<Utc>,
}

/// The outcome of an atomic cap check plus ledger insert.
#[derive(Debug, Clone)]
pub struct Reservation {
  pub slot:     ReviewSlot,
  /// The node's earlier pending slot, replaced by this one.
  pub previous: Option<ReviewSlot>,
  /// Every pending batch member of the graph after the reservation.
  pub batch:    Vec<ReviewSlot>,
}

impl Reservation {
  /// Whether the graph's batch schedule must be re-issued (or cancelled).
  pub fn touches_batch(&self) -> bool {
    self.slot.kind == SlotKind::Batch
      || self.previous.as_ref().is_some_and(|p| p.kind == SlotKind::Batch)
  }
}

// ─── Scheduler API ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recurrence {
  Once,
  Daily,
}

/// Enough context for the Tutor Session to reconstruct one node review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewTarget {
  pub node_id:     Uuid,
  pub repetitions: u32,
  pub ease_factor: f64,
  pub due_at:      DateTime<Utc>,
}

impl From<&ReviewSlot> for ReviewTarget {
  fn from(slot: &ReviewSlot) -> Self {
    Self {
      node_id:     slot.node_id,
      repetitions: slot.repetitions,
      ease_factor: slot.ease_factor,
      due_at:      slot.fire_at,
    }
  }
}

/// Payload delivered back to the Tutor Session when a schedule fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReviewPayload {
  Node {
    graph_id: Uuid,
    #[serde(flatten)]
    target:   ReviewTarget,
  },
  Batch {
    graph_id: Uuid,
    nodes:    Vec<ReviewTarget>,
  },
}

/// A `schedule_create` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleRequest {
  pub name:       String,
  pub fire_at:    DateTime<Utc>,
  /// The scheduler disables the schedule if it has not fired by then.
  pub until_at:   DateTime<Utc>,
  pub recurrence: Recurrence,
  pub payload:    ReviewPayload,
}

impl ScheduleRequest {
  /// A one-shot review for a single node.
  pub fn for_slot(slot: &ReviewSlot) -> Self {
    Self {
      name:       slot.schedule_name.clone(),
      fire_at:    slot.fire_at,
      until_at:   slot.until_at,
      recurrence: Recurrence::Once,
      payload:    ReviewPayload::Node {
        graph_id: slot.graph_id,
        target:   ReviewTarget::from(slot),
      },
    }
  }

  /// The recurring batch review covering `members`; `None` when empty.
  pub fn for_batch(graph_id: Uuid, members: &[ReviewSlot]) -> Option<Self> {
    let fire_at = members.iter().map(|s| s.fire_at).min()?;
    let until_at = members.iter().map(|s| s.until_at).max()?;
    Some(Self {
      name: batch_schedule_name(graph_id),
      fire_at,
      until_at,
      recurrence: Recurrence::Daily,
      payload: ReviewPayload::Batch {
        graph_id,
        nodes: members.iter().map(ReviewTarget::from).collect(),
      },
    })
  }
}

/// The external scheduler that fires review prompts at the Tutor Session.
///
/// Treated as at-least-once delivery. `schedule_create` replaces any
/// existing schedule with the same name.
pub trait ReviewDispatcher: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  fn schedule_create(
    &self,
    request: ScheduleRequest,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn schedule_cancel<'a>(
    &'a self,
    name: &'a str,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;
}

#[cfg(test)]
mod tests {
  use chrono::{Duration, TimeZone};

  use super::*;

  fn slot(fire_in_days: i64) -> ReviewSlot {
    let t = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap() + Duration::days(fire_in_days);
    ReviewSlot {
      node_id: Uuid::new_v4(),
      graph_id: Uuid::nil(),
      kind: SlotKind::Batch,
      schedule_name: batch_schedule_name(Uuid::nil()),
      fire_at: t,
      until_at: t + Duration::hours(24),
      repetitions: 2,
      ease_factor: 2.5,
      created_at: t,
    }
  }

  #[test]
  fn batch_request_spans_members() {
    let members = vec![slot(3), slot(1), slot(6)];
    let req = ScheduleRequest::for_batch(Uuid::nil(), &members).unwrap();

    assert_eq!(req.fire_at, members[1].fire_at);
    assert_eq!(req.until_at, members[2].until_at);
    assert_eq!(req.recurrence, Recurrence::Daily);
    assert!(matches!(req.payload, ReviewPayload::Batch { ref nodes, .. } if nodes.len() == 3));
    assert!(ScheduleRequest::for_batch(Uuid::nil(), &[]).is_none());
  }

  #[test]
  fn node_payload_is_flat() {
    let mut s = slot(1);
    s.kind = SlotKind::Individual;
    s.schedule_name = individual_schedule_name(s.node_id);
    let json = serde_json::to_value(ScheduleRequest::for_slot(&s)).unwrap();

    assert_eq!(json["payload"]["kind"], "node");
    assert_eq!(json["payload"]["repetitions"], 2);
    assert_eq!(json["recurrence"], "once");
    assert_eq!(json["name"], format!("review-{}", s.node_id));
  }
}
