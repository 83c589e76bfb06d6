//! The review scheduler.
//!
//! Keeps the per-graph cap on individually scheduled reviews. The ledger row
//! is reserved first (count and insert in one store transaction), then the
//! external schedule is created. If that fails the reservation is undone and
//! the slot it replaced goes back, because the scheduler still holds that
//! one; the ledger counts exactly what the scheduler holds.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use ladder_core::{
  graph::Node,
  review::{
    Reservation, ReviewDispatcher, ReviewSlot, ScheduleRequest, SlotKind, SlotRequest,
    batch_schedule_name,
  },
  store::LearningStore,
};
use uuid::Uuid;

use crate::{Engine, Error, Result};

impl<S, R> Engine<S, R>
where
  S: LearningStore,
  R: ReviewDispatcher,
{
  /// Schedule `node`'s next review at `fire_at`, replacing any pending one.
  ///
  /// Fails with [`Error::ExternalScheduleFailure`] if the scheduler rejects
  /// the request; the node's previous ledger slot, if any, is restored.
  pub async fn schedule_review(
    &self,
    node: &Node,
    fire_at: DateTime<Utc>,
  ) -> Result<ReviewSlot> {
    let request = SlotRequest {
      node_id: node.node_id,
      graph_id: node.graph_id,
      fire_at,
      until_at: fire_at + self.policy.review_grace(),
      repetitions: node.sm2.repetitions,
      ease_factor: node.sm2.ease_factor,
      cap: self.policy.review_cap,
      now: self.clock.now(),
    };

    let reservation = self
      .store
      .reserve_review(request)
      .await
      .map_err(Error::store)?;

    if let Err(e) = self.dispatch(&reservation).await {
      if let Err(restore) = self
        .store
        .restore_review(node.node_id, reservation.previous.clone())
        .await
      {
        tracing::warn!(
          node_id = %node.node_id,
          error = %Error::store(restore),
          "failed to restore review slot"
        );
      }
      return Err(e);
    }

    Ok(reservation.slot)
  }

  async fn dispatch(&self, reservation: &Reservation) -> Result<()> {
    let slot = &reservation.slot;
    let previous_kind = reservation.previous.as_ref().map(|p| p.kind);

    match slot.kind {
      SlotKind::Individual => {
        self.create(ScheduleRequest::for_slot(slot)).await?;
        if previous_kind == Some(SlotKind::Batch)
          && let Err(e) = self.sync_batch(slot.graph_id, &reservation.batch).await
        {
          // The batch still lists the node; drop the new schedule so the
          // restored ledger matches.
          self.cancel_quietly(slot.graph_id, &slot.schedule_name).await;
          return Err(e);
        }
      }
      SlotKind::Batch => {
        tracing::debug!(
          node_id = %slot.node_id,
          graph_id = %slot.graph_id,
          members = reservation.batch.len(),
          "review cap reached, folding into batch"
        );
        self.sync_batch(slot.graph_id, &reservation.batch).await?;
        if let Some(previous) = reservation
          .previous
          .as_ref()
          .filter(|p| p.kind == SlotKind::Individual)
        {
          self.cancel_quietly(slot.graph_id, &previous.schedule_name).await;
        }
      }
    }
    Ok(())
  }

  /// Re-issue the graph's batch schedule with its current members, or cancel
  /// it when there are none left.
  async fn sync_batch(&self, graph_id: Uuid, members: &[ReviewSlot]) -> Result<()> {
    match ScheduleRequest::for_batch(graph_id, members) {
      Some(request) => self.create(request).await,
      None => {
        let name = batch_schedule_name(graph_id);
        self
          .dispatcher
          .schedule_cancel(&name)
          .await
          .map_err(|e| Error::schedule(name.clone(), e))
      }
    }
  }

  async fn create(&self, request: ScheduleRequest) -> Result<()> {
    let name = request.name.clone();
    self
      .dispatcher
      .schedule_create(request)
      .await
      .map_err(|e| Error::schedule(name, e))
  }

  async fn cancel_quietly(&self, graph_id: Uuid, name: &str) {
    if let Err(e) = self.dispatcher.schedule_cancel(name).await {
      tracing::warn!(%graph_id, schedule = name, error = %e, "failed to cancel review schedule");
    }
  }

  /// Drop every pending review of a graph and cancel the external schedules.
  ///
  /// External failures are logged, not returned. Returns the number of
  /// ledger slots removed.
  pub async fn cancel_graph_reviews(&self, graph_id: Uuid) -> Result<usize> {
    let slots = self
      .store
      .clear_review_slots(graph_id)
      .await
      .map_err(Error::store)?;

    let names: BTreeSet<&str> = slots.iter().map(|s| s.schedule_name.as_str()).collect();
    for name in &names {
      self.cancel_quietly(graph_id, name).await;
    }

    tracing::info!(%graph_id, slots = slots.len(), schedules = names.len(), "reviews cancelled");
    Ok(slots.len())
  }
}
