//! Ladder engine: the operations the Tutor Session drives.
//!
//! [`Engine`] ties a [`LearningStore`] and a [`ReviewDispatcher`] together
//! with the tunable [`Policy`] and an injectable [`Clock`]. Its operations are
//! grouped by component:
//!
//! - [`mastery`]: recording graded responses and applying SM-2.
//! - [`review`]: the per-graph review cap, batch folding and cancellation.
//! - [`planner`]: persisting a curriculum order.
//! - [`flow`]: the durable teaching state machine.
//! - [`analytics`]: daily snapshots.
//!
//! Every operation is an independent unit of work; nothing is cached between
//! calls, so any number of engines may share one store.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use ladder_core::{
  graph::{Graph, Node},
  policy::Policy,
  review::ReviewDispatcher,
  store::LearningStore,
};
use uuid::Uuid;

pub mod analytics;
pub mod clock;
pub mod error;
pub mod flow;
pub mod mastery;
pub mod planner;
pub mod review;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Error, Result};

#[cfg(test)]
mod tests;

pub struct Engine<S, R> {
  store:      Arc<S>,
  dispatcher: Arc<R>,
  policy:     Arc<Policy>,
  clock:      Arc<dyn Clock>,
}

impl<S, R> Clone for Engine<S, R> {
  fn clone(&self) -> Self {
    Self {
      store:      Arc::clone(&self.store),
      dispatcher: Arc::clone(&self.dispatcher),
      policy:     Arc::clone(&self.policy),
      clock:      Arc::clone(&self.clock),
    }
  }
}

impl<S, R> Engine<S, R>
where
  S: LearningStore,
  R: ReviewDispatcher,
{
  pub fn new(store: Arc<S>, dispatcher: Arc<R>, policy: Policy) -> Self {
    Self {
      store,
      dispatcher,
      policy: Arc::new(policy),
      clock: Arc::new(SystemClock),
    }
  }

  /// Replace the time source.
  pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  pub fn store(&self) -> &S { &self.store }

  pub fn policy(&self) -> &Policy { &self.policy }

  pub fn now(&self) -> DateTime<Utc> { self.clock.now() }

  // ── Lookups shared by the components ──────────────────────────────────────

  pub(crate) async fn require_graph(&self, graph_id: Uuid) -> Result<Graph> {
    self
      .store
      .get_graph(graph_id)
      .await
      .map_err(Error::store)?
      .ok_or_else(|| ladder_core::Error::GraphNotFound(graph_id).into())
  }

  pub(crate) async fn require_node(&self, node_id: Uuid) -> Result<Node> {
    self
      .store
      .get_node(node_id)
      .await
      .map_err(Error::store)?
      .ok_or_else(|| ladder_core::Error::NodeNotFound(node_id).into())
  }
}
