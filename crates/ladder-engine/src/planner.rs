//! The curriculum planner: order a graph and persist the sequence.

use ladder_core::{
  graph::Node,
  planner::{self, Placement},
  review::ReviewDispatcher,
  store::LearningStore,
};
use uuid::Uuid;

use crate::{Engine, Error, Result};

impl<S, R> Engine<S, R>
where
  S: LearningStore,
  R: ReviewDispatcher,
{
  /// Sequence every node of an active graph using current mastery scores.
  pub async fn plan_graph(&self, graph_id: Uuid) -> Result<Vec<Placement>> {
    self.require_graph(graph_id).await?.ensure_active()?;

    let nodes = self.store.list_nodes(graph_id).await.map_err(Error::store)?;
    let edges = self.store.list_edges(graph_id).await.map_err(Error::store)?;
    let order = planner::plan(&nodes, &edges)?;

    self
      .store
      .assign_sequence(graph_id, order.clone(), self.clock.now())
      .await
      .map_err(Error::store)?;

    tracing::info!(%graph_id, nodes = order.len(), "curriculum planned");
    Ok(order)
  }

  /// The frontier node to teach next: lowest planned sequence, unplanned
  /// nodes last, frontier order among equals. `None` once every node is
  /// mastered.
  pub async fn next_node(&self, graph_id: Uuid) -> Result<Option<Node>> {
    let frontier = self.store.frontier(graph_id).await.map_err(Error::store)?;
    Ok(
      frontier
        .into_iter()
        .min_by_key(|n| n.sequence.unwrap_or(u32::MAX)),
    )
  }
}
