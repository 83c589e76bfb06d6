//! The `LearningStore` trait: durable state for graphs, mastery, review
//! slots, flows and analytics.
//!
//! The trait is implemented by storage backends (e.g. `ladder-store-sqlite`).
//! Higher layers (`ladder-engine`, `ladder-api`) depend on this abstraction,
//! not on any concrete backend.

use std::future::Future;

use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::{
  analytics::AnalyticsSnapshot,
  flow::FlowState,
  graph::{Edge, Graph, GraphStatus, NewEdge, NewGraph, NewNode, Node},
  mastery::{AppliedResponse, NewQuizResponse, Quality, QuizResponse},
  planner::Placement,
  policy::Policy,
  review::{Reservation, ReviewSlot, SlotRequest},
};

/// Backend errors that may wrap a domain [`crate::Error`].
///
/// Generic callers use this to tell invariant violations (cycles, missing
/// nodes, version conflicts) apart from infrastructure failures.
pub trait StoreError: std::error::Error + Send + Sync + 'static {
  /// Unwrap the domain error, or hand back `self` if this is a backend
  /// failure.
  fn into_domain(self) -> Result<crate::Error, Self>
  where
    Self: Sized;
}

/// Abstraction over a Ladder storage backend.
///
/// Every method that checks an invariant and then writes (edge insertion,
/// review reservation, flow save) does both atomically.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes (e.g. tokio with `axum`).
pub trait LearningStore: Send + Sync {
  type Error: StoreError;

  // ── Graphs ────────────────────────────────────────────────────────────

  fn create_graph(
    &self,
    input: NewGraph,
    now: DateTime<Utc>,
  ) -> impl Future<Output = Result<Graph, Self::Error>> + Send + '_;

  /// Retrieve a graph by id. Returns `None` if not found.
  fn get_graph(
    &self,
    graph_id: Uuid,
  ) -> impl Future<Output = Result<Option<Graph>, Self::Error>> + Send + '_;

  /// List graphs, optionally filtered by status, oldest first.
  fn list_graphs(
    &self,
    status: Option<GraphStatus>,
  ) -> impl Future<Output = Result<Vec<Graph>, Self::Error>> + Send + '_;

  fn set_graph_status(
    &self,
    graph_id: Uuid,
    status: GraphStatus,
    now: DateTime<Utc>,
  ) -> impl Future<Output = Result<Graph, Self::Error>> + Send + '_;

  // ── Topology ──────────────────────────────────────────────────────────

  /// Create a node in an active graph. Depths past
  /// [`crate::graph::MAX_DEPTH`] are rejected.
  fn create_node(
    &self,
    input: NewNode,
    now: DateTime<Utc>,
  ) -> impl Future<Output = Result<Node, Self::Error>> + Send + '_;

  fn get_node(
    &self,
    node_id: Uuid,
  ) -> impl Future<Output = Result<Option<Node>, Self::Error>> + Send + '_;

  fn list_nodes(
    &self,
    graph_id: Uuid,
  ) -> impl Future<Output = Result<Vec<Node>, Self::Error>> + Send + '_;

  /// Insert an edge between two nodes of the same active graph.
  ///
  /// Prerequisite edges that would close a cycle are rejected with
  /// [`crate::Error::CycleDetected`]; the reachability check and the insert
  /// are one transaction. So is depth propagation, which fails with
  /// [`crate::Error::InvalidEdge`] if it would pass
  /// [`crate::graph::MAX_DEPTH`].
  fn create_edge(
    &self,
    input: NewEdge,
    now: DateTime<Utc>,
  ) -> impl Future<Output = Result<Edge, Self::Error>> + Send + '_;

  fn list_edges(
    &self,
    graph_id: Uuid,
  ) -> impl Future<Output = Result<Vec<Edge>, Self::Error>> + Send + '_;

  /// Nodes ready to teach, in frontier order (see [`crate::frontier`]).
  fn frontier(
    &self,
    graph_id: Uuid,
  ) -> impl Future<Output = Result<Vec<Node>, Self::Error>> + Send + '_;

  /// The node and everything reachable from it over prerequisite edges.
  fn subtree(
    &self,
    node_id: Uuid,
  ) -> impl Future<Output = Result<Vec<Node>, Self::Error>> + Send + '_;

  /// Persist a planned learning order for a graph in one transaction.
  fn assign_sequence(
    &self,
    graph_id: Uuid,
    order: Vec<Placement>,
    now: DateTime<Utc>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  // ── Mastery ───────────────────────────────────────────────────────────

  /// Qualities of a node's most recent non-diagnostic responses, newest
  /// first.
  fn response_history(
    &self,
    node_id: Uuid,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<Quality>, Self::Error>> + Send + '_;

  /// Append a response and apply [`crate::mastery::assess`] to the node in
  /// one transaction. The node and its history are read inside that
  /// transaction, so concurrent responses on one node each build on the
  /// other's result.
  ///
  /// Active and completed graphs take responses; abandoned ones fail with
  /// [`crate::Error::GraphNotActive`].
  fn record_response(
    &self,
    input: NewQuizResponse,
    policy: Policy,
    responded_at: DateTime<Utc>,
  ) -> impl Future<Output = Result<AppliedResponse, Self::Error>> + Send + '_;

  /// Responses for a graph, oldest first, optionally only those after
  /// `since`.
  fn list_responses(
    &self,
    graph_id: Uuid,
    since: Option<DateTime<Utc>>,
  ) -> impl Future<Output = Result<Vec<QuizResponse>, Self::Error>> + Send + '_;

  // ── Review ledger ─────────────────────────────────────────────────────

  /// Replace the node's pending slot, counting the graph's live individual
  /// slots and choosing individual or batch in the same transaction.
  fn reserve_review(
    &self,
    request: SlotRequest,
  ) -> impl Future<Output = Result<Reservation, Self::Error>> + Send + '_;

  /// Undo a reservation after the external scheduler refused it: drop the
  /// node's slot and put back `previous`, the slot it replaced, if any.
  fn restore_review(
    &self,
    node_id: Uuid,
    previous: Option<ReviewSlot>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn list_review_slots(
    &self,
    graph_id: Uuid,
  ) -> impl Future<Output = Result<Vec<ReviewSlot>, Self::Error>> + Send + '_;

  /// Remove every slot of a graph, returning what was removed.
  fn clear_review_slots(
    &self,
    graph_id: Uuid,
  ) -> impl Future<Output = Result<Vec<ReviewSlot>, Self::Error>> + Send + '_;

  // ── Flow ──────────────────────────────────────────────────────────────

  fn get_flow(
    &self,
    graph_id: Uuid,
  ) -> impl Future<Output = Result<Option<FlowState>, Self::Error>> + Send + '_;

  /// Write `state` if the stored version still equals `state.version`
  /// (`0` meaning "no row yet"), returning it with the version bumped.
  /// Fails with [`crate::Error::VersionConflict`] otherwise.
  fn save_flow(
    &self,
    state: FlowState,
  ) -> impl Future<Output = Result<FlowState, Self::Error>> + Send + '_;

  // ── Analytics ─────────────────────────────────────────────────────────

  /// Insert or overwrite the snapshot for `(graph_id, date)`.
  fn upsert_snapshot(
    &self,
    snapshot: AnalyticsSnapshot,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn get_snapshot(
    &self,
    graph_id: Uuid,
    date: NaiveDate,
  ) -> impl Future<Output = Result<Option<AnalyticsSnapshot>, Self::Error>> + Send + '_;

  /// All snapshots for a graph, oldest first.
  fn list_snapshots(
    &self,
    graph_id: Uuid,
  ) -> impl Future<Output = Result<Vec<AnalyticsSnapshot>, Self::Error>> + Send + '_;
}
