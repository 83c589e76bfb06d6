//! Error types for `ladder-core`.

use thiserror::Error;
use uuid::Uuid;

use crate::{flow::FlowPhase, graph::GraphStatus};

#[derive(Debug, Error)]
pub enum Error {
  #[error("graph not found: {0}")]
  GraphNotFound(Uuid),

  #[error("node not found: {0}")]
  NodeNotFound(Uuid),

  #[error("graph {graph_id} is {status}")]
  GraphNotActive { graph_id: Uuid, status: GraphStatus },

  /// Inserting `parent -> child` would close a prerequisite cycle.
  #[error("prerequisite edge {parent} -> {child} would create a cycle")]
  CycleDetected { parent: Uuid, child: Uuid },

  #[error("edge endpoints {parent} and {child} belong to different graphs")]
  CrossGraphEdge { parent: Uuid, child: Uuid },

  #[error("edge {parent} -> {child} already exists")]
  DuplicateEdge { parent: Uuid, child: Uuid },

  #[error("invalid edge: {0}")]
  InvalidEdge(String),

  /// Adding the interval to the review time left chrono's date range.
  #[error("review interval of {days} days is out of range")]
  IntervalOutOfRange { days: f64 },

  #[error("quality must be between 0 and 5, got {0}")]
  InvalidQuality(i64),

  /// An enum discriminant from the wire or the database was not recognised.
  #[error("invalid {kind}: {value:?}")]
  InvalidStatus { kind: &'static str, value: String },

  #[error("flow in phase {phase} cannot {step}")]
  InvalidTransition { phase: FlowPhase, step: &'static str },

  #[error("flow for graph {graph_id} has no current node")]
  NoCurrentNode { graph_id: Uuid },

  /// Optimistic-concurrency check on a flow write failed.
  #[error("flow for graph {graph_id} changed since version {expected}")]
  VersionConflict { graph_id: Uuid, expected: u64 },

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl Error {
  /// Shorthand for building an [`Error::InvalidStatus`].
  pub fn invalid(kind: &'static str, value: impl Into<String>) -> Self {
    Self::InvalidStatus { kind, value: value.into() }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
