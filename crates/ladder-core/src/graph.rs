//! Graph, node and edge types: the concept dependency DAG for one topic.
//!
//! A graph is never hard-deleted; abandoning it is a status change. Nodes and
//! edges belong to exactly one graph and only disappear with it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::{Error, Result, mastery::Sm2State};

// ─── Graph ───────────────────────────────────────────────────────────────────

/// Lifecycle status of a graph. Only `Active` graphs accept topology
/// writes; `Completed` graphs keep taking responses so their reviews still
/// land.
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
pub enum GraphStatus {
  Active,
  Completed,
  Abandoned,
}

impl GraphStatus {
  pub fn parse(s: &str) -> Result<Self> {
    s.parse().map_err(|_| Error::invalid("graph status", s))
  }

  pub fn is_active(self) -> bool { matches!(self, Self::Active) }

  pub fn accepts_responses(self) -> bool { matches!(self, Self::Active | Self::Completed) }
}

/// A named container for one topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Graph {
  pub graph_id:     Uuid,
  pub name:         String,
  pub status:       GraphStatus,
  pub root_node_id: Option<Uuid>,
  pub created_at:   DateTime<Utc>,
  pub updated_at:   DateTime<Utc>,
}

impl Graph {
  /// Fail with [`Error::GraphNotActive`] unless the graph accepts writes.
  pub fn ensure_active(&self) -> Result<()> {
    if self.status.is_active() {
      Ok(())
    } else {
      Err(Error::GraphNotActive {
        graph_id: self.graph_id,
        status:   self.status,
      })
    }
  }
}

/// Input to [`crate::store::LearningStore::create_graph`].
#[derive(Debug, Clone, Deserialize)]
pub struct NewGraph {
  pub name: String,
}

// ─── Node ────────────────────────────────────────────────────────────────────

/// Deepest position a node may take, whether given on creation or reached
/// through depth propagation.
pub const MAX_DEPTH: u32 = 10_000;

/// Where a learner stands on one concept.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  PartialOrd,
  Ord,
  Default,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MasteryStatus {
  #[default]
  Unseen,
  Diagnosed,
  Learning,
  Reviewing,
  Mastered,
}

impl MasteryStatus {
  pub fn parse(s: &str) -> Result<Self> {
    s.parse().map_err(|_| Error::invalid("mastery status", s))
  }

  pub fn is_mastered(self) -> bool { matches!(self, Self::Mastered) }
}

/// A concept within exactly one graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
  pub node_id:         Uuid,
  pub graph_id:        Uuid,
  pub label:           String,
  pub description:     Option<String>,
  /// Distance from the root along prerequisite edges; denormalised and
  /// raised by the store whenever a prerequisite parent gets deeper.
  pub depth:           u32,
  pub mastery_score:   f64,
  pub mastery_status:  MasteryStatus,
  #[serde(flatten)]
  pub sm2:             Sm2State,
  /// Rough effort in minutes, if the author estimated one.
  pub effort_estimate: Option<u32>,
  /// Position in the planned learning order, once planned.
  pub sequence:        Option<u32>,
  pub created_at:      DateTime<Utc>,
  pub updated_at:      DateTime<Utc>,
}

/// Input to [`crate::store::LearningStore::create_node`].
#[derive(Debug, Clone, Deserialize)]
pub struct NewNode {
  pub graph_id:        Uuid,
  pub label:           String,
  #[serde(default)]
  pub description:     Option<String>,
  #[serde(default)]
  pub depth:           u32,
  #[serde(default)]
  pub effort_estimate: Option<u32>,
  /// Make this node the graph's root if the graph has none yet.
  #[serde(default)]
  pub root:            bool,
}

impl NewNode {
  /// Reject a caller-supplied depth past [`MAX_DEPTH`].
  pub fn validate(&self) -> Result<()> {
    if self.depth > MAX_DEPTH {
      return Err(Error::invalid("depth", self.depth.to_string()));
    }
    Ok(())
  }

  /// Convenience constructor with all optional fields set to their defaults.
  pub fn new(graph_id: Uuid, label: impl Into<String>) -> Self {
    Self {
      graph_id,
      label: label.into(),
      description: None,
      depth: 0,
      effort_estimate: None,
      root: false,
    }
  }
}

// ─── Edge ────────────────────────────────────────────────────────────────────

/// `Prerequisite` edges constrain ordering and must stay acyclic; `Related`
/// edges are informational only.
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
pub enum EdgeKind {
  Prerequisite,
  Related,
}

impl EdgeKind {
  pub fn parse(s: &str) -> Result<Self> {
    s.parse().map_err(|_| Error::invalid("edge kind", s))
  }
}

/// A directed edge `parent -> child`; for prerequisites, the parent must be
/// mastered before the child is teachable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
  pub edge_id:    Uuid,
  pub graph_id:   Uuid,
  pub parent_id:  Uuid,
  pub child_id:   Uuid,
  pub kind:       EdgeKind,
  pub created_at: DateTime<Utc>,
}

impl Edge {
  pub fn is_prerequisite(&self) -> bool {
    self.kind == EdgeKind::Prerequisite
  }
}

/// Input to [`crate::store::LearningStore::create_edge`].
#[derive(Debug, Clone, Deserialize)]
pub struct NewEdge {
  pub parent_id: Uuid,
  pub child_id:  Uuid,
  pub kind:      EdgeKind,
}

impl NewEdge {
  pub fn prerequisite(parent_id: Uuid, child_id: Uuid) -> Self {
    Self { parent_id, child_id, kind: EdgeKind::Prerequisite }
  }

  pub fn related(parent_id: Uuid, child_id: Uuid) -> Self {
    Self { parent_id, child_id, kind: EdgeKind::Related }
  }
}
