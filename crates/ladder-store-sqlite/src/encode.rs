//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as fixed-width RFC 3339 strings in UTC with
//! microsecond precision, so lexical order in SQL matches time order. Enums
//! are stored as their snake_case names. UUIDs are stored as hyphenated
//! lowercase strings.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use ladder_core::{
  analytics::{AnalyticsMetrics, AnalyticsSnapshot},
  flow::{FlowPhase, FlowState},
  graph::{Edge, EdgeKind, Graph, GraphStatus, MasteryStatus, Node},
  mastery::{Quality, QuizResponse, ResponseType, Sm2State},
  review::{ReviewSlot, SlotKind},
};
use rusqlite::Row;
use uuid::Uuid;

use crate::{Error, Result};

// ─── Scalars ─────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

fn decode_opt_dt(s: Option<&str>) -> Result<Option<DateTime<Utc>>> {
  s.map(decode_dt).transpose()
}

pub fn encode_date(d: NaiveDate) -> String { d.format("%Y-%m-%d").to_string() }

pub fn decode_date(s: &str) -> Result<NaiveDate> {
  NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| Error::DateParse(e.to_string()))
}

fn decode_u32(kind: &'static str, v: i64) -> Result<u32> {
  u32::try_from(v).map_err(|_| ladder_core::Error::invalid(kind, v.to_string()).into())
}

// ─── Row types ───────────────────────────────────────────────────────────────

pub const GRAPH_COLUMNS: &str =
  "graph_id, name, status, root_node_id, created_at, updated_at";

/// Raw values read directly from a `graphs` row.
pub struct RawGraph {
  pub graph_id:     String,
  pub name:         String,
  pub status:       String,
  pub root_node_id: Option<String>,
  pub created_at:   String,
  pub updated_at:   String,
}

impl RawGraph {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      graph_id:     row.get(0)?,
      name:         row.get(1)?,
      status:       row.get(2)?,
      root_node_id: row.get(3)?,
      created_at:   row.get(4)?,
      updated_at:   row.get(5)?,
    })
  }

  pub fn into_graph(self) -> Result<Graph> {
    Ok(Graph {
      graph_id:     decode_uuid(&self.graph_id)?,
      name:         self.name,
      status:       GraphStatus::parse(&self.status)?,
      root_node_id: self.root_node_id.as_deref().map(decode_uuid).transpose()?,
      created_at:   decode_dt(&self.created_at)?,
      updated_at:   decode_dt(&self.updated_at)?,
    })
  }
}

pub const NODE_COLUMNS: &str = "node_id, graph_id, label, description, depth, \
   mastery_score, mastery_status, ease_factor, repetitions, last_interval_days, \
   next_review_at, last_reviewed_at, effort_estimate, sequence, created_at, updated_at";

/// Raw values read directly from a `nodes` row.
pub struct RawNode {
  pub node_id:            String,
  pub graph_id:           String,
  pub label:              String,
  pub description:        Option<String>,
  pub depth:              i64,
  pub mastery_score:      f64,
  pub mastery_status:     String,
  pub ease_factor:        f64,
  pub repetitions:        i64,
  pub last_interval_days: f64,
  pub next_review_at:     Option<String>,
  pub last_reviewed_at:   Option<String>,
  pub effort_estimate:    Option<i64>,
  pub sequence:           Option<i64>,
  pub created_at:         String,
  pub updated_at:         String,
}

impl RawNode {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      node_id:            row.get(0)?,
      graph_id:           row.get(1)?,
      label:              row.get(2)?,
      description:        row.get(3)?,
      depth:              row.get(4)?,
      mastery_score:      row.get(5)?,
      mastery_status:     row.get(6)?,
      ease_factor:        row.get(7)?,
      repetitions:        row.get(8)?,
      last_interval_days: row.get(9)?,
      next_review_at:     row.get(10)?,
      last_reviewed_at:   row.get(11)?,
      effort_estimate:    row.get(12)?,
      sequence:           row.get(13)?,
      created_at:         row.get(14)?,
      updated_at:         row.get(15)?,
    })
  }

  pub fn into_node(self) -> Result<Node> {
    Ok(Node {
      node_id:         decode_uuid(&self.node_id)?,
      graph_id:        decode_uuid(&self.graph_id)?,
      label:           self.label,
      description:     self.description,
      depth:           decode_u32("depth", self.depth)?,
      mastery_score:   self.mastery_score,
      mastery_status:  MasteryStatus::parse(&self.mastery_status)?,
      sm2:             Sm2State {
        ease_factor:        self.ease_factor,
        repetitions:        decode_u32("repetitions", self.repetitions)?,
        last_interval_days: self.last_interval_days,
        next_review_at:     decode_opt_dt(self.next_review_at.as_deref())?,
        last_reviewed_at:   decode_opt_dt(self.last_reviewed_at.as_deref())?,
      },
      effort_estimate: self
        .effort_estimate
        .map(|v| decode_u32("effort estimate", v))
        .transpose()?,
      sequence:        self.sequence.map(|v| decode_u32("sequence", v)).transpose()?,
      created_at:      decode_dt(&self.created_at)?,
      updated_at:      decode_dt(&self.updated_at)?,
    })
  }
}

pub fn decode_nodes(raws: Vec<RawNode>) -> Result<Vec<Node>> {
  raws.into_iter().map(RawNode::into_node).collect()
}

pub const EDGE_COLUMNS: &str = "edge_id, graph_id, parent_id, child_id, kind, created_at";

/// Raw values read directly from an `edges` row.
pub struct RawEdge {
  pub edge_id:    String,
  pub graph_id:   String,
  pub parent_id:  String,
  pub child_id:   String,
  pub kind:       String,
  pub created_at: String,
}

impl RawEdge {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      edge_id:    row.get(0)?,
      graph_id:   row.get(1)?,
      parent_id:  row.get(2)?,
      child_id:   row.get(3)?,
      kind:       row.get(4)?,
      created_at: row.get(5)?,
    })
  }

  pub fn into_edge(self) -> Result<Edge> {
    Ok(Edge {
      edge_id:    decode_uuid(&self.edge_id)?,
      graph_id:   decode_uuid(&self.graph_id)?,
      parent_id:  decode_uuid(&self.parent_id)?,
      child_id:   decode_uuid(&self.child_id)?,
      kind:       EdgeKind::parse(&self.kind)?,
      created_at: decode_dt(&self.created_at)?,
    })
  }
}

pub fn decode_edges(raws: Vec<RawEdge>) -> Result<Vec<Edge>> {
  raws.into_iter().map(RawEdge::into_edge).collect()
}

pub const RESPONSE_COLUMNS: &str = "response_id, node_id, graph_id, question_text, \
   user_answer, quality, response_type, responded_at";

/// Raw values read directly from a `quiz_responses` row.
pub struct RawResponse {
  pub response_id:   String,
  pub node_id:       String,
  pub graph_id:      String,
  pub question_text: String,
  pub user_answer:   String,
  pub quality:       i64,
  pub response_type: String,
  pub responded_at:  String,
}

impl RawResponse {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      response_id:   row.get(0)?,
      node_id:       row.get(1)?,
      graph_id:      row.get(2)?,
      question_text: row.get(3)?,
      user_answer:   row.get(4)?,
      quality:       row.get(5)?,
      response_type: row.get(6)?,
      responded_at:  row.get(7)?,
    })
  }

  pub fn into_response(self) -> Result<QuizResponse> {
    Ok(QuizResponse {
      response_id:   decode_uuid(&self.response_id)?,
      node_id:       decode_uuid(&self.node_id)?,
      graph_id:      decode_uuid(&self.graph_id)?,
      question_text: self.question_text,
      user_answer:   self.user_answer,
      quality:       Quality::new(self.quality)?,
      response_type: ResponseType::parse(&self.response_type)?,
      responded_at:  decode_dt(&self.responded_at)?,
    })
  }
}

pub const SLOT_COLUMNS: &str = "node_id, graph_id, kind, schedule_name, fire_at, \
   until_at, repetitions, ease_factor, created_at";

/// Raw values read directly from a `review_slots` row.
pub struct RawSlot {
  pub node_id:       String,
  pub graph_id:      String,
  pub kind:          String,
  pub schedule_name: String,
  pub fire_at:       String,
  pub until_at:      String,
  pub repetitions:   i64,
  pub ease_factor:   f64,
  pub created_at:    String,
}

impl RawSlot {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      node_id:       row.get(0)?,
      graph_id:      row.get(1)?,
      kind:          row.get(2)?,
      schedule_name: row.get(3)?,
      fire_at:       row.get(4)?,
      until_at:      row.get(5)?,
      repetitions:   row.get(6)?,
      ease_factor:   row.get(7)?,
      created_at:    row.get(8)?,
    })
  }

  pub fn from_slot(slot: &ReviewSlot) -> Self {
    Self {
      node_id:       encode_uuid(slot.node_id),
      graph_id:      encode_uuid(slot.graph_id),
      kind:          slot.kind.as_ref().to_owned(),
      schedule_name: slot.schedule_name.clone(),
      fire_at:       encode_dt(slot.fire_at),
      until_at:      encode_dt(slot.until_at),
      repetitions:   i64::from(slot.repetitions),
      ease_factor:   slot.ease_factor,
      created_at:    encode_dt(slot.created_at),
    }
  }

  pub fn into_slot(self) -> Result<ReviewSlot> {
    Ok(ReviewSlot {
      node_id:       decode_uuid(&self.node_id)?,
      graph_id:      decode_uuid(&self.graph_id)?,
      kind:          SlotKind::parse(&self.kind)?,
      schedule_name: self.schedule_name,
      fire_at:       decode_dt(&self.fire_at)?,
      until_at:      decode_dt(&self.until_at)?,
      repetitions:   decode_u32("repetitions", self.repetitions)?,
      ease_factor:   self.ease_factor,
      created_at:    decode_dt(&self.created_at)?,
    })
  }
}

pub fn decode_slots(raws: Vec<RawSlot>) -> Result<Vec<ReviewSlot>> {
  raws.into_iter().map(RawSlot::into_slot).collect()
}

pub const FLOW_COLUMNS: &str = "graph_id, phase, current_node_id, diagnostic_results, \
   last_activity_at, abandoned_from, version";

/// Raw values read directly from a `flow_states` row.
pub struct RawFlow {
  pub graph_id:           String,
  pub phase:              String,
  pub current_node_id:    Option<String>,
  pub diagnostic_results: String,
  pub last_activity_at:   String,
  pub abandoned_from:     Option<String>,
  pub version:            i64,
}

impl RawFlow {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      graph_id:           row.get(0)?,
      phase:              row.get(1)?,
      current_node_id:    row.get(2)?,
      diagnostic_results: row.get(3)?,
      last_activity_at:   row.get(4)?,
      abandoned_from:     row.get(5)?,
      version:            row.get(6)?,
    })
  }

  pub fn into_flow(self) -> Result<FlowState> {
    Ok(FlowState {
      graph_id:           decode_uuid(&self.graph_id)?,
      phase:              FlowPhase::parse(&self.phase)?,
      current_node_id:    self.current_node_id.as_deref().map(decode_uuid).transpose()?,
      diagnostic_results: serde_json::from_str(&self.diagnostic_results)?,
      last_activity_at:   decode_dt(&self.last_activity_at)?,
      abandoned_from:     self
        .abandoned_from
        .as_deref()
        .map(FlowPhase::parse)
        .transpose()?,
      version:            u64::try_from(self.version)
        .map_err(|_| ladder_core::Error::invalid("flow version", self.version.to_string()))?,
    })
  }
}

/// Raw values read directly from an `analytics_snapshots` row.
pub struct RawSnapshot {
  pub graph_id:      String,
  pub snapshot_date: String,
  pub metrics_json:  String,
  pub computed_at:   String,
}

impl RawSnapshot {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      graph_id:      row.get(0)?,
      snapshot_date: row.get(1)?,
      metrics_json:  row.get(2)?,
      computed_at:   row.get(3)?,
    })
  }

  pub fn into_snapshot(self) -> Result<AnalyticsSnapshot> {
    let metrics: AnalyticsMetrics = serde_json::from_str(&self.metrics_json)?;
    Ok(AnalyticsSnapshot {
      graph_id: decode_uuid(&self.graph_id)?,
      date: decode_date(&self.snapshot_date)?,
      metrics,
      computed_at: decode_dt(&self.computed_at)?,
    })
  }
}
