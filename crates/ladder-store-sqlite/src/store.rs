//! [`SqliteStore`]: the SQLite implementation of [`LearningStore`].

use std::{collections::VecDeque, path::Path};

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension as _, TransactionBehavior, params};
use uuid::Uuid;

use ladder_core::{
  Error as CoreError,
  analytics::AnalyticsSnapshot,
  flow::FlowState,
  frontier,
  graph::{
    Edge, EdgeKind, Graph, GraphStatus, MAX_DEPTH, MasteryStatus, NewEdge, NewGraph, NewNode,
    Node,
  },
  mastery::{
    AppliedResponse, MasteryUpdate, NewQuizResponse, Quality, QuizResponse, ResponseType,
    Sm2State, assess,
  },
  planner::Placement,
  policy::Policy,
  review::{
    Reservation, ReviewSlot, SlotKind, SlotRequest, batch_schedule_name,
    individual_schedule_name,
  },
  store::LearningStore,
};

use crate::{
  Error, Result,
  encode::{
    EDGE_COLUMNS, FLOW_COLUMNS, GRAPH_COLUMNS, NODE_COLUMNS, RESPONSE_COLUMNS, RawEdge,
    RawFlow, RawGraph, RawNode, RawResponse, RawSlot, RawSnapshot, SLOT_COLUMNS,
    decode_edges, decode_nodes, decode_slots, encode_date, encode_dt, encode_uuid,
  },
  schema::SCHEMA,
};

/// Outcome of a domain check made inside a database closure. The outer
/// `tokio_rusqlite::Result` carries infrastructure failures; this one carries
/// invariant violations, and returning it early rolls the transaction back.
type Checked<T> = ladder_core::Result<T>;

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Ladder learning store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

// ─── In-transaction helpers ──────────────────────────────────────────────────

fn column_uuid(s: &str) -> rusqlite::Result<Uuid> {
  Uuid::parse_str(s).map_err(|e| {
    rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
  })
}

fn graph_status(conn: &Connection, graph_id: Uuid) -> rusqlite::Result<Checked<GraphStatus>> {
  let status: Option<String> = conn
    .query_row(
      "SELECT status FROM graphs WHERE graph_id = ?1",
      params![encode_uuid(graph_id)],
      |r| r.get(0),
    )
    .optional()?;

  Ok(match status {
    None => Err(CoreError::GraphNotFound(graph_id)),
    Some(s) => GraphStatus::parse(&s),
  })
}

fn ensure_active(conn: &Connection, graph_id: Uuid) -> rusqlite::Result<Checked<()>> {
  Ok(graph_status(conn, graph_id)?.and_then(|status| {
    if status.is_active() {
      Ok(())
    } else {
      Err(CoreError::GraphNotActive { graph_id, status })
    }
  }))
}

fn ensure_accepts_responses(
  conn: &Connection,
  graph_id: Uuid,
) -> rusqlite::Result<Checked<()>> {
  Ok(graph_status(conn, graph_id)?.and_then(|status| {
    if status.accepts_responses() {
      Ok(())
    } else {
      Err(CoreError::GraphNotActive { graph_id, status })
    }
  }))
}

/// `(graph_id, depth)` of a node.
fn node_position(conn: &Connection, node_id: Uuid) -> rusqlite::Result<Option<(Uuid, i64)>> {
  conn
    .query_row(
      "SELECT graph_id, depth FROM nodes WHERE node_id = ?1",
      params![encode_uuid(node_id)],
      |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)),
    )
    .optional()?
    .map(|(g, d)| -> rusqlite::Result<(Uuid, i64)> { Ok((column_uuid(&g)?, d)) })
    .transpose()
}

fn prerequisite_children(conn: &Connection, node_id: &str) -> rusqlite::Result<Vec<String>> {
  let mut stmt = conn.prepare_cached(
    "SELECT child_id FROM edges WHERE parent_id = ?1 AND kind = 'prerequisite'",
  )?;
  let rows = stmt
    .query_map(params![node_id], |r| r.get(0))?
    .collect::<rusqlite::Result<Vec<String>>>()?;
  Ok(rows)
}

/// Whether `to` is reachable from `from` over prerequisite edges, `from`
/// itself included.
fn reaches(conn: &Connection, from: &str, to: &str) -> rusqlite::Result<bool> {
  conn.query_row(
    "WITH RECURSIVE reach(node_id) AS (
       SELECT ?1
       UNION
       SELECT e.child_id FROM edges e
       JOIN reach r ON e.parent_id = r.node_id
       WHERE e.kind = 'prerequisite'
     )
     SELECT EXISTS (SELECT 1 FROM reach WHERE node_id = ?2)",
    params![from, to],
    |r| r.get(0),
  )
}

/// Raw qualities of a node's latest non-diagnostic responses, newest first.
fn recent_qualities(conn: &Connection, node_id: &str, limit: i64) -> rusqlite::Result<Vec<i64>> {
  let mut stmt = conn.prepare_cached(
    "SELECT quality FROM quiz_responses
     WHERE node_id = ?1 AND response_type != 'diagnostic'
     ORDER BY responded_at DESC, rowid DESC
     LIMIT ?2",
  )?;
  let rows = stmt
    .query_map(params![node_id, limit], |r| r.get(0))?
    .collect::<rusqlite::Result<Vec<i64>>>()?;
  Ok(rows)
}

/// Decode what a transaction read about a node and run the mastery update
/// on it.
fn assess_raw(
  prior: RawNode,
  history: Vec<i64>,
  input: &NewQuizResponse,
  policy: &Policy,
  at: DateTime<Utc>,
) -> Result<MasteryUpdate> {
  let prior = prior.into_node()?;
  let history = history
    .into_iter()
    .map(Quality::new)
    .collect::<ladder_core::Result<Vec<_>>>()?;
  Ok(assess(&prior, input.quality, input.response_type, &history, policy, at)?)
}

fn insert_slot(conn: &Connection, slot: &RawSlot) -> rusqlite::Result<()> {
  conn.execute(
    &format!(
      "INSERT INTO review_slots ({SLOT_COLUMNS})
       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
    ),
    params![
      slot.node_id,
      slot.graph_id,
      slot.kind,
      slot.schedule_name,
      slot.fire_at,
      slot.until_at,
      slot.repetitions,
      slot.ease_factor,
      slot.created_at,
    ],
  )?;
  Ok(())
}

fn slots_where(
  conn: &Connection,
  filter: &str,
  args: impl rusqlite::Params,
) -> rusqlite::Result<Vec<RawSlot>> {
  let mut stmt = conn.prepare(&format!(
    "SELECT {SLOT_COLUMNS} FROM review_slots WHERE {filter} ORDER BY fire_at, node_id"
  ))?;
  let rows = stmt
    .query_map(args, RawSlot::from_row)?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  Ok(rows)
}

// ─── LearningStore impl ──────────────────────────────────────────────────────

impl LearningStore for SqliteStore {
  type Error = Error;

  // ── Graphs ────────────────────────────────────────────────────────────────

  async fn create_graph(&self, input: NewGraph, now: DateTime<Utc>) -> Result<Graph> {
    let graph = Graph {
      graph_id:     Uuid::new_v4(),
      name:         input.name,
      status:       GraphStatus::Active,
      root_node_id: None,
      created_at:   now,
      updated_at:   now,
    };

    let id_str     = encode_uuid(graph.graph_id);
    let name       = graph.name.clone();
    let status_str = graph.status.as_ref().to_owned();
    let at_str     = encode_dt(now);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO graphs (graph_id, name, status, created_at, updated_at)
           VALUES (?1, ?2, ?3, ?4, ?4)",
          params![id_str, name, status_str, at_str],
        )?;
        Ok(())
      })
      .await?;

    Ok(graph)
  }

  async fn get_graph(&self, graph_id: Uuid) -> Result<Option<Graph>> {
    let id_str = encode_uuid(graph_id);

    let raw: Option<RawGraph> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            &format!("SELECT {GRAPH_COLUMNS} FROM graphs WHERE graph_id = ?1"),
            params![id_str],
            RawGraph::from_row,
          )
          .optional()?)
      })
      .await?;

    raw.map(RawGraph::into_graph).transpose()
  }

  async fn list_graphs(&self, status: Option<GraphStatus>) -> Result<Vec<Graph>> {
    let status_str = status.map(|s| s.as_ref().to_owned());

    let raws: Vec<RawGraph> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {GRAPH_COLUMNS} FROM graphs
           WHERE (?1 IS NULL OR status = ?1)
           ORDER BY created_at, graph_id"
        ))?;
        let rows = stmt
          .query_map(params![status_str], RawGraph::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawGraph::into_graph).collect()
  }

  async fn set_graph_status(
    &self,
    graph_id: Uuid,
    status:   GraphStatus,
    now:      DateTime<Utc>,
  ) -> Result<Graph> {
    let id_str     = encode_uuid(graph_id);
    let status_str = status.as_ref().to_owned();
    let at_str     = encode_dt(now);

    let raw: Option<RawGraph> = self
      .conn
      .call(move |conn| {
        let changed = conn.execute(
          "UPDATE graphs SET status = ?2, updated_at = ?3 WHERE graph_id = ?1",
          params![id_str, status_str, at_str],
        )?;
        if changed == 0 {
          return Ok(None);
        }
        Ok(Some(conn.query_row(
          &format!("SELECT {GRAPH_COLUMNS} FROM graphs WHERE graph_id = ?1"),
          params![id_str],
          RawGraph::from_row,
        )?))
      })
      .await?;

    raw
      .ok_or(CoreError::GraphNotFound(graph_id))?
      .into_graph()
  }

  // ── Topology ──────────────────────────────────────────────────────────────

  async fn create_node(&self, input: NewNode, now: DateTime<Utc>) -> Result<Node> {
    input.validate()?;
    let node = Node {
      node_id:         Uuid::new_v4(),
      graph_id:        input.graph_id,
      label:           input.label,
      description:     input.description,
      depth:           input.depth,
      mastery_score:   0.0,
      mastery_status:  MasteryStatus::Unseen,
      sm2:             Sm2State::default(),
      effort_estimate: input.effort_estimate,
      sequence:        None,
      created_at:      now,
      updated_at:      now,
    };

    let graph_id    = node.graph_id;
    let node_id_str = encode_uuid(node.node_id);
    let graph_str   = encode_uuid(graph_id);
    let label       = node.label.clone();
    let description = node.description.clone();
    let depth       = i64::from(node.depth);
    let status_str  = node.mastery_status.as_ref().to_owned();
    let ease        = node.sm2.ease_factor;
    let effort      = node.effort_estimate.map(i64::from);
    let at_str      = encode_dt(now);
    let root        = input.root;

    self
      .conn
      .call(move |conn| -> tokio_rusqlite::Result<Checked<()>> {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        if let Err(e) = ensure_active(&tx, graph_id)? {
          return Ok(Err(e));
        }

        tx.execute(
          "INSERT INTO nodes (
             node_id, graph_id, label, description, depth,
             mastery_score, mastery_status, ease_factor, repetitions, last_interval_days,
             effort_estimate, created_at, updated_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?7, 0, 0, ?8, ?9, ?9)",
          params![
            node_id_str,
            graph_str,
            label,
            description,
            depth,
            status_str,
            ease,
            effort,
            at_str,
          ],
        )?;

        if root {
          tx.execute(
            "UPDATE graphs SET root_node_id = ?2, updated_at = ?3
             WHERE graph_id = ?1 AND root_node_id IS NULL",
            params![graph_str, node_id_str, at_str],
          )?;
        }

        tx.commit()?;
        Ok(Ok(()))
      })
      .await??;

    Ok(node)
  }

  async fn get_node(&self, node_id: Uuid) -> Result<Option<Node>> {
    let id_str = encode_uuid(node_id);

    let raw: Option<RawNode> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            &format!("SELECT {NODE_COLUMNS} FROM nodes WHERE node_id = ?1"),
            params![id_str],
            RawNode::from_row,
          )
          .optional()?)
      })
      .await?;

    raw.map(RawNode::into_node).transpose()
  }

  async fn list_nodes(&self, graph_id: Uuid) -> Result<Vec<Node>> {
    let id_str = encode_uuid(graph_id);

    let raws: Vec<RawNode> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {NODE_COLUMNS} FROM nodes WHERE graph_id = ?1 ORDER BY depth, node_id"
        ))?;
        let rows = stmt
          .query_map(params![id_str], RawNode::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    decode_nodes(raws)
  }

  async fn create_edge(&self, input: NewEdge, now: DateTime<Utc>) -> Result<Edge> {
    let NewEdge { parent_id, child_id, kind } = input;
    let edge_id = Uuid::new_v4();

    let edge_str   = encode_uuid(edge_id);
    let parent_str = encode_uuid(parent_id);
    let child_str  = encode_uuid(child_id);
    let kind_str   = kind.as_ref().to_owned();
    let at_str     = encode_dt(now);

    let graph_id = self
      .conn
      .call(move |conn| -> tokio_rusqlite::Result<Checked<Uuid>> {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let Some((parent_graph, parent_depth)) = node_position(&tx, parent_id)? else {
          return Ok(Err(CoreError::NodeNotFound(parent_id)));
        };
        let Some((child_graph, _)) = node_position(&tx, child_id)? else {
          return Ok(Err(CoreError::NodeNotFound(child_id)));
        };
        if parent_graph != child_graph {
          return Ok(Err(CoreError::CrossGraphEdge { parent: parent_id, child: child_id }));
        }
        if let Err(e) = ensure_active(&tx, parent_graph)? {
          return Ok(Err(e));
        }

        if parent_id == child_id {
          return Ok(Err(match kind {
            EdgeKind::Prerequisite => {
              CoreError::CycleDetected { parent: parent_id, child: child_id }
            }
            EdgeKind::Related => {
              CoreError::InvalidEdge(format!("node {parent_id} cannot relate to itself"))
            }
          }));
        }

        let duplicate: bool = tx.query_row(
          "SELECT EXISTS (
             SELECT 1 FROM edges WHERE parent_id = ?1 AND child_id = ?2 AND kind = ?3
           )",
          params![parent_str, child_str, kind_str],
          |r| r.get(0),
        )?;
        if duplicate {
          return Ok(Err(CoreError::DuplicateEdge { parent: parent_id, child: child_id }));
        }

        if kind == EdgeKind::Prerequisite && reaches(&tx, &child_str, &parent_str)? {
          return Ok(Err(CoreError::CycleDetected { parent: parent_id, child: child_id }));
        }

        tx.execute(
          "INSERT INTO edges (edge_id, graph_id, parent_id, child_id, kind, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
          params![
            edge_str,
            encode_uuid(parent_graph),
            parent_str,
            child_str,
            kind_str,
            at_str,
          ],
        )?;

        // Push the child, and everything below it, at least one level
        // deeper than the new parent. Terminates because the graph is
        // acyclic.
        if kind == EdgeKind::Prerequisite {
          let mut queue = VecDeque::from([(child_str.clone(), parent_depth + 1)]);
          while let Some((id, min_depth)) = queue.pop_front() {
            // Stored depths never exceed the bound, so this node would move.
            if min_depth > i64::from(MAX_DEPTH) {
              return Ok(Err(CoreError::InvalidEdge(format!(
                "edge {parent_id} -> {child_id} would push depth past {MAX_DEPTH}"
              ))));
            }
            let changed = tx.execute(
              "UPDATE nodes SET depth = ?2, updated_at = ?3 WHERE node_id = ?1 AND depth < ?2",
              params![id, min_depth, at_str],
            )?;
            if changed > 0 {
              queue.extend(
                prerequisite_children(&tx, &id)?
                  .into_iter()
                  .map(|c| (c, min_depth + 1)),
              );
            }
          }
        }

        tx.commit()?;
        Ok(Ok(parent_graph))
      })
      .await??;

    Ok(Edge {
      edge_id,
      graph_id,
      parent_id,
      child_id,
      kind,
      created_at: now,
    })
  }

  async fn list_edges(&self, graph_id: Uuid) -> Result<Vec<Edge>> {
    let id_str = encode_uuid(graph_id);

    let raws: Vec<RawEdge> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {EDGE_COLUMNS} FROM edges WHERE graph_id = ?1 ORDER BY created_at, edge_id"
        ))?;
        let rows = stmt
          .query_map(params![id_str], RawEdge::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    decode_edges(raws)
  }

  async fn frontier(&self, graph_id: Uuid) -> Result<Vec<Node>> {
    if self.get_graph(graph_id).await?.is_none() {
      return Err(CoreError::GraphNotFound(graph_id).into());
    }
    let nodes = self.list_nodes(graph_id).await?;
    let edges = self.list_edges(graph_id).await?;
    Ok(frontier::frontier(&nodes, &edges))
  }

  async fn subtree(&self, node_id: Uuid) -> Result<Vec<Node>> {
    let id_str = encode_uuid(node_id);

    let raws: Vec<RawNode> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "WITH RECURSIVE reach(node_id) AS (
             SELECT ?1
             UNION
             SELECT e.child_id FROM edges e
             JOIN reach r ON e.parent_id = r.node_id
             WHERE e.kind = 'prerequisite'
           )
           SELECT {NODE_COLUMNS} FROM nodes
           WHERE node_id IN (SELECT node_id FROM reach)
           ORDER BY depth, node_id"
        ))?;
        let rows = stmt
          .query_map(params![id_str], RawNode::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    if raws.is_empty() {
      return Err(CoreError::NodeNotFound(node_id).into());
    }
    decode_nodes(raws)
  }

  async fn assign_sequence(
    &self,
    graph_id: Uuid,
    order:    Vec<Placement>,
    now:      DateTime<Utc>,
  ) -> Result<()> {
    let graph_str = encode_uuid(graph_id);
    let at_str    = encode_dt(now);

    self
      .conn
      .call(move |conn| -> tokio_rusqlite::Result<Checked<()>> {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        if let Err(e) = ensure_active(&tx, graph_id)? {
          return Ok(Err(e));
        }

        tx.execute(
          "UPDATE nodes SET sequence = NULL WHERE graph_id = ?1",
          params![graph_str],
        )?;
        for placement in &order {
          let changed = tx.execute(
            "UPDATE nodes SET sequence = ?2, updated_at = ?4
             WHERE node_id = ?1 AND graph_id = ?3",
            params![
              encode_uuid(placement.node_id),
              i64::from(placement.sequence),
              graph_str,
              at_str,
            ],
          )?;
          if changed == 0 {
            return Ok(Err(CoreError::NodeNotFound(placement.node_id)));
          }
        }

        tx.commit()?;
        Ok(Ok(()))
      })
      .await??;

    Ok(())
  }

  // ── Mastery ───────────────────────────────────────────────────────────────

  async fn response_history(&self, node_id: Uuid, limit: usize) -> Result<Vec<Quality>> {
    let id_str = encode_uuid(node_id);
    let limit  = i64::try_from(limit).unwrap_or(i64::MAX);

    let raw: Vec<i64> = self
      .conn
      .call(move |conn| Ok(recent_qualities(conn, &id_str, limit)?))
      .await?;

    Ok(raw.into_iter().map(Quality::new).collect::<ladder_core::Result<_>>()?)
  }

  async fn record_response(
    &self,
    input:        NewQuizResponse,
    policy:       Policy,
    responded_at: DateTime<Utc>,
  ) -> Result<AppliedResponse> {
    let response_id = Uuid::new_v4();
    let node_id     = input.node_id;

    let response_str = encode_uuid(response_id);
    let node_str     = encode_uuid(node_id);
    let at_str       = encode_dt(responded_at);
    let history_len  =
      i64::try_from(policy.mastery_window.saturating_sub(1)).unwrap_or(i64::MAX);
    let ctx          = input.clone();

    let (raw, scheduled) = self
      .conn
      .call(move |conn| -> tokio_rusqlite::Result<Result<(RawNode, bool)>> {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let Some((graph_id, _)) = node_position(&tx, node_id)? else {
          return Ok(Err(CoreError::NodeNotFound(node_id).into()));
        };
        if let Err(e) = ensure_accepts_responses(&tx, graph_id)? {
          return Ok(Err(e.into()));
        }

        let prior = tx.query_row(
          &format!("SELECT {NODE_COLUMNS} FROM nodes WHERE node_id = ?1"),
          params![node_str],
          RawNode::from_row,
        )?;
        let history = if ctx.response_type == ResponseType::Diagnostic {
          Vec::new()
        } else {
          recent_qualities(&tx, &node_str, history_len)?
        };
        let update = match assess_raw(prior, history, &ctx, &policy, responded_at) {
          Ok(update) => update,
          Err(e) => return Ok(Err(e)),
        };

        tx.execute(
          "INSERT INTO quiz_responses (
             response_id, node_id, graph_id, question_text, user_answer,
             quality, response_type, responded_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
          params![
            response_str,
            node_str,
            encode_uuid(graph_id),
            ctx.question_text,
            ctx.user_answer,
            i64::from(ctx.quality.get()),
            ctx.response_type.as_ref(),
            at_str,
          ],
        )?;

        tx.execute(
          "UPDATE nodes SET
             mastery_score = ?2, mastery_status = ?3, ease_factor = ?4,
             repetitions = ?5, last_interval_days = ?6, next_review_at = ?7,
             last_reviewed_at = ?8, updated_at = ?9
           WHERE node_id = ?1",
          params![
            node_str,
            update.mastery_score,
            update.mastery_status.as_ref(),
            update.sm2.ease_factor,
            i64::from(update.sm2.repetitions),
            update.sm2.last_interval_days,
            update.sm2.next_review_at.map(encode_dt),
            update.sm2.last_reviewed_at.map(encode_dt),
            at_str,
          ],
        )?;

        let raw = tx.query_row(
          &format!("SELECT {NODE_COLUMNS} FROM nodes WHERE node_id = ?1"),
          params![node_str],
          RawNode::from_row,
        )?;

        tx.commit()?;
        Ok(Ok((raw, update.scheduled)))
      })
      .await??;

    let node = raw.into_node()?;
    let response = QuizResponse {
      response_id,
      node_id,
      graph_id: node.graph_id,
      question_text: input.question_text,
      user_answer: input.user_answer,
      quality: input.quality,
      response_type: input.response_type,
      responded_at,
    };
    Ok(AppliedResponse { node, response, scheduled })
  }

  async fn list_responses(
    &self,
    graph_id: Uuid,
    since:    Option<DateTime<Utc>>,
  ) -> Result<Vec<QuizResponse>> {
    let id_str    = encode_uuid(graph_id);
    let since_str = since.map(encode_dt);

    let raws: Vec<RawResponse> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {RESPONSE_COLUMNS} FROM quiz_responses
           WHERE graph_id = ?1 AND (?2 IS NULL OR responded_at > ?2)
           ORDER BY responded_at, rowid"
        ))?;
        let rows = stmt
          .query_map(params![id_str, since_str], RawResponse::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawResponse::into_response).collect()
  }

  // ── Review ledger ─────────────────────────────────────────────────────────

  async fn reserve_review(&self, request: SlotRequest) -> Result<Reservation> {
    let node_str  = encode_uuid(request.node_id);
    let graph_str = encode_uuid(request.graph_id);
    let now_str   = encode_dt(request.now);
    let cap       = i64::try_from(request.cap).unwrap_or(i64::MAX);

    let individual_name = individual_schedule_name(request.node_id);
    let batch_name      = batch_schedule_name(request.graph_id);
    let fire_str        = encode_dt(request.fire_at);
    let until_str       = encode_dt(request.until_at);
    let repetitions     = i64::from(request.repetitions);
    let ease            = request.ease_factor;

    let (previous, slot, batch) = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let previous = slots_where(&tx, "node_id = ?1", params![node_str])?
          .into_iter()
          .next();
        tx.execute("DELETE FROM review_slots WHERE node_id = ?1", params![node_str])?;
        tx.execute(
          "DELETE FROM review_slots WHERE graph_id = ?1 AND until_at <= ?2",
          params![graph_str, now_str],
        )?;

        let live: i64 = tx.query_row(
          "SELECT COUNT(*) FROM review_slots
           WHERE graph_id = ?1 AND kind = 'individual' AND until_at > ?2",
          params![graph_str, now_str],
          |r| r.get(0),
        )?;
        let (kind, schedule_name) = if live < cap {
          (SlotKind::Individual, individual_name)
        } else {
          (SlotKind::Batch, batch_name)
        };

        let slot = RawSlot {
          node_id: node_str,
          graph_id: graph_str,
          kind: kind.as_ref().to_owned(),
          schedule_name,
          fire_at: fire_str,
          until_at: until_str,
          repetitions,
          ease_factor: ease,
          created_at: now_str,
        };
        insert_slot(&tx, &slot)?;

        let batch = slots_where(
          &tx,
          "graph_id = ?1 AND kind = 'batch'",
          params![slot.graph_id],
        )?;

        tx.commit()?;
        Ok((previous, slot, batch))
      })
      .await?;

    Ok(Reservation {
      slot:     slot.into_slot()?,
      previous: previous.map(RawSlot::into_slot).transpose()?,
      batch:    decode_slots(batch)?,
    })
  }

  async fn restore_review(&self, node_id: Uuid, previous: Option<ReviewSlot>) -> Result<()> {
    let id_str   = encode_uuid(node_id);
    let previous = previous.as_ref().map(RawSlot::from_slot);

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute("DELETE FROM review_slots WHERE node_id = ?1", params![id_str])?;
        if let Some(slot) = &previous {
          insert_slot(&tx, slot)?;
        }
        tx.commit()?;
        Ok(())
      })
      .await?;

    Ok(())
  }

  async fn list_review_slots(&self, graph_id: Uuid) -> Result<Vec<ReviewSlot>> {
    let id_str = encode_uuid(graph_id);

    let raws = self
      .conn
      .call(move |conn| Ok(slots_where(conn, "graph_id = ?1", params![id_str])?))
      .await?;

    decode_slots(raws)
  }

  async fn clear_review_slots(&self, graph_id: Uuid) -> Result<Vec<ReviewSlot>> {
    let id_str = encode_uuid(graph_id);

    let raws = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let raws = slots_where(&tx, "graph_id = ?1", params![id_str])?;
        tx.execute("DELETE FROM review_slots WHERE graph_id = ?1", params![id_str])?;
        tx.commit()?;
        Ok(raws)
      })
      .await?;

    decode_slots(raws)
  }

  // ── Flow ──────────────────────────────────────────────────────────────────

  async fn get_flow(&self, graph_id: Uuid) -> Result<Option<FlowState>> {
    let id_str = encode_uuid(graph_id);

    let raw: Option<RawFlow> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            &format!("SELECT {FLOW_COLUMNS} FROM flow_states WHERE graph_id = ?1"),
            params![id_str],
            RawFlow::from_row,
          )
          .optional()?)
      })
      .await?;

    raw.map(RawFlow::into_flow).transpose()
  }

  async fn save_flow(&self, state: FlowState) -> Result<FlowState> {
    let graph_id     = state.graph_id;
    let expected     = state.version;
    let expected_i64 = i64::try_from(expected)
      .map_err(|_| CoreError::VersionConflict { graph_id, expected })?;

    let id_str      = encode_uuid(graph_id);
    let phase_str   = state.phase.as_ref().to_owned();
    let current_str = state.current_node_id.map(encode_uuid);
    let results     = serde_json::to_string(&state.diagnostic_results)?;
    let at_str      = encode_dt(state.last_activity_at);
    let from_str    = state.abandoned_from.map(|p| p.as_ref().to_owned());

    self
      .conn
      .call(move |conn| -> tokio_rusqlite::Result<Checked<()>> {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        if let Err(e) = graph_status(&tx, graph_id)? {
          return Ok(Err(e));
        }

        let stored: Option<i64> = tx
          .query_row(
            "SELECT version FROM flow_states WHERE graph_id = ?1",
            params![id_str],
            |r| r.get(0),
          )
          .optional()?;

        match stored {
          None if expected_i64 == 0 => {
            tx.execute(
              &format!(
                "INSERT INTO flow_states ({FLOW_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1)"
              ),
              params![id_str, phase_str, current_str, results, at_str, from_str],
            )?;
          }
          Some(v) if v == expected_i64 => {
            tx.execute(
              "UPDATE flow_states SET
                 phase = ?2, current_node_id = ?3, diagnostic_results = ?4,
                 last_activity_at = ?5, abandoned_from = ?6, version = version + 1
               WHERE graph_id = ?1 AND version = ?7",
              params![
                id_str,
                phase_str,
                current_str,
                results,
                at_str,
                from_str,
                expected_i64,
              ],
            )?;
          }
          _ => return Ok(Err(CoreError::VersionConflict { graph_id, expected })),
        }

        tx.commit()?;
        Ok(Ok(()))
      })
      .await??;

    Ok(FlowState { version: expected + 1, ..state })
  }

  // ── Analytics ─────────────────────────────────────────────────────────────

  async fn upsert_snapshot(&self, snapshot: AnalyticsSnapshot) -> Result<()> {
    let id_str       = encode_uuid(snapshot.graph_id);
    let date_str     = encode_date(snapshot.date);
    let metrics_json = serde_json::to_string(&snapshot.metrics)?;
    let at_str       = encode_dt(snapshot.computed_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO analytics_snapshots (graph_id, snapshot_date, metrics_json, computed_at)
           VALUES (?1, ?2, ?3, ?4)
           ON CONFLICT (graph_id, snapshot_date) DO UPDATE SET
             metrics_json = excluded.metrics_json,
             computed_at  = excluded.computed_at",
          params![id_str, date_str, metrics_json, at_str],
        )?;
        Ok(())
      })
      .await?;

    Ok(())
  }

  async fn get_snapshot(
    &self,
    graph_id: Uuid,
    date:     NaiveDate,
  ) -> Result<Option<AnalyticsSnapshot>> {
    let id_str   = encode_uuid(graph_id);
    let date_str = encode_date(date);

    let raw: Option<RawSnapshot> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            "SELECT graph_id, snapshot_date, metrics_json, computed_at
             FROM analytics_snapshots WHERE graph_id = ?1 AND snapshot_date = ?2",
            params![id_str, date_str],
            RawSnapshot::from_row,
          )
          .optional()?)
      })
      .await?;

    raw.map(RawSnapshot::into_snapshot).transpose()
  }

  async fn list_snapshots(&self, graph_id: Uuid) -> Result<Vec<AnalyticsSnapshot>> {
    let id_str = encode_uuid(graph_id);

    let raws: Vec<RawSnapshot> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT graph_id, snapshot_date, metrics_json, computed_at
           FROM analytics_snapshots WHERE graph_id = ?1 ORDER BY snapshot_date",
        )?;
        let rows = stmt
          .query_map(params![id_str], RawSnapshot::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawSnapshot::into_snapshot).collect()
  }
}
