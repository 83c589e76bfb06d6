//! Handlers for `/graphs` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/graphs` | Optional `?status=active\|completed\|abandoned` |
//! | `POST` | `/graphs` | Body: `{"name":"Linear algebra"}` |
//! | `GET`  | `/graphs/:id` | 404 if not found |
//! | `GET`  | `/graphs/:id/nodes` | All nodes of the graph |
//! | `POST` | `/graphs/:id/nodes` | Body: `{"label":"Vectors","root":true}` |
//! | `GET`  | `/graphs/:id/edges` | All edges of the graph |
//! | `POST` | `/graphs/:id/edges` | Body: `{"parent_id":..,"child_id":..,"kind":"prerequisite"}` |
//! | `GET`  | `/graphs/:id/frontier` | Nodes ready to teach |
//! | `POST` | `/graphs/:id/plan` | Re-sequence the curriculum |
//! | `GET`  | `/graphs/:id/snapshots` | Optional `?from=YYYY-MM-DD` |

use axum::{
  Json,
  extract::{Path, Query, State},
  http::StatusCode,
  response::IntoResponse,
};
use chrono::NaiveDate;
use ladder_core::{
  analytics::AnalyticsSnapshot,
  graph::{Edge, EdgeKind, Graph, GraphStatus, NewEdge, NewGraph, NewNode, Node},
  planner::Placement,
  review::ReviewDispatcher,
  store::LearningStore,
};
use ladder_engine::{Engine, Error};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::ApiError;

// ─── Graphs ───────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ListParams {
  pub status: Option<String>,
}

/// `GET /graphs[?status=<status>]`
pub async fn list<S, R>(
  State(engine): State<Engine<S, R>>,
  Query(params): Query<ListParams>,
) -> Result<Json<Vec<Graph>>, ApiError>
where
  S: LearningStore + 'static,
  R: ReviewDispatcher + 'static,
{
  let status = params.status.as_deref().map(GraphStatus::parse).transpose()?;
  let graphs = engine.store().list_graphs(status).await.map_err(Error::store)?;
  Ok(Json(graphs))
}

/// `POST /graphs`
pub async fn create<S, R>(
  State(engine): State<Engine<S, R>>,
  Json(body): Json<NewGraph>,
) -> Result<impl IntoResponse, ApiError>
where
  S: LearningStore + 'static,
  R: ReviewDispatcher + 'static,
{
  if body.name.trim().is_empty() {
    return Err(ApiError::Unprocessable("graph name must not be empty".into()));
  }
  let graph = engine.store().create_graph(body, engine.now()).await.map_err(Error::store)?;
  Ok((StatusCode::CREATED, Json(graph)))
}

/// `GET /graphs/:id`
pub async fn get_one<S, R>(
  State(engine): State<Engine<S, R>>,
  Path(id): Path<Uuid>,
) -> Result<Json<Graph>, ApiError>
where
  S: LearningStore + 'static,
  R: ReviewDispatcher + 'static,
{
  Ok(Json(require_graph(&engine, id).await?))
}

// ─── Nodes ────────────────────────────────────────────────────────────────────

/// `GET /graphs/:id/nodes`
pub async fn nodes<S, R>(
  State(engine): State<Engine<S, R>>,
  Path(id): Path<Uuid>,
) -> Result<Json<Vec<Node>>, ApiError>
where
  S: LearningStore + 'static,
  R: ReviewDispatcher + 'static,
{
  require_graph(&engine, id).await?;
  let nodes = engine.store().list_nodes(id).await.map_err(Error::store)?;
  Ok(Json(nodes))
}

#[derive(Debug, Deserialize)]
pub struct CreateNodeBody {
  pub label:           String,
  #[serde(default)]
  pub description:     Option<String>,
  #[serde(default)]
  pub depth:           u32,
  #[serde(default)]
  pub effort_estimate: Option<u32>,
  #[serde(default)]
  pub root:            bool,
}

/// `POST /graphs/:id/nodes`
pub async fn create_node<S, R>(
  State(engine): State<Engine<S, R>>,
  Path(id): Path<Uuid>,
  Json(body): Json<CreateNodeBody>,
) -> Result<impl IntoResponse, ApiError>
where
  S: LearningStore + 'static,
  R: ReviewDispatcher + 'static,
{
  if body.label.trim().is_empty() {
    return Err(ApiError::Unprocessable("node label must not be empty".into()));
  }
  let node = engine
    .store()
    .create_node(NewNode {
      graph_id:        id,
      label:           body.label,
      description:     body.description,
      depth:           body.depth,
      effort_estimate: body.effort_estimate,
      root:            body.root,
    }, engine.now())
    .await
    .map_err(Error::store)?;
  Ok((StatusCode::CREATED, Json(node)))
}

// ─── Edges ────────────────────────────────────────────────────────────────────

/// `GET /graphs/:id/edges`
pub async fn edges<S, R>(
  State(engine): State<Engine<S, R>>,
  Path(id): Path<Uuid>,
) -> Result<Json<Vec<Edge>>, ApiError>
where
  S: LearningStore + 'static,
  R: ReviewDispatcher + 'static,
{
  require_graph(&engine, id).await?;
  let edges = engine.store().list_edges(id).await.map_err(Error::store)?;
  Ok(Json(edges))
}

#[derive(Debug, Deserialize)]
pub struct CreateEdgeBody {
  pub parent_id: Uuid,
  pub child_id:  Uuid,
  pub kind:      Option<String>,
}

/// `POST /graphs/:id/edges` (kind defaults to `prerequisite`)
pub async fn create_edge<S, R>(
  State(engine): State<Engine<S, R>>,
  Path(id): Path<Uuid>,
  Json(body): Json<CreateEdgeBody>,
) -> Result<impl IntoResponse, ApiError>
where
  S: LearningStore + 'static,
  R: ReviewDispatcher + 'static,
{
  let kind = match body.kind.as_deref() {
    Some(s) => EdgeKind::parse(s)?,
    None => EdgeKind::Prerequisite,
  };

  // The store checks that both endpoints share a graph; this pins it to ours.
  let parent = engine
    .store()
    .get_node(body.parent_id)
    .await
    .map_err(Error::store)?
    .filter(|n| n.graph_id == id)
    .ok_or_else(|| ApiError::NotFound(format!("node {} not found in graph {id}", body.parent_id)))?;

  let edge = engine
    .store()
    .create_edge(
      NewEdge { parent_id: parent.node_id, child_id: body.child_id, kind },
      engine.now(),
    )
    .await
    .map_err(Error::store)?;
  Ok((StatusCode::CREATED, Json(edge)))
}

// ─── Frontier and planning ────────────────────────────────────────────────────

/// `GET /graphs/:id/frontier`
pub async fn frontier<S, R>(
  State(engine): State<Engine<S, R>>,
  Path(id): Path<Uuid>,
) -> Result<Json<Vec<Node>>, ApiError>
where
  S: LearningStore + 'static,
  R: ReviewDispatcher + 'static,
{
  let nodes = engine.store().frontier(id).await.map_err(Error::store)?;
  Ok(Json(nodes))
}

/// `POST /graphs/:id/plan`
pub async fn plan<S, R>(
  State(engine): State<Engine<S, R>>,
  Path(id): Path<Uuid>,
) -> Result<Json<Vec<Placement>>, ApiError>
where
  S: LearningStore + 'static,
  R: ReviewDispatcher + 'static,
{
  Ok(Json(engine.plan_graph(id).await?))
}

// ─── Snapshots ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct SnapshotParams {
  pub from: Option<NaiveDate>,
}

/// `GET /graphs/:id/snapshots[?from=<date>]`
pub async fn snapshots<S, R>(
  State(engine): State<Engine<S, R>>,
  Path(id): Path<Uuid>,
  Query(params): Query<SnapshotParams>,
) -> Result<Json<Vec<AnalyticsSnapshot>>, ApiError>
where
  S: LearningStore + 'static,
  R: ReviewDispatcher + 'static,
{
  require_graph(&engine, id).await?;
  let mut snapshots = engine.store().list_snapshots(id).await.map_err(Error::store)?;
  if let Some(from) = params.from {
    snapshots.retain(|s| s.date >= from);
  }
  Ok(Json(snapshots))
}

async fn require_graph<S, R>(engine: &Engine<S, R>, id: Uuid) -> Result<Graph, ApiError>
where
  S: LearningStore,
  R: ReviewDispatcher,
{
  engine
    .store()
    .get_graph(id)
    .await
    .map_err(Error::store)?
    .ok_or_else(|| ApiError::NotFound(format!("graph {id} not found")))
}
