//! Handlers for `/nodes` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/nodes/:id` | 404 if not found |
//! | `GET`  | `/nodes/:id/subtree` | The node and everything it unlocks |
//! | `POST` | `/nodes/:id/responses` | Body: `{"question_text":..,"user_answer":..,"quality":4,"response_type":"teach"}` |

use axum::{
  Json,
  extract::{Path, State},
  http::StatusCode,
  response::IntoResponse,
};
use ladder_core::{
  graph::Node,
  mastery::{NewQuizResponse, Quality, ResponseType},
  review::ReviewDispatcher,
  store::LearningStore,
};
use ladder_engine::{Engine, Error};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::ApiError;

/// `GET /nodes/:id`
pub async fn get_one<S, R>(
  State(engine): State<Engine<S, R>>,
  Path(id): Path<Uuid>,
) -> Result<Json<Node>, ApiError>
where
  S: LearningStore + 'static,
  R: ReviewDispatcher + 'static,
{
  let node = engine
    .store()
    .get_node(id)
    .await
    .map_err(Error::store)?
    .ok_or_else(|| ApiError::NotFound(format!("node {id} not found")))?;
  Ok(Json(node))
}

/// `GET /nodes/:id/subtree`
pub async fn subtree<S, R>(
  State(engine): State<Engine<S, R>>,
  Path(id): Path<Uuid>,
) -> Result<Json<Vec<Node>>, ApiError>
where
  S: LearningStore + 'static,
  R: ReviewDispatcher + 'static,
{
  let nodes = engine.store().subtree(id).await.map_err(Error::store)?;
  Ok(Json(nodes))
}

// ─── Responses ────────────────────────────────────────────────────────────────

/// Raw wire form; quality and type are validated here so the client gets a
/// domain error message rather than a deserializer one.
#[derive(Debug, Deserialize)]
pub struct ResponseBody {
  pub question_text: String,
  pub user_answer:   String,
  pub quality:       i64,
  pub response_type: Option<String>,
}

/// `POST /nodes/:id/responses` (type defaults to `teach`)
pub async fn record_response<S, R>(
  State(engine): State<Engine<S, R>>,
  Path(id): Path<Uuid>,
  Json(body): Json<ResponseBody>,
) -> Result<impl IntoResponse, ApiError>
where
  S: LearningStore + 'static,
  R: ReviewDispatcher + 'static,
{
  let quality = Quality::new(body.quality)?;
  let response_type = match body.response_type.as_deref() {
    Some(s) => ResponseType::parse(s)?,
    None => ResponseType::Teach,
  };

  let recorded = engine
    .record_response(NewQuizResponse {
      node_id: id,
      question_text: body.question_text,
      user_answer: body.user_answer,
      quality,
      response_type,
    })
    .await?;
  Ok((StatusCode::CREATED, Json(recorded)))
}
