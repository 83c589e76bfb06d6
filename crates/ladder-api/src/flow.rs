//! Handlers for the teaching flow.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/graphs/:id/flow` | Stored flow, or a fresh `pending` one |
//! | `POST` | `/graphs/:id/flow` | Body: `{"command":"submit_answer",...}` |

use axum::{
  Json,
  extract::{Path, State},
};
use ladder_core::{
  flow::{FlowCommand, FlowState},
  review::ReviewDispatcher,
  store::LearningStore,
};
use ladder_engine::{Engine, flow::FlowOutcome};
use uuid::Uuid;

use crate::error::ApiError;

/// `GET /graphs/:id/flow`
pub async fn get_one<S, R>(
  State(engine): State<Engine<S, R>>,
  Path(id): Path<Uuid>,
) -> Result<Json<FlowState>, ApiError>
where
  S: LearningStore + 'static,
  R: ReviewDispatcher + 'static,
{
  Ok(Json(engine.flow(id).await?))
}

/// `POST /graphs/:id/flow`
pub async fn run<S, R>(
  State(engine): State<Engine<S, R>>,
  Path(id): Path<Uuid>,
  Json(command): Json<FlowCommand>,
) -> Result<Json<FlowOutcome>, ApiError>
where
  S: LearningStore + 'static,
  R: ReviewDispatcher + 'static,
{
  Ok(Json(engine.run_flow(id, command).await?))
}
