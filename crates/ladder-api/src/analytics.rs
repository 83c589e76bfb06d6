//! `POST /analytics/run`: run the aggregator now instead of waiting for the
//! daily tick. Graphs flagged for re-planning are returned, not re-planned.

use axum::{Json, extract::State};
use ladder_core::{review::ReviewDispatcher, store::LearningStore};
use ladder_engine::{Engine, analytics::AnalyticsReport};

use crate::error::ApiError;

pub async fn run<S, R>(State(engine): State<Engine<S, R>>) -> Result<Json<AnalyticsReport>, ApiError>
where
  S: LearningStore + 'static,
  R: ReviewDispatcher + 'static,
{
  Ok(Json(engine.run_analytics().await?))
}
