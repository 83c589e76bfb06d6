//! API error type and [`axum::response::IntoResponse`] implementation.

use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use ladder_core::Error as CoreError;
use serde_json::json;
use thiserror::Error;

/// An error returned by an API handler.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error("not found: {0}")]
  NotFound(String),

  #[error("bad request: {0}")]
  BadRequest(String),

  /// The request is well formed but clashes with current state: a cycle, a
  /// duplicate edge, a frozen graph or a flow in the wrong phase.
  #[error("conflict: {0}")]
  Conflict(String),

  #[error("unprocessable: {0}")]
  Unprocessable(String),

  #[error("review scheduler failed: {0}")]
  Scheduler(String),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl From<CoreError> for ApiError {
  fn from(e: CoreError) -> Self {
    match e {
      CoreError::GraphNotFound(_) | CoreError::NodeNotFound(_) => ApiError::NotFound(e.to_string()),
      CoreError::GraphNotActive { .. }
      | CoreError::CycleDetected { .. }
      | CoreError::DuplicateEdge { .. }
      | CoreError::InvalidTransition { .. }
      | CoreError::NoCurrentNode { .. }
      | CoreError::VersionConflict { .. } => ApiError::Conflict(e.to_string()),
      CoreError::CrossGraphEdge { .. }
      | CoreError::InvalidEdge(_)
      | CoreError::InvalidQuality(_)
      | CoreError::IntervalOutOfRange { .. }
      | CoreError::InvalidStatus { .. } => ApiError::Unprocessable(e.to_string()),
      CoreError::Serialization(_) => ApiError::Store(Box::new(e)),
    }
  }
}

impl From<ladder_engine::Error> for ApiError {
  fn from(e: ladder_engine::Error) -> Self {
    match e {
      ladder_engine::Error::Domain(domain) => domain.into(),
      ladder_engine::Error::Store(source) => ApiError::Store(source),
      e @ ladder_engine::Error::ExternalScheduleFailure { .. } => ApiError::Scheduler(e.to_string()),
    }
  }
}

impl ApiError {
  pub fn status(&self) -> StatusCode {
    match self {
      ApiError::NotFound(_) => StatusCode::NOT_FOUND,
      ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
      ApiError::Conflict(_) => StatusCode::CONFLICT,
      ApiError::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
      ApiError::Scheduler(_) => StatusCode::BAD_GATEWAY,
      ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let status = self.status();
    let message = match &self {
      ApiError::NotFound(m)
      | ApiError::BadRequest(m)
      | ApiError::Conflict(m)
      | ApiError::Unprocessable(m)
      | ApiError::Scheduler(m) => m.clone(),
      ApiError::Store(e) => e.to_string(),
    };
    if status.is_server_error() {
      tracing::error!(%status, error = %message, "request failed");
    }
    (status, Json(json!({ "error": message }))).into_response()
  }
}
