//! Error types and axum `IntoResponse` implementation.

use axum::{
  http::{HeaderValue, StatusCode, header},
  response::{IntoResponse, Response},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("unauthorized")]
  Unauthorized,

  #[error("scheduler request failed: {0}")]
  Http(#[from] reqwest::Error),

  #[error("scheduler answered {status}: {body}")]
  SchedulerStatus { status: u16, body: String },
}

impl IntoResponse for Error {
  fn into_response(self) -> Response {
    match self {
      Error::Unauthorized => {
        let mut res = (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
        res.headers_mut().insert(
          header::WWW_AUTHENTICATE,
          HeaderValue::from_static("Basic realm=\"ladder\""),
        );
        res
      }
      e => (StatusCode::BAD_GATEWAY, e.to_string()).into_response(),
    }
  }
}
