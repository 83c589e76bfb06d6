//! Review dispatchers: the external scheduler's HTTP API, or a log sink
//! when none is configured.
//!
//! | Method   | Path | Body |
//! |----------|------|------|
//! | `POST`   | `{base}/schedules` | [`ScheduleRequest`] as JSON |
//! | `DELETE` | `{base}/schedules/{name}` | none; `404` counts as cancelled |

use std::time::Duration;

use ladder_core::review::{ReviewDispatcher, ScheduleRequest};
use reqwest::StatusCode;

use crate::error::Error;

// ─── HTTP ─────────────────────────────────────────────────────────────────────

pub struct HttpScheduler {
  client:   reqwest::Client,
  base_url: String,
}

impl HttpScheduler {
  pub fn new(base_url: &str, timeout: Duration) -> Result<Self, Error> {
    let client = reqwest::Client::builder().timeout(timeout).build()?;
    Ok(Self { client, base_url: base_url.trim_end_matches('/').to_owned() })
  }
}

impl ReviewDispatcher for HttpScheduler {
  type Error = Error;

  async fn schedule_create(&self, request: ScheduleRequest) -> Result<(), Error> {
    let resp = self
      .client
      .post(format!("{}/schedules", self.base_url))
      .json(&request)
      .send()
      .await?;
    check(resp).await
  }

  async fn schedule_cancel(&self, name: &str) -> Result<(), Error> {
    let resp = self
      .client
      .delete(format!("{}/schedules/{name}", self.base_url))
      .send()
      .await?;
    if resp.status() == StatusCode::NOT_FOUND {
      return Ok(());
    }
    check(resp).await
  }
}

async fn check(resp: reqwest::Response) -> Result<(), Error> {
  let status = resp.status();
  if status.is_success() {
    return Ok(());
  }
  let body = resp.text().await.unwrap_or_default();
  Err(Error::SchedulerStatus { status: status.as_u16(), body })
}

// ─── Dispatcher ───────────────────────────────────────────────────────────────

/// The dispatcher the server runs with.
pub enum Dispatcher {
  Http(HttpScheduler),
  /// No scheduler configured: requests are logged and dropped.
  Log,
}

impl Dispatcher {
  pub fn from_url(url: Option<&str>, timeout: Duration) -> Result<Self, Error> {
    match url {
      Some(url) => Ok(Self::Http(HttpScheduler::new(url, timeout)?)),
      None => Ok(Self::Log),
    }
  }
}

impl ReviewDispatcher for Dispatcher {
  type Error = Error;

  async fn schedule_create(&self, request: ScheduleRequest) -> Result<(), Error> {
    match self {
      Self::Http(http) => http.schedule_create(request).await,
      Self::Log => {
        tracing::info!(
          schedule = %request.name,
          fire_at = %request.fire_at,
          until_at = %request.until_at,
          recurrence = ?request.recurrence,
          "review schedule requested"
        );
        Ok(())
      }
    }
  }

  async fn schedule_cancel(&self, name: &str) -> Result<(), Error> {
    match self {
      Self::Http(http) => http.schedule_cancel(name).await,
      Self::Log => {
        tracing::info!(schedule = name, "review schedule cancelled");
        Ok(())
      }
    }
  }
}
