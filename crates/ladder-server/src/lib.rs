//! HTTP server for Ladder.
//!
//! Mounts the JSON API from `ladder-api` under `/api` behind HTTP Basic
//! auth, wires the external review scheduler and runs the daily analytics
//! tick.

pub mod auth;
pub mod daily;
pub mod error;
pub mod scheduler;

pub use error::Error;

use std::{path::PathBuf, sync::Arc};

use axum::{Router, middleware, routing::get};
use ladder_core::{policy::Policy, review::ReviewDispatcher, store::LearningStore};
use ladder_engine::Engine;
use serde::Deserialize;
use tower_http::trace::TraceLayer;

use auth::{AuthConfig, require_auth};

// ─── Configuration ────────────────────────────────────────────────────────────

/// Runtime server configuration, deserialised from `config.toml` and
/// `LADDER_*` environment variables.
#[derive(Deserialize, Clone)]
pub struct ServerConfig {
  pub host:                   String,
  pub port:                   u16,
  pub store_path:             PathBuf,
  pub auth_username:          String,
  pub auth_password_hash:     String,
  /// Base URL of the external scheduler. Without it, review requests are
  /// only logged.
  #[serde(default)]
  pub scheduler_url:          Option<String>,
  #[serde(default = "default_scheduler_timeout_secs")]
  pub scheduler_timeout_secs: u64,
  #[serde(default = "default_analytics_hour_utc")]
  pub analytics_hour_utc:     u32,
  #[serde(default)]
  pub policy:                 Policy,
}

fn default_scheduler_timeout_secs() -> u64 { 10 }

fn default_analytics_hour_utc() -> u32 { 3 }

// ─── Router ───────────────────────────────────────────────────────────────────

/// Build the server's [`Router`]: `/api/*` behind Basic auth, `/health`
/// open.
pub fn router<S, R>(engine: Engine<S, R>, auth: Arc<AuthConfig>) -> Router
where
  S: LearningStore + 'static,
  R: ReviewDispatcher + 'static,
{
  Router::new()
    .nest("/api", ladder_api::api_router(engine))
    .layer(middleware::from_fn_with_state(auth, require_auth))
    .route("/health", get(|| async { "ok" }))
    .layer(TraceLayer::new_for_http())
}

// ─── Integration tests ────────────────────────────────────────────────────────
