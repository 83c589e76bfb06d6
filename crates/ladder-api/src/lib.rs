//! JSON REST API for Ladder.
//!
//! Exposes an axum [`Router`] backed by a [`ladder_engine::Engine`].
//! Auth, TLS, tracing and transport concerns are the caller's
//! responsibility.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", ladder_api::api_router(engine.clone()))
//! ```

pub mod analytics;
pub mod error;
pub mod flow;
pub mod graphs;
pub mod nodes;

use axum::{
  Router,
  routing::{get, post},
};
use ladder_core::{review::ReviewDispatcher, store::LearningStore};
use ladder_engine::Engine;

pub use error::ApiError;


/// Build a fully-materialised API router for `engine`.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<S, R>(engine: Engine<S, R>) -> Router<()>
where
  S: LearningStore + 'static,
  R: ReviewDispatcher + 'static,
{
  Router::new()
    // Graphs
    .route("/graphs", get(graphs::list::<S, R>).post(graphs::create::<S, R>))
    .route("/graphs/{id}", get(graphs::get_one::<S, R>))
    .route("/graphs/{id}/nodes", get(graphs::nodes::<S, R>).post(graphs::create_node::<S, R>))
    .route("/graphs/{id}/edges", get(graphs::edges::<S, R>).post(graphs::create_edge::<S, R>))
    .route("/graphs/{id}/frontier", get(graphs::frontier::<S, R>))
    .route("/graphs/{id}/plan", post(graphs::plan::<S, R>))
    .route("/graphs/{id}/snapshots", get(graphs::snapshots::<S, R>))
    // Flow
    .route("/graphs/{id}/flow", get(flow::get_one::<S, R>).post(flow::run::<S, R>))
    // Nodes
    .route("/nodes/{id}", get(nodes::get_one::<S, R>))
    .route("/nodes/{id}/subtree", get(nodes::subtree::<S, R>))
    .route("/nodes/{id}/responses", post(nodes::record_response::<S, R>))
    // Analytics
    .route("/analytics/run", post(analytics::run::<S, R>))
    .with_state(engine)
}
