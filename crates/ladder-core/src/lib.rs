//! Core types, pure algorithms and trait definitions for the Ladder
//! learning-graph engine.
//!
//! This crate is deliberately free of HTTP and database dependencies. The
//! SM-2 update, frontier selection, curriculum ordering and flow state
//! machine live here as plain functions over plain data so every other crate
//! (and every test) can exercise them without a backend.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod analytics;
pub mod error;
pub mod flow;
pub mod frontier;
pub mod graph;
pub mod mastery;
pub mod planner;
pub mod policy;
pub mod review;
pub mod store;

pub use error::{Error, Result};
