//! The daily analytics tick.

use chrono::{DateTime, Duration, NaiveTime, Utc};
use ladder_core::{review::ReviewDispatcher, store::LearningStore};
use ladder_engine::{Engine, analytics::AnalyticsReport};

/// First instant strictly after `now` at `hour:00` UTC.
pub fn next_run(now: DateTime<Utc>, hour: u32) -> DateTime<Utc> {
  let at = NaiveTime::from_hms_opt(hour, 0, 0).unwrap_or(NaiveTime::MIN);
  let today = now.date_naive().and_time(at).and_utc();
  if today > now { today } else { today + Duration::days(1) }
}

/// Snapshot every active graph, then re-plan those with struggling nodes.
/// A failed re-plan is logged and does not fail the pass.
pub async fn run_once<S, R>(engine: &Engine<S, R>) -> ladder_engine::Result<AnalyticsReport>
where
  S: LearningStore,
  R: ReviewDispatcher,
{
  let report = engine.run_analytics().await?;
  for graph_id in &report.replan {
    if let Err(e) = engine.plan_graph(*graph_id).await {
      tracing::warn!(%graph_id, error = %e, "re-plan after analytics failed");
    }
  }
  Ok(report)
}

/// Run [`run_once`] every day at `hour` UTC, forever.
pub async fn run_daily<S, R>(engine: Engine<S, R>, hour: u32)
where
  S: LearningStore,
  R: ReviewDispatcher,
{
  loop {
    let now = engine.now();
    let next = next_run(now, hour);
    tracing::info!(%next, "next analytics run scheduled");
    tokio::time::sleep((next - now).to_std().unwrap_or_default()).await;

    if let Err(e) = run_once(&engine).await {
      tracing::error!(error = %e, "analytics run failed");
    }
  }
}
