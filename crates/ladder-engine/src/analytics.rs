//! The analytics aggregator: one snapshot per active graph per day.

use chrono::{DateTime, NaiveDate, Utc};
use ladder_core::{
  analytics::{self, AnalyticsSnapshot},
  graph::GraphStatus,
  review::ReviewDispatcher,
  store::LearningStore,
};
use serde::Serialize;
use uuid::Uuid;

use crate::{Engine, Error, Result};

/// Result of one aggregation pass.
#[derive(Debug, Clone, Serialize)]
pub struct AnalyticsReport {
  pub date:      NaiveDate,
  pub snapshots: Vec<AnalyticsSnapshot>,
  /// Graphs with struggling nodes, to be re-planned by the caller.
  pub replan:    Vec<Uuid>,
  /// Graphs whose snapshot could not be computed.
  pub failed:    Vec<Uuid>,
}

impl<S, R> Engine<S, R>
where
  S: LearningStore,
  R: ReviewDispatcher,
{
  /// Snapshot every active graph for today (UTC). Re-running on the same
  /// day overwrites that day's snapshots.
  pub async fn run_analytics(&self) -> Result<AnalyticsReport> {
    let now = self.clock.now();
    let date = now.date_naive();
    let graphs = self
      .store
      .list_graphs(Some(GraphStatus::Active))
      .await
      .map_err(Error::store)?;

    let mut report = AnalyticsReport {
      date,
      snapshots: Vec::with_capacity(graphs.len()),
      replan: Vec::new(),
      failed: Vec::new(),
    };

    for graph in graphs {
      match self.snapshot_graph(graph.graph_id, date, now).await {
        Ok(snapshot) => {
          if !snapshot.metrics.struggling_nodes.is_empty() {
            report.replan.push(graph.graph_id);
          }
          report.snapshots.push(snapshot);
        }
        Err(e) => {
          tracing::error!(graph_id = %graph.graph_id, error = %e, "analytics snapshot failed");
          report.failed.push(graph.graph_id);
        }
      }
    }

    tracing::info!(
      %date,
      graphs = report.snapshots.len(),
      replan = report.replan.len(),
      failed = report.failed.len(),
      "analytics run finished"
    );
    Ok(report)
  }

  /// Compute and upsert one graph's snapshot for `date`.
  pub async fn snapshot_graph(
    &self,
    graph_id: Uuid,
    date: NaiveDate,
    now: DateTime<Utc>,
  ) -> Result<AnalyticsSnapshot> {
    let nodes = self.store.list_nodes(graph_id).await.map_err(Error::store)?;
    let responses = self
      .store
      .list_responses(graph_id, None)
      .await
      .map_err(Error::store)?;
    let history = self.store.list_snapshots(graph_id).await.map_err(Error::store)?;

    let metrics = analytics::compute(
      &nodes,
      &responses,
      analytics::baseline_mastered(&history, date),
      &self.policy,
      now,
    );
    let snapshot = AnalyticsSnapshot { graph_id, date, metrics, computed_at: now };

    self
      .store
      .upsert_snapshot(snapshot.clone())
      .await
      .map_err(Error::store)?;

    tracing::debug!(%graph_id, %date, velocity = snapshot.metrics.velocity, "snapshot written");
    Ok(snapshot)
  }
}
