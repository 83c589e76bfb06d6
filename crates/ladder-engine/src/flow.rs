//! The teaching flow coordinator.
//!
//! One call runs one command: load the flow, abandon it if it has gone
//! stale, check the phase, perform the command's side effects, then write
//! the transition with an optimistic version check. On a version conflict
//! the flow is re-read and only the transition is re-applied.

use chrono::{DateTime, Utc};
use ladder_core::{
  Error as CoreError,
  flow::{FlowCommand, FlowPhase, FlowState, FlowStep},
  graph::{Graph, GraphStatus},
  mastery::{NewQuizResponse, ResponseType},
  review::ReviewDispatcher,
  store::LearningStore,
};
use serde::Serialize;
use uuid::Uuid;

use crate::{Engine, Error, Result, mastery::RecordedResponse};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FlowOutcome {
  Advanced {
    state:    FlowState,
    #[serde(skip_serializing_if = "Option::is_none")]
    response: Option<RecordedResponse>,
  },
  /// The flow had been idle too long; it was abandoned and the command was
  /// not run.
  Abandoned {
    prior_phase: FlowPhase,
    state:       FlowState,
  },
}

impl FlowOutcome {
  pub fn state(&self) -> &FlowState {
    match self {
      Self::Advanced { state, .. } | Self::Abandoned { state, .. } => state,
    }
  }
}

impl<S, R> Engine<S, R>
where
  S: LearningStore,
  R: ReviewDispatcher,
{
  /// The stored flow for a graph, or a fresh pending one.
  pub async fn flow(&self, graph_id: Uuid) -> Result<FlowState> {
    self.require_graph(graph_id).await?;
    Ok(
      self
        .store
        .get_flow(graph_id)
        .await
        .map_err(Error::store)?
        .unwrap_or_else(|| FlowState::new(graph_id, self.clock.now())),
    )
  }

  /// Advance a graph's teaching flow by one command.
  pub async fn run_flow(&self, graph_id: Uuid, command: FlowCommand) -> Result<FlowOutcome> {
    let now = self.clock.now();
    let graph = self.require_graph(graph_id).await?;
    let state = self.flow(graph_id).await?;

    if state.is_stale(now, self.policy.stale_after()) {
      let prior_phase = state.phase;
      tracing::info!(%graph_id, phase = %prior_phase, "flow went stale");
      let state = self.commit(state, &FlowStep::Abandon, now).await?;
      self.finish_abandon(graph_id, now).await?;
      return Ok(FlowOutcome::Abandoned { prior_phase, state });
    }

    command.check(state.phase)?;
    let (step, response) = self.perform(&graph, &state, command).await?;
    let state = self.commit(state, &step, now).await?;

    match step {
      FlowStep::Abandon => self.finish_abandon(graph_id, now).await?,
      FlowStep::Restart if graph.status != GraphStatus::Active => {
        self
          .store
          .set_graph_status(graph_id, GraphStatus::Active, now)
          .await
          .map_err(Error::store)?;
      }
      _ if state.phase == FlowPhase::Completed => {
        self
          .store
          .set_graph_status(graph_id, GraphStatus::Completed, now)
          .await
          .map_err(Error::store)?;
      }
      _ => {}
    }

    tracing::info!(%graph_id, step = step.name(), phase = %state.phase, "flow advanced");
    Ok(FlowOutcome::Advanced { state, response })
  }

  /// Run the command's side effects and describe their outcome.
  async fn perform(
    &self,
    graph: &Graph,
    state: &FlowState,
    command: FlowCommand,
  ) -> Result<(FlowStep, Option<RecordedResponse>)> {
    let graph_id = graph.graph_id;

    Ok(match command {
      FlowCommand::StartDiagnosis => (FlowStep::StartDiagnosis, None),
      FlowCommand::FinishDiagnosis => (FlowStep::FinishDiagnosis, None),
      FlowCommand::AskQuiz => (FlowStep::AskQuiz, None),
      FlowCommand::Abandon => (FlowStep::Abandon, None),
      FlowCommand::Restart => (FlowStep::Restart, None),

      FlowCommand::RecordDiagnostic { node_id, question_text, user_answer, quality } => {
        self.require_member(graph_id, node_id).await?;
        let recorded = self
          .record_response(NewQuizResponse {
            node_id,
            question_text,
            user_answer,
            quality,
            response_type: ResponseType::Diagnostic,
          })
          .await?;
        (FlowStep::Diagnosed { node_id, quality }, Some(recorded))
      }

      FlowCommand::Plan => {
        self.plan_graph(graph_id).await?;
        let first = self.next_node(graph_id).await?.map(|n| n.node_id);
        (FlowStep::Planned { first }, None)
      }

      FlowCommand::SubmitAnswer { question_text, user_answer, quality } => {
        let node_id = state
          .current_node_id
          .ok_or(CoreError::NoCurrentNode { graph_id })?;
        let recorded = self
          .record_response(NewQuizResponse {
            node_id,
            question_text,
            user_answer,
            quality,
            response_type: ResponseType::Teach,
          })
          .await?;
        (FlowStep::Answered { status: recorded.mastery_status }, Some(recorded))
      }

      FlowCommand::SubmitReview { node_id, question_text, user_answer, quality } => {
        self.require_member(graph_id, node_id).await?;
        let recorded = self
          .record_response(NewQuizResponse {
            node_id,
            question_text,
            user_answer,
            quality,
            response_type: ResponseType::Review,
          })
          .await?;
        (FlowStep::Reviewed, Some(recorded))
      }

      FlowCommand::Continue => {
        let next = self.next_node(graph_id).await?.map(|n| n.node_id);
        (FlowStep::Continued { next }, None)
      }
    })
  }

  /// Persist `step` applied to `state`, re-reading and re-applying on
  /// version conflicts up to the policy's retry limit.
  async fn commit(
    &self,
    mut state: FlowState,
    step: &FlowStep,
    now: DateTime<Utc>,
  ) -> Result<FlowState> {
    let graph_id = state.graph_id;
    let mut retries = 0;

    loop {
      let next = state.advance(step, now)?;
      match self.store.save_flow(next).await.map_err(Error::store) {
        Ok(saved) => return Ok(saved),
        Err(Error::Domain(CoreError::VersionConflict { expected, .. }))
          if retries < self.policy.flow_retry_limit =>
        {
          retries += 1;
          tracing::debug!(%graph_id, expected, retries, "flow version conflict, retrying");
          state = self
            .store
            .get_flow(graph_id)
            .await
            .map_err(Error::store)?
            .unwrap_or_else(|| FlowState::new(graph_id, now));
        }
        Err(e) => return Err(e),
      }
    }
  }

  async fn finish_abandon(&self, graph_id: Uuid, now: DateTime<Utc>) -> Result<()> {
    self
      .store
      .set_graph_status(graph_id, GraphStatus::Abandoned, now)
      .await
      .map_err(Error::store)?;
    self.cancel_graph_reviews(graph_id).await?;
    Ok(())
  }

  async fn require_member(&self, graph_id: Uuid, node_id: Uuid) -> Result<()> {
    let node = self.require_node(node_id).await?;
    if node.graph_id != graph_id {
      return Err(CoreError::NodeNotFound(node_id).into());
    }
    Ok(())
  }
}
