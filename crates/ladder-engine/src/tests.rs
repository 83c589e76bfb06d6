//! Engine tests against an in-memory SQLite store and a fake scheduler.

use std::sync::{
  Arc, Mutex,
  atomic::{AtomicBool, Ordering},
};

use chrono::{Duration, TimeZone, Utc};
use ladder_core::{
  Error as CoreError,
  flow::{FlowCommand, FlowPhase},
  graph::{GraphStatus, MasteryStatus, NewEdge, NewGraph, NewNode, Node},
  mastery::{NewQuizResponse, Quality, ResponseType},
  policy::Policy,
  review::{ReviewDispatcher, ReviewPayload, ScheduleRequest, SlotKind},
  store::LearningStore,
};
use ladder_store_sqlite::SqliteStore;
use uuid::Uuid;

use crate::{
  Engine, Error, ManualClock,
  flow::FlowOutcome,
  mastery::{RecordedResponse, ReviewOutcome},
};

// ─── Fixtures ────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
#[error("scheduler unavailable")]
struct Unavailable;

#[derive(Default)]
struct FakeScheduler {
  created:   Mutex<Vec<ScheduleRequest>>,
  cancelled: Mutex<Vec<String>>,
  fail:      AtomicBool,
}

impl FakeScheduler {
  fn created(&self) -> Vec<ScheduleRequest> { self.created.lock().unwrap().clone() }

  fn cancelled(&self) -> Vec<String> { self.cancelled.lock().unwrap().clone() }
}

impl ReviewDispatcher for FakeScheduler {
  type Error = Unavailable;

  async fn schedule_create(&self, request: ScheduleRequest) -> Result<(), Unavailable> {
    if self.fail.load(Ordering::SeqCst) {
      return Err(Unavailable);
    }
    self.created.lock().unwrap().push(request);
    Ok(())
  }

  async fn schedule_cancel(&self, name: &str) -> Result<(), Unavailable> {
    self.cancelled.lock().unwrap().push(name.to_owned());
    Ok(())
  }
}

struct Harness {
  engine:    Engine<SqliteStore, FakeScheduler>,
  scheduler: Arc<FakeScheduler>,
  clock:     Arc<ManualClock>,
}

async fn harness_with(policy: Policy) -> Harness {
  let store = SqliteStore::open_in_memory().await.expect("in-memory store");
  let scheduler = Arc::new(FakeScheduler::default());
  let clock = Arc::new(ManualClock::new(
    Utc.with_ymd_and_hms(2026, 6, 1, 9, 0, 0).unwrap(),
  ));
  let engine = Engine::new(Arc::new(store), Arc::clone(&scheduler), policy)
    .with_clock(clock.clone());
  Harness { engine, scheduler, clock }
}

async fn harness() -> Harness { harness_with(Policy::default()).await }

impl Harness {
  async fn graph(&self) -> Uuid {
    self
      .engine
      .store()
      .create_graph(NewGraph { name: "algebra".into() }, self.engine.now())
      .await
      .unwrap()
      .graph_id
  }

  async fn node(&self, graph_id: Uuid, label: &str) -> Node {
    self
      .engine
      .store()
      .create_node(NewNode::new(graph_id, label), self.engine.now())
      .await
      .unwrap()
  }

  async fn prerequisite(&self, parent: &Node, child: &Node) {
    self
      .engine
      .store()
      .create_edge(NewEdge::prerequisite(parent.node_id, child.node_id), self.engine.now())
      .await
      .unwrap();
  }

  async fn answer(&self, node_id: Uuid, quality: i64, kind: ResponseType) -> RecordedResponse {
    self.clock.advance(Duration::minutes(5));
    self
      .engine
      .record_response(NewQuizResponse {
        node_id,
        question_text: "solve for x".into(),
        user_answer: "x = 2".into(),
        quality: q(quality),
        response_type: kind,
      })
      .await
      .unwrap()
  }

  async fn run(&self, graph_id: Uuid, command: FlowCommand) -> FlowOutcome {
    self.clock.advance(Duration::minutes(1));
    self.engine.run_flow(graph_id, command).await.unwrap()
  }
}

fn q(v: i64) -> Quality { Quality::new(v).unwrap() }

fn submit(quality: i64) -> FlowCommand {
  FlowCommand::SubmitAnswer {
    question_text: "q".into(),
    user_answer:   "a".into(),
    quality:       q(quality),
  }
}

fn advanced(outcome: FlowOutcome) -> (ladder_core::flow::FlowState, Option<RecordedResponse>) {
  match outcome {
    FlowOutcome::Advanced { state, response } => (state, response),
    other => panic!("expected an advanced flow, got {other:?}"),
  }
}

// ─── Mastery and reviews ─────────────────────────────────────────────────────

#[tokio::test]
async fn first_answer_on_unlocked_node() {
  let h = harness().await;
  let g = h.graph().await;
  let a = h.node(g, "A").await;
  let b = h.node(g, "B").await;
  h.prerequisite(&a, &b).await;

  for _ in 0..4 {
    h.answer(a.node_id, 5, ResponseType::Teach).await;
  }
  let frontier = h.engine.store().frontier(g).await.unwrap();
  assert_eq!(frontier.iter().map(|n| n.node_id).collect::<Vec<_>>(), vec![b.node_id]);

  let before = h.engine.now();
  let recorded = h.answer(b.node_id, 4, ResponseType::Teach).await;
  let now = before + Duration::minutes(5);

  assert_eq!(recorded.repetitions, 1);
  assert!((recorded.ease_factor - 2.5).abs() < 1e-9);
  assert_eq!(recorded.mastery_status, MasteryStatus::Learning);
  assert_eq!(recorded.next_review_at, Some(now + Duration::days(1)));

  let Some(ReviewOutcome::Scheduled { kind, schedule_name, fire_at }) = recorded.review else {
    panic!("review should be scheduled");
  };
  assert_eq!(kind, SlotKind::Individual);
  assert_eq!(schedule_name, format!("review-{}", b.node_id));
  assert_eq!(fire_at, now + Duration::days(1));

  let request = h.scheduler.created().pop().unwrap();
  assert_eq!(request.until_at, request.fire_at + Duration::hours(24));
  assert!(matches!(
    request.payload,
    ReviewPayload::Node { graph_id, ref target } if graph_id == g && target.repetitions == 1
  ));
}

#[tokio::test]
async fn diagnostic_answer_schedules_nothing() {
  let h = harness().await;
  let g = h.graph().await;
  let a = h.node(g, "A").await;

  let recorded = h.answer(a.node_id, 5, ResponseType::Diagnostic).await;
  assert_eq!(recorded.mastery_status, MasteryStatus::Diagnosed);
  assert!((recorded.node.mastery_score - 0.7).abs() < 1e-9);
  assert_eq!(recorded.next_review_at, None);
  assert!(recorded.review.is_none());
  assert!(h.scheduler.created().is_empty());
}

#[tokio::test]
async fn reviews_past_cap_fold_into_one_batch() {
  let mut policy = Policy::default();
  policy.review_cap = 2;
  let h = harness_with(policy).await;
  let g = h.graph().await;

  let mut kinds = Vec::new();
  for i in 0..4 {
    let n = h.node(g, &format!("n{i}")).await;
    match h.answer(n.node_id, 4, ResponseType::Teach).await.review {
      Some(ReviewOutcome::Scheduled { kind, .. }) => kinds.push(kind),
      other => panic!("unexpected review outcome {other:?}"),
    }
  }
  assert_eq!(kinds, vec![
    SlotKind::Individual,
    SlotKind::Individual,
    SlotKind::Batch,
    SlotKind::Batch,
  ]);

  let batch = h
    .scheduler
    .created()
    .into_iter()
    .filter(|r| r.name == format!("review-batch-{g}"))
    .last()
    .unwrap();
  assert!(matches!(batch.payload, ReviewPayload::Batch { ref nodes, .. } if nodes.len() == 2));

  let slots = h.engine.store().list_review_slots(g).await.unwrap();
  assert_eq!(slots.iter().filter(|s| s.kind == SlotKind::Individual).count(), 2);
}

#[tokio::test]
async fn scheduler_failure_keeps_mastery_and_releases_slot() {
  let h = harness().await;
  let g = h.graph().await;
  let a = h.node(g, "A").await;
  h.scheduler.fail.store(true, Ordering::SeqCst);

  let recorded = h.answer(a.node_id, 4, ResponseType::Teach).await;
  assert!(matches!(recorded.review, Some(ReviewOutcome::Failed { .. })));
  assert_eq!(recorded.repetitions, 1);

  let stored = h.engine.store().get_node(a.node_id).await.unwrap().unwrap();
  assert_eq!(stored.sm2.repetitions, 1);
  assert!(h.engine.store().list_review_slots(g).await.unwrap().is_empty());

  let err = h
    .engine
    .schedule_review(&stored, h.engine.now() + Duration::days(1))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::ExternalScheduleFailure { .. }));
}

#[tokio::test]
async fn failed_reschedule_keeps_the_live_slot() {
  let mut policy = Policy::default();
  policy.review_cap = 1;
  let h = harness_with(policy).await;
  let g = h.graph().await;
  let a = h.node(g, "A").await;
  let b = h.node(g, "B").await;

  h.answer(a.node_id, 4, ResponseType::Teach).await;
  h.scheduler.fail.store(true, Ordering::SeqCst);
  let retry = h.answer(a.node_id, 4, ResponseType::Teach).await;
  assert!(matches!(retry.review, Some(ReviewOutcome::Failed { .. })));

  // The scheduler still holds A's first schedule, so the ledger does too.
  let slots = h.engine.store().list_review_slots(g).await.unwrap();
  assert_eq!(slots.len(), 1);
  assert_eq!(slots[0].kind, SlotKind::Individual);
  assert_eq!(slots[0].repetitions, 1);

  h.scheduler.fail.store(false, Ordering::SeqCst);
  let recorded = h.answer(b.node_id, 4, ResponseType::Teach).await;
  assert!(matches!(
    recorded.review,
    Some(ReviewOutcome::Scheduled { kind: SlotKind::Batch, .. })
  ));

  let individual: Vec<String> = h
    .scheduler
    .created()
    .into_iter()
    .map(|r| r.name)
    .filter(|name| !name.starts_with("review-batch-"))
    .collect();
  assert_eq!(individual, vec![format!("review-{}", a.node_id)]);
}

#[tokio::test]
async fn concurrent_answers_on_one_node_both_count() {
  let h = harness().await;
  let g = h.graph().await;
  let a = h.node(g, "A").await;

  let review = || NewQuizResponse {
    node_id:       a.node_id,
    question_text: "q".into(),
    user_answer:   "a".into(),
    quality:       q(5),
    response_type: ResponseType::Review,
  };
  let (first, second) = tokio::join!(
    h.engine.record_response(review()),
    h.engine.record_response(review()),
  );
  first.unwrap();
  second.unwrap();

  let stored = h.engine.store().get_node(a.node_id).await.unwrap().unwrap();
  assert_eq!(stored.sm2.repetitions, 2);
  assert_eq!(stored.sm2.last_interval_days, 6.0);
  assert_eq!(h.engine.store().list_responses(g, None).await.unwrap().len(), 2);
}

#[tokio::test]
async fn unknown_node_is_rejected() {
  let h = harness().await;
  let err = h
    .engine
    .record_response(NewQuizResponse {
      node_id:       Uuid::new_v4(),
      question_text: String::new(),
      user_answer:   String::new(),
      quality:       q(3),
      response_type: ResponseType::Teach,
    })
    .await
    .unwrap_err();
  assert!(matches!(err.as_domain(), Some(CoreError::NodeNotFound(_))));
}

// ─── Planning ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn plan_persists_sequence() {
  let h = harness().await;
  let g = h.graph().await;
  let a = h.node(g, "A").await;
  let b = h.node(g, "B").await;
  let c = h.node(g, "C").await;
  h.prerequisite(&b, &a).await;
  h.prerequisite(&c, &a).await;

  let order = h.engine.plan_graph(g).await.unwrap();
  assert_eq!(order.len(), 3);
  assert_eq!(order[2].node_id, a.node_id);

  let a = h.engine.store().get_node(a.node_id).await.unwrap().unwrap();
  assert_eq!(a.sequence, Some(2));
}

// ─── Flow ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn flow_runs_to_completion() {
  let h = harness().await;
  let g = h.graph().await;
  let a = h.node(g, "A").await;
  let b = h.node(g, "B").await;
  h.prerequisite(&a, &b).await;

  h.run(g, FlowCommand::StartDiagnosis).await;
  let (state, response) = advanced(
    h.run(g, FlowCommand::RecordDiagnostic {
      node_id:       a.node_id,
      question_text: "q".into(),
      user_answer:   "a".into(),
      quality:       q(2),
    })
    .await,
  );
  assert_eq!(state.phase, FlowPhase::Diagnosing);
  assert_eq!(response.unwrap().mastery_status, MasteryStatus::Diagnosed);

  h.run(g, FlowCommand::FinishDiagnosis).await;
  let (state, _) = advanced(h.run(g, FlowCommand::Plan).await);
  assert_eq!(state.phase, FlowPhase::Teaching);
  assert_eq!(state.current_node_id, Some(a.node_id));

  let mut taught = Vec::new();
  let mut state = state;
  for _ in 0..20 {
    if state.phase == FlowPhase::Completed {
      break;
    }
    let current = state.current_node_id.unwrap();
    if taught.last() != Some(&current) {
      taught.push(current);
    }
    h.run(g, FlowCommand::AskQuiz).await;
    let (answered, _) = advanced(h.run(g, submit(5)).await);
    state = if answered.phase == FlowPhase::Reviewing {
      advanced(h.run(g, FlowCommand::Continue).await).0
    } else {
      answered
    };
  }

  assert_eq!(state.phase, FlowPhase::Completed);
  assert_eq!(taught, vec![a.node_id, b.node_id]);
  let graph = h.engine.store().get_graph(g).await.unwrap().unwrap();
  assert_eq!(graph.status, GraphStatus::Completed);
  assert_eq!(graph.updated_at, h.engine.now());
}

#[tokio::test]
async fn completed_graph_still_takes_reviews() {
  let h = harness().await;
  let g = h.graph().await;
  let a = h.node(g, "A").await;

  h.run(g, FlowCommand::StartDiagnosis).await;
  h.run(g, FlowCommand::FinishDiagnosis).await;
  h.run(g, FlowCommand::Plan).await;
  let mut state = h.engine.flow(g).await.unwrap();
  while state.phase != FlowPhase::Completed {
    h.run(g, FlowCommand::AskQuiz).await;
    let (answered, _) = advanced(h.run(g, submit(5)).await);
    state = if answered.phase == FlowPhase::Reviewing {
      advanced(h.run(g, FlowCommand::Continue).await).0
    } else {
      answered
    };
  }
  assert!(!h.engine.store().list_review_slots(g).await.unwrap().is_empty());

  let reviewed = h.answer(a.node_id, 5, ResponseType::Review).await;
  assert_eq!(reviewed.repetitions, 5);
  assert!(matches!(reviewed.review, Some(ReviewOutcome::Scheduled { .. })));

  h.engine
    .store()
    .set_graph_status(g, GraphStatus::Abandoned, h.engine.now())
    .await
    .unwrap();
  let err = h
    .engine
    .record_response(NewQuizResponse {
      node_id:       a.node_id,
      question_text: "q".into(),
      user_answer:   "a".into(),
      quality:       q(5),
      response_type: ResponseType::Review,
    })
    .await
    .unwrap_err();
  assert!(matches!(
    err.as_domain(),
    Some(CoreError::GraphNotActive { status: GraphStatus::Abandoned, .. })
  ));
}

#[tokio::test]
async fn command_in_wrong_phase_is_rejected() {
  let h = harness().await;
  let g = h.graph().await;

  let err = h.engine.run_flow(g, FlowCommand::AskQuiz).await.unwrap_err();
  assert!(matches!(
    err.as_domain(),
    Some(CoreError::InvalidTransition { phase: FlowPhase::Pending, .. })
  ));
  assert!(h.engine.store().get_flow(g).await.unwrap().is_none());
}

#[tokio::test]
async fn stale_flow_is_abandoned_and_restartable() {
  let h = harness().await;
  let g = h.graph().await;
  let a = h.node(g, "A").await;

  h.run(g, FlowCommand::StartDiagnosis).await;
  h.run(g, FlowCommand::FinishDiagnosis).await;
  h.run(g, FlowCommand::Plan).await;
  h.run(g, FlowCommand::AskQuiz).await;
  h.run(g, submit(4)).await;
  assert_eq!(h.engine.store().list_review_slots(g).await.unwrap().len(), 1);

  h.clock.advance(Duration::days(31));
  let outcome = h.engine.run_flow(g, FlowCommand::AskQuiz).await.unwrap();
  let FlowOutcome::Abandoned { prior_phase, state } = outcome else {
    panic!("stale flow should be abandoned");
  };
  assert_eq!(prior_phase, FlowPhase::Teaching);
  assert_eq!(state.phase, FlowPhase::Abandoned);
  assert_eq!(state.abandoned_from, Some(FlowPhase::Teaching));

  let graph = h.engine.store().get_graph(g).await.unwrap().unwrap();
  assert_eq!(graph.status, GraphStatus::Abandoned);
  assert!(h.engine.store().list_review_slots(g).await.unwrap().is_empty());
  assert_eq!(h.scheduler.cancelled(), vec![format!("review-{}", a.node_id)]);

  let (state, _) = advanced(h.run(g, FlowCommand::Restart).await);
  assert_eq!(state.phase, FlowPhase::Pending);
  let graph = h.engine.store().get_graph(g).await.unwrap().unwrap();
  assert_eq!(graph.status, GraphStatus::Active);
}

#[tokio::test]
async fn concurrent_diagnostics_both_land() {
  let h = harness().await;
  let g = h.graph().await;
  let a = h.node(g, "A").await;
  let b = h.node(g, "B").await;
  h.run(g, FlowCommand::StartDiagnosis).await;

  let diagnose = |node_id| FlowCommand::RecordDiagnostic {
    node_id,
    question_text: "q".into(),
    user_answer: "a".into(),
    quality: q(3),
  };
  let (first, second) = tokio::join!(
    h.engine.run_flow(g, diagnose(a.node_id)),
    h.engine.run_flow(g, diagnose(b.node_id)),
  );
  first.unwrap();
  second.unwrap();

  let state = h.engine.flow(g).await.unwrap();
  assert_eq!(state.diagnostic_results.len(), 2);
  assert_eq!(state.version, 3);
}

// ─── Analytics ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn analytics_snapshot_is_idempotent_and_flags_struggling() {
  let h = harness().await;
  let g = h.graph().await;
  let weak = h.node(g, "weak").await;
  let strong = h.node(g, "strong").await;
  for _ in 0..5 {
    h.answer(weak.node_id, 1, ResponseType::Teach).await;
    h.answer(strong.node_id, 5, ResponseType::Teach).await;
  }

  let report = h.engine.run_analytics().await.unwrap();
  assert_eq!(report.snapshots.len(), 1);
  assert_eq!(report.replan, vec![g]);
  let metrics = &report.snapshots[0].metrics;
  assert_eq!(metrics.struggling_nodes, vec![weak.node_id]);
  assert_eq!(metrics.status_counts.mastered, 1);
  assert_eq!(metrics.velocity, 1);

  h.engine.run_analytics().await.unwrap();
  assert_eq!(h.engine.store().list_snapshots(g).await.unwrap().len(), 1);
}

#[tokio::test]
async fn analytics_skips_inactive_graphs() {
  let h = harness().await;
  let g = h.graph().await;
  h.engine
    .store()
    .set_graph_status(g, GraphStatus::Abandoned, h.engine.now())
    .await
    .unwrap();

  let report = h.engine.run_analytics().await.unwrap();
  assert!(report.snapshots.is_empty());
}
