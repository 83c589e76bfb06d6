//! Frontier selection: the set of concepts that are ready to teach.
//!
//! A node is on the frontier when it is not mastered and every prerequisite
//! parent is. The ordering is part of the contract: ascending depth, then
//! ascending effort estimate with unknown effort last, then node id.

use std::{
  cmp::Ordering,
  collections::{HashMap, HashSet},
};

use uuid::Uuid;

use crate::graph::{Edge, MasteryStatus, Node};

/// Compare two nodes in frontier order.
pub fn frontier_order(a: &Node, b: &Node) -> Ordering {
  a.depth
    .cmp(&b.depth)
    .then_with(|| effort_order(a.effort_estimate, b.effort_estimate))
    .then_with(|| a.node_id.cmp(&b.node_id))
}

/// Ascending effort with `None` sorting after every known estimate.
pub fn effort_order(a: Option<u32>, b: Option<u32>) -> Ordering {
  match (a, b) {
    (Some(x), Some(y)) => x.cmp(&y),
    (Some(_), None) => Ordering::Less,
    (None, Some(_)) => Ordering::Greater,
    (None, None) => Ordering::Equal,
  }
}

/// Compute the frontier of one graph from its full node and edge sets.
///
/// Related edges are ignored. Edges that point at nodes outside `nodes` are
/// treated as unsatisfied prerequisites.
pub fn frontier(nodes: &[Node], edges: &[Edge]) -> Vec<Node> {
  let status: HashMap<Uuid, MasteryStatus> =
    nodes.iter().map(|n| (n.node_id, n.mastery_status)).collect();

  let blocked: HashSet<Uuid> = edges
    .iter()
    .filter(|e| e.is_prerequisite())
    .filter(|e| !status.get(&e.parent_id).is_some_and(|s| s.is_mastered()))
    .map(|e| e.child_id)
    .collect();

  let mut ready: Vec<Node> = nodes
    .iter()
    .filter(|n| !n.mastery_status.is_mastered() && !blocked.contains(&n.node_id))
    .cloned()
    .collect();
  ready.sort_by(frontier_order);
  ready
}

#[cfg(test)]
mod tests {
  use chrono::Utc;
  use proptest::prelude::*;

  use super::*;
  use crate::{graph::EdgeKind, mastery::Sm2State};

  fn node(label: &str, depth: u32, effort: Option<u32>, status: MasteryStatus) -> Node {
    Node {
      node_id: Uuid::new_v4(),
      graph_id: Uuid::nil(),
      label: label.into(),
      description: None,
      depth,
      mastery_score: 0.0,
      mastery_status: status,
      sm2: Sm2State::default(),
      effort_estimate: effort,
      sequence: None,
      created_at: Utc::now(),
      updated_at: Utc::now(),
    }
  }

  fn edge(parent: &Node, child: &Node, kind: EdgeKind) -> Edge {
    Edge {
      edge_id: Uuid::new_v4(),
      graph_id: Uuid::nil(),
      parent_id: parent.node_id,
      child_id: child.node_id,
      kind,
      created_at: Utc::now(),
    }
  }

  #[test]
  fn mastered_parent_unlocks_child() {
    let a = node("A", 0, None, MasteryStatus::Mastered);
    let b = node("B", 1, None, MasteryStatus::Unseen);
    let edges = vec![edge(&a, &b, EdgeKind::Prerequisite)];

    let ready = frontier(&[a, b.clone()], &edges);
    assert_eq!(ready.len(), 1);
    assert_eq!(ready[0].node_id, b.node_id);
  }

  #[test]
  fn unmastered_parent_blocks_child() {
    let a = node("A", 0, None, MasteryStatus::Reviewing);
    let b = node("B", 1, None, MasteryStatus::Unseen);
    let edges = vec![edge(&a, &b, EdgeKind::Prerequisite)];

    let ready = frontier(&[a.clone(), b], &edges);
    assert_eq!(ready.iter().map(|n| n.node_id).collect::<Vec<_>>(), vec![a.node_id]);
  }

  #[test]
  fn related_edges_do_not_block() {
    let a = node("A", 0, None, MasteryStatus::Unseen);
    let b = node("B", 0, None, MasteryStatus::Unseen);
    let edges = vec![edge(&a, &b, EdgeKind::Related)];

    assert_eq!(frontier(&[a, b], &edges).len(), 2);
  }

  #[test]
  fn ordered_by_depth_then_effort_nulls_last() {
    let deep = node("deep", 2, Some(1), MasteryStatus::Unseen);
    let unknown = node("unknown", 0, None, MasteryStatus::Unseen);
    let long = node("long", 0, Some(90), MasteryStatus::Learning);
    let short = node("short", 0, Some(10), MasteryStatus::Diagnosed);

    let ready = frontier(
      &[deep.clone(), unknown.clone(), long.clone(), short.clone()],
      &[],
    );
    let labels: Vec<_> = ready.iter().map(|n| n.label.as_str()).collect();
    assert_eq!(labels, ["short", "long", "unknown", "deep"]);
  }

  fn status_strategy() -> impl Strategy<Value = MasteryStatus> {
    prop_oneof![
      Just(MasteryStatus::Unseen),
      Just(MasteryStatus::Diagnosed),
      Just(MasteryStatus::Learning),
      Just(MasteryStatus::Reviewing),
      Just(MasteryStatus::Mastered),
    ]
  }

  proptest! {
    #[test]
    fn edge_free_frontier_is_every_unmastered_node(
      statuses in proptest::collection::vec(status_strategy(), 1..20),
    ) {
      let nodes: Vec<Node> = statuses
        .iter()
        .enumerate()
        .map(|(i, s)| node(&format!("n{i}"), 0, None, *s))
        .collect();
      let ready = frontier(&nodes, &[]);
      let expected = nodes.iter().filter(|n| !n.mastery_status.is_mastered()).count();
      prop_assert_eq!(ready.len(), expected);
    }

    #[test]
    fn frontier_never_contains_blocked_node(
      statuses in proptest::collection::vec(status_strategy(), 2..16),
      raw_edges in proptest::collection::vec((0usize..16, 0usize..16), 0..40),
    ) {
      let nodes: Vec<Node> = statuses
        .iter()
        .enumerate()
        .map(|(i, s)| node(&format!("n{i}"), 0, None, *s))
        .collect();
      // Only lower index -> higher index, which keeps the graph acyclic.
      let edges: Vec<Edge> = raw_edges
        .into_iter()
        .map(|(a, b)| (a % nodes.len(), b % nodes.len()))
        .filter(|(a, b)| a < b)
        .map(|(a, b)| edge(&nodes[a], &nodes[b], EdgeKind::Prerequisite))
        .collect();

      let ready = frontier(&nodes, &edges);
      let by_id: HashMap<Uuid, &Node> = nodes.iter().map(|n| (n.node_id, n)).collect();
      for n in &ready {
        prop_assert!(!n.mastery_status.is_mastered());
        for e in edges.iter().filter(|e| e.child_id == n.node_id) {
          prop_assert!(by_id[&e.parent_id].mastery_status.is_mastered());
        }
      }
    }
  }
}
