//! Curriculum ordering: a deterministic topological sort of one graph.
//!
//! Among nodes whose prerequisites are already placed, the next one is the
//! shallowest, then the one with the smallest effort estimate (unknown
//! effort last), then the one with the highest existing mastery score, then
//! the smallest node id. Re-running the sort after scores change reorders the
//! remaining nodes without any separate re-planning algorithm.

use std::{
  cmp::Ordering,
  collections::{BTreeSet, HashMap},
};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  Error, Result,
  frontier::effort_order,
  graph::{Edge, Node},
};

/// One node's position in the learning order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
  pub node_id:  Uuid,
  pub sequence: u32,
}

/// Priority key of a node whose prerequisites are satisfied.
#[derive(Debug, Clone, Copy)]
struct ReadyKey {
  depth:   u32,
  effort:  Option<u32>,
  score:   f64,
  node_id: Uuid,
}

impl ReadyKey {
  fn of(node: &Node) -> Self {
    Self {
      depth:   node.depth,
      effort:  node.effort_estimate,
      score:   node.mastery_score,
      node_id: node.node_id,
    }
  }
}

impl Ord for ReadyKey {
  fn cmp(&self, other: &Self) -> Ordering {
    self
      .depth
      .cmp(&other.depth)
      .then_with(|| effort_order(self.effort, other.effort))
      .then_with(|| other.score.total_cmp(&self.score))
      .then_with(|| self.node_id.cmp(&other.node_id))
  }
}

impl PartialOrd for ReadyKey {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> { Some(self.cmp(other)) }
}

impl PartialEq for ReadyKey {
  fn eq(&self, other: &Self) -> bool { self.cmp(other) == Ordering::Equal }
}

impl Eq for ReadyKey {}

/// Order every node of a graph.
///
/// Only prerequisite edges between nodes in `nodes` constrain the order.
/// Fails with [`Error::CycleDetected`] if those edges contain a cycle, naming
/// one edge that lies on an unresolved part of the graph.
pub fn plan(nodes: &[Node], edges: &[Edge]) -> Result<Vec<Placement>> {
  let by_id: HashMap<Uuid, &Node> = nodes.iter().map(|n| (n.node_id, n)).collect();

  let mut indegree: HashMap<Uuid, usize> =
    nodes.iter().map(|n| (n.node_id, 0)).collect();
  let mut children: HashMap<Uuid, Vec<Uuid>> = HashMap::new();

  for e in edges.iter().filter(|e| e.is_prerequisite()) {
    if !by_id.contains_key(&e.parent_id) || !by_id.contains_key(&e.child_id) {
      continue;
    }
    *indegree.entry(e.child_id).or_default() += 1;
    children.entry(e.parent_id).or_default().push(e.child_id);
  }

  let mut ready: BTreeSet<ReadyKey> = nodes
    .iter()
    .filter(|n| indegree[&n.node_id] == 0)
    .map(ReadyKey::of)
    .collect();

  let mut order = Vec::with_capacity(nodes.len());
  while let Some(key) = ready.pop_first() {
    order.push(Placement {
      node_id:  key.node_id,
      sequence: order.len() as u32,
    });
    for child in children.get(&key.node_id).into_iter().flatten() {
      let remaining = indegree.entry(*child).or_default();
      *remaining -= 1;
      if *remaining == 0 {
        ready.insert(ReadyKey::of(by_id[child]));
      }
    }
  }

  if order.len() < nodes.len() {
    let stuck = edges
      .iter()
      .filter(|e| e.is_prerequisite())
      .find(|e| {
        indegree.get(&e.child_id).is_some_and(|d| *d > 0)
          && indegree.get(&e.parent_id).is_some_and(|d| *d > 0)
      });
    return Err(match stuck {
      Some(e) => Error::CycleDetected { parent: e.parent_id, child: e.child_id },
      None => Error::CycleDetected { parent: Uuid::nil(), child: Uuid::nil() },
    });
  }

  Ok(order)
}

#[cfg(test)]
mod tests {
  use chrono::Utc;
  use proptest::prelude::*;

  use super::*;
  use crate::{
    graph::{EdgeKind, MasteryStatus},
    mastery::Sm2State,
  };

  fn node(depth: u32, effort: Option<u32>, score: f64) -> Node {
    Node {
      node_id: Uuid::new_v4(),
      graph_id: Uuid::nil(),
      label: String::new(),
      description: None,
      depth,
      mastery_score: score,
      mastery_status: MasteryStatus::Unseen,
      sm2: Sm2State::default(),
      effort_estimate: effort,
      sequence: None,
      created_at: Utc::now(),
      updated_at: Utc::now(),
    }
  }

  fn prereq(parent: &Node, child: &Node) -> Edge {
    Edge {
      edge_id: Uuid::new_v4(),
      graph_id: Uuid::nil(),
      parent_id: parent.node_id,
      child_id: child.node_id,
      kind: EdgeKind::Prerequisite,
      created_at: Utc::now(),
    }
  }

  fn sequence_of(order: &[Placement], id: Uuid) -> u32 {
    order.iter().find(|p| p.node_id == id).unwrap().sequence
  }

  #[test]
  fn tie_breaks_in_priority_order() {
    let shallow = node(0, None, 0.0);
    let cheap = node(1, Some(5), 0.0);
    let known = node(1, None, 0.6);
    let unknown = node(1, None, 0.1);

    let order = plan(
      &[unknown.clone(), known.clone(), cheap.clone(), shallow.clone()],
      &[],
    )
    .unwrap();
    let ids: Vec<_> = order.iter().map(|p| p.node_id).collect();
    assert_eq!(ids, vec![shallow.node_id, cheap.node_id, known.node_id, unknown.node_id]);
    assert_eq!(order.iter().map(|p| p.sequence).collect::<Vec<_>>(), vec![0, 1, 2, 3]);
  }

  #[test]
  fn prerequisite_beats_tie_break() {
    // The child looks cheaper, but its parent must come first.
    let parent = node(0, Some(100), 0.0);
    let child = node(0, Some(1), 0.9);
    let order = plan(&[child.clone(), parent.clone()], &[prereq(&parent, &child)]).unwrap();
    assert!(sequence_of(&order, parent.node_id) < sequence_of(&order, child.node_id));
  }

  #[test]
  fn related_edges_are_ignored() {
    let a = node(0, Some(9), 0.0);
    let b = node(0, Some(1), 0.0);
    let mut related = prereq(&a, &b);
    related.kind = EdgeKind::Related;
    let order = plan(&[a.clone(), b.clone()], &[related]).unwrap();
    assert_eq!(order[0].node_id, b.node_id);
  }

  #[test]
  fn cycle_is_rejected() {
    let a = node(0, None, 0.0);
    let b = node(1, None, 0.0);
    let c = node(2, None, 0.0);
    let edges = vec![prereq(&a, &b), prereq(&b, &c), prereq(&c, &b)];
    let err = plan(&[a, b, c], &edges).unwrap_err();
    assert!(matches!(err, Error::CycleDetected { .. }));
  }

  #[test]
  fn empty_graph_plans_to_nothing() {
    assert!(plan(&[], &[]).unwrap().is_empty());
  }

  proptest! {
    #[test]
    fn order_respects_edges_and_is_deterministic(
      shape in proptest::collection::vec((0u32..4, proptest::option::of(0u32..60), 0.0f64..1.0), 1..18),
      raw_edges in proptest::collection::vec((0usize..18, 0usize..18), 0..50),
    ) {
      let nodes: Vec<Node> = shape.iter().map(|(d, e, s)| node(*d, *e, *s)).collect();
      let edges: Vec<Edge> = raw_edges
        .into_iter()
        .map(|(a, b)| (a % nodes.len(), b % nodes.len()))
        .filter(|(a, b)| a < b)
        .map(|(a, b)| prereq(&nodes[a], &nodes[b]))
        .collect();

      let first = plan(&nodes, &edges).unwrap();
      prop_assert_eq!(first.len(), nodes.len());
      for e in &edges {
        prop_assert!(sequence_of(&first, e.parent_id) < sequence_of(&first, e.child_id));
      }

      let mut shuffled = nodes.clone();
      shuffled.reverse();
      let mut reversed_edges = edges.clone();
      reversed_edges.reverse();
      let second = plan(&shuffled, &reversed_edges).unwrap();
      prop_assert_eq!(first, second);
    }
  }
}
