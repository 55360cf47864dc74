#![forbid(unsafe_code, missing_docs)]

//! A small directed acyclic graph for dependency tracking in kiln.
//!
//! Nodes carry arbitrary data and are identified by stable [`Node`] keys. Edges are directed from
//! depender to dependee. Adding an edge that would close a cycle fails with [`Error::CycleDetected`],
//! keeping the graph acyclic at all times.
//!
//! Iteration over nodes and edges follows insertion order, so [`DAG::topological_order`] is
//! deterministic: among nodes whose order is not constrained by an edge, the node added first comes
//! first. Determinism matters for reproducible build scheduling and for test assertions.

use std::borrow::Borrow;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::fmt;

use hashlink::LinkedHashSet;
use slotmap::{DefaultKey, SlotMap};

/// A node (identifier) in the [`DAG`].
///
/// Contains generational metadata, so a key for a removed node is not confused with a node created
/// later in the same slot.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Node(DefaultKey);

/// Error produced by [`DAG`] mutations.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Error {
  /// Adding the edge would create a cycle.
  CycleDetected,
  /// An endpoint of the edge does not exist in the graph.
  NodeMissing,
}

impl fmt::Display for Error {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Error::CycleDetected => f.write_str("adding the edge would create a cycle"),
      Error::NodeMissing => f.write_str("an endpoint of the edge does not exist in the graph"),
    }
  }
}

impl std::error::Error for Error {}

struct NodeInfo<N> {
  data: N,
  outgoing: LinkedHashSet<Node>,
  incoming: LinkedHashSet<Node>,
}

impl<N> NodeInfo<N> {
  #[inline]
  fn new(data: N) -> Self {
    Self { data, outgoing: LinkedHashSet::new(), incoming: LinkedHashSet::new() }
  }
}

/// Directed acyclic graph with insertion-ordered, deterministic iteration.
pub struct DAG<N> {
  node_info: SlotMap<DefaultKey, NodeInfo<N>>,
  insertion_order: Vec<Node>,
}

impl<N> Default for DAG<N> {
  #[inline]
  fn default() -> Self {
    Self { node_info: SlotMap::new(), insertion_order: Vec::new() }
  }
}

impl<N> DAG<N> {
  /// Creates an empty graph.
  #[inline]
  pub fn new() -> Self { Default::default() }

  /// Returns the number of nodes in the graph.
  #[inline]
  pub fn len(&self) -> usize { self.node_info.len() }

  /// Returns `true` if the graph has no nodes.
  #[inline]
  pub fn is_empty(&self) -> bool { self.node_info.is_empty() }

  /// Adds a node with `data` to the graph, returning its key.
  pub fn add_node(&mut self, data: N) -> Node {
    let node = Node(self.node_info.insert(NodeInfo::new(data)));
    self.insertion_order.push(node);
    node
  }

  /// Returns `true` if `node` exists in the graph.
  #[inline]
  pub fn contains_node(&self, node: impl Borrow<Node>) -> bool {
    self.node_info.contains_key(node.borrow().0)
  }

  /// Gets the data of `node`, or `None` if it does not exist.
  #[inline]
  pub fn get_node_data(&self, node: impl Borrow<Node>) -> Option<&N> {
    self.node_info.get(node.borrow().0).map(|i| &i.data)
  }

  /// Gets the data of `node` mutably, or `None` if it does not exist.
  #[inline]
  pub fn get_node_data_mut(&mut self, node: impl Borrow<Node>) -> Option<&mut N> {
    self.node_info.get_mut(node.borrow().0).map(|i| &mut i.data)
  }

  /// Adds an edge from `src` to `dst`.
  ///
  /// Returns `Ok(true)` if the edge was added, `Ok(false)` if it already existed,
  /// `Err(`[`Error::CycleDetected`]`)` if adding it would create a cycle (the graph is left
  /// unchanged), or `Err(`[`Error::NodeMissing`]`)` if either endpoint does not exist.
  pub fn add_edge(&mut self, src: impl Borrow<Node>, dst: impl Borrow<Node>) -> Result<bool, Error> {
    let src = *src.borrow();
    let dst = *dst.borrow();
    if !self.contains_node(src) || !self.contains_node(dst) {
      return Err(Error::NodeMissing);
    }
    if src == dst {
      return Err(Error::CycleDetected);
    }
    if self.node_info[src.0].outgoing.contains(&dst) {
      return Ok(false);
    }
    // A cycle appears iff `src` is already reachable from `dst`.
    if self.contains_transitive_edge(dst, src) {
      return Err(Error::CycleDetected);
    }
    self.node_info[src.0].outgoing.insert(dst);
    self.node_info[dst.0].incoming.insert(src);
    Ok(true)
  }

  /// Returns `true` if an edge from `src` to `dst` exists.
  #[inline]
  pub fn contains_edge(&self, src: impl Borrow<Node>, dst: impl Borrow<Node>) -> bool {
    self.node_info.get(src.borrow().0).map_or(false, |i| i.outgoing.contains(dst.borrow()))
  }

  /// Returns `true` if `dst` is reachable from `src` through one or more edges.
  pub fn contains_transitive_edge(&self, src: impl Borrow<Node>, dst: impl Borrow<Node>) -> bool {
    let src = *src.borrow();
    let dst = *dst.borrow();
    if !self.contains_node(src) || !self.contains_node(dst) {
      return false;
    }
    let mut stack: Vec<Node> = self.node_info[src.0].outgoing.iter().copied().collect();
    let mut visited = LinkedHashSet::new();
    while let Some(node) = stack.pop() {
      if node == dst {
        return true;
      }
      if visited.insert(node) {
        stack.extend(self.node_info[node.0].outgoing.iter().copied());
      }
    }
    false
  }

  /// Removes the edge from `src` to `dst`, returning `true` if it existed.
  pub fn remove_edge(&mut self, src: impl Borrow<Node>, dst: impl Borrow<Node>) -> bool {
    let src = *src.borrow();
    let dst = *dst.borrow();
    let removed = self.node_info.get_mut(src.0).map_or(false, |i| i.outgoing.remove(&dst));
    if removed {
      self.node_info[dst.0].incoming.remove(&src);
    }
    removed
  }

  /// Removes `node` and all edges connected to it, returning `true` if it existed.
  pub fn remove_node(&mut self, node: Node) -> bool {
    let Some(info) = self.node_info.remove(node.0) else {
      return false;
    };
    for dst in &info.outgoing {
      self.node_info[dst.0].incoming.remove(&node);
    }
    for src in &info.incoming {
      self.node_info[src.0].outgoing.remove(&node);
    }
    self.insertion_order.retain(|n| *n != node);
    true
  }

  /// Returns an iterator over all nodes in insertion order.
  #[inline]
  pub fn nodes(&self) -> impl Iterator<Item=Node> + '_ {
    self.insertion_order.iter().copied()
  }

  /// Returns an iterator over the direct dependees of `src`, in edge insertion order.
  #[inline]
  pub fn get_outgoing_edge_nodes(&self, src: impl Borrow<Node>) -> impl Iterator<Item=Node> + '_ {
    self.node_info.get(src.borrow().0).into_iter().flat_map(|i| i.outgoing.iter().copied())
  }

  /// Returns an iterator over the direct dependers of `dst`, in edge insertion order.
  #[inline]
  pub fn get_incoming_edge_nodes(&self, dst: impl Borrow<Node>) -> impl Iterator<Item=Node> + '_ {
    self.node_info.get(dst.borrow().0).into_iter().flat_map(|i| i.incoming.iter().copied())
  }

  /// Returns all nodes reachable from `src` (excluding `src` itself), in breadth-first order.
  pub fn descendants(&self, src: impl Borrow<Node>) -> Vec<Node> {
    let src = *src.borrow();
    let mut result = Vec::new();
    let mut visited = LinkedHashSet::new();
    let mut queue: VecDeque<Node> = self.get_outgoing_edge_nodes(src).collect();
    while let Some(node) = queue.pop_front() {
      if visited.insert(node) {
        result.push(node);
        queue.extend(self.get_outgoing_edge_nodes(node));
      }
    }
    result
  }

  /// Returns all nodes in topological order: dependees before dependers, with node insertion order
  /// as the tiebreak among unconstrained nodes.
  ///
  /// The returned order is deterministic for a given sequence of `add_node`/`add_edge` calls.
  pub fn topological_order(&self) -> Vec<Node> {
    // Kahn's algorithm over dependee-first direction: a node is ready once all its outgoing
    // dependees have been emitted. The ready set is a min-heap over insertion indices, so the
    // insertion-order tiebreak costs O(log n) per node instead of a re-sort per pop.
    let index_of: HashMap<Node, usize> = self.insertion_order.iter()
      .copied()
      .enumerate()
      .map(|(index, node)| (node, index))
      .collect();
    let mut remaining: Vec<usize> = self.insertion_order.iter()
      .map(|node| self.node_info[node.0].outgoing.len())
      .collect();
    let mut ready: BinaryHeap<Reverse<usize>> = self.insertion_order.iter()
      .enumerate()
      .filter(|(_, node)| self.node_info[node.0].outgoing.is_empty())
      .map(|(index, _)| Reverse(index))
      .collect();
    let mut order = Vec::with_capacity(self.insertion_order.len());
    while let Some(Reverse(index)) = ready.pop() {
      let node = self.insertion_order[index];
      order.push(node);
      for depender in self.get_incoming_edge_nodes(node) {
        let depender_index = index_of[&depender];
        remaining[depender_index] -= 1;
        if remaining[depender_index] == 0 {
          ready.push(Reverse(depender_index));
        }
      }
    }
    order
  }
}

impl<N: fmt::Debug> fmt::Debug for DAG<N> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut map = f.debug_map();
    for node in &self.insertion_order {
      let info = &self.node_info[node.0];
      map.entry(&info.data, &info.outgoing);
    }
    map.finish()
  }
}


#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn add_nodes_and_edges() {
    let mut dag = DAG::new();
    let a = dag.add_node("a");
    let b = dag.add_node("b");
    assert_eq!(dag.len(), 2);
    assert!(dag.contains_node(a));
    assert_eq!(dag.get_node_data(a), Some(&"a"));

    assert_eq!(dag.add_edge(a, b), Ok(true));
    assert_eq!(dag.add_edge(a, b), Ok(false));
    assert!(dag.contains_edge(a, b));
    assert!(!dag.contains_edge(b, a));
  }

  #[test]
  fn self_edge_is_a_cycle() {
    let mut dag = DAG::new();
    let a = dag.add_node("a");
    assert_eq!(dag.add_edge(a, a), Err(Error::CycleDetected));
  }

  #[test]
  fn cycle_is_rejected_and_graph_unchanged() {
    let mut dag = DAG::new();
    let a = dag.add_node("a");
    let b = dag.add_node("b");
    let c = dag.add_node("c");
    assert_eq!(dag.add_edge(a, b), Ok(true));
    assert_eq!(dag.add_edge(b, c), Ok(true));
    assert_eq!(dag.add_edge(c, a), Err(Error::CycleDetected));
    assert!(!dag.contains_edge(c, a));
    assert_eq!(dag.topological_order().len(), 3);
  }

  #[test]
  fn missing_node_is_rejected() {
    let mut dag = DAG::new();
    let a = dag.add_node("a");
    let b = dag.add_node("b");
    dag.remove_node(b);
    assert_eq!(dag.add_edge(a, b), Err(Error::NodeMissing));
  }

  #[test]
  fn transitive_edges() {
    let mut dag = DAG::new();
    let a = dag.add_node("a");
    let b = dag.add_node("b");
    let c = dag.add_node("c");
    dag.add_edge(a, b).unwrap();
    dag.add_edge(b, c).unwrap();
    assert!(dag.contains_transitive_edge(a, c));
    assert!(!dag.contains_transitive_edge(c, a));
    assert_eq!(dag.descendants(a), vec![b, c]);
  }

  #[test]
  fn topological_order_respects_edges() {
    let mut dag = DAG::new();
    let compile = dag.add_node("compile");
    let link = dag.add_node("link");
    let package = dag.add_node("package");
    // Depender points at dependee.
    dag.add_edge(link, compile).unwrap();
    dag.add_edge(package, link).unwrap();
    assert_eq!(dag.topological_order(), vec![compile, link, package]);
  }

  #[test]
  fn topological_order_is_deterministic_for_unrelated_nodes() {
    let mut dag = DAG::new();
    let c = dag.add_node("c");
    let a = dag.add_node("a");
    let b = dag.add_node("b");
    // No edges: insertion order wins.
    assert_eq!(dag.topological_order(), vec![c, a, b]);
  }

  #[test]
  fn topological_order_tiebreaks_by_insertion_across_waves() {
    let mut dag = DAG::new();
    // A diamond: `top` depends on `a` and `b`, which both depend on `z`. The ready set holds
    // multiple nodes at once, and insertion order must win within each wave.
    let z = dag.add_node("z");
    let a = dag.add_node("a");
    let b = dag.add_node("b");
    let top = dag.add_node("top");
    dag.add_edge(top, a).unwrap();
    dag.add_edge(top, b).unwrap();
    dag.add_edge(a, z).unwrap();
    dag.add_edge(b, z).unwrap();
    assert_eq!(dag.topological_order(), vec![z, a, b, top]);
  }

  #[test]
  fn remove_node_removes_connected_edges() {
    let mut dag = DAG::new();
    let a = dag.add_node("a");
    let b = dag.add_node("b");
    let c = dag.add_node("c");
    dag.add_edge(a, b).unwrap();
    dag.add_edge(b, c).unwrap();
    assert!(dag.remove_node(b));
    assert!(!dag.contains_edge(a, b));
    assert!(dag.get_outgoing_edge_nodes(a).next().is_none());
    assert!(dag.get_incoming_edge_nodes(c).next().is_none());
    // Removing `b` removed the path from `a` to `c`, so `c` may now depend on `a`.
    assert_eq!(dag.add_edge(c, a), Ok(true));
  }
}
