use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::foundation::error::{TileError, TileResult};
use crate::graph::node::PartialOrderNode;

/// Preference digraph over keyed candidates with a lazily cached topological order.
///
/// `set_preference(a, b)` declares that `a` must sort before `b`. [`OperationGraph::ordered_list`]
/// returns every payload in an order honouring all declared preferences, or `None` when the
/// preferences contain a cycle. Ties among unconstrained nodes resolve to insertion order.
///
/// Edges have set semantics: repeating a preference does not add a second edge, and a single
/// `unset_preference` removes it.
///
/// All operations take one internal lock, so a graph can be shared between threads.
pub struct OperationGraph<K, T> {
    inner: Mutex<GraphInner<K, T>>,
}

struct GraphInner<K, T> {
    nodes: Vec<PartialOrderNode<K, T>>,
    // Node positions in sorted order. Valid only while `dirty` is clear.
    sorted: Option<Vec<usize>>,
    dirty: bool,
}

impl<K, T> Default for OperationGraph<K, T> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(GraphInner {
                nodes: Vec::new(),
                sorted: None,
                dirty: true,
            }),
        }
    }
}

impl<K: std::fmt::Debug, T> std::fmt::Debug for OperationGraph<K, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let g = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("OperationGraph")
            .field("keys", &g.nodes.iter().map(|n| n.key()).collect::<Vec<_>>())
            .field("dirty", &g.dirty)
            .finish()
    }
}

impl<K, T> OperationGraph<K, T>
where
    K: Eq + Hash + Clone,
{
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, GraphInner<K, T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a node. Returns `false` (and leaves the graph untouched) if `key` is already present.
    pub fn add_node(&self, key: K, payload: T) -> bool {
        let mut g = self.lock();
        if g.position(&key).is_some() {
            return false;
        }
        g.nodes.push(PartialOrderNode::new(key, payload));
        g.invalidate();
        true
    }

    /// Remove a node together with every edge that touches it. Returns whether a node was removed.
    pub fn remove_node(&self, key: &K) -> bool {
        let mut g = self.lock();
        let Some(pos) = g.position(key) else {
            return false;
        };
        let removed = g.nodes.remove(pos);

        for neighbor in removed.neighbors() {
            if let Some(i) = g.position(neighbor) {
                g.nodes[i].dec_in_degree();
            }
        }
        for node in &mut g.nodes {
            node.remove_neighbor(key);
        }

        g.invalidate();
        true
    }

    /// Declare that `preferred` sorts before `other`.
    ///
    /// Returns `Ok(true)` when a new edge was added and `Ok(false)` when `preferred == other` or
    /// the edge already existed. Fails with [`TileError::InvalidArgument`] if either key is
    /// unknown; the graph is unchanged in that case.
    pub fn set_preference(&self, preferred: &K, other: &K) -> TileResult<bool> {
        if preferred == other {
            return Ok(false);
        }
        let mut g = self.lock();
        let (Some(from), Some(to)) = (g.position(preferred), g.position(other)) else {
            return Err(TileError::invalid_argument(
                "set_preference: both nodes must be present in the graph",
            ));
        };

        if !g.nodes[from].add_neighbor(other.clone()) {
            return Ok(false);
        }
        g.nodes[to].inc_in_degree();
        g.invalidate();
        Ok(true)
    }

    /// Remove a previously declared preference. Returns `false` if it was not set.
    pub fn unset_preference(&self, preferred: &K, other: &K) -> bool {
        if preferred == other {
            return false;
        }
        let mut g = self.lock();
        let (Some(from), Some(to)) = (g.position(preferred), g.position(other)) else {
            return false;
        };

        if !g.nodes[from].remove_neighbor(other) {
            return false;
        }
        g.nodes[to].dec_in_degree();
        g.invalidate();
        true
    }

    /// Whether `preferred -> other` is currently declared.
    pub fn has_preference(&self, preferred: &K, other: &K) -> bool {
        let g = self.lock();
        g.position(preferred).is_some_and(|i| g.nodes[i].has_neighbor(other))
    }

    /// Whether a node with `key` exists.
    pub fn contains(&self, key: &K) -> bool {
        self.lock().position(key).is_some()
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.lock().nodes.len()
    }

    /// Whether the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.lock().nodes.is_empty()
    }

    /// In-degree of the node with `key`.
    pub fn in_degree(&self, key: &K) -> Option<usize> {
        let g = self.lock();
        g.position(key).map(|i| g.nodes[i].in_degree())
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> Vec<K> {
        self.lock().nodes.iter().map(|n| n.key().clone()).collect()
    }

    /// Keys this node is preferred over, in declaration order.
    pub fn neighbors(&self, key: &K) -> Option<Vec<K>> {
        let g = self.lock();
        g.position(key).map(|i| g.nodes[i].neighbors().to_vec())
    }

    /// Keys in preference order, or `None` if the preferences contain a cycle.
    pub fn ordered_keys(&self) -> Option<Vec<K>> {
        let mut g = self.lock();
        let order = g.sorted_positions()?;
        Some(order.iter().map(|&i| g.nodes[i].key().clone()).collect())
    }
}

impl<K, T> OperationGraph<K, T>
where
    K: Eq + Hash + Clone,
    T: Clone,
{
    /// The payload stored under `key`.
    pub fn payload(&self, key: &K) -> Option<T> {
        let g = self.lock();
        g.position(key).map(|i| g.nodes[i].payload().clone())
    }

    /// Copy of the node stored under `key`, with its in-degree and neighbors.
    pub fn node(&self, key: &K) -> Option<PartialOrderNode<K, T>> {
        let g = self.lock();
        g.position(key).map(|i| g.nodes[i].clone())
    }

    /// Payloads in insertion order, ignoring preferences.
    pub fn nodes(&self) -> Vec<T> {
        self.lock().nodes.iter().map(|n| n.payload().clone()).collect()
    }

    /// Payloads in preference order.
    ///
    /// Returns `None` when the preferences contain a cycle; an empty graph yields
    /// `Some(vec![])`. The order is cached until the next mutation.
    pub fn ordered_list(&self) -> Option<Vec<T>> {
        let mut g = self.lock();
        let order = g.sorted_positions()?;
        Some(order.iter().map(|&i| g.nodes[i].payload().clone()).collect())
    }
}

impl<K: Eq + Hash + Clone, T> GraphInner<K, T> {
    fn position(&self, key: &K) -> Option<usize> {
        self.nodes.iter().position(|n| n.key() == key)
    }

    fn invalidate(&mut self) {
        self.sorted = None;
        self.dirty = true;
    }

    fn sorted_positions(&mut self) -> Option<Vec<usize>> {
        if !self.dirty
            && let Some(order) = &self.sorted
        {
            return Some(order.clone());
        }

        match self.topological_sort() {
            Some(order) => {
                self.sorted = Some(order.clone());
                self.dirty = false;
                Some(order)
            }
            None => {
                tracing::debug!(nodes = self.nodes.len(), "preference graph contains a cycle");
                self.invalidate();
                None
            }
        }
    }

    // Kahn's algorithm. The ready set is a min-heap over node positions, so among nodes whose
    // constraints are all satisfied the earliest inserted one is emitted first.
    fn topological_sort(&self) -> Option<Vec<usize>> {
        let n = self.nodes.len();
        let pos: HashMap<&K, usize> = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (node.key(), i))
            .collect();

        let mut indeg: Vec<usize> = self.nodes.iter().map(|node| node.in_degree()).collect();
        let mut ready: BinaryHeap<Reverse<usize>> = indeg
            .iter()
            .enumerate()
            .filter(|&(_, &d)| d == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        let mut out = Vec::with_capacity(n);
        while let Some(Reverse(i)) = ready.pop() {
            out.push(i);
            for neighbor in self.nodes[i].neighbors() {
                let Some(&j) = pos.get(neighbor) else {
                    continue;
                };
                let d = &mut indeg[j];
                *d = d.saturating_sub(1);
                if *d == 0 {
                    ready.push(Reverse(j));
                }
            }
        }

        (out.len() == n).then_some(out)
    }
}

#[cfg(test)]
#[path = "../../tests/unit/graph/operation_graph.rs"]
mod tests;
