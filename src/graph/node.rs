use smallvec::SmallVec;

/// A node in a preference digraph.
///
/// An outgoing edge `self -> neighbor` means this node is preferred over (sorts before) the
/// neighbor. Neighbors form an insertion-ordered set.
#[derive(Clone, Debug)]
pub struct PartialOrderNode<K, T> {
    key: K,
    payload: T,
    in_degree: usize,
    neighbors: SmallVec<[K; 4]>,
}

impl<K, T> PartialOrderNode<K, T> {
    pub(crate) fn new(key: K, payload: T) -> Self {
        Self {
            key,
            payload,
            in_degree: 0,
            neighbors: SmallVec::new(),
        }
    }

    /// The node's key.
    pub fn key(&self) -> &K {
        &self.key
    }

    /// The opaque payload.
    pub fn payload(&self) -> &T {
        &self.payload
    }

    /// Number of incoming preference edges.
    pub fn in_degree(&self) -> usize {
        self.in_degree
    }

    /// Keys of nodes this node is preferred over, in the order the preferences were set.
    pub fn neighbors(&self) -> &[K] {
        &self.neighbors
    }

    pub(crate) fn inc_in_degree(&mut self) {
        self.in_degree = self.in_degree.saturating_add(1);
    }

    pub(crate) fn dec_in_degree(&mut self) {
        self.in_degree = self.in_degree.saturating_sub(1);
    }
}

impl<K: PartialEq, T> PartialOrderNode<K, T> {
    pub(crate) fn has_neighbor(&self, key: &K) -> bool {
        self.neighbors.iter().any(|n| n == key)
    }

    /// Returns `false` when the edge already existed.
    pub(crate) fn add_neighbor(&mut self, key: K) -> bool {
        if self.has_neighbor(&key) {
            return false;
        }
        self.neighbors.push(key);
        true
    }

    pub(crate) fn remove_neighbor(&mut self, key: &K) -> bool {
        match self.neighbors.iter().position(|n| n == key) {
            Some(i) => {
                self.neighbors.remove(i);
                true
            }
            None => false,
        }
    }
}
