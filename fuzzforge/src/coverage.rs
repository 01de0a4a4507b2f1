//! Canonical coverage bookkeeping (`spec.md` §3, §4.1).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// An ordered pair of opaque control-flow location identifiers. Equality and
/// hashing are structural, as required by `spec.md`'s data model.
pub type Edge = (u64, u64);

/// The set of edges observed so far, with per-edge hit counts. Never shrinks:
/// keys are only ever added, counts only ever incremented.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CoverageMap {
    edges: HashMap<Edge, u64>,
}

impl CoverageMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments the hit count for `edge`, inserting it if absent. Returns
    /// `true` iff the edge was previously unknown to this map.
    pub fn observe(&mut self, edge: Edge) -> bool {
        match self.edges.get_mut(&edge) {
            Some(count) => {
                *count += 1;
                false
            }
            None => {
                self.edges.insert(edge, 1);
                true
            }
        }
    }

    /// Folds `other` into `self`: every key in `other` has its count added to
    /// this map's count for that key (inserting at `other`'s count if new).
    /// Returns the submap of edges that were newly inserted by this merge.
    pub fn merge(&mut self, other: &CoverageMap) -> CoverageMap {
        let mut new_edges = CoverageMap::new();
        for (&edge, &count) in &other.edges {
            match self.edges.get_mut(&edge) {
                Some(existing) => *existing += count,
                None => {
                    self.edges.insert(edge, count);
                    new_edges.edges.insert(edge, count);
                }
            }
        }
        new_edges
    }

    pub fn size(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Edge, &u64)> {
        self.edges.iter()
    }

    pub fn contains(&self, edge: &Edge) -> bool {
        self.edges.contains_key(edge)
    }

    pub(crate) fn from_pairs(pairs: Vec<(Edge, u64)>) -> Self {
        Self {
            edges: pairs.into_iter().collect(),
        }
    }

    pub(crate) fn to_pairs(&self) -> Vec<(Edge, u64)> {
        self.edges.iter().map(|(&e, &c)| (e, c)).collect()
    }
}
