//! De-duplicating owning store for every path the search constructs, plus
//! the three work-lists the builder drives.
//!
//! Arena-plus-index ownership: the store's vector is the single owner of
//! every [`CertificatePath`]; work-lists hold [`PathHandle`]s into it, never
//! references. Paths are only dropped with the store itself, so a handle is
//! valid for the store's whole lifetime.

use std::collections::BTreeMap;

use crate::certificate_path::{CertificatePath, PathKey};

/// Hard bound on distinct paths per search. Once reached, no further paths
/// are constructed; already-discovered partials and candidates are still
/// drained.
pub const MAX_NUM_CHAINS: usize = 100;

/// Maximum chain depth; partials at this length are not extended further.
pub const MAX_CHAIN_LENGTH: usize = 15;

/// Index into the path arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PathHandle(usize);

/// Result of interning a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interned {
    /// The sequence was new; the path is now owned by the store.
    Inserted(PathHandle),
    /// A path with the same certificate sequence already exists.
    Duplicate(PathHandle),
}

/// Owning de-dup set plus work-lists.
#[derive(Debug, Default)]
pub struct PathGraph {
    paths: Vec<CertificatePath>,
    index: BTreeMap<PathKey, PathHandle>,
    pub partial_paths: Vec<PathHandle>,
    pub rejected_paths: Vec<PathHandle>,
    pub candidate_paths: Vec<PathHandle>,
}

impl PathGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct paths ever constructed in this search.
    pub fn path_count(&self) -> usize {
        self.paths.len()
    }

    pub fn at_capacity(&self) -> bool {
        self.paths.len() >= MAX_NUM_CHAINS
    }

    /// Insert a path unless its certificate sequence is already present.
    /// The duplicate case discards the argument; the set is the single
    /// owner of the surviving value.
    pub fn intern(&mut self, path: CertificatePath) -> Interned {
        let key = path.key();
        if let Some(&existing) = self.index.get(&key) {
            return Interned::Duplicate(existing);
        }
        let handle = PathHandle(self.paths.len());
        self.paths.push(path);
        self.index.insert(key, handle);
        Interned::Inserted(handle)
    }

    pub fn path(&self, handle: PathHandle) -> &CertificatePath {
        &self.paths[handle.0]
    }

    pub fn path_mut(&mut self, handle: PathHandle) -> &mut CertificatePath {
        &mut self.paths[handle.0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificate::{Certificate, DistinguishedName, KeyId, SignatureAlgorithm};
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    fn make_leaf_path(serial: u8) -> CertificatePath {
        CertificatePath::new_leaf(Arc::new(Certificate::new(
            DistinguishedName::new("CN=leaf"),
            DistinguishedName::new("CN=ca"),
            KeyId::from_bytes(b"leaf".to_vec()),
            None,
            Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap(),
            SignatureAlgorithm::EcdsaSha256,
            false,
            None,
            vec![serial],
        )))
    }

    #[test]
    fn intern_deduplicates_by_sequence() {
        let mut graph = PathGraph::new();
        let first = graph.intern(make_leaf_path(1));
        let Interned::Inserted(handle) = first else {
            panic!("first insert must succeed");
        };
        assert_eq!(graph.intern(make_leaf_path(1)), Interned::Duplicate(handle));
        assert_eq!(graph.path_count(), 1);
    }

    #[test]
    fn distinct_sequences_get_distinct_handles() {
        let mut graph = PathGraph::new();
        let a = graph.intern(make_leaf_path(1));
        let b = graph.intern(make_leaf_path(2));
        assert_ne!(a, b);
        assert_eq!(graph.path_count(), 2);
    }

    #[test]
    fn capacity_reflects_chain_bound() {
        let mut graph = PathGraph::new();
        for serial in 0..MAX_NUM_CHAINS {
            graph.intern(make_leaf_path(serial as u8));
        }
        assert_eq!(graph.path_count(), MAX_NUM_CHAINS);
        assert!(graph.at_capacity());
    }

    #[test]
    fn mutation_goes_through_handles() {
        let mut graph = PathGraph::new();
        let Interned::Inserted(handle) = graph.intern(make_leaf_path(1)) else {
            panic!("insert failed");
        };
        graph.path_mut(handle).set_score(42);
        assert_eq!(graph.path(handle).score(), Some(42));
    }
}
