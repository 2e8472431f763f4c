//! In-memory embedding index.
//!
//! Mirrors every embedding of every active employee. The whole set is
//! rebuilt from the persistence layer and swapped in one step, so a match
//! running concurrently with a reload sees either the old set or the new one.
//!
//! Search is an exact linear scan. That is fine for a single site's
//! workforce (thousands of templates); beyond that an ANN structure would be
//! needed.

use crate::types::Embedding;
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;

/// One enrolled template together with its owner.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedEmbedding {
    pub embedding_id: i64,
    pub employee_id: i64,
    pub employee_code: String,
    pub full_name: String,
    pub embedding: Embedding,
}

/// Where the index loads its templates from.
pub trait EmbeddingSource {
    type Error: std::error::Error + Send + Sync + 'static;

    /// All embeddings whose owner is currently active, in a stable order.
    fn active_embeddings(&self) -> Result<Vec<IndexedEmbedding>, Self::Error>;
}

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("failed to load embeddings: {0}")]
    Source(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("embedding dimension mismatch: index holds {expected}-d vectors, query has {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// An immutable generation of the index.
#[derive(Debug, Default)]
pub struct IndexSnapshot {
    entries: Vec<IndexedEmbedding>,
    dimension: Option<usize>,
    generation: u64,
}

impl IndexSnapshot {
    /// Build a snapshot, fixing the dimension from the first usable vector.
    /// Empty vectors and vectors of any other dimension are dropped.
    fn build(entries: Vec<IndexedEmbedding>, generation: u64) -> Self {
        let mut dimension = None;
        let mut kept = Vec::with_capacity(entries.len());

        for entry in entries {
            let dim = entry.embedding.dimension();
            if dim == 0 {
                tracing::warn!(embedding_id = entry.embedding_id, "skipping empty embedding");
                continue;
            }
            match dimension {
                None => dimension = Some(dim),
                Some(expected) if expected != dim => {
                    tracing::warn!(
                        embedding_id = entry.embedding_id,
                        expected,
                        actual = dim,
                        "skipping embedding with mismatched dimension"
                    );
                    continue;
                }
                Some(_) => {}
            }
            kept.push(entry);
        }

        Self {
            entries: kept,
            dimension,
            generation,
        }
    }

    pub fn entries(&self) -> &[IndexedEmbedding] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Vector dimension, or `None` while empty.
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    /// Number of loads that produced this snapshot.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Reject probes whose dimension differs from the indexed vectors.
    pub fn check_dimension(&self, probe: &Embedding) -> Result<(), IndexError> {
        match self.dimension {
            Some(expected) if expected != probe.dimension() => Err(IndexError::DimensionMismatch {
                expected,
                actual: probe.dimension(),
            }),
            _ => Ok(()),
        }
    }
}

/// Distance from a probe to one indexed vector.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    /// Position of the vector in the index.
    pub position: usize,
    pub embedding_id: i64,
    pub employee_id: i64,
    pub distance: f32,
}

/// Shared, atomically reloadable embedding index.
#[derive(Debug, Default)]
pub struct EmbeddingIndex {
    current: RwLock<Arc<IndexSnapshot>>,
}

impl EmbeddingIndex {
    /// An empty index (generation 0).
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index directly from entries, bypassing any source.
    pub fn from_entries(entries: Vec<IndexedEmbedding>) -> Self {
        Self {
            current: RwLock::new(Arc::new(IndexSnapshot::build(entries, 1))),
        }
    }

    /// Replace the whole index with the source's current active embeddings.
    ///
    /// Entries are fetched before the write lock is taken; on a source error
    /// the previous snapshot stays in place. Returns the number of vectors
    /// now indexed.
    pub fn load<S: EmbeddingSource>(&self, source: &S) -> Result<usize, IndexError> {
        let entries = source
            .active_embeddings()
            .map_err(|e| IndexError::Source(Box::new(e)))?;
        Ok(self.replace(entries))
    }

    /// Swap in a new set of entries. Returns the number kept.
    pub fn replace(&self, entries: Vec<IndexedEmbedding>) -> usize {
        let offered = entries.len();
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let snapshot = IndexSnapshot::build(entries, guard.generation + 1);
        let kept = snapshot.len();

        tracing::info!(
            generation = snapshot.generation,
            vectors = kept,
            skipped = offered - kept,
            dimension = ?snapshot.dimension,
            "embedding index reloaded"
        );

        *guard = Arc::new(snapshot);
        kept
    }

    /// The current snapshot. Cheap; holds the read lock only for an `Arc` clone.
    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    pub fn generation(&self) -> u64 {
        self.snapshot().generation()
    }

    /// Distances from `probe` to every indexed vector, ascending.
    ///
    /// The sort is stable, so equal distances keep index order.
    pub fn nearest(&self, probe: &Embedding) -> Result<Vec<Neighbor>, IndexError> {
        let snapshot = self.snapshot();
        snapshot.check_dimension(probe)?;

        let mut neighbors: Vec<Neighbor> = snapshot
            .entries()
            .iter()
            .enumerate()
            .map(|(position, entry)| Neighbor {
                position,
                embedding_id: entry.embedding_id,
                employee_id: entry.employee_id,
                distance: probe.euclidean_distance(&entry.embedding),
            })
            .collect();
        neighbors.sort_by(|a, b| a.distance.total_cmp(&b.distance));

        Ok(neighbors)
    }
}
