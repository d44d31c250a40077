//! Storage abstraction for the two retrieval indexes and the document
//! catalog.
//!
//! The [`VectorStore`] and [`LexicalIndex`] traits define the operations the
//! ingestion pipeline and query service need, enabling pluggable backends
//! (SQLite for the CLI/server, in-memory for tests). The two indexes are
//! deliberately independent — there is no cross-index transaction; the
//! pipeline keeps them consistent with compensating deletes.
//!
//! Implementations must be `Send + Sync` to work with the async runtime.

pub mod memory;
pub mod sqlite;

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Chunk, Document, DocumentStatus};

/// A candidate chunk returned from vector or lexical search.
///
/// Carries enough information to perform score normalization and fusion
/// without additional round-trips.
#[derive(Debug, Clone)]
pub struct ChunkCandidate {
    pub chunk_id: String,
    pub document_id: String,
    /// Raw score from the search backend (cosine similarity or BM25).
    pub raw_score: f64,
    /// Text excerpt for display.
    pub snippet: String,
}

/// Dense-vector index over chunk embeddings.
///
/// Similarity metric is cosine, matching the metric the corpus embeddings
/// were produced under. `delete_document` cascades to every chunk of the
/// document and is usable standalone to support replace-on-reingest.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or update the embedding for a chunk.
    async fn upsert(&self, chunk: &Chunk, vector: &[f32]) -> Result<()>;

    /// Remove every vector belonging to the document.
    async fn delete_document(&self, document_id: &str) -> Result<()>;

    /// Top-k chunks by cosine similarity, highest first.
    async fn nearest_neighbors(&self, query: &[f32], k: usize) -> Result<Vec<ChunkCandidate>>;

    /// All chunk IDs currently indexed (consistency audit).
    async fn chunk_ids(&self) -> Result<BTreeSet<String>>;
}

/// Full-text index over chunk text with BM25-style relevance.
///
/// Tokenization policy is backend-specific but must be stable; changing it
/// invalidates existing scores and requires reindexing.
#[async_trait]
pub trait LexicalIndex: Send + Sync {
    /// Insert or update the text entry for a chunk.
    async fn upsert(&self, chunk: &Chunk) -> Result<()>;

    /// Remove every entry belonging to the document.
    async fn delete_document(&self, document_id: &str) -> Result<()>;

    /// Top-k chunks by lexical score, highest first.
    async fn search(&self, query: &str, k: usize) -> Result<Vec<ChunkCandidate>>;

    /// All chunk IDs currently indexed (consistency audit).
    async fn chunk_ids(&self) -> Result<BTreeSet<String>>;
}

/// Document records: identity, content hash, and ingestion status.
#[async_trait]
pub trait DocumentCatalog: Send + Sync {
    /// Look up a document by its source coordinates.
    async fn find_by_source(&self, source: &str, source_id: &str) -> Result<Option<Document>>;

    /// Insert or update a document record.
    async fn upsert(&self, doc: &Document) -> Result<()>;

    /// Update the ingestion status of a document.
    async fn set_status(&self, id: &str, status: DocumentStatus) -> Result<()>;

    /// Count documents grouped by terminal state.
    async fn counts(&self) -> Result<CatalogCounts>;
}

/// Summary counters from [`DocumentCatalog::counts`].
#[derive(Debug, Default, Clone, Copy)]
pub struct CatalogCounts {
    pub documents: usize,
    pub done: usize,
    pub failed: usize,
}

/// The corpus: catalog plus both indexes, shared by the pipeline, the query
/// service, and the server.
#[derive(Clone)]
pub struct Corpus {
    pub catalog: Arc<dyn DocumentCatalog>,
    pub vectors: Arc<dyn VectorStore>,
    pub lexical: Arc<dyn LexicalIndex>,
}

/// Result of a dual-index consistency audit.
#[derive(Debug, Default)]
pub struct ConsistencyReport {
    /// Chunk IDs present in the vector store but missing from the lexical index.
    pub vector_only: Vec<String>,
    /// Chunk IDs present in the lexical index but missing from the vector store.
    pub lexical_only: Vec<String>,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.vector_only.is_empty() && self.lexical_only.is_empty()
    }
}

/// Audit the invariant that both indexes hold the same chunk ID set.
///
/// Any disagreement should be unreachable under correct operation and is
/// logged at ERROR by callers before repair.
pub async fn audit_consistency(
    vectors: &dyn VectorStore,
    lexical: &dyn LexicalIndex,
) -> Result<ConsistencyReport> {
    let vector_ids = vectors.chunk_ids().await?;
    let lexical_ids = lexical.chunk_ids().await?;

    Ok(ConsistencyReport {
        vector_only: vector_ids.difference(&lexical_ids).cloned().collect(),
        lexical_only: lexical_ids.difference(&vector_ids).cloned().collect(),
    })
}
