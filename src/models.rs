//! Core data models used throughout Retrieval Harness.
//!
//! These types represent the documents, chunks, and search results that flow
//! through the ingestion and retrieval pipeline.

use serde::Serialize;

/// Raw item produced by a document source before parsing.
#[derive(Debug, Clone)]
pub struct RawDocument {
    pub source: String,
    pub source_id: String,
    pub source_url: Option<String>,
    pub title: Option<String>,
    pub content_type: String,
    pub body: String,
}

/// Ingestion state of a document.
///
/// `Failed` is reachable from every other state; only `Done` documents are
/// considered query-eligible by the consistency invariant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentStatus {
    Received,
    Parsed,
    Chunked,
    Embedding,
    Indexed,
    Done,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Received => "received",
            DocumentStatus::Parsed => "parsed",
            DocumentStatus::Chunked => "chunked",
            DocumentStatus::Embedding => "embedding",
            DocumentStatus::Indexed => "indexed",
            DocumentStatus::Done => "done",
            DocumentStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> DocumentStatus {
        match s {
            "received" => DocumentStatus::Received,
            "parsed" => DocumentStatus::Parsed,
            "chunked" => DocumentStatus::Chunked,
            "embedding" => DocumentStatus::Embedding,
            "indexed" => DocumentStatus::Indexed,
            "done" => DocumentStatus::Done,
            _ => DocumentStatus::Failed,
        }
    }
}

/// Normalized document record.
///
/// Immutable once `Done` except through re-ingestion: an unchanged
/// `content_hash` is a no-op, a changed hash replaces the whole chunk set.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub source: String,
    pub source_id: String,
    pub source_url: Option<String>,
    pub title: Option<String>,
    pub body: String,
    pub content_hash: String,
    pub ingested_at: i64,
    pub status: DocumentStatus,
}

/// A chunk of a document's parsed text.
///
/// Chunk IDs are `{document_id}#{ordinal}` so that re-ingesting identical
/// content produces an identical chunk set. Offsets index into the parsed
/// document text; starts are strictly increasing, and `end_offset` may
/// extend past the next chunk's start by the configured trailing overlap.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub ordinal: i64,
    pub text: String,
    pub start_offset: usize,
    pub end_offset: usize,
}

impl Chunk {
    /// Build the stable chunk ID for a document ordinal.
    pub fn id_for(document_id: &str, ordinal: i64) -> String {
        format!("{document_id}#{ordinal}")
    }
}

/// A fused search result returned to callers.
///
/// Both raw sub-scores are exposed alongside the fused score; a chunk absent
/// from one candidate list carries `0.0` for that score. Never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub chunk_id: String,
    pub document_id: String,
    /// Raw cosine similarity from the vector store (0.0 if not a vector hit).
    pub vector_score: f64,
    /// Raw lexical score from the full-text index (0.0 if not a lexical hit).
    pub lexical_score: f64,
    /// Fused relevance score, produced by the configured fusion strategy.
    pub score: f64,
    pub snippet: String,
}

/// Outcome counters for one ingestion run.
#[derive(Debug, Default, Clone, Serialize)]
pub struct IngestReport {
    pub documents: usize,
    pub ingested: usize,
    pub skipped: usize,
    pub failed: usize,
    pub chunks_written: usize,
}
