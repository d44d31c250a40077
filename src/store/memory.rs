//! In-memory store implementations for testing.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock` for thread safety.
//! Vector search is brute-force cosine similarity; lexical search is a real
//! BM25 over an inverted index so ranking semantics (term-frequency
//! saturation, length normalization, idf) can be tested without SQLite.
//!
//! Tokenization policy: Unicode lowercase, split on any non-alphanumeric
//! character. This must stay stable — changing it invalidates scores.

use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::{Chunk, Document, DocumentStatus};

use super::{
    CatalogCounts, ChunkCandidate, DocumentCatalog, LexicalIndex, VectorStore,
};

const SNIPPET_CHARS: usize = 240;

/// BM25 ranking parameters for the in-memory lexical index.
#[derive(Debug, Clone, Copy)]
pub struct Bm25Params {
    pub k1: f64,
    pub b: f64,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 1.2, b: 0.75 }
    }
}

/// Split text into lowercase alphanumeric tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn snippet_of(text: &str) -> String {
    text.chars().take(SNIPPET_CHARS).collect()
}

// ============ Document catalog ============

/// In-memory [`DocumentCatalog`].
#[derive(Default)]
pub struct MemoryCatalog {
    docs: RwLock<HashMap<String, Document>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentCatalog for MemoryCatalog {
    async fn find_by_source(&self, source: &str, source_id: &str) -> Result<Option<Document>> {
        let docs = self.docs.read().unwrap();
        Ok(docs
            .values()
            .find(|d| d.source == source && d.source_id == source_id)
            .cloned())
    }

    async fn upsert(&self, doc: &Document) -> Result<()> {
        self.docs
            .write()
            .unwrap()
            .insert(doc.id.clone(), doc.clone());
        Ok(())
    }

    async fn set_status(&self, id: &str, status: DocumentStatus) -> Result<()> {
        if let Some(doc) = self.docs.write().unwrap().get_mut(id) {
            doc.status = status;
        }
        Ok(())
    }

    async fn counts(&self) -> Result<CatalogCounts> {
        let docs = self.docs.read().unwrap();
        Ok(CatalogCounts {
            documents: docs.len(),
            done: docs
                .values()
                .filter(|d| d.status == DocumentStatus::Done)
                .count(),
            failed: docs
                .values()
                .filter(|d| d.status == DocumentStatus::Failed)
                .count(),
        })
    }
}

// ============ Vector store ============

struct StoredVector {
    chunk_id: String,
    document_id: String,
    vector: Vec<f32>,
    snippet: String,
}

/// In-memory [`VectorStore`] with brute-force cosine search.
#[derive(Default)]
pub struct MemoryVectorStore {
    vectors: RwLock<Vec<StoredVector>>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn upsert(&self, chunk: &Chunk, vector: &[f32]) -> Result<()> {
        let mut vectors = self.vectors.write().unwrap();
        vectors.retain(|sv| sv.chunk_id != chunk.id);
        vectors.push(StoredVector {
            chunk_id: chunk.id.clone(),
            document_id: chunk.document_id.clone(),
            vector: vector.to_vec(),
            snippet: snippet_of(&chunk.text),
        });
        Ok(())
    }

    async fn delete_document(&self, document_id: &str) -> Result<()> {
        self.vectors
            .write()
            .unwrap()
            .retain(|sv| sv.document_id != document_id);
        Ok(())
    }

    async fn nearest_neighbors(&self, query: &[f32], k: usize) -> Result<Vec<ChunkCandidate>> {
        let vectors = self.vectors.read().unwrap();
        let mut candidates: Vec<ChunkCandidate> = vectors
            .iter()
            .map(|sv| ChunkCandidate {
                chunk_id: sv.chunk_id.clone(),
                document_id: sv.document_id.clone(),
                raw_score: cosine_similarity(query, &sv.vector) as f64,
                snippet: sv.snippet.clone(),
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.raw_score
                .partial_cmp(&a.raw_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        candidates.truncate(k);
        Ok(candidates)
    }

    async fn chunk_ids(&self) -> Result<BTreeSet<String>> {
        Ok(self
            .vectors
            .read()
            .unwrap()
            .iter()
            .map(|sv| sv.chunk_id.clone())
            .collect())
    }
}

// ============ Lexical index (BM25) ============

struct LexicalEntry {
    chunk_id: String,
    document_id: String,
    snippet: String,
    /// Term → occurrence count within this chunk.
    term_counts: HashMap<String, usize>,
    length: usize,
}

/// In-memory [`LexicalIndex`] scoring with BM25.
pub struct MemoryLexicalIndex {
    params: Bm25Params,
    entries: RwLock<Vec<LexicalEntry>>,
}

impl MemoryLexicalIndex {
    pub fn new(params: Bm25Params) -> Self {
        Self {
            params,
            entries: RwLock::new(Vec::new()),
        }
    }
}

impl Default for MemoryLexicalIndex {
    fn default() -> Self {
        Self::new(Bm25Params::default())
    }
}

#[async_trait]
impl LexicalIndex for MemoryLexicalIndex {
    async fn upsert(&self, chunk: &Chunk) -> Result<()> {
        let tokens = tokenize(&chunk.text);
        let mut term_counts: HashMap<String, usize> = HashMap::new();
        for token in &tokens {
            *term_counts.entry(token.clone()).or_insert(0) += 1;
        }

        let mut entries = self.entries.write().unwrap();
        entries.retain(|e| e.chunk_id != chunk.id);
        entries.push(LexicalEntry {
            chunk_id: chunk.id.clone(),
            document_id: chunk.document_id.clone(),
            snippet: snippet_of(&chunk.text),
            length: tokens.len(),
            term_counts,
        });
        Ok(())
    }

    async fn delete_document(&self, document_id: &str) -> Result<()> {
        self.entries
            .write()
            .unwrap()
            .retain(|e| e.document_id != document_id);
        Ok(())
    }

    async fn search(&self, query: &str, k: usize) -> Result<Vec<ChunkCandidate>> {
        let terms = tokenize(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let entries = self.entries.read().unwrap();
        let n = entries.len();
        if n == 0 {
            return Ok(Vec::new());
        }

        let avg_len: f64 =
            entries.iter().map(|e| e.length as f64).sum::<f64>() / n as f64;

        // Document frequency per query term.
        let mut df: HashMap<&str, usize> = HashMap::new();
        for term in &terms {
            let count = entries
                .iter()
                .filter(|e| e.term_counts.contains_key(term.as_str()))
                .count();
            df.insert(term.as_str(), count);
        }

        let Bm25Params { k1, b } = self.params;
        let mut candidates: Vec<ChunkCandidate> = entries
            .iter()
            .filter_map(|entry| {
                let mut score = 0.0;
                for term in &terms {
                    let tf = *entry.term_counts.get(term.as_str()).unwrap_or(&0) as f64;
                    if tf == 0.0 {
                        continue;
                    }
                    let dfi = df[term.as_str()] as f64;
                    let idf = ((n as f64 - dfi + 0.5) / (dfi + 0.5) + 1.0).ln();
                    let norm = k1 * (1.0 - b + b * entry.length as f64 / avg_len.max(1.0));
                    score += idf * (tf * (k1 + 1.0)) / (tf + norm);
                }
                (score > 0.0).then(|| ChunkCandidate {
                    chunk_id: entry.chunk_id.clone(),
                    document_id: entry.document_id.clone(),
                    raw_score: score,
                    snippet: entry.snippet.clone(),
                })
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.raw_score
                .partial_cmp(&a.raw_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        candidates.truncate(k);
        Ok(candidates)
    }

    async fn chunk_ids(&self) -> Result<BTreeSet<String>> {
        Ok(self
            .entries
            .read()
            .unwrap()
            .iter()
            .map(|e| e.chunk_id.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::audit_consistency;

    fn chunk(id: &str, doc: &str, text: &str) -> Chunk {
        Chunk {
            id: id.to_string(),
            document_id: doc.to_string(),
            ordinal: 0,
            text: text.to_string(),
            start_offset: 0,
            end_offset: text.len(),
        }
    }

    #[test]
    fn test_tokenize_policy() {
        assert_eq!(tokenize("Hello, World!"), vec!["hello", "world"]);
        assert_eq!(tokenize("foo-bar_baz 42"), vec!["foo", "bar", "baz", "42"]);
        assert!(tokenize("...").is_empty());
    }

    #[tokio::test]
    async fn test_bm25_ranks_matching_chunk_first() {
        let index = MemoryLexicalIndex::default();
        index
            .upsert(&chunk("c1", "d1", "the fox jumps over the fence"))
            .await
            .unwrap();
        index
            .upsert(&chunk("c2", "d2", "a completely unrelated sentence"))
            .await
            .unwrap();

        let hits = index.search("fox", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, "c1");
        assert!(hits[0].raw_score > 0.0);
    }

    #[tokio::test]
    async fn test_bm25_term_frequency_saturates() {
        let index = MemoryLexicalIndex::default();
        index
            .upsert(&chunk("c1", "d1", "fox cat cat cat cat cat cat"))
            .await
            .unwrap();
        index
            .upsert(&chunk("c2", "d2", "fox fox cat cat cat cat cat"))
            .await
            .unwrap();
        index
            .upsert(&chunk("c3", "d3", "dog dog dog dog dog dog dog"))
            .await
            .unwrap();

        let hits = index.search("fox", 10).await.unwrap();
        assert_eq!(hits[0].chunk_id, "c2");
        // Doubling tf must less than double the score (diminishing returns).
        let single = hits.iter().find(|h| h.chunk_id == "c1").unwrap().raw_score;
        let double = hits[0].raw_score;
        assert!(double > single);
        assert!(double < single * 2.0);
    }

    #[tokio::test]
    async fn test_bm25_length_normalization() {
        let index = MemoryLexicalIndex::default();
        let long_tail = "filler ".repeat(50);
        index
            .upsert(&chunk("short", "d1", "fox den"))
            .await
            .unwrap();
        index
            .upsert(&chunk("long", "d2", &format!("fox den {long_tail}")))
            .await
            .unwrap();

        let hits = index.search("fox", 10).await.unwrap();
        assert_eq!(hits[0].chunk_id, "short", "shorter chunk must outrank longer at equal tf");
    }

    #[tokio::test]
    async fn test_bm25_idf_prefers_rare_terms() {
        let index = MemoryLexicalIndex::default();
        index
            .upsert(&chunk("c1", "d1", "common rare"))
            .await
            .unwrap();
        index
            .upsert(&chunk("c2", "d2", "common word"))
            .await
            .unwrap();
        index
            .upsert(&chunk("c3", "d3", "common term"))
            .await
            .unwrap();

        let hits = index.search("common rare", 10).await.unwrap();
        assert_eq!(hits[0].chunk_id, "c1", "chunk with the rare term wins");
        let c1 = hits[0].raw_score;
        let c2 = hits.iter().find(|h| h.chunk_id == "c2").unwrap().raw_score;
        assert!(c1 > c2 * 1.5, "rare-term contribution should dominate");
    }

    #[tokio::test]
    async fn test_vector_store_nearest_neighbors() {
        let store = MemoryVectorStore::new();
        store
            .upsert(&chunk("c1", "d1", "alpha"), &[1.0, 0.0, 0.0])
            .await
            .unwrap();
        store
            .upsert(&chunk("c2", "d2", "beta"), &[0.0, 1.0, 0.0])
            .await
            .unwrap();

        let hits = store.nearest_neighbors(&[0.9, 0.1, 0.0], 2).await.unwrap();
        assert_eq!(hits[0].chunk_id, "c1");
        assert!(hits[0].raw_score > hits[1].raw_score);
    }

    #[tokio::test]
    async fn test_delete_document_cascades() {
        let store = MemoryVectorStore::new();
        let index = MemoryLexicalIndex::default();
        for ordinal in 0..3 {
            let c = chunk(&format!("d1#{ordinal}"), "d1", "some text here");
            store.upsert(&c, &[1.0, 0.0]).await.unwrap();
            index.upsert(&c).await.unwrap();
        }
        let other = chunk("d2#0", "d2", "other text");
        store.upsert(&other, &[0.0, 1.0]).await.unwrap();
        index.upsert(&other).await.unwrap();

        store.delete_document("d1").await.unwrap();
        index.delete_document("d1").await.unwrap();

        assert_eq!(store.chunk_ids().await.unwrap().len(), 1);
        assert_eq!(index.chunk_ids().await.unwrap().len(), 1);
        let report = audit_consistency(&store, &index).await.unwrap();
        assert!(report.is_consistent());
    }

    #[tokio::test]
    async fn test_audit_detects_divergence() {
        let store = MemoryVectorStore::new();
        let index = MemoryLexicalIndex::default();
        let c = chunk("d1#0", "d1", "text");
        store.upsert(&c, &[1.0]).await.unwrap();

        let report = audit_consistency(&store, &index).await.unwrap();
        assert!(!report.is_consistent());
        assert_eq!(report.vector_only, vec!["d1#0".to_string()]);
        assert!(report.lexical_only.is_empty());
    }

    #[tokio::test]
    async fn test_upsert_replaces_existing() {
        let index = MemoryLexicalIndex::default();
        index.upsert(&chunk("c1", "d1", "old text")).await.unwrap();
        index.upsert(&chunk("c1", "d1", "new text")).await.unwrap();
        assert_eq!(index.chunk_ids().await.unwrap().len(), 1);
        let hits = index.search("new", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(index.search("old", 10).await.unwrap().is_empty());
    }
}
