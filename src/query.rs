//! Query service: the online read path.
//!
//! A search embeds the query text (through the admission gate's reserved
//! query slot), runs the vector and lexical sub-searches concurrently, and
//! fuses the two candidate lists. Each sub-search runs under a deadline; a
//! failed or timed-out sub-search degrades to the other channel rather than
//! failing the query. Query embedding failures, by contrast, propagate the
//! embedding client's failure semantics in vector and hybrid modes.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::RetrievalConfig;
use crate::embedding::EmbeddingService;
use crate::error::{RetrievalError, Result};
use crate::fusion::FusionStrategy;
use crate::models::SearchHit;
use crate::store::{ChunkCandidate, Corpus};

/// Which retrieval channels a search uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    Hybrid,
    Vector,
    Lexical,
}

impl SearchMode {
    pub fn parse(s: &str) -> anyhow::Result<SearchMode> {
        match s {
            "hybrid" => Ok(SearchMode::Hybrid),
            "vector" | "semantic" => Ok(SearchMode::Vector),
            "lexical" | "keyword" => Ok(SearchMode::Lexical),
            other => anyhow::bail!("Unknown search mode: {}. Use hybrid, vector, or lexical.", other),
        }
    }
}

/// Read-path entry point over a [`Corpus`].
///
/// Instances are cheap to share; all operations are read-only and may run
/// fully in parallel.
pub struct QueryService {
    corpus: Corpus,
    embeddings: Option<Arc<EmbeddingService>>,
    fusion: Box<dyn FusionStrategy>,
    candidate_k: usize,
    default_k: usize,
    search_timeout: Duration,
}

impl QueryService {
    pub fn new(
        corpus: Corpus,
        embeddings: Option<Arc<EmbeddingService>>,
        fusion: Box<dyn FusionStrategy>,
        retrieval: &RetrievalConfig,
    ) -> Self {
        Self {
            corpus,
            embeddings,
            fusion,
            candidate_k: retrieval.candidate_k,
            default_k: retrieval.default_k,
            search_timeout: Duration::from_secs(retrieval.timeout_secs),
        }
    }

    pub fn default_k(&self) -> usize {
        self.default_k
    }

    /// Run a search and return the fused top-k.
    ///
    /// An empty or whitespace query, or an empty corpus, returns an empty
    /// list — that is a successful "no results", distinct from a failure.
    pub async fn search(&self, query: &str, k: usize, mode: SearchMode) -> Result<Vec<SearchHit>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let (vector_hits, lexical_hits) = match mode {
            SearchMode::Lexical => (Vec::new(), self.lexical_candidates(query).await?),
            SearchMode::Vector => (self.vector_candidates(query).await?, Vec::new()),
            SearchMode::Hybrid => {
                let (vector, lexical) = tokio::join!(
                    self.vector_candidates(query),
                    self.lexical_candidates(query),
                );
                // A failed lexical channel degrades to vector-only; a failed
                // vector channel degrades to lexical-only. Embedding errors
                // propagate unless the lexical channel can still answer.
                match (vector, lexical) {
                    (Ok(v), Ok(l)) => (v, l),
                    (Ok(v), Err(e)) => {
                        warn!(error = %e, "lexical search failed; answering from vector channel");
                        (v, Vec::new())
                    }
                    (Err(e), Ok(l)) if !l.is_empty() => {
                        warn!(error = %e, "vector search failed; answering from lexical channel");
                        (Vec::new(), l)
                    }
                    (Err(e), _) => return Err(e),
                }
            }
        };

        debug!(
            vector = vector_hits.len(),
            lexical = lexical_hits.len(),
            "fusing candidates"
        );

        Ok(self.fusion.fuse(&vector_hits, &lexical_hits, k))
    }

    async fn vector_candidates(&self, query: &str) -> Result<Vec<ChunkCandidate>> {
        let embeddings = self.embeddings.as_ref().ok_or_else(|| {
            RetrievalError::permanent("embedding provider is disabled; vector search unavailable")
        })?;

        let query_vec = embeddings.embed_query(query).await?;

        tokio::time::timeout(
            self.search_timeout,
            self.corpus.vectors.nearest_neighbors(&query_vec, self.candidate_k),
        )
        .await
        .map_err(|_| RetrievalError::Timeout(self.search_timeout))?
        .map_err(RetrievalError::from)
    }

    async fn lexical_candidates(&self, query: &str) -> Result<Vec<ChunkCandidate>> {
        tokio::time::timeout(
            self.search_timeout,
            self.corpus.lexical.search(query, self.candidate_k),
        )
        .await
        .map_err(|_| RetrievalError::Timeout(self.search_timeout))?
        .map_err(RetrievalError::from)
    }
}
