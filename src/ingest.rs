//! Ingestion pipeline orchestration.
//!
//! Each document walks the state machine
//! `Received → Parsed → Chunked → Embedding → Indexed → Done`, with
//! `Failed` reachable from every state. The two indexes are independent
//! stores with no shared transaction, so consistency is kept by ordering and
//! compensation:
//!
//! - per chunk, the lexical write precedes the paired vector write, so at
//!   any instant the vector index holds a subset of the lexical index;
//! - any failure after a partial write triggers a compensating
//!   delete-by-document against both indexes before the worker moves on.
//!
//! Re-ingesting a document whose content hash is unchanged is a no-op.
//! A changed hash replaces the previous chunk set (delete-then-reinsert);
//! retries of the replace converge because chunk IDs are derived from the
//! document ID and ordinal.
//!
//! Documents are processed by a bounded worker pool; one document's failure
//! never aborts the rest of the batch.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::chunker::{chunk_text, ChunkerParams};
use crate::embedding::EmbeddingService;
use crate::error::{RetrievalError, Result};
use crate::models::{Chunk, Document, DocumentStatus, IngestReport, RawDocument};
use crate::parse;
use crate::store::Corpus;

/// Outcome of ingesting a single document.
#[derive(Debug, PartialEq, Eq)]
pub enum DocOutcome {
    /// Parsed, chunked, embedded, and indexed; carries the chunk count.
    Ingested(usize),
    /// Content hash unchanged since the last successful ingestion.
    Skipped,
}

/// Batch ingestion coordinator.
pub struct IngestionPipeline {
    corpus: Corpus,
    embeddings: Arc<EmbeddingService>,
    chunker: ChunkerParams,
    workers: usize,
}

impl IngestionPipeline {
    pub fn new(
        corpus: Corpus,
        embeddings: Arc<EmbeddingService>,
        chunker: ChunkerParams,
        workers: usize,
    ) -> Self {
        Self {
            corpus,
            embeddings,
            chunker,
            workers: workers.max(1),
        }
    }

    /// Ingest a batch of raw documents through the worker pool.
    ///
    /// Failures are isolated per document and reflected in the report.
    pub async fn ingest_all(&self, docs: Vec<RawDocument>) -> IngestReport {
        let mut report = IngestReport {
            documents: docs.len(),
            ..IngestReport::default()
        };

        let outcomes: Vec<(String, Result<DocOutcome>)> = stream::iter(docs)
            .map(|raw| async move {
                let label = format!("{}:{}", raw.source, raw.source_id);
                (label, self.ingest_one(raw).await)
            })
            .buffer_unordered(self.workers)
            .collect()
            .await;

        for (label, outcome) in outcomes {
            match outcome {
                Ok(DocOutcome::Ingested(chunks)) => {
                    report.ingested += 1;
                    report.chunks_written += chunks;
                }
                Ok(DocOutcome::Skipped) => report.skipped += 1,
                Err(e) => {
                    warn!(document = %label, error = %e, "document ingestion failed");
                    report.failed += 1;
                }
            }
        }

        info!(
            ingested = report.ingested,
            skipped = report.skipped,
            failed = report.failed,
            chunks = report.chunks_written,
            "ingestion batch finished"
        );
        report
    }

    /// Ingest one document through the full state machine.
    pub async fn ingest_one(&self, raw: RawDocument) -> Result<DocOutcome> {
        let content_hash = hash_content(&raw.body);

        let existing = self
            .corpus
            .catalog
            .find_by_source(&raw.source, &raw.source_id)
            .await?;

        if let Some(ref doc) = existing {
            if doc.status == DocumentStatus::Done && doc.content_hash == content_hash {
                debug!(document_id = %doc.id, "content hash unchanged; skipping");
                return Ok(DocOutcome::Skipped);
            }
        }

        let doc_id = existing
            .map(|d| d.id)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut doc = Document {
            id: doc_id.clone(),
            source: raw.source.clone(),
            source_id: raw.source_id.clone(),
            source_url: raw.source_url.clone(),
            title: raw.title.clone(),
            body: raw.body.clone(),
            content_hash,
            ingested_at: chrono::Utc::now().timestamp(),
            status: DocumentStatus::Received,
        };
        self.corpus.catalog.upsert(&doc).await?;

        match self.run_stages(&mut doc, &raw).await {
            Ok(chunk_count) => {
                // Full upsert rather than a status flip so the title the
                // parser extracted is persisted too.
                doc.status = DocumentStatus::Done;
                self.corpus.catalog.upsert(&doc).await?;
                Ok(DocOutcome::Ingested(chunk_count))
            }
            Err(e) => {
                self.rollback(&doc.id).await;
                self.corpus
                    .catalog
                    .set_status(&doc.id, DocumentStatus::Failed)
                    .await?;
                Err(e)
            }
        }
    }

    /// Parse → chunk → embed → dual-index write. Any error aborts to the
    /// caller's rollback path.
    async fn run_stages(&self, doc: &mut Document, raw: &RawDocument) -> Result<usize> {
        let parsed = parse::parse(&raw.content_type, &raw.body)?;
        if doc.title.is_none() {
            doc.title = parsed.title.clone();
        }
        self.advance(doc, DocumentStatus::Parsed).await?;

        let spans = chunk_text(&parsed.text, &self.chunker);
        if spans.is_empty() {
            return Err(RetrievalError::permanent("document produced no chunks"));
        }
        let chunks: Vec<Chunk> = spans
            .into_iter()
            .enumerate()
            .map(|(i, span)| Chunk {
                id: Chunk::id_for(&doc.id, i as i64),
                document_id: doc.id.clone(),
                ordinal: i as i64,
                text: span.text,
                start_offset: span.start,
                end_offset: span.end,
            })
            .collect();
        self.advance(doc, DocumentStatus::Chunked).await?;

        self.advance(doc, DocumentStatus::Embedding).await?;
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embeddings.embed_documents(&texts).await?;

        // Replace semantics: clear any prior chunk set before writing the
        // new one. Delete order (vector, then lexical) and write order
        // (lexical, then vector) both keep the vector index a subset of the
        // lexical index while the document is in flight.
        self.corpus.vectors.delete_document(&doc.id).await?;
        self.corpus.lexical.delete_document(&doc.id).await?;

        for (chunk, vector) in chunks.iter().zip(vectors.iter()) {
            self.corpus.lexical.upsert(chunk).await?;
            self.corpus.vectors.upsert(chunk, vector).await?;
        }
        self.advance(doc, DocumentStatus::Indexed).await?;

        Ok(chunks.len())
    }

    async fn advance(&self, doc: &mut Document, status: DocumentStatus) -> Result<()> {
        doc.status = status;
        self.corpus.catalog.set_status(&doc.id, status).await?;
        Ok(())
    }

    /// Compensating delete against both indexes. A rollback failure leaves
    /// the corpus inconsistent, which the audit surfaces; log it loudly.
    async fn rollback(&self, document_id: &str) {
        if let Err(e) = self.corpus.vectors.delete_document(document_id).await {
            error!(document_id, error = %e, "rollback failed for vector store");
        }
        if let Err(e) = self.corpus.lexical.delete_document(document_id).await {
            error!(document_id, error = %e, "rollback failed for lexical index");
        }
    }
}

/// SHA-256 content hash used for change detection.
pub fn hash_content(body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_content_stable() {
        assert_eq!(hash_content("abc"), hash_content("abc"));
        assert_ne!(hash_content("abc"), hash_content("abd"));
        assert_eq!(hash_content("abc").len(), 64);
    }
}
