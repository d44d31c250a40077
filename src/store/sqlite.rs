//! SQLite-backed store implementations.
//!
//! The lexical index pairs a `chunks` table (canonical chunk text and
//! offsets) with an FTS5 virtual table whose built-in BM25 ranking supplies
//! the lexical score (`rank` is negated so higher = better). The vector
//! store keeps little-endian f32 BLOBs and computes cosine similarity in
//! Rust, like the rest of the corpus tooling.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::models::{Chunk, Document, DocumentStatus};

use super::{
    CatalogCounts, ChunkCandidate, Corpus, DocumentCatalog, LexicalIndex, VectorStore,
};

/// Build a [`Corpus`] from a shared SQLite pool.
pub fn corpus(pool: SqlitePool) -> Corpus {
    Corpus {
        catalog: Arc::new(SqliteCatalog::new(pool.clone())),
        vectors: Arc::new(SqliteVectorStore::new(pool.clone())),
        lexical: Arc::new(SqliteLexicalIndex::new(pool)),
    }
}

/// Escape a free-form query into FTS5 syntax: each token quoted, joined
/// with OR. Mirrors the in-memory tokenization policy (lowercase,
/// alphanumeric runs) so both backends match the same terms.
fn fts_query(query: &str) -> Option<String> {
    let tokens = super::memory::tokenize(query);
    if tokens.is_empty() {
        return None;
    }
    Some(
        tokens
            .iter()
            .map(|t| format!("\"{t}\""))
            .collect::<Vec<_>>()
            .join(" OR "),
    )
}

// ============ Document catalog ============

pub struct SqliteCatalog {
    pool: SqlitePool,
}

impl SqliteCatalog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DocumentCatalog for SqliteCatalog {
    async fn find_by_source(&self, source: &str, source_id: &str) -> Result<Option<Document>> {
        let row = sqlx::query(
            "SELECT id, source, source_id, source_url, title, body, content_hash, status, ingested_at
             FROM documents WHERE source = ? AND source_id = ?",
        )
        .bind(source)
        .bind(source_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| Document {
            id: r.get("id"),
            source: r.get("source"),
            source_id: r.get("source_id"),
            source_url: r.get("source_url"),
            title: r.get("title"),
            body: r.get("body"),
            content_hash: r.get("content_hash"),
            ingested_at: r.get("ingested_at"),
            status: DocumentStatus::parse(r.get("status")),
        }))
    }

    async fn upsert(&self, doc: &Document) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (id, source, source_id, source_url, title, body, content_hash, status, ingested_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(source, source_id) DO UPDATE SET
                source_url = excluded.source_url,
                title = excluded.title,
                body = excluded.body,
                content_hash = excluded.content_hash,
                status = excluded.status,
                ingested_at = excluded.ingested_at
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.source)
        .bind(&doc.source_id)
        .bind(&doc.source_url)
        .bind(&doc.title)
        .bind(&doc.body)
        .bind(&doc.content_hash)
        .bind(doc.status.as_str())
        .bind(doc.ingested_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_status(&self, id: &str, status: DocumentStatus) -> Result<()> {
        sqlx::query("UPDATE documents SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn counts(&self) -> Result<CatalogCounts> {
        let documents: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await?;
        let done: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE status = 'done'")
                .fetch_one(&self.pool)
                .await?;
        let failed: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE status = 'failed'")
                .fetch_one(&self.pool)
                .await?;

        Ok(CatalogCounts {
            documents: documents as usize,
            done: done as usize,
            failed: failed as usize,
        })
    }
}

// ============ Vector store ============

pub struct SqliteVectorStore {
    pool: SqlitePool,
}

impl SqliteVectorStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn upsert(&self, chunk: &Chunk, vector: &[f32]) -> Result<()> {
        let blob = vec_to_blob(vector);
        sqlx::query(
            r#"
            INSERT INTO chunk_vectors (chunk_id, document_id, dims, embedding)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(chunk_id) DO UPDATE SET
                document_id = excluded.document_id,
                dims = excluded.dims,
                embedding = excluded.embedding
            "#,
        )
        .bind(&chunk.id)
        .bind(&chunk.document_id)
        .bind(vector.len() as i64)
        .bind(&blob)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_document(&self, document_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM chunk_vectors WHERE document_id = ?")
            .bind(document_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn nearest_neighbors(&self, query: &[f32], k: usize) -> Result<Vec<ChunkCandidate>> {
        let rows = sqlx::query(
            r#"
            SELECT cv.chunk_id, cv.document_id, cv.embedding,
                   COALESCE(substr(c.text, 1, 240), '') AS snippet
            FROM chunk_vectors cv
            LEFT JOIN chunks c ON c.id = cv.chunk_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut candidates: Vec<ChunkCandidate> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let vec = blob_to_vec(&blob);
                ChunkCandidate {
                    chunk_id: row.get("chunk_id"),
                    document_id: row.get("document_id"),
                    raw_score: cosine_similarity(query, &vec) as f64,
                    snippet: row.get("snippet"),
                }
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
        let ids: Vec<String> = sqlx::query_scalar("SELECT chunk_id FROM chunk_vectors")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids.into_iter().collect())
    }
}

// ============ Lexical index (FTS5) ============

pub struct SqliteLexicalIndex {
    pool: SqlitePool,
}

impl SqliteLexicalIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LexicalIndex for SqliteLexicalIndex {
    async fn upsert(&self, chunk: &Chunk) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chunks_fts WHERE chunk_id = ?")
            .bind(&chunk.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM chunks WHERE id = ?")
            .bind(&chunk.id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "INSERT INTO chunks (id, document_id, ordinal, text, start_offset, end_offset)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&chunk.id)
        .bind(&chunk.document_id)
        .bind(chunk.ordinal)
        .bind(&chunk.text)
        .bind(chunk.start_offset as i64)
        .bind(chunk.end_offset as i64)
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO chunks_fts (chunk_id, document_id, text) VALUES (?, ?, ?)")
            .bind(&chunk.id)
            .bind(&chunk.document_id)
            .bind(&chunk.text)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn delete_document(&self, document_id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM chunks_fts WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn search(&self, query: &str, k: usize) -> Result<Vec<ChunkCandidate>> {
        let Some(match_expr) = fts_query(query) else {
            return Ok(Vec::new());
        };

        let rows = sqlx::query(
            r#"
            SELECT chunk_id, document_id, rank,
                   snippet(chunks_fts, 2, '>>>', '<<<', '...', 48) AS snippet
            FROM chunks_fts
            WHERE chunks_fts MATCH ?
            ORDER BY rank
            LIMIT ?
            "#,
        )
        .bind(&match_expr)
        .bind(k as i64)
        .fetch_all(&self.pool)
        .await?;

        let candidates: Vec<ChunkCandidate> = rows
            .iter()
            .map(|row| {
                let rank: f64 = row.get("rank");
                ChunkCandidate {
                    chunk_id: row.get("chunk_id"),
                    document_id: row.get("document_id"),
                    // FTS5 rank is "lower is better"; negate so higher = better.
                    raw_score: -rank,
                    snippet: row.get("snippet"),
                }
            })
            .collect();

        Ok(candidates)
    }

    async fn chunk_ids(&self) -> Result<BTreeSet<String>> {
        let ids: Vec<String> = sqlx::query_scalar("SELECT chunk_id FROM chunks_fts")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids.into_iter().collect())
    }
}
