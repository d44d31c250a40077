//! Embedding client: external API abstraction, retry policy, and the
//! concurrency admission gate.
//!
//! The external embedding API is modeled as the [`Embedder`] capability
//! trait so the retry/backoff logic in [`EmbeddingService`] can be exercised
//! against a deterministic fake. The shipped implementation,
//! [`HttpEmbedder`], speaks the OpenAI-compatible `POST /embeddings`
//! contract and performs a single attempt per call — classification of the
//! failure (transient, rate-limited, permanent) is its job; retrying is the
//! service's.
//!
//! # Retry Strategy
//!
//! - network errors, timeouts, 5xx → exponential backoff (base × 2^attempt)
//! - 429 → backoff plus a cooldown, honoring `Retry-After` when present
//! - other 4xx, auth failures, dimension mismatches → fail immediately
//!
//! # Admission Gate
//!
//! All embedding calls — bulk ingestion and query-path alike — pass a global
//! semaphore bounding concurrent API calls. Bulk callers are additionally
//! capped one permit below the ceiling, so one slot is always available to
//! interactive query traffic.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::config::EmbeddingConfig;
use crate::error::{RetrievalError, Result};

/// A single-attempt embedding backend.
///
/// `embed` returns one vector per input text, in input order. Errors must be
/// classified: [`RetrievalError::is_retryable`] decides whether the service
/// retries the attempt.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;
    /// Embed one batch. One attempt; no internal retries.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Priority class for admission to the embedding API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    /// Bulk ingestion traffic; may be starved by the gate, never starves queries.
    Bulk,
    /// Interactive query traffic; has a reserved slot.
    Query,
}

/// Semaphore pair bounding concurrent embedding calls.
///
/// `total` is the global ceiling; `bulk` holds `total - 1` permits so bulk
/// ingestion can never occupy the whole gate. A query acquires only from
/// `total` and therefore always finds the reserved slot once in-flight
/// queries drain.
pub struct AdmissionGate {
    total: Arc<Semaphore>,
    bulk: Arc<Semaphore>,
}

/// Permits held for the duration of one embedding call.
pub struct AdmissionPermit {
    _total: tokio::sync::OwnedSemaphorePermit,
    _bulk: Option<tokio::sync::OwnedSemaphorePermit>,
}

impl AdmissionGate {
    pub fn new(max_concurrent: usize) -> Self {
        let ceiling = max_concurrent.max(1);
        Self {
            total: Arc::new(Semaphore::new(ceiling)),
            bulk: Arc::new(Semaphore::new(ceiling.saturating_sub(1).max(1))),
        }
    }

    /// Wait for admission. Bulk callers acquire the bulk cap first, then the
    /// global ceiling; queries go straight to the ceiling.
    pub async fn admit(&self, priority: Priority) -> std::result::Result<AdmissionPermit, RetrievalError> {
        let bulk = match priority {
            Priority::Bulk => Some(
                self.bulk
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|_| RetrievalError::Exhausted {
                        reason: "admission gate closed".to_string(),
                    })?,
            ),
            Priority::Query => None,
        };
        let total = self
            .total
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| RetrievalError::Exhausted {
                reason: "admission gate closed".to_string(),
            })?;
        Ok(AdmissionPermit {
            _total: total,
            _bulk: bulk,
        })
    }
}

/// Batching, retrying front-end over an [`Embedder`].
///
/// This is what the pipeline and query service call. It owns the admission
/// gate, splits oversized inputs into API-sized batches, retries retryable
/// failures with exponential backoff, and enforces the corpus-wide
/// dimension invariant.
pub struct EmbeddingService {
    embedder: Arc<dyn Embedder>,
    gate: AdmissionGate,
    batch_size: usize,
    max_retries: u32,
    backoff_base: Duration,
    cooldown: Duration,
    call_timeout: Duration,
}

impl EmbeddingService {
    pub fn new(embedder: Arc<dyn Embedder>, config: &EmbeddingConfig) -> Self {
        Self {
            embedder,
            gate: AdmissionGate::new(config.max_concurrent),
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            cooldown: Duration::from_millis(config.cooldown_ms),
            call_timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    pub fn model_name(&self) -> &str {
        self.embedder.model_name()
    }

    pub fn dims(&self) -> usize {
        self.embedder.dims()
    }

    /// Embed document chunks (bulk priority). Input order is preserved.
    pub async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let vectors = self.embed_batch(batch, Priority::Bulk).await?;
            out.extend(vectors);
        }
        Ok(out)
    }

    /// Embed a single query string (query priority, reserved slot).
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let texts = [text.to_string()];
        let vectors = self.embed_batch(&texts, Priority::Query).await?;
        vectors
            .into_iter()
            .next()
            .ok_or_else(|| RetrievalError::permanent("empty embedding response"))
    }

    async fn embed_batch(&self, texts: &[String], priority: Priority) -> Result<Vec<Vec<f32>>> {
        let mut last_err: Option<RetrievalError> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let mut delay = self.backoff_base * 2u32.pow((attempt - 1).min(5));
                if let Some(RetrievalError::RateLimited { retry_after }) = &last_err {
                    delay += retry_after.unwrap_or(self.cooldown);
                }
                debug!(attempt, ?delay, "retrying embedding batch");
                tokio::time::sleep(delay).await;
            }

            let _permit = self.gate.admit(priority).await?;
            let outcome = tokio::time::timeout(self.call_timeout, self.embedder.embed(texts)).await;

            let result = match outcome {
                Ok(r) => r,
                Err(_) => Err(RetrievalError::Timeout(self.call_timeout)),
            };

            match result {
                Ok(vectors) => {
                    self.check_dims(texts.len(), &vectors)?;
                    return Ok(vectors);
                }
                Err(e) if e.is_retryable() => {
                    warn!(attempt, error = %e, "embedding attempt failed");
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err
            .unwrap_or_else(|| RetrievalError::transient("embedding failed with no attempts")))
    }

    /// Enforce the corpus-wide dimension invariant: every returned vector
    /// must match the configured dimensionality, and the batch must match
    /// the input length. Violations are permanent, not retried.
    fn check_dims(&self, expected_len: usize, vectors: &[Vec<f32>]) -> Result<()> {
        if vectors.len() != expected_len {
            return Err(RetrievalError::permanent(format!(
                "embedding API returned {} vectors for {} inputs",
                vectors.len(),
                expected_len
            )));
        }
        let dims = self.embedder.dims();
        for v in vectors {
            if v.len() != dims {
                return Err(RetrievalError::permanent(format!(
                    "embedding dimension mismatch: got {}, expected {}",
                    v.len(),
                    dims
                )));
            }
        }
        Ok(())
    }
}

// ============ HTTP (OpenAI-compatible) embedder ============

/// Embedding backend speaking the OpenAI-compatible embeddings API.
///
/// Requires an API key in `EMBEDDING_API_KEY` (falling back to
/// `OPENAI_API_KEY`). One HTTP request per call; the surrounding
/// [`EmbeddingService`] handles batching and retries.
pub struct HttpEmbedder {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    dims: usize,
}

impl HttpEmbedder {
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for provider '{}'", config.provider))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for provider '{}'", config.provider))?;

        let api_key = std::env::var("EMBEDDING_API_KEY")
            .or_else(|_| std::env::var("OPENAI_API_KEY"))
            .map_err(|_| anyhow::anyhow!("EMBEDDING_API_KEY (or OPENAI_API_KEY) not set"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", config.base_url.trim_end_matches('/')),
            api_key,
            model,
            dims,
        })
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RetrievalError::Timeout(Duration::ZERO)
                } else {
                    RetrievalError::transient(format!("embedding request failed: {e}"))
                }
            })?;

        let status = response.status();

        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(RetrievalError::RateLimited { retry_after });
        }

        if status.is_server_error() {
            let text = response.text().await.unwrap_or_default();
            return Err(RetrievalError::transient(format!(
                "embedding API error {status}: {text}"
            )));
        }

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(RetrievalError::permanent(format!(
                "embedding API error {status}: {text}"
            )));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| RetrievalError::transient(format!("invalid embedding response: {e}")))?;

        parse_embedding_response(&json)
    }
}

/// Parse the OpenAI-style embeddings response, ordered by `index`.
fn parse_embedding_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| RetrievalError::permanent("embedding response missing data array"))?;

    let mut indexed: Vec<(usize, Vec<f32>)> = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| RetrievalError::permanent("embedding response missing embedding"))?;
        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        indexed.push((index, vec));
    }

    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Vector encoding helpers ============

/// Encode a float vector as a BLOB (little-endian f32 bytes) for SQLite.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity between two vectors, `0.0` for mismatched or empty input.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Deterministic fake: embeds by token-hash buckets, optionally failing
    /// the first N calls with a scripted error.
    struct ScriptedEmbedder {
        dims: usize,
        failures: Mutex<Vec<RetrievalError>>,
        calls: Mutex<u32>,
    }

    impl ScriptedEmbedder {
        fn new(dims: usize, failures: Vec<RetrievalError>) -> Self {
            Self {
                dims,
                failures: Mutex::new(failures),
                calls: Mutex::new(0),
            }
        }

        fn call_count(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl Embedder for ScriptedEmbedder {
        fn model_name(&self) -> &str {
            "scripted"
        }
        fn dims(&self) -> usize {
            self.dims
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            *self.calls.lock().unwrap() += 1;
            if let Some(err) = self.failures.lock().unwrap().pop() {
                return Err(err);
            }
            Ok(texts
                .iter()
                .map(|t| {
                    let mut v = vec![0.0f32; self.dims];
                    for token in t.split_whitespace() {
                        let h = token
                            .bytes()
                            .fold(0usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize));
                        v[h % self.dims] += 1.0;
                    }
                    v
                })
                .collect())
        }
    }

    fn fast_config(max_retries: u32) -> EmbeddingConfig {
        EmbeddingConfig {
            provider: "openai".to_string(),
            model: Some("scripted".to_string()),
            dims: Some(8),
            max_retries,
            backoff_base_ms: 1,
            cooldown_ms: 1,
            timeout_secs: 5,
            ..EmbeddingConfig::default()
        }
    }

    #[tokio::test]
    async fn test_rate_limit_then_success_retries() {
        let embedder = Arc::new(ScriptedEmbedder::new(
            8,
            vec![RetrievalError::RateLimited { retry_after: None }],
        ));
        let service = EmbeddingService::new(embedder.clone(), &fast_config(3));

        let vectors = service
            .embed_documents(&["hello world".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors.len(), 1);
        assert_eq!(vectors[0].len(), 8);
        assert_eq!(embedder.call_count(), 2, "one failure + one success");
    }

    #[tokio::test]
    async fn test_permanent_failure_not_retried() {
        let embedder = Arc::new(ScriptedEmbedder::new(
            8,
            vec![RetrievalError::permanent("bad auth")],
        ));
        let service = EmbeddingService::new(embedder.clone(), &fast_config(5));

        let err = service
            .embed_documents(&["text".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, RetrievalError::PermanentInput { .. }));
        assert_eq!(embedder.call_count(), 1, "no retries on permanent failure");
    }

    #[tokio::test]
    async fn test_retries_exhausted_surfaces_last_error() {
        let failures = (0..4)
            .map(|_| RetrievalError::transient("503"))
            .collect::<Vec<_>>();
        let embedder = Arc::new(ScriptedEmbedder::new(8, failures));
        let service = EmbeddingService::new(embedder.clone(), &fast_config(3));

        let err = service
            .embed_documents(&["text".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, RetrievalError::Transient { .. }));
        assert_eq!(embedder.call_count(), 4, "initial attempt + 3 retries");
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_permanent() {
        struct WrongDims;
        #[async_trait]
        impl Embedder for WrongDims {
            fn model_name(&self) -> &str {
                "wrong"
            }
            fn dims(&self) -> usize {
                8
            }
            async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
                Ok(texts.iter().map(|_| vec![0.0f32; 4]).collect())
            }
        }

        let service = EmbeddingService::new(Arc::new(WrongDims), &fast_config(3));
        let err = service
            .embed_documents(&["text".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, RetrievalError::PermanentInput { .. }));
    }

    #[tokio::test]
    async fn test_batching_preserves_order() {
        let embedder = Arc::new(ScriptedEmbedder::new(8, vec![]));
        let mut config = fast_config(0);
        config.batch_size = 2;
        let service = EmbeddingService::new(embedder.clone(), &config);

        let texts: Vec<String> = (0..5).map(|i| format!("text number {i}")).collect();
        let vectors = service.embed_documents(&texts).await.unwrap();
        assert_eq!(vectors.len(), 5);
        assert_eq!(embedder.call_count(), 3, "5 texts in batches of 2");

        // Same text embeds identically regardless of batch position.
        let again = service.embed_query("text number 3").await.unwrap();
        assert_eq!(again, vectors[3]);
    }

    #[tokio::test]
    async fn test_gate_reserves_query_slot() {
        let gate = AdmissionGate::new(2);

        // Bulk can hold at most ceiling - 1 permits.
        let b1 = gate.admit(Priority::Bulk).await.unwrap();
        let blocked = tokio::time::timeout(Duration::from_millis(50), gate.admit(Priority::Bulk)).await;
        assert!(blocked.is_err(), "second bulk acquisition must block");

        // A query still gets through on the reserved slot.
        let q = tokio::time::timeout(Duration::from_millis(50), gate.admit(Priority::Query)).await;
        assert!(q.is_ok(), "query must be admitted via the reserved slot");

        drop(b1);
        drop(q);
    }

    #[tokio::test]
    async fn test_gate_ceiling_bounds_everyone() {
        let gate = AdmissionGate::new(1);
        let q1 = gate.admit(Priority::Query).await.unwrap();
        let q2 = tokio::time::timeout(Duration::from_millis(50), gate.admit(Priority::Query)).await;
        assert!(q2.is_err(), "ceiling applies to queries too");
        drop(q1);
    }

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        let blob = vec_to_blob(&vec);
        assert_eq!(blob.len(), 20);
        assert_eq!(blob_to_vec(&blob), vec);
    }

    #[test]
    fn test_cosine_basics() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
    }

    #[test]
    fn test_parse_response_orders_by_index() {
        let json = serde_json::json!({
            "data": [
                { "index": 1, "embedding": [0.0, 1.0] },
                { "index": 0, "embedding": [1.0, 0.0] },
            ]
        });
        let vectors = parse_embedding_response(&json).unwrap();
        assert_eq!(vectors[0], vec![1.0, 0.0]);
        assert_eq!(vectors[1], vec![0.0, 1.0]);
    }
}
