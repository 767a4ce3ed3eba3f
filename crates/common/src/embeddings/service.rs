//! Embedding service with one-way fallback
//!
//! The service test-embeds with the remote model once. Any failure, then or
//! later, moves it to the local hash embedder for the rest of its life.

use super::{Embedder, HashEmbedder};
use crate::errors::{AppError, Result};
use crate::metrics;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Longest text sent to any embedder, in characters
const MAX_EMBED_CHARS: usize = 512;

const MODE_UNINITIALIZED: u8 = 0;
const MODE_REMOTE: u8 = 1;
const MODE_FALLBACK: u8 = 2;

/// Embedding service shared by the ingestion pipeline
pub struct EmbeddingService {
    remote: Option<Arc<dyn Embedder>>,
    fallback: HashEmbedder,
    mode: AtomicU8,
    remote_dimension: AtomicUsize,
    init_lock: Mutex<()>,
}

impl EmbeddingService {
    /// Create a service; `remote` is the optional pretrained model
    pub fn new(remote: Option<Arc<dyn Embedder>>) -> Self {
        Self {
            remote,
            fallback: HashEmbedder::new(),
            mode: AtomicU8::new(MODE_UNINITIALIZED),
            remote_dimension: AtomicUsize::new(0),
            init_lock: Mutex::new(()),
        }
    }

    /// A service that never leaves the local fallback
    pub fn local() -> Self {
        let service = Self::new(None);
        service.mode.store(MODE_FALLBACK, Ordering::SeqCst);
        service
    }

    /// Probe the remote model once; idempotent
    pub async fn initialize(&self) {
        if self.mode.load(Ordering::SeqCst) != MODE_UNINITIALIZED {
            return;
        }

        let _guard = self.init_lock.lock().await;
        if self.mode.load(Ordering::SeqCst) != MODE_UNINITIALIZED {
            return;
        }

        let Some(remote) = self.remote.as_ref() else {
            info!("No pretrained embedding model configured, using local fallback");
            self.mode.store(MODE_FALLBACK, Ordering::SeqCst);
            return;
        };

        match remote.embed("initialization check").await {
            Ok(vector) if !vector.is_empty() => {
                info!(
                    model = remote.model_name(),
                    dimension = vector.len(),
                    "Embedding model initialized"
                );
                self.remote_dimension.store(vector.len(), Ordering::SeqCst);
                self.mode.store(MODE_REMOTE, Ordering::SeqCst);
            }
            Ok(_) => self.switch_to_fallback(&AppError::EmbeddingUnavailable {
                message: "model returned an empty vector".to_string(),
            }),
            Err(e) => self.switch_to_fallback(&e),
        }
    }

    fn switch_to_fallback(&self, cause: &AppError) {
        warn!(error = %cause, "Embedding model unavailable, switching to local fallback permanently");
        metrics::record_embedding_fallback();
        self.mode.store(MODE_FALLBACK, Ordering::SeqCst);
    }

    /// True once the service has settled on the hash embedder
    pub fn is_fallback(&self) -> bool {
        self.mode.load(Ordering::SeqCst) == MODE_FALLBACK
    }

    /// Name of the model currently producing vectors
    pub fn model_name(&self) -> &str {
        match (self.mode.load(Ordering::SeqCst), self.remote.as_ref()) {
            (MODE_REMOTE, Some(remote)) => remote.model_name(),
            _ => self.fallback.model_name(),
        }
    }

    /// Dimension of vectors produced right now; persist it with every vector
    pub fn dimension(&self) -> usize {
        match self.mode.load(Ordering::SeqCst) {
            MODE_REMOTE => self.remote_dimension.load(Ordering::SeqCst),
            _ => self.fallback.dimension(),
        }
    }

    /// Embed one text. Never fails: remote errors resolve to the fallback.
    pub async fn embed(&self, text: &str) -> Vec<f32> {
        self.initialize().await;
        let cleaned = clean_text(text);

        if self.mode.load(Ordering::SeqCst) == MODE_REMOTE {
            if let Some(remote) = self.remote.as_ref() {
                match remote.embed(&cleaned).await {
                    Ok(vector) => return vector,
                    Err(e) => self.switch_to_fallback(&e),
                }
            }
        }

        self.fallback.embed_text(&cleaned)
    }

    /// Embed many texts, preserving order
    pub async fn embed_batch(&self, texts: &[String]) -> Vec<Vec<f32>> {
        self.initialize().await;
        let cleaned: Vec<String> = texts.iter().map(|t| clean_text(t)).collect();

        if self.mode.load(Ordering::SeqCst) == MODE_REMOTE {
            if let Some(remote) = self.remote.as_ref() {
                match remote.embed_batch(&cleaned).await {
                    Ok(vectors) if vectors.len() == cleaned.len() => return vectors,
                    Ok(vectors) => self.switch_to_fallback(&AppError::EmbeddingUnavailable {
                        message: format!(
                            "model returned {} vectors for {} texts",
                            vectors.len(),
                            cleaned.len()
                        ),
                    }),
                    Err(e) => self.switch_to_fallback(&e),
                }
            }
        }

        cleaned.iter().map(|t| self.fallback.embed_text(t)).collect()
    }
}

/// Collapse whitespace and cap the length
fn clean_text(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() > MAX_EMBED_CHARS {
        collapsed.chars().take(MAX_EMBED_CHARS).collect()
    } else {
        collapsed
    }
}

/// Cosine similarity; 0.0 when either vector has zero norm or lengths differ
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

/// Vector to its stored text form (a JSON array)
pub fn serialize_embedding(embedding: &[f32]) -> Result<String> {
    Ok(serde_json::to_string(embedding)?)
}

/// Stored text form back to a vector
pub fn deserialize_embedding(text: &str) -> Result<Vec<f32>> {
    Ok(serde_json::from_str(text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct FlakyEmbedder {
        calls: AtomicUsize,
        fail_from_call: usize,
    }

    #[async_trait]
    impl Embedder for FlakyEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call >= self.fail_from_call {
                Err(AppError::EmbeddingUnavailable {
                    message: "remote down".to_string(),
                })
            } else {
                Ok(vec![0.5; 8])
            }
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let mut out = Vec::new();
            for t in texts {
                out.push(self.embed(t).await?);
            }
            Ok(out)
        }

        fn model_name(&self) -> &str {
            "flaky"
        }

        fn dimension(&self) -> usize {
            8
        }
    }

    #[tokio::test]
    async fn test_no_remote_uses_fallback() {
        let service = EmbeddingService::new(None);
        service.initialize().await;
        assert!(service.is_fallback());
        assert_eq!(service.dimension(), 100);
        assert_eq!(service.embed("hello world").await.len(), 100);
    }

    #[tokio::test]
    async fn test_remote_success_then_permanent_fallback() {
        let remote = Arc::new(FlakyEmbedder {
            calls: AtomicUsize::new(0),
            fail_from_call: 2,
        });
        let service = EmbeddingService::new(Some(remote.clone()));

        service.initialize().await;
        assert!(!service.is_fallback());
        assert_eq!(service.dimension(), 8);
        assert_eq!(service.model_name(), "flaky");

        // Second remote call succeeds
        assert_eq!(service.embed("first").await.len(), 8);

        // Third fails and flips the service
        assert_eq!(service.embed("second").await.len(), 100);
        assert!(service.is_fallback());

        // No further remote calls
        let calls_before = remote.calls.load(Ordering::SeqCst);
        service.embed("third").await;
        assert_eq!(remote.calls.load(Ordering::SeqCst), calls_before);
    }

    #[tokio::test]
    async fn test_failed_initial_embed_switches_immediately() {
        let remote = Arc::new(FlakyEmbedder {
            calls: AtomicUsize::new(0),
            fail_from_call: 0,
        });
        let service = EmbeddingService::new(Some(remote));
        service.initialize().await;
        assert!(service.is_fallback());
        assert_eq!(service.model_name(), "simple-local");
    }

    #[tokio::test]
    async fn test_serialize_round_trip() {
        let service = EmbeddingService::local();
        let v = service.embed("The Lessor leases the Property").await;
        let restored = deserialize_embedding(&serialize_embedding(&v).unwrap()).unwrap();
        assert_eq!(restored.len(), v.len());
        for (a, b) in v.iter().zip(restored.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[tokio::test]
    async fn test_batch_matches_single() {
        let service = EmbeddingService::local();
        let texts = vec!["one text".to_string(), "another text".to_string()];
        let batch = service.embed_batch(&texts).await;
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[1], service.embed("another text").await);
    }

    #[test]
    fn test_cosine_similarity() {
        let v = vec![0.3, 0.4, 0.5];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&v, &[0.0, 0.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&v, &[1.0]), 0.0);
    }

    #[test]
    fn test_clean_text_truncates() {
        let long = "a ".repeat(600);
        assert_eq!(clean_text(&long).chars().count(), MAX_EMBED_CHARS);
        assert_eq!(clean_text("  a \n b  "), "a b");
    }
}
