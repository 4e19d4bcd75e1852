//! Embedding provider contract
//!
//! The embedding model itself is an external collaborator; the core consumes
//! it through [`EmbeddingProvider`] and never assumes a particular backend.
//! [`CachedEmbedder`] wraps any provider with an LRU cache so repeated
//! queries are not re-embedded.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;

/// Embedding error type
#[non_exhaustive]
#[derive(Debug, Clone, thiserror::Error)]
pub enum EmbeddingError {
    /// The provider reported a failure
    #[error("embedding provider error: {0}")]
    Provider(String),
    /// The per-call timeout elapsed
    #[error("embedding call timed out")]
    Timeout,
    /// The call was cancelled by the caller
    #[error("embedding call cancelled")]
    Cancelled,
}

/// `embed(text) -> vector`. Implementations must be deterministic for the
/// same input within one process lifetime.
pub trait EmbeddingProvider: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

/// Cosine similarity between two vectors. Zero or mismatched vectors score
/// 0.0.
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
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Default number of cached query embeddings
const DEFAULT_CACHE_CAPACITY: usize = 256;

/// An [`EmbeddingProvider`] with an LRU cache in front of it.
pub struct CachedEmbedder {
    inner: Arc<dyn EmbeddingProvider>,
    cache: Mutex<LruCache<String, Vec<f32>>>,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn EmbeddingProvider>) -> Self {
        Self::with_capacity(inner, DEFAULT_CACHE_CAPACITY)
    }

    pub fn with_capacity(inner: Arc<dyn EmbeddingProvider>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity is at least 1");
        Self {
            inner,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }
}

impl EmbeddingProvider for CachedEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if let Ok(mut cache) = self.cache.lock() {
            if let Some(hit) = cache.get(text) {
                return Ok(hit.clone());
            }
        }
        let vector = self.inner.embed(text)?;
        if let Ok(mut cache) = self.cache.lock() {
            cache.put(text.to_string(), vector.clone());
        }
        Ok(vector)
    }
}

// ============================================================================
// TESTS
// ============================================================================


#[cfg(test)]
mod tests {
    use super::testing::HashEmbedder;
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_cosine_similarity_bounds() {
        let a = vec![1.0, 0.0, 1.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&a, &[0.0, 1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&a, &[]), 0.0);
        assert_eq!(cosine_similarity(&a, &[0.0, 0.0, 0.0]), 0.0);
    }

    #[test]
    fn test_hash_embedder_is_deterministic() {
        let e = HashEmbedder::new();
        let a = e.embed("sarah likes blue").unwrap();
        let b = e.embed("sarah likes blue").unwrap();
        assert_eq!(a, b);

        let sim = cosine_similarity(&a, &e.embed("sarah likes green").unwrap());
        assert!(sim > 0.0 && sim < 1.0);
    }

    #[test]
    fn test_cached_embedder_hits_cache() {
        struct Counting {
            inner: HashEmbedder,
            calls: AtomicUsize,
        }
        impl EmbeddingProvider for Counting {
            fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                self.inner.embed(text)
            }
        }

        let counting = Arc::new(Counting {
            inner: HashEmbedder::new(),
            calls: AtomicUsize::new(0),
        });
        let provider: Arc<dyn EmbeddingProvider> = counting.clone();
        let cached = CachedEmbedder::new(provider);

        cached.embed("sarah likes blue").unwrap();
        cached.embed("sarah likes blue").unwrap();
        cached.embed("sarah likes blue").unwrap();
        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
    }
}
