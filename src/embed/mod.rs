//! Text embeddings
//!
//! Trait-based embedding backend so production code can use fastembed
//! (behind the `embeddings` feature) while tests and feature-off builds
//! use a deterministic hashing embedder. All vectors are 384-dim and
//! unit-normalized; an empty input yields no vector at all.

use crate::config::EMBEDDING_DIMS;
use std::fmt;

/// Error type for embedding operations.
#[derive(Debug)]
pub enum EmbeddingError {
    /// The embedding model returned no results
    EmptyResult,
    /// Model loading or inference failed
    ModelError(String),
    /// The model produced a vector of the wrong dimensionality
    WrongDimensions(usize),
}

impl fmt::Display for EmbeddingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmbeddingError::EmptyResult => write!(f, "embedding returned no results"),
            EmbeddingError::ModelError(msg) => write!(f, "embedding model error: {}", msg),
            EmbeddingError::WrongDimensions(dims) => {
                write!(f, "embedding has {} dimensions, expected {}", dims, EMBEDDING_DIMS)
            }
        }
    }
}

impl std::error::Error for EmbeddingError {}

/// Trait for embedding text into vectors.
///
/// Implementations handle model loading and inference; inference is
/// CPU-bound, so async callers run it on a blocking thread.
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts, returning one unit-norm vector per text.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

/// Embed a single text. Empty or whitespace-only input yields `None`.
pub fn embed_one(
    embedder: &dyn Embedder,
    text: &str,
) -> Result<Option<Vec<f32>>, EmbeddingError> {
    if text.trim().is_empty() {
        return Ok(None);
    }
    let mut vectors = embedder.embed_batch(&[text])?;
    if vectors.is_empty() {
        return Err(EmbeddingError::EmptyResult);
    }
    let vector = vectors.remove(0);
    if vector.len() != EMBEDDING_DIMS {
        return Err(EmbeddingError::WrongDimensions(vector.len()));
    }
    Ok(Some(vector))
}

/// Cosine similarity between two vectors of equal length.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Scale a vector to unit L2 norm in place. A zero vector stays zero.
pub fn normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}

/// Deterministic hashing embedder.
///
/// Tokenizes on non-alphanumerics, hashes each lowercase token (and
/// token bigram) into a fixed bucket, and normalizes. Not semantically
/// meaningful, but overlapping vocabularies produce high cosine
/// similarity, which is what linker and retriever tests exercise.
pub struct HashEmbedder;

impl HashEmbedder {
    pub fn new() -> Self {
        Self
    }

    fn bucket(token: &str) -> usize {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        token.hash(&mut hasher);
        (hasher.finish() as usize) % EMBEDDING_DIMS
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl Embedder for HashEmbedder {
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut result = Vec::with_capacity(texts.len());
        for text in texts {
            let mut vector = vec![0.0f32; EMBEDDING_DIMS];
            let tokens: Vec<String> = text
                .split(|c: char| !c.is_alphanumeric())
                .filter(|t| !t.is_empty())
                .map(|t| t.to_lowercase())
                .collect();
            for token in &tokens {
                vector[Self::bucket(token)] += 1.0;
            }
            for pair in tokens.windows(2) {
                vector[Self::bucket(&format!("{} {}", pair[0], pair[1]))] += 0.5;
            }
            normalize(&mut vector);
            result.push(vector);
        }
        Ok(result)
    }
}

#[cfg(feature = "embeddings")]
mod fastembed_impl {
    use super::{normalize, Embedder, EmbeddingError};
    use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
    use std::sync::Mutex;

    /// Production embedder backed by fastembed (ONNX Runtime).
    ///
    /// Wraps `fastembed::TextEmbedding` in a `Mutex` because its
    /// `embed` method requires `&mut self`, while the `Embedder` trait
    /// uses `&self`.
    pub struct FastEmbedder {
        model: Mutex<TextEmbedding>,
    }

    impl FastEmbedder {
        /// Create an embedder with a specific model.
        pub fn new(model: EmbeddingModel) -> Result<Self, EmbeddingError> {
            let options = InitOptions::new(model).with_show_download_progress(false);
            let embedding = TextEmbedding::try_new(options)
                .map_err(|e| EmbeddingError::ModelError(e.to_string()))?;
            Ok(Self {
                model: Mutex::new(embedding),
            })
        }

        /// The default 384-dim model (all-MiniLM-L6-v2).
        pub fn default_model() -> Result<Self, EmbeddingError> {
            Self::new(EmbeddingModel::AllMiniLML6V2)
        }
    }

    impl Embedder for FastEmbedder {
        fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            if texts.is_empty() {
                return Ok(Vec::new());
            }
            let mut model = self.model.lock().map_err(|_| {
                EmbeddingError::ModelError("embedding model lock poisoned".to_string())
            })?;
            let mut embeddings = model
                .embed(texts.to_vec(), None)
                .map_err(|e| EmbeddingError::ModelError(e.to_string()))?;
            if embeddings.is_empty() {
                return Err(EmbeddingError::EmptyResult);
            }
            for vector in embeddings.iter_mut() {
                normalize(vector);
            }
            Ok(embeddings)
        }
    }
}

#[cfg(feature = "embeddings")]
pub use fastembed_impl::FastEmbedder;
