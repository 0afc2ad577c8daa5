//! Process-wide sentence-embedding backend.
//!
//! One [`FastEncoder`] owns the ONNX model for the whole process; every
//! consumer shares it through `Arc<dyn TextEncoder>`. The model is loaded
//! lazily on first use and never copied. The [`EncoderHandle`] captures the
//! model identity the vector store persists, so vectors written on a previous
//! run stay valid: reopening a store with a different model is a hard error,
//! not a silent re-embedding.

use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result, bail};
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use once_cell::sync::OnceCell;
use tracing::info;

/// Text → vector seam. Production uses [`FastEncoder`]; tests use
/// [`HashedEncoder`] so no model download is ever needed in CI.
pub trait TextEncoder: Send + Sync {
    fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn model_id(&self) -> &str;

    fn dimension(&self) -> usize;

    fn encode_one(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.encode_batch(std::slice::from_ref(&text.to_string()))?;
        vectors
            .pop()
            .context("encoder returned no vector for a single input")
    }
}

/// Inert description of an encoder, persisted by the store and compared on
/// reopen. Two handles are compatible iff model id and dimension both match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderHandle {
    pub model_id: String,
    pub dimension: usize,
}

impl EncoderHandle {
    pub fn of(encoder: &dyn TextEncoder) -> Self {
        Self {
            model_id: encoder.model_id().to_string(),
            dimension: encoder.dimension(),
        }
    }
}

fn builtin_model(model_id: &str) -> Result<(EmbeddingModel, usize)> {
    match model_id {
        "all-minilm-l6-v2" => Ok((EmbeddingModel::AllMiniLML6V2, 384)),
        "multilingual-e5-small" => Ok((EmbeddingModel::MultilingualE5Small, 384)),
        "bge-small-en-v1.5" => Ok((EmbeddingModel::BGESmallENV15, 384)),
        other => bail!("unknown embedding model id: {other}"),
    }
}

/// Lazily initialised fastembed backend. `TextEmbedding::embed` takes
/// `&mut self`, so the loaded model sits behind a `Mutex`; batches therefore
/// serialise at the model, which also keeps ONNX memory use flat.
pub struct FastEncoder {
    model_id: String,
    dimension: usize,
    cache_dir: Option<PathBuf>,
    model: OnceCell<Mutex<TextEmbedding>>,
}

impl FastEncoder {
    pub fn new(model_id: &str, cache_dir: Option<PathBuf>) -> Result<Self> {
        let (_, dimension) = builtin_model(model_id)?;
        Ok(Self {
            model_id: model_id.to_string(),
            dimension,
            cache_dir,
            model: OnceCell::new(),
        })
    }

    fn model(&self) -> Result<&Mutex<TextEmbedding>> {
        self.model.get_or_try_init(|| {
            let (model, _) = builtin_model(&self.model_id)?;
            let mut options =
                InitOptions::new(model).with_show_download_progress(false);
            if let Some(dir) = &self.cache_dir {
                options = options.with_cache_dir(dir.clone());
            }
            let loaded = TextEmbedding::try_new(options)
                .with_context(|| format!("loading embedding model {}", self.model_id))?;
            info!(model = %self.model_id, dimension = self.dimension, "embedding model loaded");
            Ok(Mutex::new(loaded))
        })
    }
}

impl TextEncoder for FastEncoder {
    fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let model = self.model()?;
        let mut guard = model
            .lock()
            .map_err(|_| anyhow::anyhow!("embedding model mutex poisoned"))?;
        guard
            .embed(texts.to_vec(), None)
            .with_context(|| format!("embedding batch of {}", texts.len()))
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Deterministic token-bucket encoder for tests and offline smoke runs.
/// Tokens hash into dimension buckets and the vector is L2-normalised, so
/// identical text always produces an identical unit vector and texts sharing
/// vocabulary land measurably closer than unrelated ones.
pub struct HashedEncoder {
    dimension: usize,
}

impl HashedEncoder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl Default for HashedEncoder {
    fn default() -> Self {
        Self::new(384)
    }
}

impl TextEncoder for HashedEncoder {
    fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| hashed_vector(t, self.dimension)).collect())
    }

    fn model_id(&self) -> &str {
        "hashed-test-encoder"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

fn hashed_vector(text: &str, dimension: usize) -> Vec<f32> {
    use sha2::{Digest, Sha256};

    let mut vector = vec![0.0_f32; dimension];
    for token in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        let digest = Sha256::digest(token.to_lowercase().as_bytes());
        let bucket = u64::from_le_bytes(digest[..8].try_into().expect("digest is 32 bytes"));
        vector[(bucket % dimension as u64) as usize] += 1.0;
    }
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut vector {
            *v /= norm;
        }
    }
    vector
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashed_encoder_is_deterministic() -> Result<()> {
        let encoder = HashedEncoder::default();
        let a = encoder.encode_one("fix the build error")?;
        let b = encoder.encode_one("fix the build error")?;
        assert_eq!(a, b);
        assert_eq!(a.len(), 384);
        Ok(())
    }

    #[test]
    fn hashed_vectors_are_unit_length() -> Result<()> {
        let encoder = HashedEncoder::default();
        let v = encoder.encode_one("some nonempty text")?;
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5, "norm = {norm}");
        Ok(())
    }

    #[test]
    fn shared_vocabulary_scores_closer_than_disjoint() -> Result<()> {
        let encoder = HashedEncoder::default();
        let query = encoder.encode_one("cargo build failure")?;
        let near = encoder.encode_one("the cargo build failure persists")?;
        let far = encoder.encode_one("grocery shopping list for sunday")?;

        let dot = |a: &[f32], b: &[f32]| a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>();
        assert!(dot(&query, &near) > dot(&query, &far));
        Ok(())
    }

    #[test]
    fn unknown_model_id_is_rejected() {
        assert!(FastEncoder::new("made-up-model", None).is_err());
    }

    #[test]
    fn handle_captures_identity() {
        let encoder = HashedEncoder::default();
        let handle = EncoderHandle::of(&encoder);
        assert_eq!(handle.model_id, "hashed-test-encoder");
        assert_eq!(handle.dimension, 384);
    }
}
