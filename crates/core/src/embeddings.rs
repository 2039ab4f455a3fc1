use crate::error::EmbeddingError;
use crate::tokenizer::{Tokenizer, WordTokenizer};
use std::sync::Arc;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 384;

/// Text to fixed-length vector. Index build and query time must use an
/// embedder with the same `model_id`; vectors from different models are
/// not comparable. The store manifest records the id so a mismatch is
/// caught when the index is opened.
pub trait Embedder: Send + Sync {
    fn model_id(&self) -> String;
    fn dimensions(&self) -> usize;
    fn tokenizer(&self) -> Arc<dyn Tokenizer>;
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        texts.iter().map(|text| self.embed(text)).collect()
    }
}

impl<T> Embedder for Arc<T>
where
    T: Embedder + ?Sized,
{
    fn model_id(&self) -> String {
        (**self).model_id()
    }

    fn dimensions(&self) -> usize {
        (**self).dimensions()
    }

    fn tokenizer(&self) -> Arc<dyn Tokenizer> {
        (**self).tokenizer()
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        (**self).embed(text)
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        (**self).embed_batch(texts)
    }
}

/// Hashes tokens, token bigrams and in-token character trigrams into a
/// unit-length vector. Deterministic across processes and platforms.
#[derive(Clone)]
pub struct FeatureHashEmbedder {
    dimensions: usize,
    tokenizer: Arc<dyn Tokenizer>,
}

impl Default for FeatureHashEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_EMBEDDING_DIMENSIONS, Arc::new(WordTokenizer))
    }
}

impl FeatureHashEmbedder {
    pub fn new(dimensions: usize, tokenizer: Arc<dyn Tokenizer>) -> Self {
        Self {
            dimensions: dimensions.max(1),
            tokenizer,
        }
    }

    fn bump(vector: &mut [f32], feature: &str, weight: f32) {
        let bucket = (fnv1a(feature.as_bytes()) % vector.len() as u64) as usize;
        vector[bucket] += weight;
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = 1469598103934665603u64;
    for byte in bytes {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(1099511628211);
    }
    hash
}

impl Embedder for FeatureHashEmbedder {
    fn model_id(&self) -> String {
        format!("feature-hash-v1/{}/{}", self.tokenizer.name(), self.dimensions)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn tokenizer(&self) -> Arc<dyn Tokenizer> {
        Arc::clone(&self.tokenizer)
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vector = vec![0f32; self.dimensions];
        let tokens = self
            .tokenizer
            .token_spans(text)
            .into_iter()
            .map(|span| text[span].to_lowercase())
            .filter(|token| token.chars().any(char::is_alphanumeric))
            .collect::<Vec<_>>();

        if tokens.is_empty() {
            return Ok(vector);
        }

        for token in &tokens {
            Self::bump(&mut vector, &format!("t:{token}"), 1.0);
            let chars: Vec<char> = format!("<{token}>").chars().collect();
            for window in chars.windows(3) {
                let gram = window.iter().collect::<String>();
                Self::bump(&mut vector, &format!("c:{gram}"), 0.25);
            }
        }
        for pair in tokens.windows(2) {
            Self::bump(&mut vector, &format!("b:{} {}", pair[0], pair[1]), 0.5);
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        Ok(vector)
    }
}
