//! In-process ONNX models through `fastembed`. Both download their weights
//! into the fastembed cache on first construction.

use crate::embeddings::Embedder;
use crate::error::{EmbeddingError, ScoringError};
use crate::rerank::scores_by_index;
use crate::tokenizer::Tokenizer;
use crate::traits::PairScorer;
use async_trait::async_trait;
use fastembed::{
    EmbeddingModel, InitOptions, RerankInitOptions, RerankerModel, TextEmbedding, TextRerank,
};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

pub const MINILM_DIMENSIONS: usize = 384;

/// all-MiniLM-L6-v2 sentence embeddings. `TextEmbedding::embed` takes
/// `&mut self`, so the session sits behind a mutex.
pub struct MiniLmEmbedder {
    session: Mutex<TextEmbedding>,
    tokenizer: Arc<dyn Tokenizer>,
}

impl MiniLmEmbedder {
    /// `tokenizer` only drives chunk sizing; the model tokenizes on its own.
    pub fn new(tokenizer: Arc<dyn Tokenizer>) -> Result<Self, EmbeddingError> {
        let session = TextEmbedding::try_new(
            InitOptions::new(EmbeddingModel::AllMiniLML6V2).with_show_download_progress(false),
        )
        .map_err(|error| EmbeddingError::Load(error.to_string()))?;
        info!(model = "all-MiniLM-L6-v2", "local embedding model loaded");
        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
        })
    }
}

impl Embedder for MiniLmEmbedder {
    fn model_id(&self) -> String {
        "fastembed/all-minilm-l6-v2".to_string()
    }

    fn dimensions(&self) -> usize {
        MINILM_DIMENSIONS
    }

    fn tokenizer(&self) -> Arc<dyn Tokenizer> {
        Arc::clone(&self.tokenizer)
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_batch(&[text.to_string()])?
            .pop()
            .ok_or(EmbeddingError::Count {
                expected: 1,
                found: 0,
            })
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let mut session = self
            .session
            .lock()
            .map_err(|_| EmbeddingError::Model("embedding session lock poisoned".to_string()))?;
        let vectors = session
            .embed(texts.to_vec(), None)
            .map_err(|error| EmbeddingError::Model(error.to_string()))?;

        if vectors.len() != texts.len() {
            return Err(EmbeddingError::Count {
                expected: texts.len(),
                found: vectors.len(),
            });
        }
        if let Some(vector) = vectors.iter().find(|vector| vector.len() != MINILM_DIMENSIONS) {
            return Err(EmbeddingError::Model(format!(
                "expected {MINILM_DIMENSIONS} dimensions, model returned {}",
                vector.len()
            )));
        }
        debug!(texts = texts.len(), "embedded batch");
        Ok(vectors)
    }
}

/// BGE reranker-base cross-encoder. Reads query and passage together, so
/// it scores relevance rather than vector proximity.
pub struct LocalCrossEncoder {
    session: Arc<Mutex<TextRerank>>,
}

impl LocalCrossEncoder {
    pub fn new() -> Result<Self, ScoringError> {
        let session = TextRerank::try_new(
            RerankInitOptions::new(RerankerModel::BGERerankerBase)
                .with_show_download_progress(false),
        )
        .map_err(|error| ScoringError::Unavailable(error.to_string()))?;
        info!(model = "bge-reranker-base", "local cross-encoder loaded");
        Ok(Self {
            session: Arc::new(Mutex::new(session)),
        })
    }
}

#[async_trait]
impl PairScorer for LocalCrossEncoder {
    fn name(&self) -> &str {
        "bge-cross-encoder"
    }

    async fn score_pairs(&self, query: &str, passages: &[&str]) -> Result<Vec<f32>, ScoringError> {
        if passages.is_empty() {
            return Ok(Vec::new());
        }

        let session = Arc::clone(&self.session);
        let query = query.to_string();
        let passages = passages.iter().map(|passage| passage.to_string()).collect::<Vec<_>>();

        tokio::task::spawn_blocking(move || {
            let mut model = session.lock().map_err(|_| {
                ScoringError::Unavailable("re-ranking session lock poisoned".to_string())
            })?;
            let documents = passages.iter().map(String::as_str).collect::<Vec<_>>();
            let results = model
                .rerank(query.as_str(), &documents, false, None)
                .map_err(|error| ScoringError::Unavailable(error.to_string()))?;
            scores_by_index(
                results.into_iter().map(|result| (result.index, result.score)),
                documents.len(),
            )
        })
        .await
        .map_err(|error| ScoringError::Unavailable(format!("re-ranking worker failed: {error}")))?
    }
}
