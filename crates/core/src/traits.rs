use crate::error::{IndexError, ModelError, ScoringError};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub position: usize,
    pub distance: f32,
}

pub trait VectorIndex {
    fn dimensions(&self) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends vectors; position `i` of the index follows insertion order.
    fn add(&mut self, vectors: &[Vec<f32>]) -> Result<(), IndexError>;

    /// The `k` nearest positions by ascending distance, ties to the lower position.
    fn search(&self, query_vector: &[f32], k: usize) -> Result<Vec<Neighbor>, IndexError>;
}

/// Joint (query, passage) relevance. Higher scores are more relevant.
#[async_trait]
pub trait PairScorer: Send + Sync {
    fn name(&self) -> &str;

    async fn score_pairs(&self, query: &str, passages: &[&str]) -> Result<Vec<f32>, ScoringError>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
}

/// Opaque text-completion service. One call is one HTTP round trip.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ModelError>;
}

#[async_trait]
impl<T> LanguageModel for Arc<T>
where
    T: LanguageModel + ?Sized,
{
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ModelError> {
        (**self).complete(request).await
    }
}
