use crate::error::ScoringError;
use crate::models::{RetrievedChunk, ScoreSource};
use crate::traits::PairScorer;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const STOPWORDS: [&str; 24] = [
    "the", "and", "for", "are", "does", "did", "was", "were", "this", "that", "with", "from",
    "under", "policy", "what", "which", "will", "any", "can", "has", "have", "not", "its", "into",
];

fn terms(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| word.chars().count() >= 3)
        .map(str::to_lowercase)
        .filter(|word| !STOPWORDS.contains(&word.as_str()))
        .collect()
}

fn stem(word: &str) -> String {
    word.chars().take(5).collect()
}

/// Scores a pair by joint term evidence: exact matches, shared stems and
/// query bigrams that also occur adjacently in the passage.
#[derive(Debug, Default, Clone, Copy)]
pub struct LexicalPairScorer;

impl LexicalPairScorer {
    pub fn score(query: &str, passage: &str) -> f32 {
        let query_terms = terms(query);
        if query_terms.is_empty() {
            return 0.0;
        }
        let passage_terms = terms(passage);
        let exact = passage_terms.iter().cloned().collect::<HashSet<_>>();
        let stems = passage_terms.iter().map(|term| stem(term)).collect::<HashSet<_>>();
        let bigrams = passage_terms
            .windows(2)
            .map(|pair| (pair[0].clone(), pair[1].clone()))
            .collect::<HashSet<_>>();

        let unique = query_terms.iter().collect::<HashSet<_>>();
        let matched = unique
            .iter()
            .map(|term| {
                if exact.contains(*term) {
                    1.0
                } else if stems.contains(&stem(term)) {
                    0.6
                } else {
                    0.0
                }
            })
            .sum::<f32>();

        let pairs = query_terms.windows(2).count();
        let adjacent = query_terms
            .windows(2)
            .filter(|pair| bigrams.contains(&(pair[0].clone(), pair[1].clone())))
            .count();
        let bigram_share = if pairs == 0 {
            0.0
        } else {
            adjacent as f32 / pairs as f32
        };

        matched / unique.len() as f32 + 0.5 * bigram_share
    }
}

#[async_trait]
impl PairScorer for LexicalPairScorer {
    fn name(&self) -> &str {
        "lexical"
    }

    async fn score_pairs(&self, query: &str, passages: &[&str]) -> Result<Vec<f32>, ScoringError> {
        Ok(passages
            .iter()
            .map(|passage| Self::score(query, passage))
            .collect())
    }
}

#[derive(Debug, Deserialize)]
struct RerankHit {
    index: usize,
    score: f32,
}

/// Cross-encoder served behind a text-embeddings-inference style `/rerank` route.
pub struct HttpCrossEncoder {
    endpoint: String,
    client: Client,
}

impl HttpCrossEncoder {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, ScoringError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            endpoint: endpoint.into(),
            client,
        })
    }
}

#[async_trait]
impl PairScorer for HttpCrossEncoder {
    fn name(&self) -> &str {
        "cross-encoder"
    }

    async fn score_pairs(&self, query: &str, passages: &[&str]) -> Result<Vec<f32>, ScoringError> {
        if passages.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "query": query, "texts": passages, "raw_scores": false }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ScoringError::Unavailable(format!(
                "{} returned {}",
                self.endpoint,
                response.status()
            )));
        }

        let hits: Vec<RerankHit> = response.json().await?;
        scores_by_index(hits.into_iter().map(|hit| (hit.index, hit.score)), passages.len())
    }
}

/// Puts `(passage index, score)` hits back into passage order. Every passage
/// needs exactly one score; an unknown index or a gap is malformed.
pub(crate) fn scores_by_index(
    hits: impl IntoIterator<Item = (usize, f32)>,
    passages: usize,
) -> Result<Vec<f32>, ScoringError> {
    let mut scores = vec![None; passages];
    for (index, score) in hits {
        let slot = scores.get_mut(index).ok_or_else(|| {
            ScoringError::MalformedResponse(format!("index {index} out of range"))
        })?;
        *slot = Some(score);
    }
    scores
        .into_iter()
        .enumerate()
        .map(|(index, score)| {
            score.ok_or_else(|| ScoringError::MalformedResponse(format!("no score for passage {index}")))
        })
        .collect()
}

/// Reorders retrieved chunks by pairwise relevance. Never drops or adds a
/// chunk; on any scorer failure the input order is returned unchanged.
#[derive(Clone)]
pub struct Reranker {
    scorer: Arc<dyn PairScorer>,
}

impl Reranker {
    pub fn new(scorer: Arc<dyn PairScorer>) -> Self {
        Self { scorer }
    }

    pub fn scorer_name(&self) -> &str {
        self.scorer.name()
    }

    pub async fn rerank(&self, query: &str, chunks: Vec<RetrievedChunk>) -> Vec<RetrievedChunk> {
        if chunks.len() < 2 {
            return chunks;
        }

        let passages = chunks
            .iter()
            .map(|retrieved| retrieved.chunk.text.as_str())
            .collect::<Vec<_>>();

        let scores = match self.scorer.score_pairs(query, &passages).await {
            Ok(scores) if scores.len() == chunks.len() && scores.iter().all(|s| s.is_finite()) => {
                scores
            }
            Ok(scores) => {
                warn!(
                    scorer = self.scorer.name(),
                    expected = chunks.len(),
                    received = scores.len(),
                    "re-ranker returned unusable scores, keeping retrieval order"
                );
                return chunks;
            }
            Err(error) => {
                warn!(
                    scorer = self.scorer.name(),
                    %error,
                    "re-ranker unavailable, keeping retrieval order"
                );
                return chunks;
            }
        };

        let mut scored = chunks
            .into_iter()
            .zip(scores)
            .map(|(mut retrieved, score)| {
                retrieved.score = f64::from(score);
                retrieved.score_source = ScoreSource::Rerank;
                retrieved
            })
            .collect::<Vec<_>>();
        // Stable sort: equal scores keep their retrieval order.
        scored.sort_by(|left, right| right.score.total_cmp(&left.score));
        debug!(scorer = self.scorer.name(), count = scored.len(), "re-ranked chunks");
        scored
    }
}
