use crate::config::{check_temperature, RagConfig, RetrievalOptions};
use crate::context::{assemble_context, AssembledContext};
use crate::embeddings::Embedder;
use crate::error::{IndexError, QueryError};
use crate::models::{AnalysisResult, QueryOptions, RetrievedChunk};
use crate::rerank::Reranker;
use crate::retriever::Retriever;
use crate::store::{load_store, IndexSnapshot};
use crate::synthesizer::AnswerSynthesizer;
use crate::traits::LanguageModel;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Everything one query produced, for callers that want the evidence too.
#[derive(Debug, Clone)]
pub struct QueryTrace {
    pub retrieved: Vec<RetrievedChunk>,
    pub context: AssembledContext,
    pub result: AnalysisResult,
}

/// Query-time pipeline: embed, retrieve, re-rank, assemble, synthesize.
/// Holds only read-only shared state, so one instance may serve
/// concurrent queries.
pub struct CoverageCoordinator<E, M>
where
    E: Embedder,
    M: LanguageModel,
{
    embedder: E,
    retriever: Retriever,
    reranker: Reranker,
    synthesizer: AnswerSynthesizer<M>,
    retrieval: RetrievalOptions,
}

impl<E, M> CoverageCoordinator<E, M>
where
    E: Embedder,
    M: LanguageModel,
{
    /// Rejects a snapshot built by a different embedding model.
    pub fn new(
        snapshot: Arc<IndexSnapshot>,
        embedder: E,
        reranker: Reranker,
        synthesizer: AnswerSynthesizer<M>,
        retrieval: RetrievalOptions,
    ) -> Result<Self, IndexError> {
        let configured = embedder.model_id();
        if snapshot.manifest.embedding_model != configured {
            return Err(IndexError::ModelMismatch {
                indexed: snapshot.manifest.embedding_model.clone(),
                configured,
            });
        }
        if snapshot.manifest.dimensions != embedder.dimensions() {
            return Err(IndexError::DimensionMismatch {
                expected: snapshot.manifest.dimensions,
                found: embedder.dimensions(),
            });
        }

        Ok(Self {
            embedder,
            retriever: Retriever::new(snapshot),
            reranker,
            synthesizer,
            retrieval,
        })
    }

    /// Loads the store from disk and wires the pipeline from `config`.
    pub fn open(
        config: &RagConfig,
        store_dir: &Path,
        embedder: E,
        reranker: Reranker,
        model: M,
    ) -> Result<Self, QueryError> {
        let synthesizer = AnswerSynthesizer::new(model, &config.llm)?;
        let snapshot = Arc::new(load_store(store_dir)?);
        Ok(Self::new(
            snapshot,
            embedder,
            reranker,
            synthesizer,
            config.retrieval,
        )?)
    }

    pub async fn analyze(
        &self,
        query: &str,
        options: &QueryOptions,
    ) -> Result<AnalysisResult, QueryError> {
        Ok(self.analyze_with_trace(query, options).await?.result)
    }

    pub async fn analyze_with_trace(
        &self,
        query: &str,
        options: &QueryOptions,
    ) -> Result<QueryTrace, QueryError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(QueryError::EmptyQuery);
        }
        if let Some(temperature) = options.temperature {
            check_temperature(temperature)?;
        }

        let top_k = options.num_chunks.unwrap_or(self.retrieval.top_k);
        let query_vector = self.embedder.embed(query)?;
        let retrieved = self.retriever.retrieve(&query_vector, top_k)?;
        let reranked = self.reranker.rerank(query, retrieved).await;
        let context = assemble_context(&reranked, self.retrieval.context_size);

        let result = if context.is_empty() {
            AnalysisResult::no_evidence()
        } else {
            self.synthesizer
                .synthesize(&context, query, options.temperature)
                .await
        };

        info!(
            retrieved = reranked.len(),
            context_blocks = context.blocks,
            scorer = self.reranker.scorer_name(),
            answer = %result.answer,
            confidence = result.confidence,
            "query analyzed"
        );

        Ok(QueryTrace {
            retrieved: reranked,
            context,
            result,
        })
    }
}
