pub mod chunking;
pub mod config;
pub mod context;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod index;
pub mod ingest;
pub mod llm;
#[cfg(feature = "local-models")]
pub mod local_models;
pub mod models;
pub mod orchestrator;
pub mod rerank;
pub mod retriever;
pub mod store;
pub mod synthesizer;
#[cfg(test)]
mod test_support;
pub mod tokenizer;
pub mod traits;

pub use chunking::{chunk_page, normalize_whitespace, split_sentences, ChunkingConfig};
pub use config::{
    EmbeddingBackend, EmbeddingOptions, IngestionOptions, LlmOptions, RagConfig, RerankerOptions,
    RetrievalOptions,
};
pub use context::{assemble_context, AssembledContext};
pub use embeddings::{Embedder, FeatureHashEmbedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use error::{
    ConfigError, EmbeddingError, IndexError, IngestError, ModelError, QueryError, ScoringError,
};
pub use extractor::{extract_page_texts, DefaultExtractor, DocumentExtractor, LopdfExtractor, PlainTextExtractor};
pub use index::FlatIndex;
pub use ingest::{
    build_index, discover_documents, ingest_folder_chunks_best_effort, IngestionReport,
    SkippedDocument,
};
pub use llm::ChatCompletionClient;
#[cfg(feature = "local-models")]
pub use local_models::{LocalCrossEncoder, MiniLmEmbedder, MINILM_DIMENSIONS};
pub use models::{
    AnalysisResult, Answer, ChunkRecord, PageText, PolicyChunk, QueryOptions, RetrievedChunk,
    ScoreSource,
};
pub use orchestrator::{CoverageCoordinator, QueryTrace};
pub use rerank::{HttpCrossEncoder, LexicalPairScorer, Reranker};
pub use retriever::Retriever;
pub use store::{load_store, write_store, IndexSnapshot, StoreManifest};
pub use synthesizer::{AnswerSynthesizer, AttemptContext, InstructionStrength};
pub use tokenizer::{Tokenizer, WordTokenizer};
pub use traits::{LanguageModel, PairScorer, VectorIndex};
