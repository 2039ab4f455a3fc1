use chrono::Utc;
use clap::{Parser, Subcommand};
use policy_rag_core::config::check_temperature;
use policy_rag_core::{
    build_index, ingest_folder_chunks_best_effort, load_store, ChatCompletionClient,
    CoverageCoordinator, DefaultExtractor, Embedder, EmbeddingBackend, FeatureHashEmbedder,
    HttpCrossEncoder, LexicalPairScorer, PairScorer, QueryOptions, RagConfig, Reranker, Tokenizer,
    WordTokenizer, DEFAULT_EMBEDDING_DIMENSIONS,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "policy-rag", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// JSON config file; built-in defaults are used when absent.
    #[arg(long, env = "POLICY_RAG_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding the vector index and chunk metadata.
    #[arg(long, env = "POLICY_RAG_STORE")]
    store_dir: Option<PathBuf>,

    /// TEI-compatible cross-encoder `/rerank` URL. Defaults to the local lexical scorer.
    #[arg(long, env = "POLICY_RAG_RERANK_URL")]
    rerank_url: Option<String>,

    /// Re-rank with the in-process BGE cross-encoder (`local-models` builds).
    #[arg(long, default_value_t = false)]
    local_rerank: bool,

    /// HuggingFace tokenizer.json used for chunk token counts and embedding.
    #[cfg(feature = "hf-tokenizer")]
    #[arg(long)]
    tokenizer: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Extract, chunk and embed every document in a folder, replacing the index.
    Ingest {
        /// Folder that contains policy documents recursively.
        #[arg(long)]
        folder: PathBuf,
    },
    /// Answer a yes/no coverage question from the indexed policies.
    Query {
        /// Coverage question.
        #[arg(long)]
        question: String,
        /// Number of chunks to retrieve and re-rank.
        #[arg(long)]
        num_chunks: Option<usize>,
        /// Sampling temperature for the language model.
        #[arg(long)]
        temperature: Option<f32>,
        /// Number of re-ranked chunks placed in the model context.
        #[arg(long)]
        context_size: Option<usize>,
        /// Print the retrieved evidence to stderr.
        #[arg(long, default_value_t = false)]
        show_evidence: bool,
        /// Language model API key.
        #[arg(long, env = "TOGETHER_API_KEY", hide_env_values = true)]
        api_key: Option<String>,
    },
    /// Print the manifest of the current index.
    Status,
}

#[cfg_attr(not(feature = "hf-tokenizer"), allow(unused_variables))]
fn chunk_tokenizer(cli: &Cli) -> anyhow::Result<Arc<dyn Tokenizer>> {
    #[cfg(feature = "hf-tokenizer")]
    if let Some(path) = &cli.tokenizer {
        let tokenizer = policy_rag_core::tokenizer::HuggingFaceTokenizer::from_file(path)?;
        return Ok(Arc::new(tokenizer));
    }
    Ok(Arc::new(WordTokenizer))
}

#[cfg(feature = "local-models")]
fn minilm_embedder(tokenizer: Arc<dyn Tokenizer>) -> anyhow::Result<Arc<dyn Embedder>> {
    Ok(Arc::new(policy_rag_core::MiniLmEmbedder::new(tokenizer)?))
}

#[cfg(not(feature = "local-models"))]
fn minilm_embedder(_tokenizer: Arc<dyn Tokenizer>) -> anyhow::Result<Arc<dyn Embedder>> {
    anyhow::bail!("the mini-lm embedding backend needs a build with `--features local-models`")
}

#[cfg(feature = "local-models")]
fn local_cross_encoder() -> anyhow::Result<Arc<dyn PairScorer>> {
    Ok(Arc::new(policy_rag_core::LocalCrossEncoder::new()?))
}

#[cfg(not(feature = "local-models"))]
fn local_cross_encoder() -> anyhow::Result<Arc<dyn PairScorer>> {
    anyhow::bail!("the local cross-encoder needs a build with `--features local-models`")
}

fn build_embedder(
    config: &RagConfig,
    tokenizer: Arc<dyn Tokenizer>,
) -> anyhow::Result<Arc<dyn Embedder>> {
    match config.embedding.backend {
        EmbeddingBackend::FeatureHash => Ok(Arc::new(FeatureHashEmbedder::new(
            DEFAULT_EMBEDDING_DIMENSIONS,
            tokenizer,
        ))),
        EmbeddingBackend::MiniLm => minilm_embedder(tokenizer),
    }
}

/// HTTP endpoint first, then the in-process cross-encoder, then the lexical scorer.
fn build_reranker(config: &RagConfig) -> anyhow::Result<Reranker> {
    let scorer: Arc<dyn PairScorer> = match &config.reranker.endpoint {
        Some(endpoint) => Arc::new(HttpCrossEncoder::new(endpoint, config.reranker.timeout)?),
        None if config.reranker.local_model => local_cross_encoder()?,
        None => Arc::new(LexicalPairScorer),
    };
    Ok(Reranker::new(scorer))
}

async fn run_ingest(
    config: &RagConfig,
    store_dir: &Path,
    embedder: Arc<dyn Embedder>,
    folder: &Path,
) -> anyhow::Result<()> {
    let report = ingest_folder_chunks_best_effort(
        folder,
        &config.ingestion,
        Arc::new(DefaultExtractor::default()),
        embedder.tokenizer(),
    )
    .await?;

    if !report.skipped_files.is_empty() {
        warn!(
            "skipped_files={} for folder={}",
            report.skipped_files.len(),
            folder.display()
        );
        for skipped in &report.skipped_files {
            warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped document");
        }
    }

    info!(
        folder = %folder.display(),
        documents = report.documents,
        pages = report.pages,
        chunk_count = report.chunks.len(),
        "embedding chunks"
    );

    let chunk_count = report.chunks.len();
    let manifest = build_index(report.chunks, embedder, store_dir).await?;
    println!(
        "{} chunks from {} documents indexed into {} at {}",
        chunk_count,
        manifest.documents.len(),
        store_dir.display(),
        manifest.created_at.to_rfc3339()
    );
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let mut config = RagConfig::load(cli.config.as_deref())?;
    if let Some(endpoint) = &cli.rerank_url {
        config.reranker.endpoint = Some(endpoint.clone());
    }
    if cli.local_rerank {
        config.reranker.local_model = true;
    }
    let store_dir = cli
        .store_dir
        .clone()
        .unwrap_or_else(|| config.store_dir.0.clone());

    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        store = %store_dir.display(),
        "policy-rag boot"
    );

    let tokenizer = chunk_tokenizer(&cli)?;

    match cli.command {
        Command::Ingest { ref folder } => {
            let embedder = build_embedder(&config, tokenizer)?;
            run_ingest(&config, &store_dir, embedder, folder).await?;
        }
        Command::Query {
            ref question,
            num_chunks,
            temperature,
            context_size,
            show_evidence,
            ref api_key,
        } => {
            if let Some(context_size) = context_size {
                config.retrieval.context_size = context_size;
            }
            config.validate()?;
            if let Some(temperature) = temperature {
                check_temperature(temperature)?;
            }

            let api_key = api_key
                .clone()
                .or_else(|| std::env::var(&config.llm.api_key_env).ok());
            let model = ChatCompletionClient::new(&config.llm, api_key)?;
            let embedder = build_embedder(&config, tokenizer)?;
            let reranker = build_reranker(&config)?;
            let pipeline = CoverageCoordinator::open(&config, &store_dir, embedder, reranker, model)?;

            let options = QueryOptions {
                num_chunks,
                temperature,
            };
            let trace = pipeline.analyze_with_trace(question, &options).await?;

            if show_evidence {
                for (rank, retrieved) in trace.retrieved.iter().enumerate() {
                    eprintln!(
                        "[{}] score={:.4} document={} page={} chunk={}",
                        rank + 1,
                        retrieved.score,
                        retrieved.chunk.document_id,
                        retrieved.chunk.page_number,
                        retrieved.chunk.chunk_index
                    );
                }
            }

            println!("{}", serde_json::to_string_pretty(&trace.result)?);
        }
        Command::Status => {
            let snapshot = load_store(&store_dir)?;
            println!("{}", serde_json::to_string_pretty(&snapshot.manifest)?);
        }
    }

    Ok(())
}
