use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

pub const DEFAULT_STORE_DIR: &str = "outputs/vector_store";
pub const DEFAULT_API_KEY_ENV: &str = "TOGETHER_API_KEY";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    pub store_dir: StoreDir,
    pub ingestion: IngestionOptions,
    pub retrieval: RetrievalOptions,
    pub embedding: EmbeddingOptions,
    pub reranker: RerankerOptions,
    pub llm: LlmOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct StoreDir(pub PathBuf);

impl Default for StoreDir {
    fn default() -> Self {
        Self(PathBuf::from(DEFAULT_STORE_DIR))
    }
}

impl AsRef<Path> for StoreDir {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestionOptions {
    pub min_tokens: usize,
    pub max_tokens: usize,
    pub overlap_tokens: usize,
    pub extensions: Vec<String>,
    pub section_marker_regex: String,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            min_tokens: 64,
            max_tokens: 256,
            overlap_tokens: 32,
            extensions: vec!["pdf".to_string(), "txt".to_string()],
            section_marker_regex: concat!(
                r"^(?:(?i:section|clause|article|part|schedule|annexure|endorsement)\s+[0-9IVXLC]+",
                r"|(?i:definitions?|exclusions?|benefits|conditions|waiting\s+periods?)\b",
                r"|\d+(?:\.\d+)+\s",
                r"|\d+[.)]\s",
                r"|\([a-zA-Z0-9]{1,3}\)\s",
                r"|[A-Z][A-Z0-9&/,-]*(?:\s+[A-Z][A-Z0-9&/,-]*){1,}\b)"
            )
            .to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalOptions {
    /// Number of nearest chunks pulled from the index and re-ranked.
    pub top_k: usize,
    /// Number of re-ranked chunks rendered into the model context.
    pub context_size: usize,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            top_k: 20,
            context_size: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EmbeddingBackend {
    /// Hashed token features, no model files needed.
    #[default]
    FeatureHash,
    /// all-MiniLM-L6-v2 through ONNX Runtime. Needs the `local-models` feature.
    MiniLm,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingOptions {
    pub backend: EmbeddingBackend,
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankerOptions {
    /// TEI-compatible `/rerank` endpoint. Takes precedence over `local_model`.
    pub endpoint: Option<String>,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub timeout: Duration,
    /// Run a BGE cross-encoder in process. Without it, and without an
    /// endpoint, the lexical scorer is used.
    pub local_model: bool,
}

impl Default for RerankerOptions {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout: Duration::from_secs(10),
            local_model: false,
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmOptions {
    pub base_url: String,
    pub model: String,
    pub api_key_env: String,
    pub temperature: f32,
    pub max_retries: u32,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub request_timeout: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub retry_backoff: Duration,
    pub system_prompt_path: Option<PathBuf>,
}

impl Default for LlmOptions {
    fn default() -> Self {
        Self {
            base_url: "https://api.together.xyz/v1".to_string(),
            model: "mistralai/Mixtral-8x7B-Instruct-v0.1".to_string(),
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
            temperature: 0.3,
            max_retries: 2,
            request_timeout: Duration::from_secs(30),
            retry_backoff: Duration::from_millis(500),
            system_prompt_path: None,
        }
    }
}

impl LlmOptions {
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

impl RagConfig {
    /// Reads a JSON config file, or returns defaults when `path` is `None`.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|error| ConfigError::Read {
                    path: path.to_path_buf(),
                    reason: error.to_string(),
                })?;
                serde_json::from_str::<RagConfig>(&raw)?
            }
            None => RagConfig::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let ingestion = &self.ingestion;
        if ingestion.max_tokens == 0 {
            return Err(ConfigError::Invalid("max_tokens must be positive".to_string()));
        }
        if ingestion.min_tokens > ingestion.max_tokens {
            return Err(ConfigError::Invalid(format!(
                "min_tokens {} exceeds max_tokens {}",
                ingestion.min_tokens, ingestion.max_tokens
            )));
        }
        if ingestion.overlap_tokens >= ingestion.max_tokens {
            return Err(ConfigError::Invalid(format!(
                "overlap_tokens {} must be below max_tokens {}",
                ingestion.overlap_tokens, ingestion.max_tokens
            )));
        }
        if ingestion.extensions.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one document extension is required".to_string(),
            ));
        }
        regex::Regex::new(&ingestion.section_marker_regex).map_err(|error| {
            ConfigError::Invalid(format!("section_marker_regex: {error}"))
        })?;

        if self.retrieval.context_size == 0 {
            return Err(ConfigError::Invalid("context_size must be at least 1".to_string()));
        }

        check_temperature(self.llm.temperature)?;
        if self.llm.model.trim().is_empty() {
            return Err(ConfigError::Invalid("llm model is empty".to_string()));
        }
        Url::parse(&self.llm.base_url)?;
        if let Some(endpoint) = &self.reranker.endpoint {
            Url::parse(endpoint)?;
        }

        let wants_local_model =
            self.embedding.backend != EmbeddingBackend::FeatureHash || self.reranker.local_model;
        if wants_local_model && !cfg!(feature = "local-models") {
            return Err(ConfigError::Invalid(
                "local embedding or re-ranking models need the `local-models` feature".to_string(),
            ));
        }
        Ok(())
    }
}

/// Sampling temperature accepted by the chat completion endpoint.
pub fn check_temperature(temperature: f32) -> Result<(), ConfigError> {
    if !(0.0..=2.0).contains(&temperature) {
        return Err(ConfigError::Invalid(format!(
            "temperature {temperature} outside [0, 2]"
        )));
    }
    Ok(())
}
