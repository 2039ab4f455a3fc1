use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing credential: environment variable {0} is not set")]
    MissingCredential(String),

    #[error("prompt template not found: {}", .0.display())]
    MissingPromptTemplate(PathBuf),

    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("failed to read config file {path}: {reason}")]
    Read { path: PathBuf, reason: String },

    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding model could not be loaded: {0}")]
    Load(String),

    #[error("embedding failed: {0}")]
    Model(String),

    #[error("embedding model returned {found} vectors for {expected} texts")]
    Count { expected: usize, found: usize },
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("document read error: {0}")]
    DocumentRead(String),

    #[error("regex error: {0}")]
    RegexError(#[from] regex::Error),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("index error: {0}")]
    Index(#[from] IndexError),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error("ingestion worker failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("index unavailable: {0}")]
    Unavailable(String),

    #[error("vector dimension {found} does not match index dimension {expected}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("index was built with embedding model {indexed}, query embedder is {configured}")]
    ModelMismatch { indexed: String, configured: String },

    #[error("corrupt index file: {0}")]
    Corrupt(String),
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("language model call exceeded {0:?}")]
    Timeout(Duration),

    #[error("language model returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("completion payload had no content")]
    MissingCompletion,

    #[error("model reply violated the response contract: {0}")]
    Contract(String),
}

impl From<reqwest::Error> for ModelError {
    fn from(error: reqwest::Error) -> Self {
        ModelError::Transport(error.to_string())
    }
}

#[derive(Debug, Error)]
pub enum ScoringError {
    #[error("scoring model unavailable: {0}")]
    Unavailable(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("malformed scoring response: {0}")]
    MalformedResponse(String),
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error("query is empty")]
    EmptyQuery,
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
