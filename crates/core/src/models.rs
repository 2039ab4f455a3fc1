use serde::{Deserialize, Serialize};
use std::fmt;

/// Justification used when retrieval produced nothing to ground an answer on.
pub const NO_EVIDENCE_JUSTIFICATION: &str =
    "The answer could not be found in the provided context.";

/// One page of extracted document text, 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

/// Per-chunk metadata persisted in parallel with the vector index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub chunk_id: String,
    pub document_id: String,
    pub page_number: u32,
    pub chunk_index: u32,
    pub token_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyChunk {
    pub chunk_id: String,
    pub document_id: String,
    pub page_number: u32,
    pub chunk_index: u32,
    pub text: String,
    pub token_count: usize,
}

impl PolicyChunk {
    pub fn record(&self) -> ChunkRecord {
        ChunkRecord {
            chunk_id: self.chunk_id.clone(),
            document_id: self.document_id.clone(),
            page_number: self.page_number,
            chunk_index: self.chunk_index,
            token_count: self.token_count,
        }
    }

    pub fn from_record(record: &ChunkRecord, text: &str) -> Self {
        Self {
            chunk_id: record.chunk_id.clone(),
            document_id: record.document_id.clone(),
            page_number: record.page_number,
            chunk_index: record.chunk_index,
            text: text.to_string(),
            token_count: record.token_count,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScoreSource {
    /// Squared euclidean distance from the index; lower is better.
    Distance,
    /// Pairwise relevance from the re-ranker; higher is better.
    Rerank,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedChunk {
    pub position: usize,
    pub chunk: PolicyChunk,
    pub score: f64,
    pub score_source: ScoreSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Answer {
    Yes,
    No,
    Unknown,
}

impl Answer {
    /// Normalizes a model-provided label. Case and surrounding punctuation are ignored.
    pub fn parse_label(raw: &str) -> Option<Self> {
        let label = raw
            .trim()
            .trim_matches(|c: char| !c.is_ascii_alphanumeric())
            .to_ascii_uppercase();
        match label.as_str() {
            "YES" => Some(Answer::Yes),
            "NO" => Some(Answer::No),
            "UNKNOWN" => Some(Answer::Unknown),
            _ => None,
        }
    }
}

impl fmt::Display for Answer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Answer::Yes => "YES",
            Answer::No => "NO",
            Answer::Unknown => "UNKNOWN",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub answer: Answer,
    pub justification: String,
    pub source_clause: Option<String>,
    pub confidence: f64,
}

impl AnalysisResult {
    /// Canonical result for a query whose retrieval returned no evidence.
    pub fn no_evidence() -> Self {
        Self {
            answer: Answer::Unknown,
            justification: NO_EVIDENCE_JUSTIFICATION.to_string(),
            source_clause: None,
            confidence: 0.0,
        }
    }

    /// Canonical result once the model contract could not be satisfied.
    pub fn model_failure(attempts: u32, cause: &str) -> Self {
        Self {
            answer: Answer::Unknown,
            justification: format!(
                "Technical failure: no valid answer from the language model after {attempts} attempt(s) ({cause})."
            ),
            source_clause: None,
            confidence: 0.0,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Per-query overrides accepted by the query entry point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryOptions {
    pub num_chunks: Option<usize>,
    pub temperature: Option<f32>,
}
