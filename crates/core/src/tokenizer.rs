use regex::Regex;
use std::ops::Range;
use std::sync::OnceLock;

/// Token accounting shared by the chunker and the embedder. Chunk bounds are
/// only meaningful when measured with the tokenizer of the embedding model.
pub trait Tokenizer: Send + Sync {
    fn name(&self) -> &str;

    /// Byte ranges of each token in `text`, in order.
    fn token_spans(&self, text: &str) -> Vec<Range<usize>>;

    fn count_tokens(&self, text: &str) -> usize {
        self.token_spans(text).len()
    }

    /// Cuts `text` after its `max_tokens`-th token.
    fn truncate(&self, text: &str, max_tokens: usize) -> String {
        let spans = self.token_spans(text);
        if spans.len() <= max_tokens {
            return text.to_string();
        }
        match max_tokens.checked_sub(1).and_then(|last| spans.get(last)) {
            Some(span) => text[..span.end].trim_end().to_string(),
            None => String::new(),
        }
    }
}

/// Splits into runs of word characters and single punctuation marks.
#[derive(Debug, Default, Clone, Copy)]
pub struct WordTokenizer;

fn word_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\w+|[^\w\s]").expect("static token pattern is valid"))
}

impl Tokenizer for WordTokenizer {
    fn name(&self) -> &str {
        "word-v1"
    }

    fn token_spans(&self, text: &str) -> Vec<Range<usize>> {
        word_pattern().find_iter(text).map(|m| m.range()).collect()
    }
}

#[cfg(feature = "hf-tokenizer")]
pub use hf::HuggingFaceTokenizer;

#[cfg(feature = "hf-tokenizer")]
mod hf {
    use super::Tokenizer;
    use crate::error::ConfigError;
    use std::ops::Range;
    use std::path::Path;

    /// Wraps a `tokenizer.json` so chunk sizes follow the real embedding vocabulary.
    pub struct HuggingFaceTokenizer {
        name: String,
        inner: tokenizers::Tokenizer,
    }

    impl HuggingFaceTokenizer {
        pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
            let inner = tokenizers::Tokenizer::from_file(path).map_err(|error| {
                ConfigError::Invalid(format!("tokenizer {}: {error}", path.display()))
            })?;
            let name = path
                .parent()
                .and_then(|dir| dir.file_name())
                .and_then(|name| name.to_str())
                .map(|name| format!("hf:{name}"))
                .unwrap_or_else(|| "hf".to_string());
            Ok(Self { name, inner })
        }
    }

    impl Tokenizer for HuggingFaceTokenizer {
        fn name(&self) -> &str {
            &self.name
        }

        fn token_spans(&self, text: &str) -> Vec<Range<usize>> {
            match self.inner.encode(text, false) {
                Ok(encoding) => encoding
                    .get_offsets()
                    .iter()
                    .filter(|(start, end)| end > start)
                    .map(|(start, end)| *start..*end)
                    .collect(),
                Err(error) => {
                    tracing::warn!(%error, "tokenizer failed, counting nothing");
                    Vec::new()
                }
            }
        }
    }
}
