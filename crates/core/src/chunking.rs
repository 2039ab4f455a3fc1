use crate::config::IngestionOptions;
use crate::error::IngestError;
use crate::models::PolicyChunk;
use crate::tokenizer::Tokenizer;
use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub min_tokens: usize,
    pub max_tokens: usize,
    pub overlap_tokens: usize,
}

impl From<&IngestionOptions> for ChunkingConfig {
    fn from(value: &IngestionOptions) -> Self {
        Self {
            min_tokens: value.min_tokens,
            max_tokens: value.max_tokens,
            overlap_tokens: value.overlap_tokens,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.max_tokens == 0 || self.min_tokens > self.max_tokens {
            return Err(IngestError::InvalidChunkConfig(format!(
                "token bounds [{}, {}] are empty",
                self.min_tokens, self.max_tokens
            )));
        }
        if self.overlap_tokens >= self.max_tokens {
            return Err(IngestError::InvalidChunkConfig(format!(
                "overlap {} must be below max {}",
                self.overlap_tokens, self.max_tokens
            )));
        }
        Ok(())
    }
}

pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentence {
    pub text: String,
    /// Sentence opens a section, clause, definition or numbered item.
    pub opens_section: bool,
}

/// `2` or `4.2` standing alone: a list or clause number, not a sentence.
fn is_item_number(text: &str) -> bool {
    let text = text.trim();
    !text.is_empty()
        && text.starts_with(|c: char| c.is_ascii_digit())
        && text.ends_with(|c: char| c.is_ascii_digit())
        && text.chars().all(|c| c.is_ascii_digit() || c == '.')
}

/// Splits normalized text at `.`, `!` or `?` followed by whitespace. Decimal
/// points such as `4.2` never split because no whitespace follows them, and
/// a leading item number like `2. ` stays with the sentence it numbers.
pub fn split_sentences(normalized: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = normalized.char_indices().peekable();

    while let Some((offset, current)) = chars.next() {
        if !matches!(current, '.' | '!' | '?') {
            continue;
        }
        let at_boundary = match chars.peek() {
            Some((_, next)) => next.is_whitespace(),
            None => true,
        };
        if at_boundary && !(current == '.' && is_item_number(&normalized[start..offset])) {
            let end = offset + current.len_utf8();
            let sentence = normalized[start..end].trim();
            if !sentence.is_empty() {
                sentences.push(sentence.to_string());
            }
            start = end;
        }
    }

    let tail = normalized[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail.to_string());
    }
    sentences
}

pub fn mark_sections(sentences: Vec<String>, marker: &Regex) -> Vec<Sentence> {
    sentences
        .into_iter()
        .map(|text| Sentence {
            opens_section: marker.is_match(&text),
            text,
        })
        .collect()
}

/// Greedy sentence packer. Emits chunk texts with their token counts.
pub struct SentencePacker<'a> {
    tokenizer: &'a dyn Tokenizer,
    config: ChunkingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedChunk {
    pub text: String,
    pub token_count: usize,
    /// Exceeds `max_tokens` because it was still below `min_tokens` when the
    /// last sentence arrived.
    pub forced: bool,
}

impl<'a> SentencePacker<'a> {
    pub fn new(tokenizer: &'a dyn Tokenizer, config: ChunkingConfig) -> Self {
        Self { tokenizer, config }
    }

    fn count(&self, sentences: &[String]) -> usize {
        self.tokenizer.count_tokens(&sentences.join(" "))
    }

    /// Longest trailing run of `closed` whose joined token count stays within the overlap budget.
    fn overlap_suffix(&self, closed: &[String]) -> Vec<String> {
        let mut start = closed.len();
        while start > 0 && self.count(&closed[start - 1..]) <= self.config.overlap_tokens {
            start -= 1;
        }
        closed[start..].to_vec()
    }

    fn emit(&self, sentences: &[String], forced: bool, out: &mut Vec<PackedChunk>) {
        let text = sentences.join(" ");
        let token_count = self.tokenizer.count_tokens(&text);
        out.push(PackedChunk {
            text,
            token_count,
            forced,
        });
    }

    pub fn pack(&self, sentences: &[Sentence]) -> Vec<PackedChunk> {
        let cfg = self.config;
        let mut out = Vec::new();
        let mut current: Vec<String> = Vec::new();
        let mut current_tokens = 0usize;
        let mut forced = false;

        for sentence in sentences {
            let mut text = sentence.text.clone();
            let own_tokens = self.tokenizer.count_tokens(&text);
            if own_tokens == 0 {
                continue;
            }
            if own_tokens > cfg.max_tokens {
                warn!(
                    tokens = own_tokens,
                    max_tokens = cfg.max_tokens,
                    "sentence exceeds max_tokens, truncating"
                );
                text = self.tokenizer.truncate(&text, cfg.max_tokens);
            }

            // Section starts close the running chunk without carrying overlap.
            if sentence.opens_section && !current.is_empty() && current_tokens >= cfg.min_tokens {
                self.emit(&current, forced, &mut out);
                current.clear();
                forced = false;
            }

            current.push(text);
            let candidate_tokens = self.count(&current);
            if current.len() == 1 || candidate_tokens <= cfg.max_tokens {
                current_tokens = candidate_tokens;
                continue;
            }

            let incoming = current.pop().unwrap_or_default();
            if current_tokens < cfg.min_tokens {
                current.push(incoming);
                current_tokens = candidate_tokens;
                forced = true;
                continue;
            }

            self.emit(&current, forced, &mut out);
            forced = false;
            let mut seed = self.overlap_suffix(&current);
            while !seed.is_empty() && self.count(&[seed.join(" "), incoming.clone()]) > cfg.max_tokens {
                seed.remove(0);
            }
            current = seed;
            current.push(incoming);
            current_tokens = self.count(&current);
        }

        if !current.is_empty() {
            self.emit(&current, forced, &mut out);
        }
        out
    }
}

/// Splits one page into chunks. Chunk indexes restart at 0 for every page.
pub fn chunk_page(
    document_id: &str,
    page_number: u32,
    page_text: &str,
    tokenizer: &dyn Tokenizer,
    config: ChunkingConfig,
    section_marker: &Regex,
) -> Result<Vec<PolicyChunk>, IngestError> {
    config.validate()?;
    let normalized = normalize_whitespace(page_text);
    if normalized.is_empty() {
        return Ok(Vec::new());
    }

    let sentences = mark_sections(split_sentences(&normalized), section_marker);
    let packed = SentencePacker::new(tokenizer, config).pack(&sentences);

    Ok(packed
        .into_iter()
        .enumerate()
        .map(|(index, piece)| {
            let chunk_index = index as u32;
            PolicyChunk {
                chunk_id: make_chunk_id(document_id, page_number, chunk_index, &piece.text),
                document_id: document_id.to_string(),
                page_number,
                chunk_index,
                text: piece.text,
                token_count: piece.token_count,
            }
        })
        .collect())
}

fn make_chunk_id(document_id: &str, page: u32, index: u32, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document_id.as_bytes());
    hasher.update(page.to_le_bytes());
    hasher.update(index.to_le_bytes());
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::WordTokenizer;
    use proptest::prelude::*;

    fn never_matches() -> Regex {
        Regex::new(r"^\b$").expect("regex")
    }

    fn default_marker() -> Regex {
        Regex::new(&IngestionOptions::default().section_marker_regex).expect("regex")
    }

    /// Sentence with exactly `words` word tokens plus the closing period.
    fn sentence(tag: usize, words: usize) -> String {
        let body = (0..words.saturating_sub(1))
            .map(|i| format!("w{tag}x{i}"))
            .collect::<Vec<_>>()
            .join(" ");
        format!("Item{tag} {body}.")
    }

    fn sentences_of(chunk: &PolicyChunk) -> Vec<String> {
        split_sentences(&chunk.text)
    }

    #[test]
    fn whitespace_is_normalized() {
        let input = "A  \t  lot\nof   spacing";
        assert_eq!(normalize_whitespace(input), "A lot of spacing");
    }

    #[test]
    fn sentences_split_on_terminal_punctuation_but_not_decimals() {
        let sentences = split_sentences("Cover is 4.2 lakh. Is it paid? Yes! trailing words");
        assert_eq!(
            sentences,
            vec!["Cover is 4.2 lakh.", "Is it paid?", "Yes!", "trailing words"]
        );
    }

    #[test]
    fn empty_page_yields_no_chunks() -> Result<(), IngestError> {
        let config = ChunkingConfig { min_tokens: 2, max_tokens: 10, overlap_tokens: 3 };
        let chunks = chunk_page("a.pdf", 1, " \n\t ", &WordTokenizer, config, &never_matches())?;
        assert!(chunks.is_empty());
        Ok(())
    }

    #[test]
    fn chunks_respect_token_bounds_and_indexes_are_sequential() -> Result<(), IngestError> {
        let config = ChunkingConfig { min_tokens: 20, max_tokens: 40, overlap_tokens: 12 };
        let text = (0..30).map(|i| sentence(i, 5 + i % 4)).collect::<Vec<_>>().join(" ");
        let tokenizer = WordTokenizer;
        let chunks = chunk_page("policy.pdf", 3, &text, &tokenizer, config, &never_matches())?;

        assert!(chunks.len() > 3);
        for (position, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index as usize, position);
            assert_eq!(chunk.page_number, 3);
            assert_eq!(chunk.document_id, "policy.pdf");
            assert_eq!(chunk.token_count, tokenizer.count_tokens(&chunk.text));
            assert!(chunk.token_count <= config.max_tokens);
            if position + 1 < chunks.len() {
                assert!(chunk.token_count >= config.min_tokens, "chunk {position} too small");
            }
        }
        Ok(())
    }

    #[test]
    fn adjacent_chunks_share_a_bounded_nonempty_overlap() -> Result<(), IngestError> {
        let config = ChunkingConfig { min_tokens: 20, max_tokens: 40, overlap_tokens: 12 };
        let text = (0..30).map(|i| sentence(i, 6)).collect::<Vec<_>>().join(" ");
        let tokenizer = WordTokenizer;
        let chunks = chunk_page("policy.pdf", 1, &text, &tokenizer, config, &never_matches())?;
        assert!(chunks.len() > 2);

        for pair in chunks.windows(2) {
            let previous = sentences_of(&pair[0]);
            let next = sentences_of(&pair[1]);
            let shared = (1..=previous.len().min(next.len()))
                .rev()
                .find(|n| previous[previous.len() - n..] == next[..*n])
                .unwrap_or(0);
            assert!(shared > 0, "overlap missing between chunks");
            let overlap = previous[previous.len() - shared..].join(" ");
            assert!(tokenizer.count_tokens(&overlap) <= config.overlap_tokens);
        }
        Ok(())
    }

    #[test]
    fn oversized_sentence_is_truncated_to_max_tokens() -> Result<(), IngestError> {
        let config = ChunkingConfig { min_tokens: 2, max_tokens: 10, overlap_tokens: 3 };
        let text = sentence(1, 40);
        let chunks = chunk_page("a.pdf", 1, &text, &WordTokenizer, config, &never_matches())?;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].token_count, 10);
        assert!(chunks[0].text.starts_with("Item1 "));
        Ok(())
    }

    #[test]
    fn undersized_chunk_absorbs_next_sentence_instead_of_closing() -> Result<(), IngestError> {
        let config = ChunkingConfig { min_tokens: 10, max_tokens: 12, overlap_tokens: 2 };
        // 5 tokens, then 8 tokens: 13 > max but 5 < min, so both stay together.
        let text = format!("{} {}", sentence(1, 4), sentence(2, 7));
        let chunks = chunk_page("a.pdf", 1, &text, &WordTokenizer, config, &never_matches())?;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].token_count, 13);
        Ok(())
    }

    #[test]
    fn final_chunk_may_fall_below_min_tokens() -> Result<(), IngestError> {
        let config = ChunkingConfig { min_tokens: 8, max_tokens: 13, overlap_tokens: 0 };
        let text = format!("{} {} {}", sentence(1, 9), sentence(2, 9), sentence(3, 2));
        let chunks = chunk_page("a.pdf", 1, &text, &WordTokenizer, config, &never_matches())?;
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].token_count, 10);
        assert_eq!(chunks[1].text, format!("{} {}", sentence(2, 9), sentence(3, 2)));
        Ok(())
    }

    #[test]
    fn section_headers_start_new_chunks_once_min_is_reached() -> Result<(), IngestError> {
        let config = ChunkingConfig { min_tokens: 5, max_tokens: 100, overlap_tokens: 10 };
        let text = "The insurer pays hospital costs in full. Rooms are covered. \
                    Section 5 Exclusions. Cosmetic surgery is not covered.";
        let chunks = chunk_page("a.pdf", 2, text, &WordTokenizer, config, &default_marker())?;
        assert_eq!(chunks.len(), 2);
        assert!(chunks[1].text.starts_with("Section 5 Exclusions."));
        assert!(!chunks[1].text.contains("Rooms are covered"));
        Ok(())
    }

    #[test]
    fn numbered_items_stay_with_their_sentence() {
        let sentences = split_sentences("Rooms are covered. 2. Dental care is excluded. 4.2. Waiting period applies.");
        assert_eq!(
            sentences,
            vec!["Rooms are covered.", "2. Dental care is excluded.", "4.2. Waiting period applies."]
        );
    }

    #[test]
    fn numbered_items_start_new_chunks_like_lettered_ones() -> Result<(), IngestError> {
        let config = ChunkingConfig { min_tokens: 5, max_tokens: 100, overlap_tokens: 10 };
        for item in ["2.", "(b)"] {
            let text = format!(
                "The insurer pays hospital costs in full. Rooms are covered. {item} Dental care is excluded."
            );
            let chunks = chunk_page("a.pdf", 1, &text, &WordTokenizer, config, &default_marker())?;
            assert_eq!(chunks.len(), 2, "item marker {item}");
            assert!(chunks[1].text.starts_with(&format!("{item} Dental")));
            assert!(chunks[0].text.ends_with("Rooms are covered."));
        }
        Ok(())
    }

    #[test]
    fn chunk_ids_are_deterministic() -> Result<(), IngestError> {
        let config = ChunkingConfig { min_tokens: 1, max_tokens: 50, overlap_tokens: 5 };
        let first = chunk_page("a.pdf", 1, "Same text here.", &WordTokenizer, config, &never_matches())?;
        let second = chunk_page("a.pdf", 1, "Same text here.", &WordTokenizer, config, &never_matches())?;
        assert_eq!(first[0].chunk_id, second[0].chunk_id);
        Ok(())
    }

    #[test]
    fn invalid_bounds_are_rejected() {
        let config = ChunkingConfig { min_tokens: 20, max_tokens: 10, overlap_tokens: 3 };
        let result = chunk_page("a.pdf", 1, "Text.", &WordTokenizer, config, &never_matches());
        assert!(matches!(result, Err(IngestError::InvalidChunkConfig(_))));
    }

    /// Page of sentences with unique words; marked sentences open with `Section {i}`.
    fn page_of(shape: &[(usize, bool)]) -> String {
        shape
            .iter()
            .enumerate()
            .map(|(i, (words, marked))| {
                let body = (0..*words).map(|j| format!("a{i}x{j}")).collect::<Vec<_>>().join(" ");
                if *marked {
                    format!("Section {i} {body}.")
                } else {
                    format!("{body}.")
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Longest run of trailing words of `previous` that `next` opens with.
    fn shared_words(previous: &str, next: &str) -> String {
        let previous = previous.split_whitespace().collect::<Vec<_>>();
        let next = next.split_whitespace().collect::<Vec<_>>();
        let shared = (1..=previous.len().min(next.len()))
            .rev()
            .find(|n| previous[previous.len() - n..] == next[..*n])
            .unwrap_or(0);
        previous[previous.len() - shared..].join(" ")
    }

    fn chunking_config() -> impl Strategy<Value = ChunkingConfig> {
        (2usize..40).prop_flat_map(|max_tokens| {
            (1..=max_tokens, 0..max_tokens).prop_map(move |(min_tokens, overlap_tokens)| ChunkingConfig {
                min_tokens,
                max_tokens,
                overlap_tokens,
            })
        })
    }

    proptest! {
        #[test]
        fn packed_chunks_hold_size_and_overlap_bounds(
            shape in prop::collection::vec((1usize..30, any::<bool>()), 1..25),
            config in chunking_config(),
        ) {
            let tokenizer = WordTokenizer;
            let page = page_of(&shape);
            let sentences = mark_sections(split_sentences(&normalize_whitespace(&page)), &default_marker());
            let packed = SentencePacker::new(&tokenizer, config).pack(&sentences);
            prop_assert!(!packed.is_empty());

            for (position, chunk) in packed.iter().enumerate() {
                prop_assert_eq!(chunk.token_count, tokenizer.count_tokens(&chunk.text));
                if position + 1 < packed.len() {
                    prop_assert!(chunk.token_count >= config.min_tokens, "chunk {} below min", position);
                }
                if chunk.forced {
                    prop_assert!(chunk.token_count > config.max_tokens);
                    prop_assert!(chunk.token_count < config.max_tokens + config.min_tokens);
                } else {
                    prop_assert!(chunk.token_count <= config.max_tokens, "chunk {} above max", position);
                }
            }

            for pair in packed.windows(2) {
                let overlap = shared_words(&pair[0].text, &pair[1].text);
                prop_assert!(tokenizer.count_tokens(&overlap) <= config.overlap_tokens);
            }
        }

        #[test]
        fn page_chunks_are_indexed_in_order(
            shape in prop::collection::vec((1usize..30, any::<bool>()), 1..25),
            config in chunking_config(),
        ) {
            let page = page_of(&shape);
            let marker = default_marker();
            let chunks = chunk_page("policy.pdf", 7, &page, &WordTokenizer, config, &marker)
                .map_err(|error| TestCaseError::fail(error.to_string()))?;
            let sentences = mark_sections(split_sentences(&normalize_whitespace(&page)), &marker);
            let packed = SentencePacker::new(&WordTokenizer, config).pack(&sentences);

            prop_assert_eq!(chunks.len(), packed.len());
            for (position, (chunk, piece)) in chunks.iter().zip(&packed).enumerate() {
                prop_assert_eq!(chunk.chunk_index as usize, position);
                prop_assert_eq!(chunk.page_number, 7);
                prop_assert_eq!(&chunk.text, &piece.text);
            }
        }
    }
}
