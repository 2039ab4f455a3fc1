use crate::models::RetrievedChunk;

pub const BLOCK_SEPARATOR: &str = "\n\n---\n\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledContext {
    pub text: String,
    pub blocks: usize,
}

impl AssembledContext {
    pub fn is_empty(&self) -> bool {
        self.blocks == 0
    }
}

/// Renders the first `top_n` chunks, most relevant first, each tagged with
/// its document and page.
pub fn assemble_context(chunks: &[RetrievedChunk], top_n: usize) -> AssembledContext {
    let blocks = chunks
        .iter()
        .take(top_n)
        .map(|retrieved| {
            format!(
                "[Source: {}, page {}]\n{}",
                retrieved.chunk.document_id, retrieved.chunk.page_number, retrieved.chunk.text
            )
        })
        .collect::<Vec<_>>();

    AssembledContext {
        blocks: blocks.len(),
        text: blocks.join(BLOCK_SEPARATOR),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PolicyChunk, ScoreSource};

    fn retrieved(document: &str, page: u32, text: &str) -> RetrievedChunk {
        RetrievedChunk {
            position: page as usize,
            chunk: PolicyChunk {
                chunk_id: format!("{document}-{page}"),
                document_id: document.to_string(),
                page_number: page,
                chunk_index: 0,
                text: text.to_string(),
                token_count: 3,
            },
            score: 0.0,
            score_source: ScoreSource::Rerank,
        }
    }

    #[test]
    fn blocks_follow_relevance_order_with_provenance() {
        let chunks = vec![
            retrieved("b.pdf", 7, "most relevant"),
            retrieved("a.pdf", 2, "second"),
            retrieved("a.pdf", 1, "third"),
        ];
        let context = assemble_context(&chunks, 2);

        assert_eq!(context.blocks, 2);
        assert_eq!(
            context.text,
            "[Source: b.pdf, page 7]\nmost relevant\n\n---\n\n[Source: a.pdf, page 2]\nsecond"
        );
        assert!(!context.text.contains("third"));
    }

    #[test]
    fn fewer_chunks_than_top_n_uses_all() {
        let chunks = vec![retrieved("a.pdf", 1, "only")];
        let context = assemble_context(&chunks, 10);
        assert_eq!(context.blocks, 1);
        assert!(!context.text.contains(BLOCK_SEPARATOR));
    }

    #[test]
    fn no_chunks_gives_empty_context() {
        assert!(assemble_context(&[], 10).is_empty());
    }
}
