use crate::error::IndexError;
use crate::models::{RetrievedChunk, ScoreSource};
use crate::store::IndexSnapshot;
use crate::traits::VectorIndex;
use std::sync::Arc;

/// Nearest-chunk lookup over a shared, read-only snapshot.
#[derive(Debug, Clone)]
pub struct Retriever {
    snapshot: Arc<IndexSnapshot>,
}

impl Retriever {
    pub fn new(snapshot: Arc<IndexSnapshot>) -> Self {
        Self { snapshot }
    }

    pub fn snapshot(&self) -> &IndexSnapshot {
        &self.snapshot
    }

    /// Up to `k` chunks nearest to `query_vector`; all of them when `k` exceeds the index size.
    pub fn retrieve(&self, query_vector: &[f32], k: usize) -> Result<Vec<RetrievedChunk>, IndexError> {
        let neighbors = self.snapshot.index.search(query_vector, k)?;
        neighbors
            .into_iter()
            .map(|neighbor| {
                let chunk = self.snapshot.chunk(neighbor.position).ok_or_else(|| {
                    IndexError::Unavailable(format!(
                        "index position {} has no chunk metadata",
                        neighbor.position
                    ))
                })?;
                Ok(RetrievedChunk {
                    position: neighbor.position,
                    chunk,
                    score: f64::from(neighbor.distance),
                    score_source: ScoreSource::Distance,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PolicyChunk;
    use std::collections::HashSet;

    fn snapshot() -> Arc<IndexSnapshot> {
        let chunks = (0..3)
            .map(|i| PolicyChunk {
                chunk_id: format!("id-{i}"),
                document_id: "policy.pdf".to_string(),
                page_number: i + 1,
                chunk_index: 0,
                text: format!("chunk {i}"),
                token_count: 2,
            })
            .collect::<Vec<_>>();
        let embeddings = vec![vec![0.0, 0.0], vec![1.0, 1.0], vec![2.0, 2.0]];
        Arc::new(IndexSnapshot::build(&chunks, &embeddings, "m", 2).expect("snapshot"))
    }

    #[test]
    fn returns_nearest_first_with_metadata() -> Result<(), IndexError> {
        let retriever = Retriever::new(snapshot());
        let hits = retriever.retrieve(&[1.9, 1.9], 2)?;
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.text, "chunk 2");
        assert_eq!(hits[0].chunk.page_number, 3);
        assert_eq!(hits[1].position, 1);
        assert!(hits[0].score <= hits[1].score);
        Ok(())
    }

    #[test]
    fn k_beyond_index_size_returns_all_without_duplicates() -> Result<(), IndexError> {
        let retriever = Retriever::new(snapshot());
        let hits = retriever.retrieve(&[0.0, 0.0], 25)?;
        assert_eq!(hits.len(), 3);
        let unique = hits.iter().map(|hit| hit.position).collect::<HashSet<_>>();
        assert_eq!(unique.len(), 3);
        Ok(())
    }
}
