use crate::chunking::{chunk_page, ChunkingConfig};
use crate::config::IngestionOptions;
use crate::embeddings::Embedder;
use crate::error::IngestError;
use crate::extractor::DocumentExtractor;
use crate::models::PolicyChunk;
use crate::store::{write_store, IndexSnapshot, StoreManifest};
use crate::tokenizer::Tokenizer;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{info, warn};
use walkdir::WalkDir;

pub fn discover_documents(folder: &Path, extensions: &[String]) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let supported = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| extensions.iter().any(|wanted| wanted.eq_ignore_ascii_case(ext)));

        if supported {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

#[derive(Debug, Clone)]
pub struct SkippedDocument {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct IngestionReport {
    pub chunks: Vec<PolicyChunk>,
    pub documents: usize,
    pub pages: usize,
    pub skipped_files: Vec<SkippedDocument>,
}

fn document_id(path: &Path) -> Result<String, IngestError> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))
}

/// Extracts and chunks one document. Fails on the first bad page.
pub fn chunk_document(
    path: &Path,
    extractor: &dyn DocumentExtractor,
    tokenizer: &dyn Tokenizer,
    config: ChunkingConfig,
    section_marker: &Regex,
) -> Result<(Vec<PolicyChunk>, usize), IngestError> {
    let document_id = document_id(path)?;
    let pages = extractor.extract_pages(path)?;
    let mut chunks = Vec::new();

    for page in &pages {
        chunks.extend(chunk_page(
            &document_id,
            page.number,
            &page.text,
            tokenizer,
            config,
            section_marker,
        )?);
    }

    Ok((chunks, pages.len()))
}

/// Chunks every supported document under `folder`, one blocking task per
/// document. Unreadable documents are recorded and skipped. Output order is
/// the sorted path order regardless of task completion order.
pub async fn ingest_folder_chunks_best_effort(
    folder: &Path,
    options: &IngestionOptions,
    extractor: Arc<dyn DocumentExtractor>,
    tokenizer: Arc<dyn Tokenizer>,
) -> Result<IngestionReport, IngestError> {
    let config = ChunkingConfig::from(options);
    config.validate()?;
    let section_marker = Arc::new(Regex::new(&options.section_marker_regex)?);

    let files = discover_documents(folder, &options.extensions);
    if files.is_empty() {
        return Err(IngestError::InvalidArgument(format!(
            "no documents with extensions {:?} found in {}",
            options.extensions,
            folder.display()
        )));
    }

    let mut tasks = JoinSet::new();
    for (slot, path) in files.iter().cloned().enumerate() {
        let extractor = Arc::clone(&extractor);
        let tokenizer = Arc::clone(&tokenizer);
        let section_marker = Arc::clone(&section_marker);
        tasks.spawn_blocking(move || {
            let outcome = chunk_document(
                &path,
                extractor.as_ref(),
                tokenizer.as_ref(),
                config,
                &section_marker,
            );
            (slot, path, outcome)
        });
    }

    let mut outcomes = Vec::with_capacity(files.len());
    while let Some(joined) = tasks.join_next().await {
        outcomes.push(joined?);
    }
    outcomes.sort_by_key(|(slot, _, _)| *slot);

    let mut report = IngestionReport::default();
    for (_, path, outcome) in outcomes {
        match outcome {
            Ok((chunks, pages)) => {
                info!(path = %path.display(), pages, chunks = chunks.len(), "document chunked");
                report.documents += 1;
                report.pages += pages;
                report.chunks.extend(chunks);
            }
            Err(error) => {
                warn!(path = %path.display(), %error, "skipping unreadable document");
                report.skipped_files.push(SkippedDocument {
                    path,
                    reason: error.to_string(),
                });
            }
        }
    }

    Ok(report)
}

/// Embeds all chunks and swaps a fresh store into `store_dir`. Runs after
/// chunking has finished so the index is written by a single writer.
pub async fn build_index(
    chunks: Vec<PolicyChunk>,
    embedder: Arc<dyn Embedder>,
    store_dir: &Path,
) -> Result<StoreManifest, IngestError> {
    if chunks.is_empty() {
        return Err(IngestError::InvalidArgument(
            "refusing to write an index with no chunks".to_string(),
        ));
    }

    let store_dir = store_dir.to_path_buf();
    let manifest = tokio::task::spawn_blocking(move || {
        let texts = chunks.iter().map(|chunk| chunk.text.clone()).collect::<Vec<_>>();
        let embeddings = embedder.embed_batch(&texts)?;
        let snapshot = IndexSnapshot::build(
            &chunks,
            &embeddings,
            &embedder.model_id(),
            embedder.dimensions(),
        )?;
        Ok::<_, IngestError>(write_store(&store_dir, &snapshot)?)
    })
    .await??;

    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::FeatureHashEmbedder;
    use crate::extractor::DefaultExtractor;
    use crate::store::load_store;
    use crate::tokenizer::WordTokenizer;
    use std::fs::{self, File};
    use std::io::Write;
    use tempfile::tempdir;

    fn small_options() -> IngestionOptions {
        IngestionOptions {
            min_tokens: 4,
            max_tokens: 40,
            overlap_tokens: 8,
            ..IngestionOptions::default()
        }
    }

    #[test]
    fn discover_documents_is_recursive_and_filters_extensions(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let base = dir.path();
        let nested = base.join("nested");
        fs::create_dir(&nested)?;

        File::create(base.join("a.pdf")).and_then(|mut file| file.write_all(b"%PDF-1.4\n%fake"))?;
        File::create(nested.join("b.TXT")).and_then(|mut file| file.write_all(b"text"))?;
        File::create(nested.join("c.docx")).and_then(|mut file| file.write_all(b"zip"))?;

        let files = discover_documents(base, &IngestionOptions::default().extensions);
        assert_eq!(files.len(), 2);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn ingestion_fails_without_documents() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let result = ingest_folder_chunks_best_effort(
            dir.path(),
            &small_options(),
            Arc::new(DefaultExtractor::default()),
            Arc::new(WordTokenizer),
        )
        .await;
        assert!(matches!(result, Err(IngestError::InvalidArgument(_))));
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn best_effort_skips_unreadable_documents() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        fs::write(dir.path().join("unreadable.pdf"), b"%PDF-1.4\n%broken")?;
        fs::write(
            dir.path().join("policy.txt"),
            "Maternity benefits are covered after nine months.\u{000C}Dental care is excluded.",
        )?;

        let report = ingest_folder_chunks_best_effort(
            dir.path(),
            &small_options(),
            Arc::new(DefaultExtractor::default()),
            Arc::new(WordTokenizer),
        )
        .await?;

        assert_eq!(report.documents, 1);
        assert_eq!(report.pages, 2);
        assert_eq!(report.chunks.len(), 2);
        assert_eq!(report.chunks[1].page_number, 2);
        assert_eq!(report.chunks[1].chunk_index, 0);
        assert_eq!(report.chunks[0].document_id, "policy.txt");
        assert_eq!(report.skipped_files.len(), 1);
        assert_eq!(
            report.skipped_files[0]
                .path
                .file_name()
                .and_then(|name| name.to_str()),
            Some("unreadable.pdf")
        );
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn built_index_finds_every_chunk_by_its_own_text() -> Result<(), Box<dyn std::error::Error>>
    {
        use crate::traits::VectorIndex;

        let dir = tempdir()?;
        let docs = dir.path().join("docs");
        fs::create_dir(&docs)?;
        fs::write(
            docs.join("a.txt"),
            "Hospital room rent is capped at one percent of the sum insured. \
             Ambulance charges are paid up to INR 2,000 per hospitalisation.",
        )?;
        fs::write(
            docs.join("b.txt"),
            "Cataract surgery has a waiting period of two years. \
             Pre-existing diseases are covered after forty eight months.",
        )?;

        let embedder = Arc::new(FeatureHashEmbedder::default());
        let options = IngestionOptions {
            min_tokens: 5,
            max_tokens: 15,
            overlap_tokens: 0,
            ..IngestionOptions::default()
        };
        let report = ingest_folder_chunks_best_effort(
            &docs,
            &options,
            Arc::new(DefaultExtractor::default()),
            embedder.tokenizer(),
        )
        .await?;
        assert_eq!(report.chunks.len(), 4);

        let store = dir.path().join("store");
        let manifest = build_index(report.chunks.clone(), embedder.clone(), &store).await?;
        assert_eq!(manifest.chunk_count, 4);
        assert_eq!(manifest.embedding_model, embedder.model_id());

        let snapshot = load_store(&store)?;
        for (position, chunk) in report.chunks.iter().enumerate() {
            let hits = snapshot.index.search(&embedder.embed(&chunk.text)?, 1)?;
            assert_eq!(hits[0].position, position);
            assert!(hits[0].distance.abs() < 1e-6);
        }
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn empty_chunk_list_is_not_written() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let result = build_index(
            Vec::new(),
            Arc::new(FeatureHashEmbedder::default()),
            &dir.path().join("store"),
        )
        .await;
        assert!(matches!(result, Err(IngestError::InvalidArgument(_))));
        assert!(!dir.path().join("store").exists());
        Ok(())
    }
}
