use crate::error::IndexError;
use crate::index::FlatIndex;
use crate::models::{ChunkRecord, PolicyChunk};
use crate::traits::VectorIndex;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const INDEX_FILE: &str = "index.bin";
pub const CHUNK_TEXTS_FILE: &str = "chunks.json";
pub const CHUNK_RECORDS_FILE: &str = "meta.json";
pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreManifest {
    pub embedding_model: String,
    pub dimensions: usize,
    pub chunk_count: usize,
    pub documents: Vec<String>,
    pub index_sha256: String,
    pub created_at: DateTime<Utc>,
}

/// Vector index plus the two parallel metadata lists. Position `i` in each
/// describes the same chunk. Shared read-only once built.
#[derive(Debug, Clone)]
pub struct IndexSnapshot {
    pub manifest: StoreManifest,
    pub index: FlatIndex,
    pub texts: Vec<String>,
    pub records: Vec<ChunkRecord>,
}

impl IndexSnapshot {
    pub fn build(
        chunks: &[PolicyChunk],
        embeddings: &[Vec<f32>],
        embedding_model: &str,
        dimensions: usize,
    ) -> Result<Self, IndexError> {
        if chunks.len() != embeddings.len() {
            return Err(IndexError::Corrupt(format!(
                "embedding count {} doesn't match chunk count {}",
                embeddings.len(),
                chunks.len()
            )));
        }

        let mut index = FlatIndex::new(dimensions);
        index.add(embeddings)?;

        let documents = chunks
            .iter()
            .map(|chunk| chunk.document_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        Ok(Self {
            manifest: StoreManifest {
                embedding_model: embedding_model.to_string(),
                dimensions,
                chunk_count: chunks.len(),
                documents,
                index_sha256: String::new(),
                created_at: Utc::now(),
            },
            index,
            texts: chunks.iter().map(|chunk| chunk.text.clone()).collect(),
            records: chunks.iter().map(PolicyChunk::record).collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn chunk(&self, position: usize) -> Option<PolicyChunk> {
        let record = self.records.get(position)?;
        let text = self.texts.get(position)?;
        Some(PolicyChunk::from_record(record, text))
    }

    fn check_alignment(&self) -> Result<(), IndexError> {
        let lengths = [
            self.index.len(),
            self.texts.len(),
            self.records.len(),
            self.manifest.chunk_count,
        ];
        if lengths.iter().any(|length| *length != lengths[0]) {
            return Err(IndexError::Unavailable(format!(
                "index/metadata length mismatch (index={}, texts={}, records={}, manifest={})",
                lengths[0], lengths[1], lengths[2], lengths[3]
            )));
        }
        if self.index.dimensions() != self.manifest.dimensions {
            return Err(IndexError::Unavailable(format!(
                "index dimension {} differs from manifest {}",
                self.index.dimensions(),
                self.manifest.dimensions
            )));
        }
        Ok(())
    }
}

fn digest_file(path: &Path) -> Result<String, IndexError> {
    let bytes = fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), IndexError> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer(&mut writer, value)?;
    writer.flush()?;
    Ok(())
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, IndexError> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

fn sibling(dir: &Path, tag: &str) -> Result<PathBuf, IndexError> {
    let name = dir
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| IndexError::Unavailable(format!("bad store path {}", dir.display())))?;
    let parent = dir.parent().unwrap_or_else(|| Path::new("."));
    Ok(parent.join(format!(".{name}.{tag}-{}", uuid::Uuid::new_v4())))
}

/// Writes the snapshot next to `dir` and swaps it into place, so readers
/// never observe a half-written index. The previous store is discarded.
pub fn write_store(dir: &Path, snapshot: &IndexSnapshot) -> Result<StoreManifest, IndexError> {
    snapshot.check_alignment()?;
    if let Some(parent) = dir.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let staging = sibling(dir, "tmp")?;
    fs::create_dir_all(&staging)?;

    let written = (|| {
        let index_path = staging.join(INDEX_FILE);
        {
            let file = File::create(&index_path)?;
            snapshot.index.write_to(BufWriter::new(&file))?;
            file.sync_all()?;
        }
        write_json(&staging.join(CHUNK_TEXTS_FILE), &snapshot.texts)?;
        write_json(&staging.join(CHUNK_RECORDS_FILE), &snapshot.records)?;

        let mut manifest = snapshot.manifest.clone();
        manifest.index_sha256 = digest_file(&index_path)?;
        write_json(&staging.join(MANIFEST_FILE), &manifest)?;
        Ok::<_, IndexError>(manifest)
    })();

    let manifest = match written {
        Ok(manifest) => manifest,
        Err(error) => {
            let _ = fs::remove_dir_all(&staging);
            return Err(error);
        }
    };

    let retired = if dir.exists() {
        let retired = sibling(dir, "old")?;
        fs::rename(dir, &retired)?;
        Some(retired)
    } else {
        None
    };

    if let Err(error) = fs::rename(&staging, dir) {
        if let Some(retired) = &retired {
            let _ = fs::rename(retired, dir);
        }
        let _ = fs::remove_dir_all(&staging);
        return Err(error.into());
    }

    if let Some(retired) = retired {
        if let Err(error) = fs::remove_dir_all(&retired) {
            warn!(path = %retired.display(), %error, "could not remove previous store");
        }
    }

    info!(
        store = %dir.display(),
        chunks = manifest.chunk_count,
        model = %manifest.embedding_model,
        "vector store written"
    );
    Ok(manifest)
}

/// Loads and cross-checks the whole store. Any missing file, checksum
/// failure or length mismatch makes the store unavailable.
pub fn load_store(dir: &Path) -> Result<IndexSnapshot, IndexError> {
    for file in [INDEX_FILE, CHUNK_TEXTS_FILE, CHUNK_RECORDS_FILE, MANIFEST_FILE] {
        let path = dir.join(file);
        if !path.is_file() {
            return Err(IndexError::Unavailable(format!("missing {}", path.display())));
        }
    }

    let manifest: StoreManifest = read_json(&dir.join(MANIFEST_FILE))?;
    let index_path = dir.join(INDEX_FILE);
    let checksum = digest_file(&index_path)?;
    if checksum != manifest.index_sha256 {
        return Err(IndexError::Unavailable(format!(
            "{} checksum does not match manifest",
            index_path.display()
        )));
    }

    let index = FlatIndex::read_from(BufReader::new(File::open(&index_path)?))?;
    let snapshot = IndexSnapshot {
        manifest,
        index,
        texts: read_json(&dir.join(CHUNK_TEXTS_FILE))?,
        records: read_json(&dir.join(CHUNK_RECORDS_FILE))?,
    };
    snapshot.check_alignment()?;

    if snapshot.is_empty() {
        return Err(IndexError::Unavailable(format!(
            "store {} holds no chunks",
            dir.display()
        )));
    }
    Ok(snapshot)
}
