pub mod chunk;
pub mod chunker;
#[cfg(any(test, feature = "fixtures"))]
pub mod fixtures;
pub mod reader;

pub use chunk::{Chunk, PageLabel};
pub use chunker::{Chunker, ChunkerConfig};
pub use reader::{PageText, PdfReader};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Failures that mean "nothing to process here" rather than a crash.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("No PDF files found in {0:?}")]
    NoPdfFiles(PathBuf),
    #[error("No text could be extracted from the PDF files in {0:?}")]
    NoText(PathBuf),
}

/// Generate a stable document ID from file path
pub fn generate_doc_id(path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.as_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..16])
}

/// Extract and chunk a single PDF.
pub async fn ingest_pdf(file_path: &Path, config: ChunkerConfig) -> Result<Vec<Chunk>> {
    let owned = file_path.to_path_buf();
    let pages = tokio::task::spawn_blocking(move || PdfReader::read_pages(&owned))
        .await
        .context("PDF extraction task panicked")??;

    let path_str = file_path.to_string_lossy().to_string();
    let doc_id = generate_doc_id(&path_str);

    let chunker = Chunker::new(config);
    Ok(chunker.chunk_pages(&doc_id, &path_str, &pages))
}

/// Load every PDF directly inside `dir_path` and split it into chunks.
///
/// Fails with [`IngestError::NoPdfFiles`] when the directory has no PDFs and
/// with [`IngestError::NoText`] when none of them yielded any text. A PDF
/// that cannot be read is logged and skipped.
pub async fn load_and_split(dir_path: &Path, config: ChunkerConfig) -> Result<Vec<Chunk>> {
    let files = PdfReader::list_pdfs(dir_path)?;
    if files.is_empty() {
        return Err(IngestError::NoPdfFiles(dir_path.to_path_buf()).into());
    }

    let mut all_chunks = Vec::new();

    for file in &files {
        match ingest_pdf(file, config).await {
            Ok(chunks) => {
                tracing::info!(file = %file.display(), chunks = chunks.len(), "ingested PDF");
                all_chunks.extend(chunks);
            }
            Err(e) => {
                tracing::warn!(file = %file.display(), error = %e, "skipping unreadable PDF");
            }
        }
    }

    if all_chunks.is_empty() {
        return Err(IngestError::NoText(dir_path.to_path_buf()).into());
    }

    Ok(all_chunks)
}

/// True when `err` means the directory had nothing usable, so callers skip it.
pub fn is_no_input(err: &anyhow::Error) -> bool {
    err.downcast_ref::<IngestError>().is_some()
}
