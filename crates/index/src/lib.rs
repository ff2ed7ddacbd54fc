pub mod embeddings;
pub mod error;
pub mod memory_index;
pub mod qdrant_index;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use embeddings::{Embedder, HashEmbedder, OllamaEmbedder, OpenAiEmbedder};
pub use error::{ServiceError, is_fatal, is_transient, read_json};
pub use memory_index::MemoryIndex;
pub use qdrant_index::QdrantIndex;

use anyhow::Result;
use async_trait::async_trait;
use ingest::{Chunk, PageLabel};
use serde::Serialize;
use std::sync::Arc;

/// One retrieved chunk.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub text: String,
    pub page: PageLabel,
    pub source: String,
    pub score: f32,
}

/// Similarity search over the chunks of one directory.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// The `k` chunks most similar to `query`, best first.
    async fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn name(&self) -> &str;
}

/// Where chunk vectors live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexBackend {
    Memory,
    Qdrant { url: String, collection: String },
}

/// Embed `chunks` and load them into a fresh index.
pub async fn build_index(
    chunks: Vec<Chunk>,
    embedder: Arc<dyn Embedder>,
    backend: &IndexBackend,
) -> Result<Box<dyn VectorIndex>> {
    if chunks.is_empty() {
        anyhow::bail!("Cannot build an index from zero chunks");
    }

    let chunk_count = chunks.len();
    let index: Box<dyn VectorIndex> = match backend {
        IndexBackend::Memory => Box::new(MemoryIndex::build(chunks, embedder).await?),
        IndexBackend::Qdrant { url, collection } => Box::new(
            QdrantIndex::build(url.clone(), collection.clone(), chunks, embedder).await?,
        ),
    };

    tracing::info!(backend = index.name(), chunks = chunk_count, "Index built");
    Ok(index)
}
