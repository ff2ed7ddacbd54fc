use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;

use crate::embeddings::Embedder;
use crate::{SearchHit, VectorIndex};
use ingest::Chunk;

/// Exact nearest-neighbour search over an in-process list of vectors.
pub struct MemoryIndex {
    embedder: Arc<dyn Embedder>,
    entries: Vec<(Chunk, Vec<f32>)>,
}

impl MemoryIndex {
    pub async fn build(chunks: Vec<Chunk>, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = embedder
            .embed_batch(&texts)
            .await
            .context("Failed to embed chunks")?;

        if vectors.len() != chunks.len() {
            anyhow::bail!("Embedder returned {} vectors for {} chunks", vectors.len(), chunks.len());
        }

        Ok(Self {
            embedder,
            entries: chunks.into_iter().zip(vectors).collect(),
        })
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>> {
        let query_vector = self
            .embedder
            .embed(query)
            .await
            .context("Failed to embed query")?;

        let mut scored: Vec<(f32, &Chunk)> = self
            .entries
            .iter()
            .map(|(chunk, vector)| (cosine_similarity(&query_vector, vector), chunk))
            .collect();

        // stable sort: equal scores keep ingestion order
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(score, chunk)| SearchHit {
                text: chunk.text.clone(),
                page: chunk.page,
                source: chunk.source.clone(),
                score,
            })
            .collect())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn name(&self) -> &str {
        "memory"
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}
