use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::embeddings::Embedder;
use crate::error::{ServiceError, read_json};
use crate::{SearchHit, VectorIndex};
use ingest::{Chunk, PageLabel};

/// Chunks stored in a Qdrant collection, talked to over its REST API.
pub struct QdrantIndex {
    base_url: String,
    client: reqwest::Client,
    embedder: Arc<dyn Embedder>,
    collection_name: String,
    points: usize,
}

#[derive(Serialize)]
struct CreateCollection {
    vectors: VectorParams,
}

#[derive(Serialize)]
struct VectorParams {
    size: usize,
    distance: String,
}

#[derive(Serialize)]
struct UpsertPoints {
    points: Vec<Point>,
}

#[derive(Serialize)]
struct Point {
    id: u64,
    vector: Vec<f32>,
    payload: HashMap<String, serde_json::Value>,
}

#[derive(Serialize)]
struct SearchRequest {
    vector: Vec<f32>,
    limit: usize,
    with_payload: bool,
}

#[derive(Deserialize)]
struct SearchResponse {
    result: Vec<ScoredPoint>,
}

#[derive(Deserialize)]
struct ScoredPoint {
    score: f32,
    #[serde(default)]
    payload: HashMap<String, serde_json::Value>,
}

impl QdrantIndex {
    /// Points per upsert request.
    const UPSERT_BATCH: usize = 128;

    /// Drop and recreate `collection_name`, then upsert every chunk.
    pub async fn build(
        base_url: String,
        collection_name: String,
        chunks: Vec<Chunk>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        let mut index = Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            embedder,
            collection_name,
            points: 0,
        };

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = index
            .embedder
            .embed_batch(&texts)
            .await
            .context("Failed to embed chunks")?;

        let dimension = vectors
            .first()
            .map(Vec::len)
            .ok_or_else(|| anyhow::anyhow!("No chunks to index"))?;

        index.recreate_collection(dimension).await?;

        let points: Vec<Point> = chunks
            .iter()
            .zip(vectors)
            .enumerate()
            .map(|(i, (chunk, vector))| Point {
                id: i as u64,
                vector,
                payload: payload_for(chunk),
            })
            .collect();

        index.points = points.len();
        let mut points = points.into_iter().peekable();
        while points.peek().is_some() {
            let batch: Vec<Point> = points.by_ref().take(Self::UPSERT_BATCH).collect();
            index.upsert(batch).await?;
        }

        tracing::info!(
            collection = %index.collection_name,
            points = index.points,
            dimension,
            "Qdrant collection ready"
        );
        Ok(index)
    }

    async fn recreate_collection(&self, dimension: usize) -> Result<()> {
        let url = format!("{}/collections/{}", self.base_url, self.collection_name);

        // A missing collection answers 404, which is fine here
        let response = self
            .client
            .delete(&url)
            .send()
            .await
            .map_err(|e| ServiceError::from_transport("qdrant", &e))
            .context("Failed to delete Qdrant collection")?;
        let status = response.status();
        if !status.is_success() && status != reqwest::StatusCode::NOT_FOUND {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::from_status("qdrant", status, &body).into());
        }

        let create_req = CreateCollection {
            vectors: VectorParams {
                size: dimension,
                distance: "Cosine".to_string(),
            },
        };

        let response = self
            .client
            .put(&url)
            .json(&create_req)
            .send()
            .await
            .map_err(|e| ServiceError::from_transport("qdrant", &e))
            .context("Failed to create Qdrant collection")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::from_status("qdrant", status, &body).into());
        }

        Ok(())
    }

    async fn upsert(&self, points: Vec<Point>) -> Result<()> {
        let url = format!(
            "{}/collections/{}/points?wait=true",
            self.base_url, self.collection_name
        );

        let response = self
            .client
            .put(&url)
            .json(&UpsertPoints { points })
            .send()
            .await
            .map_err(|e| ServiceError::from_transport("qdrant", &e))
            .context("Failed to upsert points")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::from_status("qdrant", status, &body).into());
        }

        Ok(())
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>> {
        let vector = self
            .embedder
            .embed(query)
            .await
            .context("Failed to embed query")?;

        let url = format!(
            "{}/collections/{}/points/search",
            self.base_url, self.collection_name
        );

        let response = self
            .client
            .post(&url)
            .json(&SearchRequest {
                vector,
                limit: k,
                with_payload: true,
            })
            .send()
            .await
            .map_err(|e| ServiceError::from_transport("qdrant", &e))
            .context("Failed to search Qdrant")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::from_status("qdrant", status, &body).into());
        }

        let parsed: SearchResponse = read_json("qdrant", response)
            .await
            .context("Failed to parse Qdrant search response")?;

        Ok(parsed.result.into_iter().map(hit_from_point).collect())
    }

    fn len(&self) -> usize {
        self.points
    }

    fn name(&self) -> &str {
        "qdrant"
    }
}

fn payload_for(chunk: &Chunk) -> HashMap<String, serde_json::Value> {
    let mut payload = HashMap::new();
    payload.insert("chunk_id".to_string(), serde_json::json!(chunk.chunk_id));
    payload.insert("doc_id".to_string(), serde_json::json!(chunk.doc_id));
    payload.insert("text".to_string(), serde_json::json!(chunk.text));
    payload.insert("source".to_string(), serde_json::json!(chunk.source));
    payload.insert("page".to_string(), chunk.page.to_json());
    payload
}

fn hit_from_point(point: ScoredPoint) -> SearchHit {
    let text_of = |key: &str| {
        point
            .payload
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string()
    };

    SearchHit {
        text: text_of("text"),
        source: text_of("source"),
        page: point
            .payload
            .get("page")
            .map(PageLabel::from_json)
            .unwrap_or(PageLabel::Unknown),
        score: point.score,
    }
}
