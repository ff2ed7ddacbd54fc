use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::error::{ServiceError, read_json};

/// Turns text into vectors. The index embeds chunks and questions with the same one.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    fn name(&self) -> &str;
}

/// OpenAI-compatible `/embeddings` endpoint.
#[derive(Clone)]
pub struct OpenAiEmbedder {
    base_url: String,
    model: String,
    api_key: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct OpenAiEmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<OpenAiEmbedding>,
}

#[derive(Deserialize)]
struct OpenAiEmbedding {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    /// Inputs per request.
    const BATCH_SIZE: usize = 64;

    pub fn new(base_url: String, model: String, api_key: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            api_key,
            client: reqwest::Client::new(),
        }
    }

    async fn request(&self, input: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&OpenAiEmbeddingRequest {
                model: &self.model,
                input,
            })
            .send()
            .await
            .map_err(|e| ServiceError::from_transport("embeddings", &e))
            .context("Failed to send embedding request")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::from_status("embeddings", status, &body).into());
        }

        let mut parsed: OpenAiEmbeddingResponse = read_json("embeddings", response)
            .await
            .context("Failed to parse embedding response")?;

        if parsed.data.len() != input.len() {
            return Err(ServiceError::malformed(
                "embeddings",
                format!(
                    "{} vectors for {} inputs",
                    parsed.data.len(),
                    input.len()
                ),
            )
            .into());
        }

        parsed.data.sort_by_key(|d| d.index);
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.request(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| ServiceError::malformed("embeddings", "empty embedding response").into())
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(Self::BATCH_SIZE) {
            out.extend(self.request(batch).await?);
        }
        Ok(out)
    }

    fn name(&self) -> &str {
        "openai"
    }
}

/// Local Ollama server.
#[derive(Clone)]
pub struct OllamaEmbedder {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct OllamaEmbeddingRequest {
    model: String,
    prompt: String,
}

#[derive(Deserialize)]
struct OllamaEmbeddingResponse {
    embedding: Vec<f32>,
}

impl OllamaEmbedder {
    pub fn new(base_url: String, model: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/api/embeddings", self.base_url);

        let request = OllamaEmbeddingRequest {
            model: self.model.clone(),
            prompt: text.to_string(),
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ServiceError::from_transport("embeddings", &e))
            .context("Failed to send embedding request")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::from_status("embeddings", status, &body).into());
        }

        let embedding_response: OllamaEmbeddingResponse = read_json("embeddings", response)
            .await
            .context("Failed to parse embedding response")?;

        Ok(embedding_response.embedding)
    }

    fn name(&self) -> &str {
        "ollama"
    }
}

/// Offline embedder: hashed bag of lowercase words, L2-normalised.
///
/// No semantic similarity, only shared vocabulary. Good enough for dry runs
/// and tests.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];

        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            word.to_lowercase().hash(&mut hasher);
            let bucket = (hasher.finish() % self.dimensions as u64) as usize;
            vector[bucket] += 1.0;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        vector
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_text(text))
    }

    fn name(&self) -> &str {
        "hash"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_embedder_is_deterministic_and_normalised() {
        let embedder = HashEmbedder::new(64);
        let a = embedder.embed_text("Parking Space With Action");
        let b = embedder.embed_text("parking space with action");
        assert_eq!(a, b);

        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_hash_embedder_empty_text_is_zero_vector() {
        let embedder = HashEmbedder::new(8);
        assert_eq!(embedder.embed_text("  ,. "), vec![0.0; 8]);
    }

    #[tokio::test]
    async fn test_default_batch_embeds_each_text() {
        let embedder = HashEmbedder::default();
        let vectors = embedder
            .embed_batch(&["one".to_string(), "two".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors.len(), 2);
        assert_ne!(vectors[0], vectors[1]);
    }

    #[tokio::test]
    async fn test_vector_count_mismatch_is_fatal() {
        let base = crate::testing::serve_once("200 OK", r#"{"data":[]}"#).await;
        let embedder = OpenAiEmbedder::new(base, "text-embedding-ada-002".into(), "key".into());

        let err = embedder.embed("Parking Space").await.unwrap_err();
        assert!(crate::is_fatal(&err));
    }

    #[tokio::test]
    async fn test_ollama_html_body_is_fatal() {
        let base = crate::testing::serve_once("200 OK", "<html>proxy error</html>").await;
        let embedder = OllamaEmbedder::new(base, "nomic-embed-text".into());

        let err = embedder.embed("Parking Space").await.unwrap_err();
        assert!(crate::is_fatal(&err));
        assert!(!crate::is_transient(&err));
    }
}
