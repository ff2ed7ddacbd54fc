use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use index::{ServiceError, read_json};

/// A language model that answers one prompt with one block of text.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn ask(&self, prompt: &str) -> Result<String>;

    /// Provider name for logging
    fn name(&self) -> &str;

    fn model(&self) -> &str;
}

/// OpenAI-compatible `/chat/completions` endpoint.
#[derive(Clone)]
pub struct OpenAiChatModel {
    base_url: String,
    model: String,
    api_key: String,
    temperature: f32,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiChatModel {
    pub fn new(base_url: String, model: String, api_key: String, temperature: f32) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            api_key,
            temperature,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl LanguageModel for OpenAiChatModel {
    async fn ask(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);

        // The whole prompt goes in as a single user message
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.temperature,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ServiceError::from_transport("llm", &e))
            .context("Failed to send request to OpenAI")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::from_status("llm", status, &body).into());
        }

        let chat_response: ChatResponse = read_json("llm", response)
            .await
            .context("Failed to parse OpenAI response")?;

        chat_response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.unwrap_or_default())
            .ok_or_else(|| ServiceError::malformed("llm", "OpenAI response had no choices").into())
    }

    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Local Ollama server.
#[derive(Clone)]
pub struct OllamaModel {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct OllamaRequest {
    model: String,
    prompt: String,
    stream: bool,
}

#[derive(Deserialize)]
struct OllamaResponse {
    response: String,
}

impl OllamaModel {
    pub fn new(base_url: String, model: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl LanguageModel for OllamaModel {
    async fn ask(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);

        let request = OllamaRequest {
            model: self.model.clone(),
            prompt: prompt.to_string(),
            stream: false,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ServiceError::from_transport("llm", &e))
            .context("Failed to send request to Ollama")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::from_status("llm", status, &body).into());
        }

        let ollama_response: OllamaResponse = read_json("llm", response)
            .await
            .context("Failed to parse Ollama response")?;

        Ok(ollama_response.response)
    }

    fn name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }
}
