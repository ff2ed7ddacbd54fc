use anyhow::Result;
use report::ExportFormat;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::batch::Discovery;
use crate::cli::{BackendArg, ConfigArgs, EmbedderArg, FormatArg, ProviderArg};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub embeddings: EmbeddingConfig,
    pub retrieval: RetrievalConfig,
    pub index: IndexConfig,
    pub retry: RetryConfig,
    pub output: OutputConfig,
    pub batch: BatchConfig,
    pub catalog: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    OpenAi,
    Ollama,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    OpenAi,
    Ollama,
    Hash, // offline, no semantic similarity
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    Memory,
    Qdrant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub model: String,
    pub temperature: f32,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub openai_url: String,
    pub ollama_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProvider,
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    pub backend: IndexKind,
    pub qdrant_url: String,
    pub collection_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    pub directory: Option<PathBuf>,
    pub format: ExportFormat,
    pub answers_log: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Find PDF folders at any depth instead of immediate sub-directories only
    pub recursive: bool,
    /// End the batch at the first fatal service failure
    pub stop_on_fatal: bool,
}

impl BatchConfig {
    pub fn discovery(&self) -> Discovery {
        if self.recursive {
            Discovery::Recursive
        } else {
            Discovery::Subdirectories
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig {
                provider: LlmProvider::OpenAi,
                model: "gpt-4o-2024-05-13".to_string(),
                temperature: 0.0,
                api_key: None,
                openai_url: "https://api.openai.com/v1".to_string(),
                ollama_url: "http://localhost:11434".to_string(),
            },
            embeddings: EmbeddingConfig {
                provider: EmbeddingProvider::OpenAi,
                model: "text-embedding-ada-002".to_string(),
            },
            retrieval: RetrievalConfig {
                top_k: query::DEFAULT_TOP_K,
                chunk_size: 1000,
                chunk_overlap: 200,
            },
            index: IndexConfig {
                backend: IndexKind::Memory,
                qdrant_url: "http://localhost:6333".to_string(),
                collection_prefix: "edi_chunks".to_string(),
            },
            retry: RetryConfig {
                max_retries: 2,
                initial_backoff_ms: 1000,
                max_backoff_ms: 10000,
            },
            output: OutputConfig {
                directory: None,
                format: ExportFormat::Xlsx,
                answers_log: false,
            },
            batch: BatchConfig::default(),
            catalog: None,
        }
    }
}

impl AppConfig {
    /// Defaults overridden by whatever the command line (or its env fallbacks) set.
    pub fn from_args(args: &ConfigArgs) -> Result<Self> {
        let mut config = Self::default();

        if let Some(key) = args.openai_api_key.as_ref().filter(|k| !k.trim().is_empty()) {
            config.llm.api_key = Some(key.trim().to_string());
        }
        if let Some(url) = &args.openai_url {
            config.llm.openai_url = url.clone();
        }
        if let Some(provider) = args.llm_provider {
            config.llm.provider = match provider {
                ProviderArg::Openai => LlmProvider::OpenAi,
                ProviderArg::Ollama => LlmProvider::Ollama,
            };
        }
        if let Some(model) = &args.llm_model {
            config.llm.model = model.clone();
        }
        if let Some(temperature) = args.temperature {
            config.llm.temperature = temperature;
        }
        if let Some(url) = &args.ollama_url {
            config.llm.ollama_url = url.clone();
        }
        if let Some(provider) = args.embedding_provider {
            config.embeddings.provider = match provider {
                EmbedderArg::Openai => EmbeddingProvider::OpenAi,
                EmbedderArg::Ollama => EmbeddingProvider::Ollama,
                EmbedderArg::Hash => EmbeddingProvider::Hash,
            };
        }
        if let Some(model) = &args.embedding_model {
            config.embeddings.model = model.clone();
        }
        if let Some(top_k) = args.top_k {
            config.retrieval.top_k = top_k;
        }
        if let Some(size) = args.chunk_size {
            config.retrieval.chunk_size = size;
        }
        if let Some(overlap) = args.chunk_overlap {
            config.retrieval.chunk_overlap = overlap;
        }
        if let Some(backend) = args.index {
            config.index.backend = match backend {
                BackendArg::Memory => IndexKind::Memory,
                BackendArg::Qdrant => IndexKind::Qdrant,
            };
        }
        if let Some(url) = &args.qdrant_url {
            config.index.qdrant_url = url.clone();
        }
        if let Some(retries) = args.max_retries {
            config.retry.max_retries = retries;
        }
        if let Some(dir) = &args.output_dir {
            config.output.directory = Some(dir.clone());
        }
        if let Some(format) = args.format {
            config.output.format = match format {
                FormatArg::Xlsx => ExportFormat::Xlsx,
                FormatArg::Csv => ExportFormat::Csv,
            };
        }
        config.output.answers_log = args.answers_log;
        config.batch.recursive = args.recursive;
        config.batch.stop_on_fatal = args.stop_on_fatal;
        config.catalog = args.catalog.clone();

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let needs_openai = self.llm.provider == LlmProvider::OpenAi
            || self.embeddings.provider == EmbeddingProvider::OpenAi;
        if needs_openai && self.llm.api_key.is_none() {
            anyhow::bail!("OPENAI_API_KEY is not set (put it in .env or pass --openai-api-key)");
        }
        if self.retrieval.top_k == 0 {
            anyhow::bail!("top_k must be at least 1");
        }
        if self.retrieval.chunk_size == 0 {
            anyhow::bail!("chunk_size must be at least 1");
        }
        if self.retrieval.chunk_overlap >= self.retrieval.chunk_size {
            anyhow::bail!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.retrieval.chunk_overlap,
                self.retrieval.chunk_size
            );
        }
        Ok(())
    }

    pub fn chunker(&self) -> ingest::ChunkerConfig {
        ingest::ChunkerConfig {
            chunk_size: self.retrieval.chunk_size,
            chunk_overlap: self.retrieval.chunk_overlap,
        }
    }
}
