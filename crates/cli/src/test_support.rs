use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::batch::Pipeline;
use crate::config::{AppConfig, EmbeddingProvider};
use index::{HashEmbedder, ServiceError};
use query::LanguageModel;
use report::{ExportFormat, QuestionCatalog};

/// Answers the two parking questions, nothing else.
pub struct ParkingModel;

#[async_trait]
impl LanguageModel for ParkingModel {
    async fn ask(&self, prompt: &str) -> Result<String> {
        let question = prompt.split("Question: ").last().unwrap_or("");
        let answer = if question.contains("Parking Space With No Action: [number]") {
            "Parking Space With No Action: 42"
        } else if question.contains("Parking Space With Action: [number]") {
            "Parking Space With Action: 10"
        } else {
            "The document does not say."
        };
        Ok(answer.to_string())
    }

    fn name(&self) -> &str {
        "parking"
    }

    fn model(&self) -> &str {
        "parking-1"
    }
}

pub struct RevokedKeyModel;

#[async_trait]
impl LanguageModel for RevokedKeyModel {
    async fn ask(&self, _prompt: &str) -> Result<String> {
        Err(ServiceError::Fatal {
            service: "llm",
            message: "401 Unauthorized".into(),
        }
        .into())
    }

    fn name(&self) -> &str {
        "revoked"
    }

    fn model(&self) -> &str {
        "revoked-1"
    }
}

/// Rejects its first call as unauthorised, then answers like [`ParkingModel`].
#[derive(Default)]
pub struct RecoveringModel {
    failed_once: AtomicBool,
}

#[async_trait]
impl LanguageModel for RecoveringModel {
    async fn ask(&self, prompt: &str) -> Result<String> {
        if !self.failed_once.swap(true, Ordering::SeqCst) {
            return RevokedKeyModel.ask(prompt).await;
        }
        ParkingModel.ask(prompt).await
    }

    fn name(&self) -> &str {
        "recovering"
    }

    fn model(&self) -> &str {
        "recovering-1"
    }
}

pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.embeddings.provider = EmbeddingProvider::Hash;
    config.output.format = ExportFormat::Csv;
    config.retry.max_retries = 0;
    config
}

pub fn pipeline(config: AppConfig, model: Arc<dyn LanguageModel>) -> Pipeline {
    Pipeline::new(config, QuestionCatalog::builtin(), model, Arc::new(HashEmbedder::default()))
}

pub fn write_parking_pdf(dir: &Path) {
    std::fs::create_dir_all(dir).unwrap();
    ingest::fixtures::write_text_pdf(
        &dir.join("project.pdf"),
        &[
            &["Parking Space With No Action: 42"],
            &["Parking Space With Action: 10"],
        ],
    )
    .unwrap();
}
