use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::llm::LanguageModel;
use crate::prompt::{build_answer_prompt, build_context};
use index::VectorIndex;

/// Number of chunks placed in the context of each question.
pub const DEFAULT_TOP_K: usize = 4;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub answer: String,
    pub context: String,
    /// Page label of every context chunk, in context order
    pub pages: Vec<String>,
}

/// Retrieves context for a question and asks the model about it.
pub struct AnswerRetriever {
    index: Arc<dyn VectorIndex>,
    model: Arc<dyn LanguageModel>,
    top_k: usize,
}

impl AnswerRetriever {
    pub fn new(index: Arc<dyn VectorIndex>, model: Arc<dyn LanguageModel>, top_k: usize) -> Self {
        Self {
            index,
            model,
            top_k: top_k.max(1),
        }
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// One search, one prompt, one response.
    pub async fn answer(&self, question: &str) -> Result<RetrievalResult> {
        let hits = self
            .index
            .similarity_search(question, self.top_k)
            .await
            .context("Similarity search failed")?;

        let pages: Vec<String> = hits.iter().map(|hit| hit.page.to_string()).collect();
        let context = build_context(&hits);
        let prompt = build_answer_prompt(&context, question);

        tracing::debug!(
            index = self.index.name(),
            model = self.model.model(),
            chunks = hits.len(),
            prompt_chars = prompt.len(),
            "Asking language model"
        );

        let response = self
            .model
            .ask(&prompt)
            .await
            .with_context(|| format!("{} request failed", self.model.name()))?;

        Ok(RetrievalResult {
            answer: response.trim().to_string(),
            context,
            pages,
        })
    }
}
