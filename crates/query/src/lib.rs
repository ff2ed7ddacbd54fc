pub mod llm;
pub mod prompt;
pub mod retriever;

pub use index::ServiceError;
pub use llm::{LanguageModel, OllamaModel, OpenAiChatModel};
pub use prompt::{build_answer_prompt, build_context};
pub use retriever::{AnswerRetriever, DEFAULT_TOP_K, RetrievalResult};
