use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::RetryConfig;
use index::{Embedder, SearchHit, VectorIndex, is_transient};
use query::LanguageModel;

/// Exponential backoff for transient service failures. Anything else is returned at once.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: usize,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: usize, initial_backoff_ms: u64, max_backoff_ms: u64) -> Self {
        Self {
            max_retries,
            initial_backoff: Duration::from_millis(initial_backoff_ms),
            max_backoff: Duration::from_millis(max_backoff_ms),
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_retries, config.initial_backoff_ms, config.max_backoff_ms)
    }

    pub async fn retry<F, Fut, T>(&self, operation_name: &str, mut f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        let mut backoff = self.initial_backoff;

        loop {
            match f().await {
                Ok(result) => {
                    if attempt > 0 {
                        info!(
                            operation = operation_name,
                            attempts = attempt + 1,
                            "Operation succeeded after retries"
                        );
                    }
                    return Ok(result);
                }
                Err(e) if !is_transient(&e) => return Err(e),
                Err(e) => {
                    attempt += 1;
                    if attempt > self.max_retries {
                        warn!(
                            operation = operation_name,
                            attempts = attempt,
                            error = %e,
                            "Operation failed after max retries"
                        );
                        return Err(e);
                    }

                    warn!(
                        operation = operation_name,
                        attempt = attempt,
                        max_retries = self.max_retries,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Operation failed, retrying"
                    );

                    sleep(backoff).await;

                    backoff = std::cmp::min(backoff * 2, self.max_backoff);
                }
            }
        }
    }
}

/// Language model whose calls go through a [`RetryPolicy`].
pub struct RetryingModel {
    inner: Arc<dyn LanguageModel>,
    policy: RetryPolicy,
}

impl RetryingModel {
    pub fn new(inner: Arc<dyn LanguageModel>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl LanguageModel for RetryingModel {
    async fn ask(&self, prompt: &str) -> Result<String> {
        self.policy.retry("llm.ask", || self.inner.ask(prompt)).await
    }

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }
}

pub struct RetryingEmbedder {
    inner: Arc<dyn Embedder>,
    policy: RetryPolicy,
}

impl RetryingEmbedder {
    pub fn new(inner: Arc<dyn Embedder>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl Embedder for RetryingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.policy.retry("embeddings.embed", || self.inner.embed(text)).await
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.policy
            .retry("embeddings.embed_batch", || self.inner.embed_batch(texts))
            .await
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

/// Remote index searches go through the policy as well.
pub struct RetryingIndex {
    inner: Arc<dyn VectorIndex>,
    policy: RetryPolicy,
}

impl RetryingIndex {
    pub fn new(inner: Arc<dyn VectorIndex>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl VectorIndex for RetryingIndex {
    async fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>> {
        self.policy
            .retry("index.search", || self.inner.similarity_search(query, k))
            .await
    }

    fn len(&self) -> usize {
        self.inner.len()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use index::ServiceError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn policy(max_retries: usize) -> RetryPolicy {
        RetryPolicy::new(max_retries, 1, 2)
    }

    fn transient() -> anyhow::Error {
        ServiceError::Transient {
            service: "llm",
            message: "503".into(),
        }
        .into()
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let result = policy(2)
            .retry("test", move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(transient())
                } else {
                    Ok(7)
                }
            })
            .await
            .unwrap();

        assert_eq!(result, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let err = policy(1)
            .retry("test", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(transient())
            })
            .await
            .unwrap_err();

        assert!(is_transient(&err));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fatal_and_plain_errors_are_not_retried() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let _ = policy(3)
            .retry("test", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(anyhow::Error::from(ServiceError::Fatal {
                    service: "llm",
                    message: "401".into(),
                }))
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        calls.store(0, Ordering::SeqCst);
        let _ = policy(3)
            .retry("test", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(anyhow::anyhow!("malformed response"))
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_retries_is_single_call() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let _ = policy(0)
            .retry("test", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(transient())
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    struct FlakyModel {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LanguageModel for FlakyModel {
        async fn ask(&self, _prompt: &str) -> Result<String> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(transient())
            } else {
                Ok("Parking Space With Action: 10".to_string())
            }
        }

        fn name(&self) -> &str {
            "flaky"
        }

        fn model(&self) -> &str {
            "flaky-1"
        }
    }

    #[tokio::test]
    async fn test_retrying_model_recovers() {
        let inner = Arc::new(FlakyModel {
            calls: AtomicUsize::new(0),
        });
        let model = RetryingModel::new(inner.clone(), policy(2));

        assert_eq!(model.ask("q").await.unwrap(), "Parking Space With Action: 10");
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
        assert_eq!(model.model(), "flaky-1");
    }
}
