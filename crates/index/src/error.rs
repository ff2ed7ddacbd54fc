use reqwest::StatusCode;
use serde::de::DeserializeOwned;

/// Failure talking to an external service (embeddings, vector store, language model).
///
/// `Transient` failures are worth retrying; `Fatal` ones will fail the same
/// way on every attempt (bad credentials, exhausted quota, malformed request).
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{service} request failed (transient): {message}")]
    Transient { service: &'static str, message: String },
    #[error("{service} request failed: {message}")]
    Fatal { service: &'static str, message: String },
}

impl ServiceError {
    pub fn from_status(service: &'static str, status: StatusCode, body: &str) -> Self {
        let message = format!("{}: {}", status, truncate(body, 300));

        let transient = match status {
            StatusCode::TOO_MANY_REQUESTS => !body.contains("insufficient_quota"),
            StatusCode::REQUEST_TIMEOUT => true,
            s => s.is_server_error(),
        };

        if transient {
            ServiceError::Transient { service, message }
        } else {
            ServiceError::Fatal { service, message }
        }
    }

    pub fn from_transport(service: &'static str, err: &reqwest::Error) -> Self {
        let message = err.to_string();
        if err.is_timeout() || err.is_connect() || err.is_request() {
            ServiceError::Transient { service, message }
        } else {
            ServiceError::Fatal { service, message }
        }
    }

    /// The service answered, but not with anything usable.
    pub fn malformed(service: &'static str, message: impl Into<String>) -> Self {
        ServiceError::Fatal {
            service,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ServiceError::Transient { .. })
    }
}

/// Decode a successful response body. A body that is not the expected JSON is `Fatal`.
pub async fn read_json<T: DeserializeOwned>(
    service: &'static str,
    response: reqwest::Response,
) -> Result<T, ServiceError> {
    let body = response
        .text()
        .await
        .map_err(|e| ServiceError::from_transport(service, &e))?;

    serde_json::from_str(&body).map_err(|e| {
        ServiceError::malformed(
            service,
            format!("undecodable response ({}): {}", e, truncate(&body, 200)),
        )
    })
}

/// True when a `ServiceError::Transient` sits anywhere in the error chain.
pub fn is_transient(err: &anyhow::Error) -> bool {
    service_error(err).is_some_and(ServiceError::is_transient)
}

/// True when a `ServiceError::Fatal` sits anywhere in the error chain.
pub fn is_fatal(err: &anyhow::Error) -> bool {
    service_error(err).is_some_and(|e| !e.is_transient())
}

fn service_error(err: &anyhow::Error) -> Option<&ServiceError> {
    err.chain().find_map(|cause| cause.downcast_ref::<ServiceError>())
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::serve_once;

    #[test]
    fn test_status_classification() {
        assert!(ServiceError::from_status("llm", StatusCode::TOO_MANY_REQUESTS, "rate limited").is_transient());
        assert!(ServiceError::from_status("llm", StatusCode::BAD_GATEWAY, "").is_transient());
        assert!(ServiceError::from_status("llm", StatusCode::REQUEST_TIMEOUT, "").is_transient());
        assert!(!ServiceError::from_status("llm", StatusCode::UNAUTHORIZED, "bad key").is_transient());
        assert!(!ServiceError::from_status("llm", StatusCode::BAD_REQUEST, "").is_transient());
        assert!(
            !ServiceError::from_status(
                "llm",
                StatusCode::TOO_MANY_REQUESTS,
                r#"{"error":{"code":"insufficient_quota"}}"#
            )
            .is_transient()
        );
    }

    #[test]
    fn test_classification_through_context() {
        let err: anyhow::Error = ServiceError::Transient {
            service: "embeddings",
            message: "503".into(),
        }
        .into();
        let err = err.context("Failed to embed query");

        assert!(is_transient(&err));
        assert!(!is_fatal(&err));

        let plain = anyhow::anyhow!("some other failure");
        assert!(!is_transient(&plain));
        assert!(!is_fatal(&plain));
    }

    #[tokio::test]
    async fn test_non_json_body_is_fatal() {
        let base = serve_once("200 OK", "<html>proxy error</html>").await;
        let response = reqwest::get(format!("{}/anything", base)).await.unwrap();

        let err = read_json::<serde_json::Value>("llm", response).await.unwrap_err();
        assert!(!err.is_transient());
        assert!(err.to_string().contains("proxy error"));

        let err: anyhow::Error = anyhow::Error::from(err).context("Failed to parse response");
        assert!(is_fatal(&err));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("hi", 10), "hi");
    }
}
