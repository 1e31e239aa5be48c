//! Remote embedding provider over HTTP.
//!
//! Wire format: request `{ "input": [text...], "model": "..." }`, response
//! `{ "data": [{ "embedding": [f32...] }, ...], "usage": {...} }`. Each
//! failure mode stays a distinct error: non-200 status, timeout, connection
//! failure, and a null embedding for any item. Transient failures (timeout,
//! 5xx) are retried with exponential backoff; a null embedding never is.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::EmbeddingConfig;
use crate::embedding::{PipelineError, PipelineResult};

/// Base delay between retries, doubled per attempt.
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// Produces one embedding per input text, in input order.
///
/// The trait seam lets tests substitute a local provider for the HTTP one.
pub trait EmbeddingProvider: Send + Sync {
    fn embed(&self, texts: &[String]) -> PipelineResult<Vec<Vec<f32>>>;
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a [String],
    model: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    /// Null or absent embeddings deserialize to `None` and fail the batch.
    embedding: Option<Vec<f32>>,
}

/// Blocking HTTP client for an OpenAI-compatible embeddings endpoint.
pub struct HttpEmbeddingProvider {
    client: reqwest::blocking::Client,
    endpoint: String,
    model: String,
    api_key: String,
    max_retries: usize,
    timeout_secs: u64,
}

impl HttpEmbeddingProvider {
    /// Builds a provider from configuration, reading the API key from the
    /// configured environment variable.
    pub fn from_config(config: &EmbeddingConfig) -> PipelineResult<Self> {
        let api_key =
            std::env::var(&config.api_key_env).map_err(|_| PipelineError::MissingApiKey {
                env: config.api_key_env.clone(),
            })?;

        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| PipelineError::Connection(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key,
            max_retries: config.max_retries,
            timeout_secs: config.request_timeout_secs,
        })
    }

    fn request_once(&self, texts: &[String]) -> PipelineResult<Vec<Vec<f32>>> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                input: texts,
                model: &self.model,
            })
            .send()
            .map_err(|e| classify_transport_error(&e, self.timeout_secs))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(PipelineError::HttpStatus {
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }

        let parsed: EmbeddingResponse = response
            .json()
            .map_err(|e| PipelineError::MalformedResponse(e.to_string()))?;

        if parsed.data.len() != texts.len() {
            return Err(PipelineError::ResponseMismatch {
                expected: texts.len(),
                actual: parsed.data.len(),
            });
        }

        parsed
            .data
            .into_iter()
            .enumerate()
            .map(|(item, entry)| {
                entry
                    .embedding
                    .ok_or(PipelineError::NullEmbedding { batch: 0, item })
            })
            .collect()
    }
}

impl EmbeddingProvider for HttpEmbeddingProvider {
    fn embed(&self, texts: &[String]) -> PipelineResult<Vec<Vec<f32>>> {
        let mut attempt = 0;
        loop {
            match self.request_once(texts) {
                Ok(embeddings) => {
                    debug!(texts = texts.len(), "embedding request succeeded");
                    return Ok(embeddings);
                }
                Err(e) if is_transient(&e) && attempt < self.max_retries => {
                    let delay = RETRY_BASE_DELAY * 2u32.pow(attempt as u32);
                    warn!(
                        attempt = attempt + 1,
                        max = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient embedding failure, retrying"
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Timeouts and 5xx responses are transient; null embeddings, 4xx, and
/// malformed responses are not.
fn is_transient(error: &PipelineError) -> bool {
    match error {
        PipelineError::Timeout { .. } | PipelineError::Connection(_) => true,
        PipelineError::HttpStatus { status, .. } => *status >= 500,
        _ => false,
    }
}

fn classify_transport_error(error: &reqwest::Error, timeout_secs: u64) -> PipelineError {
    if error.is_timeout() {
        PipelineError::Timeout {
            seconds: timeout_secs,
        }
    } else {
        PipelineError::Connection(error.to_string())
    }
}

/// Keeps error bodies readable in logs.
fn truncate_body(body: &str) -> String {
    const MAX: usize = 500;
    if body.len() <= MAX {
        body.to_string()
    } else {
        format!("{}...", &body[..MAX])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(is_transient(&PipelineError::Timeout { seconds: 30 }));
        assert!(is_transient(&PipelineError::Connection("refused".into())));
        assert!(is_transient(&PipelineError::HttpStatus {
            status: 503,
            body: String::new()
        }));

        // Client errors and data problems are never retried
        assert!(!is_transient(&PipelineError::HttpStatus {
            status: 401,
            body: String::new()
        }));
        assert!(!is_transient(&PipelineError::NullEmbedding { batch: 0, item: 0 }));
        assert!(!is_transient(&PipelineError::ResponseMismatch {
            expected: 2,
            actual: 1
        }));
    }

    #[test]
    fn test_null_embedding_deserializes_to_none() {
        let json = r#"{"data":[{"embedding":[0.1,0.2]},{"embedding":null}]}"#;
        let parsed: EmbeddingResponse = serde_json::from_str(json).unwrap();
        assert!(parsed.data[0].embedding.is_some());
        assert!(parsed.data[1].embedding.is_none());
    }

    #[test]
    fn test_missing_api_key() {
        let config = EmbeddingConfig {
            api_key_env: "QUIVER_TEST_KEY_THAT_DOES_NOT_EXIST".to_string(),
            ..EmbeddingConfig::default()
        };
        assert!(matches!(
            HttpEmbeddingProvider::from_config(&config),
            Err(PipelineError::MissingApiKey { .. })
        ));
    }

    #[test]
    fn test_body_truncation() {
        let long = "x".repeat(1000);
        assert_eq!(truncate_body(&long).len(), 503);
        assert_eq!(truncate_body("short"), "short");
    }
}
