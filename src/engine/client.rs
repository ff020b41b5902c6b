//! HTTP client for the remote optimization engine.
//!
//! Speaks a JSON protocol: `POST /v1/optimize` returns either a
//! completed result or `{job_id, status: "processing"}`, polled via
//! `GET /v1/jobs/{id}` until terminal. All calls carry bearer auth and
//! a bounded request timeout; transient transport errors are retried
//! with exponential backoff before surfacing as `EngineError`.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::time::Duration;

use async_trait::async_trait;

use super::{EngineJobState, EngineRequest, EngineResponse, EngineResult, OptimizationEngine};
use crate::error::EngineError;

/// Transport retry attempts before a transient failure is surfaced.
const TRANSPORT_RETRIES: u32 = 2;
/// Base delay between transport retries.
const TRANSPORT_RETRY_BASE: Duration = Duration::from_millis(250);

/// HTTP implementation of [`OptimizationEngine`].
pub struct HttpEngineClient {
    base_url: String,
    api_key: String,
    http_client: Client,
}

impl HttpEngineClient {
    /// Create a client with explicit configuration.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Unavailable` if the HTTP client cannot be
    /// constructed.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, EngineError> {
        let http_client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| EngineError::Unavailable(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            http_client,
        })
    }

    /// Create a client from environment variables.
    ///
    /// Reads:
    /// - `PROMPTFORGE_ENGINE_URL` (required)
    /// - `PROMPTFORGE_ENGINE_API_KEY` (required)
    /// - `PROMPTFORGE_ENGINE_TIMEOUT_SECS` (defaults to 60)
    pub fn from_env() -> Result<Self, EngineError> {
        let base_url =
            env::var("PROMPTFORGE_ENGINE_URL").map_err(|_| EngineError::MissingBaseUrl)?;
        let api_key =
            env::var("PROMPTFORGE_ENGINE_API_KEY").map_err(|_| EngineError::MissingApiKey)?;
        let timeout_secs = env::var("PROMPTFORGE_ENGINE_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(60);
        Self::new(base_url, api_key, Duration::from_secs(timeout_secs))
    }

    /// Engine base URL this client talks to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send a request, retrying transient transport failures with backoff.
    async fn send_with_retry(
        &self,
        build: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, EngineError> {
        let mut attempt = 0;
        loop {
            match build().send().await {
                Ok(response) => return Ok(response),
                Err(e) if attempt < TRANSPORT_RETRIES => {
                    let delay = TRANSPORT_RETRY_BASE * 2u32.pow(attempt);
                    tracing::warn!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Engine request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(EngineError::Unavailable(e.to_string())),
            }
        }
    }

    /// Map a non-success response to the uniform error taxonomy.
    async fn error_from_response(response: reqwest::Response) -> EngineError {
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Failed to read error response".to_string());

        let message = serde_json::from_str::<ApiErrorResponse>(&body)
            .map(|e| e.error.message)
            .unwrap_or(body);

        match status {
            429 => EngineError::RateLimited(message),
            404 => EngineError::JobNotFound(message),
            _ => EngineError::Api { status, message },
        }
    }
}

/// Wire shape of an optimize response. `status` distinguishes a
/// completed result from a job handle.
#[derive(Debug, Deserialize)]
struct ApiOptimizeResponse {
    status: String,
    #[serde(default)]
    job_id: Option<String>,
    #[serde(flatten)]
    result: Option<ApiResult>,
}

/// Wire shape of a job status poll.
#[derive(Debug, Deserialize)]
struct ApiJobStatusResponse {
    status: String,
    #[serde(default)]
    progress: Option<u8>,
    #[serde(default)]
    error: Option<String>,
    #[serde(flatten)]
    result: Option<ApiResult>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiResult {
    optimized_prompt: String,
    quality: f64,
    confidence: f64,
    #[serde(default)]
    accuracy_improvement_percent: f64,
    #[serde(default)]
    improvements: HashMap<String, String>,
    #[serde(default)]
    api_calls_used: u32,
}

impl From<ApiResult> for EngineResult {
    fn from(r: ApiResult) -> Self {
        Self {
            optimized_prompt: r.optimized_prompt,
            quality: r.quality,
            confidence: r.confidence,
            accuracy_improvement_percent: r.accuracy_improvement_percent,
            improvements: r.improvements,
            api_calls_used: r.api_calls_used,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

#[async_trait]
impl OptimizationEngine for HttpEngineClient {
    async fn optimize(&self, request: EngineRequest) -> Result<EngineResponse, EngineError> {
        let url = format!("{}/v1/optimize", self.base_url);

        let response = self
            .send_with_retry(|| {
                self.http_client
                    .post(&url)
                    .header("Authorization", format!("Bearer {}", self.api_key))
                    .json(&request)
            })
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let body: ApiOptimizeResponse = response
            .json()
            .await
            .map_err(|e| EngineError::MalformedResponse(e.to_string()))?;

        match body.status.as_str() {
            "completed" => {
                let result = body.result.ok_or_else(|| {
                    EngineError::MalformedResponse(
                        "completed response missing result payload".to_string(),
                    )
                })?;
                Ok(EngineResponse::Completed(result.into()))
            }
            "processing" => {
                let job_id = body.job_id.ok_or_else(|| {
                    EngineError::MalformedResponse(
                        "processing response missing job_id".to_string(),
                    )
                })?;
                Ok(EngineResponse::Processing { job_id })
            }
            other => Err(EngineError::MalformedResponse(format!(
                "unknown optimize status '{other}'"
            ))),
        }
    }

    async fn job_status(&self, job_id: &str) -> Result<EngineJobState, EngineError> {
        let url = format!("{}/v1/jobs/{}", self.base_url, job_id);

        let response = self
            .send_with_retry(|| {
                self.http_client
                    .get(&url)
                    .header("Authorization", format!("Bearer {}", self.api_key))
            })
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let body: ApiJobStatusResponse = response
            .json()
            .await
            .map_err(|e| EngineError::MalformedResponse(e.to_string()))?;

        match body.status.as_str() {
            "processing" | "queued" => Ok(EngineJobState::Processing {
                progress: body.progress,
            }),
            "completed" => {
                let result = body.result.ok_or_else(|| {
                    EngineError::MalformedResponse(
                        "completed job status missing result payload".to_string(),
                    )
                })?;
                Ok(EngineJobState::Completed(result.into()))
            }
            "failed" => Ok(EngineJobState::Failed {
                reason: body
                    .error
                    .unwrap_or_else(|| "engine reported failure without detail".to_string()),
            }),
            other => Err(EngineError::MalformedResponse(format!(
                "unknown job status '{other}'"
            ))),
        }
    }

    async fn health_check(&self) -> bool {
        let url = format!("{}/v1/health", self.base_url);
        match self
            .http_client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!(error = %e, "Engine health check failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OptimizationConfig;

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client =
            HttpEngineClient::new("http://localhost:9000/", "key", Duration::from_secs(5))
                .unwrap();
        assert_eq!(client.base_url(), "http://localhost:9000");
    }

    #[test]
    fn test_engine_request_from_config() {
        let config = OptimizationConfig::new("classify tickets")
            .with_target_model("gpt-4o-mini")
            .with_iterations(7);
        let request = EngineRequest::from_config("prompt body", &config);

        assert_eq!(request.task, "classify tickets");
        assert_eq!(request.prompt, "prompt body");
        assert_eq!(request.target_model, "gpt-4o-mini");
        assert_eq!(request.iteration_count, 7);
    }

    #[test]
    fn test_optimize_response_parsing_completed() {
        let raw = r#"{
            "status": "completed",
            "optimized_prompt": "better prompt",
            "quality": 0.9,
            "confidence": 0.8
        }"#;
        let parsed: ApiOptimizeResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.status, "completed");
        let result = parsed.result.unwrap();
        assert_eq!(result.optimized_prompt, "better prompt");
        assert_eq!(result.api_calls_used, 0);
    }

    #[test]
    fn test_optimize_response_parsing_processing() {
        let raw = r#"{"status": "processing", "job_id": "eng-42"}"#;
        let parsed: ApiOptimizeResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.status, "processing");
        assert_eq!(parsed.job_id.as_deref(), Some("eng-42"));
    }

    #[test]
    fn test_job_status_parsing_failed() {
        let raw = r#"{"status": "failed", "error": "model overloaded"}"#;
        let parsed: ApiJobStatusResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.status, "failed");
        assert_eq!(parsed.error.as_deref(), Some("model overloaded"));
    }
}
