//! Ollama Describer Client
//!
//! Speaks the `/api/generate` protocol: the image goes out base64-encoded in
//! a non-streaming generate request and the description comes back in the
//! `response` field. Describe calls are long; the hard timeout covers the
//! whole request.
//!
//! Error classification matters more than the happy path here: 5xx, 429 and
//! anything connection-level is transient (the queue path retries it), other
//! 4xx and unparseable bodies are permanent.

use crate::error::ClusterError;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Hard ceiling on a single describe call.
pub const DESCRIBE_TIMEOUT: Duration = Duration::from_secs(300);

const DEFAULT_PROMPT: &str = "Describe this image in two or three sentences.";

#[async_trait]
pub trait Describe: Send + Sync {
    async fn describe(&self, image: &[u8]) -> Result<String, ClusterError>;
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    images: Vec<String>,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

pub struct OllamaClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    prompt: String,
}

impl OllamaClient {
    pub fn new(base_url: &str, model: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            prompt: DEFAULT_PROMPT.to_string(),
        }
    }

    pub fn with_prompt(mut self, prompt: &str) -> Self {
        self.prompt = prompt.to_string();
        self
    }
}

#[async_trait]
impl Describe for OllamaClient {
    async fn describe(&self, image: &[u8]) -> Result<String, ClusterError> {
        let payload = GenerateRequest {
            model: &self.model,
            prompt: &self.prompt,
            images: vec![BASE64.encode(image)],
            stream: false,
        };

        let response = self
            .http
            .post(format!("{}/api/generate", self.base_url))
            .json(&payload)
            .timeout(DESCRIBE_TIMEOUT)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ClusterError::DescribeTransient(format!("describe timed out: {}", e))
                } else {
                    ClusterError::DescribeTransient(format!("describe request failed: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status.as_u16()));
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ClusterError::DescribePermanent(format!("unparseable response: {}", e)))?;

        let description = body.response.trim().to_string();
        if description.is_empty() {
            return Err(ClusterError::DescribePermanent(
                "model returned an empty description".to_string(),
            ));
        }

        Ok(description)
    }
}

/// 5xx and 429 are worth retrying; every other non-2xx is the caller's fault.
pub fn classify_status(status: u16) -> ClusterError {
    if status >= 500 || status == 429 {
        ClusterError::DescribeTransient(format!("describer returned HTTP {}", status))
    } else {
        ClusterError::DescribePermanent(format!("describer returned HTTP {}", status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(classify_status(500).is_retryable());
        assert!(classify_status(503).is_retryable());
        assert!(classify_status(429).is_retryable());
        assert!(!classify_status(400).is_retryable());
        assert!(!classify_status(404).is_retryable());
        assert!(!classify_status(422).is_retryable());
    }
}
