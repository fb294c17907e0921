//! Generation collaborator boundary.
//!
//! The relay treats text generation as an external call: a prompt in, text
//! out, unbounded latency, one await point. The trait keeps the router
//! testable; the shipped implementation talks to an Ollama-style endpoint.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::conversations::core::config::GeneratorConfig;

/// Boxed future type for generator operations.
pub type GenFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Default Ollama base URL.
const DEFAULT_BASE_URL: &str = "http://127.0.0.1:11434";

/// HTTP client timeout for long-running generations.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(120);

/// Errors produced by the generation collaborator.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// HTTP client error.
    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),
    /// Backend answered with a non-success status.
    #[error("generation backend returned status {status}")]
    BackendStatus {
        /// HTTP status code received.
        status: u16,
    },
}

/// External text-generation collaborator.
pub trait Generator: Send + Sync {
    /// Generate a response for `prompt`.
    ///
    /// `session_context` carries the session identifier for backends that
    /// support multi-turn context; backends may ignore it.
    ///
    /// # Errors
    /// Returns an error if the backend call fails.
    fn generate<'a>(
        &'a self,
        prompt: &'a str,
        session_context: Option<&'a str>,
    ) -> GenFuture<'a, Result<String, GenerationError>>;
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    keep_alive: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    session: Option<&'a str>,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u64>,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Generator backed by an Ollama-compatible `/api/generate` endpoint.
pub struct OllamaGenerator {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    temperature: f64,
    max_tokens: Option<u64>,
    keep_alive: String,
}

impl OllamaGenerator {
    /// Build a generator from configuration.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: &GeneratorConfig) -> Result<Self, GenerationError> {
        let base = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let client = reqwest::Client::builder()
            .timeout(CLIENT_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/api/generate", base.trim_end_matches('/')),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            keep_alive: config.keep_alive.clone(),
        })
    }
}

impl Generator for OllamaGenerator {
    fn generate<'a>(
        &'a self,
        prompt: &'a str,
        session_context: Option<&'a str>,
    ) -> GenFuture<'a, Result<String, GenerationError>> {
        Box::pin(async move {
            let request = GenerateRequest {
                model: &self.model,
                prompt,
                stream: false,
                keep_alive: &self.keep_alive,
                session: session_context,
                options: GenerateOptions {
                    temperature: self.temperature,
                    num_predict: self.max_tokens,
                },
            };

            let response = self
                .client
                .post(&self.endpoint)
                .json(&request)
                .send()
                .await?;
            let status = response.status();
            if !status.is_success() {
                return Err(GenerationError::BackendStatus {
                    status: status.as_u16(),
                });
            }

            let body: GenerateResponse = response.json().await?;
            Ok(body.response)
        })
    }
}
