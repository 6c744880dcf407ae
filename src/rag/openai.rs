use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use super::Llm;
use crate::config::AskConfig;
use crate::error::{PkbError, Result};

const SYSTEM_PROMPT: &str = "You are a helpful assistant. \
    You will answer questions based on the provided context. \
    If the context does not contain enough information, \
    you will say 'I don't know'.";

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    top_p: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// A failed attempt, tagged with whether another attempt may succeed
struct AttemptError {
    retryable: bool,
    error: PkbError,
}

impl AttemptError {
    fn fatal(error: PkbError) -> Self {
        Self { retryable: false, error }
    }
}

/// Rate limits and server-side errors are worth another try
fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Chat-completions client for any OpenAI-compatible endpoint.
///
/// Retries 429 and 5xx responses (and network errors) with exponential
/// backoff, up to `max_retries` extra attempts.
pub struct OpenAiLlm {
    client: Client,
    api_key: String,
    endpoint: String,
    model: String,
    temperature: f32,
    top_p: f32,
    max_retries: usize,
    retry_delay: Duration,
}

impl OpenAiLlm {
    pub fn new(api_key: String, base_url: &str, model: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| PkbError::Llm(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model,
            temperature: 0.1,
            top_p: 0.95,
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
        })
    }

    /// Build from `[ask]` settings, reading the key from `api_key_env`
    pub fn from_config(config: &AskConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            PkbError::Config(format!(
                "Environment variable {} not set. Set it in your .env file or as an environment variable.",
                config.api_key_env
            ))
        })?;

        Ok(Self::new(api_key, &config.base_url, config.model.clone())?
            .with_sampling(config.temperature, config.top_p)
            .with_retries(config.max_retries, Duration::from_secs(1)))
    }

    pub fn with_sampling(mut self, temperature: f32, top_p: f32) -> Self {
        self.temperature = temperature;
        self.top_p = top_p;
        self
    }

    /// `delay` is the wait before the first retry; it doubles each time
    pub fn with_retries(mut self, max_retries: usize, delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = delay;
        self
    }

    async fn complete_once(&self, prompt: &str) -> std::result::Result<String, AttemptError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage { role: "system", content: SYSTEM_PROMPT },
                ChatMessage { role: "user", content: prompt },
            ],
            temperature: self.temperature,
            top_p: self.top_p,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| AttemptError {
                retryable: true,
                error: PkbError::Llm(format!("Network error: {}", e)),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(AttemptError {
                retryable: is_retryable_status(status),
                error: PkbError::Llm(format!("API error {}: {}", status, body)),
            });
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| {
            AttemptError::fatal(PkbError::Llm(format!("Failed to parse response: {}", e)))
        })?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| AttemptError::fatal(PkbError::Llm("Empty response from API".to_string())))
    }
}

impl Llm for OpenAiLlm {
    async fn invoke(&self, prompt: &str) -> Result<String> {
        let start = std::time::Instant::now();
        let mut attempt = 0;
        let mut delay = self.retry_delay;

        loop {
            match self.complete_once(prompt).await {
                Ok(answer) => {
                    log::debug!("Chat completion took {:?} (attempt {})", start.elapsed(), attempt + 1);
                    return Ok(answer);
                }
                Err(e) if e.retryable && attempt < self.max_retries => {
                    log::warn!("Retry {}/{} after error: {}", attempt + 1, self.max_retries, e.error);
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(e) => return Err(e.error),
            }
        }
    }
}
