//! Concrete LLM provider plug-ins. The pipeline core depends only on the
//! [`LLMClient`] trait; providers are swappable implementations.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::time::Duration;

use crate::error::{Error, Result};

use super::types::{CompletionRequest, CompletionResponse, ModelSpec, Provider, TokenUsage};

/// Abstract capability consumed by the gateway:
/// `chat(messages, schema, model, temperature, maxTokens, timeout) -> (json, tokensIn, tokensOut)`.
#[async_trait]
pub trait LLMClient: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse>;
    fn provider(&self) -> Provider;
}

fn build_http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| Error::Internal(format!("failed to build HTTP client: {e}")))
}

/// Anthropic Messages API client.
pub struct AnthropicClient {
    api_key: String,
    http: reqwest::Client,
    base_url: String,
}

impl AnthropicClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Ok(Self {
            api_key: api_key.into(),
            http: build_http_client(Duration::from_secs(60))?,
            base_url: "https://api.anthropic.com/v1/messages".to_string(),
        })
    }

    #[cfg(test)]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

#[derive(Deserialize)]
struct AnthropicResponseBlock {
    text: String,
}

#[derive(Deserialize)]
struct AnthropicUsage {
    input_tokens: u64,
    output_tokens: u64,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicResponseBlock>,
    usage: AnthropicUsage,
    model: String,
}

#[async_trait]
impl LLMClient for AnthropicClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let messages: Vec<serde_json::Value> = request
            .messages
            .iter()
            .map(|m| {
                serde_json::json!({
                    "role": match m.role {
                        super::types::ChatRole::User => "user",
                        super::types::ChatRole::Assistant => "assistant",
                        super::types::ChatRole::System => "user",
                    },
                    "content": m.content,
                })
            })
            .collect();

        let body = serde_json::json!({
            "model": request.model,
            "system": request.system,
            "messages": messages,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        });

        let response = self
            .http
            .post(&self.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .timeout(Duration::from_millis(request.timeout_ms))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::llm_api("anthropic", e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let message = response.text().await.unwrap_or_default();
            return Err(Error::llm_api("anthropic", format!("{status}: {message}")));
        }

        let parsed: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| Error::llm_api("anthropic", format!("malformed response: {e}")))?;

        let content = parsed.content.into_iter().map(|b| b.text).collect::<Vec<_>>().join("");
        let usage = TokenUsage {
            input_tokens: parsed.usage.input_tokens,
            output_tokens: parsed.usage.output_tokens,
        };
        let spec = ModelSpec::claude_sonnet();
        let cost = Some(spec.calculate_cost(usage.input_tokens, usage.output_tokens));

        Ok(CompletionResponse {
            model: parsed.model,
            content,
            usage,
            timestamp: Utc::now(),
            cost,
        })
    }

    fn provider(&self) -> Provider {
        Provider::Anthropic
    }
}

/// OpenAI Chat Completions API client.
pub struct OpenAIClient {
    api_key: String,
    http: reqwest::Client,
    base_url: String,
}

impl OpenAIClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Ok(Self {
            api_key: api_key.into(),
            http: build_http_client(Duration::from_secs(60))?,
            base_url: "https://api.openai.com/v1/chat/completions".to_string(),
        })
    }

    #[cfg(test)]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

#[derive(Deserialize)]
struct OpenAIChoiceMessage {
    content: String,
}

#[derive(Deserialize)]
struct OpenAIChoice {
    message: OpenAIChoiceMessage,
}

#[derive(Deserialize)]
struct OpenAIUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
    usage: OpenAIUsage,
    model: String,
}

#[async_trait]
impl LLMClient for OpenAIClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let mut messages = Vec::new();
        if let Some(system) = &request.system {
            messages.push(serde_json::json!({"role": "system", "content": system}));
        }
        for m in &request.messages {
            let role = match m.role {
                super::types::ChatRole::User => "user",
                super::types::ChatRole::Assistant => "assistant",
                super::types::ChatRole::System => "system",
            };
            messages.push(serde_json::json!({"role": role, "content": m.content}));
        }

        let body = serde_json::json!({
            "model": request.model,
            "messages": messages,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        });

        let response = self
            .http
            .post(&self.base_url)
            .bearer_auth(&self.api_key)
            .timeout(Duration::from_millis(request.timeout_ms))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::llm_api("openai", e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let message = response.text().await.unwrap_or_default();
            return Err(Error::llm_api("openai", format!("{status}: {message}")));
        }

        let parsed: OpenAIResponse = response
            .json()
            .await
            .map_err(|e| Error::llm_api("openai", format!("malformed response: {e}")))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| Error::llm_api("openai", "empty choices array"))?;

        let usage = TokenUsage {
            input_tokens: parsed.usage.prompt_tokens,
            output_tokens: parsed.usage.completion_tokens,
        };
        let spec = ModelSpec::gpt4o_mini();
        let cost = Some(spec.calculate_cost(usage.input_tokens, usage.output_tokens));

        Ok(CompletionResponse {
            model: parsed.model,
            content,
            usage,
            timestamp: Utc::now(),
            cost,
        })
    }

    fn provider(&self) -> Provider {
        Provider::OpenAI
    }
}

#[cfg(any(test, feature = "test-support"))]
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    /// Deterministic mock client keyed by a substring of the user prompt,
    /// for stage tests that don't need network access.
    pub struct MockLLMClient {
        pub responses: Vec<(String, String)>,
        pub calls: AtomicU64,
        pub fail_first_n: u64,
        failures_done: AtomicU64,
        pub last_request: Mutex<Option<CompletionRequest>>,
    }

    impl MockLLMClient {
        pub fn new(responses: Vec<(String, String)>) -> Self {
            Self {
                responses,
                calls: AtomicU64::new(0),
                fail_first_n: 0,
                failures_done: AtomicU64::new(0),
                last_request: Mutex::new(None),
            }
        }

        pub fn failing_first(mut self, n: u64) -> Self {
            self.fail_first_n = n;
            self
        }
    }

    #[async_trait]
    impl LLMClient for MockLLMClient {
        async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_request.lock().unwrap() = Some(request.clone());

            if self.failures_done.load(Ordering::SeqCst) < self.fail_first_n {
                self.failures_done.fetch_add(1, Ordering::SeqCst);
                return Err(Error::llm_api("mock", "injected failure"));
            }

            let user_content = request
                .messages
                .iter()
                .map(|m| m.content.as_str())
                .collect::<Vec<_>>()
                .join("\n");

            let content = self
                .responses
                .iter()
                .find(|(needle, _)| user_content.contains(needle.as_str()))
                .map(|(_, response)| response.clone())
                .unwrap_or_else(|| "{}".to_string());

            Ok(CompletionResponse {
                model: request.model,
                content,
                usage: TokenUsage { input_tokens: 100, output_tokens: 50 },
                timestamp: Utc::now(),
                cost: Some(0.001),
            })
        }

        fn provider(&self) -> Provider {
            Provider::Anthropic
        }
    }
}
