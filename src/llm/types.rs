//! LLM request/response types and cost tracking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// LLM provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum Provider {
    Anthropic,
    OpenAI,
    #[cfg(feature = "gemini")]
    Google,
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Anthropic => write!(f, "anthropic"),
            Self::OpenAI => write!(f, "openai"),
            #[cfg(feature = "gemini")]
            Self::Google => write!(f, "google"),
        }
    }
}

/// Model definition with pricing, used for the static price table named in
/// `spec.md` §4.7 point 5.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    pub id: String,
    pub provider: Provider,
    pub input_cost_per_m: f64,
    pub output_cost_per_m: f64,
}

impl ModelSpec {
    pub fn calculate_cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        let input_cost = (input_tokens as f64 / 1_000_000.0) * self.input_cost_per_m;
        let output_cost = (output_tokens as f64 / 1_000_000.0) * self.output_cost_per_m;
        input_cost + output_cost
    }

    pub fn claude_sonnet() -> Self {
        Self {
            id: "claude-3-5-sonnet-20241022".to_string(),
            provider: Provider::Anthropic,
            input_cost_per_m: 3.0,
            output_cost_per_m: 15.0,
        }
    }

    pub fn claude_haiku() -> Self {
        Self {
            id: "claude-3-5-haiku-20241022".to_string(),
            provider: Provider::Anthropic,
            input_cost_per_m: 0.8,
            output_cost_per_m: 4.0,
        }
    }

    pub fn gpt4o_mini() -> Self {
        Self {
            id: "gpt-4o-mini".to_string(),
            provider: Provider::OpenAI,
            input_cost_per_m: 0.15,
            output_cost_per_m: 0.60,
        }
    }
}

/// Role in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// A message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }
}

/// Completion request: `(system prompt, user prompt, schema, provider,
/// model, timeout)` per `spec.md` §2 point 3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub system: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f64,
    pub timeout_ms: u64,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system: None,
            messages: Vec::new(),
            max_tokens: 4096,
            temperature: 0.0,
            timeout_ms: 30_000,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_message(mut self, message: ChatMessage) -> Self {
        self.messages.push(message);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

/// Token usage statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Completion response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub model: String,
    pub content: String,
    pub usage: TokenUsage,
    pub timestamp: DateTime<Utc>,
    pub cost: Option<f64>,
}

/// Cost tracking for a pipeline execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CostTracker {
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_cost: f64,
    pub request_count: u64,
    pub by_model: HashMap<String, ModelCosts>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelCosts {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: f64,
    pub request_count: u64,
}

impl CostTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, model: &str, usage: &TokenUsage, cost: Option<f64>) {
        self.total_input_tokens += usage.input_tokens;
        self.total_output_tokens += usage.output_tokens;
        self.request_count += 1;
        if let Some(c) = cost {
            self.total_cost += c;
        }

        let entry = self.by_model.entry(model.to_string()).or_default();
        entry.input_tokens += usage.input_tokens;
        entry.output_tokens += usage.output_tokens;
        entry.request_count += 1;
        if let Some(c) = cost {
            entry.cost += c;
        }
    }

    pub fn merge(&mut self, other: &CostTracker) {
        self.total_input_tokens += other.total_input_tokens;
        self.total_output_tokens += other.total_output_tokens;
        self.total_cost += other.total_cost;
        self.request_count += other.request_count;

        for (model, costs) in &other.by_model {
            let entry = self.by_model.entry(model.clone()).or_default();
            entry.input_tokens += costs.input_tokens;
            entry.output_tokens += costs.output_tokens;
            entry.cost += costs.cost;
            entry.request_count += costs.request_count;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_cost_calculation() {
        let sonnet = ModelSpec::claude_sonnet();
        let cost = sonnet.calculate_cost(1_000_000, 500_000);
        assert!((cost - 10.5).abs() < 0.01);
    }

    #[test]
    fn cost_tracker_merges() {
        let mut a = CostTracker::new();
        a.record("haiku", &TokenUsage { input_tokens: 100, output_tokens: 50 }, Some(0.01));
        let mut b = CostTracker::new();
        b.record("haiku", &TokenUsage { input_tokens: 200, output_tokens: 100 }, Some(0.02));

        a.merge(&b);
        assert_eq!(a.total_input_tokens, 300);
        assert_eq!(a.request_count, 2);
        assert!((a.total_cost - 0.03).abs() < 1e-9);
    }
}
