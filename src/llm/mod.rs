//! LLM client abstraction: provider plugins, request/response types,
//! schema validation, and batch execution with ID-based pairing and
//! two-level retry.

mod batch;
mod client;
mod schema;
mod types;

pub use batch::{
    estimate_tokens, extract_json_text, mock_usage, pair_by_id, render_batch_prompt, user_message,
    BatchScheduler, Gateway,
};
pub use client::{AnthropicClient, LLMClient, OpenAIClient};
pub use schema::{confidence_field, validate_fields, FieldSpec, FieldType, ValidationError};
pub use types::{
    ChatMessage, ChatRole, CompletionRequest, CompletionResponse, CostTracker, ModelCosts,
    ModelSpec, Provider, TokenUsage,
};

#[cfg(any(test, feature = "test-support"))]
pub use client::mock::MockLLMClient;
