//! Shared fixtures for the cross-module integration tests: a mock-backed
//! `Pipeline` builder plus the needle conventions each stage's
//! `render_batch_prompt` call makes available, so a `MockLLMClient`
//! response table can be scripted per indicator without reaching into
//! crate-private stage code.
//!
//! Needle conventions (mirrors `pipeline.rs`'s own `#[cfg(test)]` module):
//! - Router: `topic="<topic>"`, since `project_for_router` only emits a
//!   `topic=` field when the indicator has one.
//! - Specialist: `"name":"<Full Name>"`, the JSON-quoted form from
//!   `project_for_specialist`'s `json!` projection.
//! - Orientation: `name="<Full Name>"`, the bare (non-JSON) form from its
//!   own hand-built description string.
//! - Review: `"candidate":`, present in every review payload regardless of
//!   indicator.

#![allow(dead_code)]

use std::sync::Arc;

use econ_classify_core::llm::{Gateway, MockLLMClient};
use econ_classify_core::{Config, Pipeline};

/// A `Config` wired for fast, deterministic mock-driven runs: one item per
/// batch, so a needle never has to disambiguate between several indicators
/// folded into the same request, and a near-zero retry delay, since some
/// tests deliberately exercise the retry-exhaustion path.
pub fn mock_config() -> Config {
    let mut config = Config::default();
    config.database.path = ":memory:".to_string();
    config.anthropic_api_key = Some("test-key-not-actually-used".to_string());
    config.batch.router_batch_size = 1;
    config.batch.specialist_batch_size = 1;
    config.batch.orientation_batch_size = 1;
    config.batch.review_batch_size = 1;
    config.concurrency.router = 8;
    config.concurrency.specialist = 8;
    config.concurrency.orientation = 8;
    config.concurrency.review = 8;
    config.retry.max_retries = 1;
    config.retry.retry_delay_ms = 0;
    config
}

/// Builds a `Pipeline` over a fresh in-memory store, wired to a client
/// already configured (responses, injected failures, ...).
pub fn pipeline_with_client(client: MockLLMClient) -> Pipeline {
    let config = mock_config();
    let gateway = Arc::new(Gateway::new(Arc::new(client), config.retry.clone()));
    Pipeline::new(config).unwrap().with_test_gateway(gateway)
}

/// Builds a `Pipeline` over a fresh in-memory store, wired to a
/// `MockLLMClient` seeded with `responses` (substring-of-user-prompt ->
/// JSON array body).
pub fn pipeline_with_responses(responses: Vec<(String, String)>) -> Pipeline {
    pipeline_with_client(MockLLMClient::new(responses))
}

pub fn router_needle(topic: &str) -> String {
    format!("topic=\"{topic}\"")
}

pub fn specialist_needle(name: &str) -> String {
    format!("\"name\":\"{name}\"")
}

pub fn orientation_needle(name: &str) -> String {
    format!("name=\"{name}\"")
}

pub fn router_response(id: &str, family: &str, confidence: f64) -> String {
    format!(r#"[{{"indicator_id":"{id}","family":"{family}","confidence_family":{confidence}}}]"#)
}

pub fn specialist_response(
    id: &str,
    indicator_type: &str,
    temporal_aggregation: &str,
    is_currency_denominated: bool,
    confidence: f64,
) -> String {
    format!(
        r#"[{{"indicator_id":"{id}","indicator_type":"{indicator_type}","temporal_aggregation":"{temporal_aggregation}","is_currency_denominated":{is_currency_denominated},"confidence_cls":{confidence}}}]"#
    )
}

pub fn orientation_response(id: &str, heat_map_orientation: &str, confidence: f64) -> String {
    format!(
        r#"[{{"indicator_id":"{id}","heat_map_orientation":"{heat_map_orientation}","confidence_orient":{confidence}}}]"#
    )
}
