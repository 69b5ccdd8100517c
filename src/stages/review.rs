//! Review stage (`spec.md` §4.6): the second pass over every indicator
//! flagged at severity `warn` or above. Sends the candidate row, the flag
//! reasons, and the Validation output, and asks for a structured decision.

use std::collections::HashMap;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{instrument, warn};

use crate::error::Result;
use crate::llm::{render_batch_prompt, user_message, validate_fields, BatchScheduler, CompletionRequest};
use crate::model::{FailedIndicator, FlagSeverity, FlaggedIndicator, ReviewAction, ReviewDecision, ValidationResult};

use super::prompts::{review_response_fields, REVIEW_SYSTEM_PROMPT};
use super::StageContext;

const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Everything Review needs for one flagged indicator: the candidate row
/// rendered as JSON, the flags raised against it, and the Validation
/// result if one exists.
#[derive(Debug, Clone)]
pub struct ReviewInput {
    pub indicator_id: String,
    pub candidate: Value,
    pub flags: Vec<FlaggedIndicator>,
    pub validation: Option<ValidationResult>,
}

#[derive(Debug, Clone)]
struct ReviewAnswer {
    action: ReviewAction,
    target_field: Option<String>,
    new_value: Option<String>,
    reasoning: String,
    confidence: f64,
}

fn parse_action(value: &str) -> ReviewAction {
    match value {
        "fix" => ReviewAction::Fix,
        "escalate" => ReviewAction::Escalate,
        _ => ReviewAction::Accept,
    }
}

fn parse_element(_id: &str, element: &Value) -> std::result::Result<ReviewAnswer, String> {
    validate_fields(element, &review_response_fields())
        .map_err(|errs| errs.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; "))?;
    Ok(ReviewAnswer {
        action: parse_action(element["action"].as_str().expect("validated as enum string")),
        target_field: element.get("target_field").and_then(|v| v.as_str()).map(str::to_string),
        new_value: element.get("new_value").and_then(|v| v.as_str()).map(str::to_string),
        reasoning: element["reasoning"].as_str().expect("validated as string").to_string(),
        confidence: element["confidence"].as_f64().expect("validated as float"),
    })
}

fn render_flag_summary(flags: &[FlaggedIndicator]) -> String {
    flags
        .iter()
        .map(|f| format!("{:?}:{}: {}", f.severity, f.flag_type, f.flag_reason))
        .collect::<Vec<_>>()
        .join("; ")
}

fn project(input: &ReviewInput) -> Value {
    json!({
        "candidate": input.candidate,
        "flags": render_flag_summary(&input.flags),
        "validation": input.validation.as_ref().map(|v| json!({
            "is_cumulative": v.is_cumulative,
            "cumulative_confidence": v.cumulative_confidence,
            "suggested_temporal": v.suggested_temporal,
            "magnitude_suspicious": v.magnitude_suspicious,
        })),
    })
}

fn build_request(by_id: &HashMap<String, &ReviewInput>, ids: &[String], model: &str) -> CompletionRequest {
    let entries: Vec<(String, String)> =
        ids.iter().map(|id| (id.clone(), project(by_id[id]).to_string())).collect();
    CompletionRequest::new(model)
        .with_system(REVIEW_SYSTEM_PROMPT)
        .with_message(user_message(render_batch_prompt(&entries)))
        .with_timeout_ms(DEFAULT_TIMEOUT_MS)
}

/// Runs Review over every item with at least one `warn`-or-above flag.
/// `review_all` corresponds to the `review-all-flag` variant mode
/// (`spec.md` §4.6): every decision is forced to `escalate` regardless of
/// its recommended action, for audit-only runs.
#[instrument(skip_all, fields(execution_id = %ctx.execution_id, count = items.len(), review_all))]
pub async fn run(
    items: &[ReviewInput],
    ctx: &StageContext,
    review_all: bool,
) -> Result<Vec<ReviewDecision>> {
    let candidates: Vec<&ReviewInput> = items
        .iter()
        .filter(|i| i.flags.iter().any(|f| f.severity >= FlagSeverity::Warn))
        .collect();

    if candidates.is_empty() {
        return Ok(Vec::new());
    }

    let by_id: HashMap<String, &ReviewInput> = candidates.iter().map(|i| (i.indicator_id.clone(), *i)).collect();
    let ids: Vec<String> = candidates.iter().map(|i| i.indicator_id.clone()).collect();
    let model = ctx.config.review_model.clone().unwrap_or_else(|| ctx.config.models.review.clone());

    let scheduler = BatchScheduler::new(ctx.config.batch.review_batch_size, ctx.config.concurrency.review);

    let outcomes = scheduler
        .run_all(&ids, |batch_ids| {
            let by_id = &by_id;
            let model: &str = &model;
            async move {
                if ctx.cancellation.is_cancelled() {
                    return batch_ids
                        .into_iter()
                        .map(|id| {
                            (
                                id.clone(),
                                Err(FailedIndicator { indicator_id: id, error: "cancelled".into(), retries: 0 }),
                            )
                        })
                        .collect();
                }
                ctx.gateway
                    .run_batch(
                        &batch_ids,
                        |ids| build_request(by_id, ids, model),
                        |id| build_request(by_id, std::slice::from_ref(&id.to_string()), model),
                        parse_element,
                    )
                    .await
            }
        })
        .await;

    let threshold = ctx.config.thresholds.confidence_review_min;
    let mut decisions = Vec::with_capacity(outcomes.len());

    for (id, outcome) in outcomes {
        let decision = match outcome {
            Err(failed) => {
                warn!(indicator_id = %id, error = %failed.error, "review: retries exhausted, escalating");
                ReviewDecision {
                    indicator_id: id,
                    action: ReviewAction::Escalate,
                    target_field: None,
                    old_value: None,
                    new_value: None,
                    reasoning: format!("review-failure: {}", failed.error),
                    confidence: 0.0,
                    created_at: Utc::now(),
                }
            }
            Ok(answer) => {
                let below_threshold = answer.confidence < threshold;
                let action = if below_threshold || (review_all && answer.action != ReviewAction::Escalate) {
                    ReviewAction::Escalate
                } else {
                    answer.action
                };
                let (target_field, new_value) = if action == ReviewAction::Fix {
                    (answer.target_field, answer.new_value)
                } else {
                    (None, None)
                };
                ReviewDecision {
                    indicator_id: id,
                    action,
                    target_field,
                    old_value: None,
                    new_value,
                    reasoning: answer.reasoning,
                    confidence: answer.confidence,
                    created_at: Utc::now(),
                }
            }
        };
        ctx.store.put_review_decision(&ctx.execution_id, &decision)?;
        decisions.push(decision);
    }

    Ok(decisions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::llm::{Gateway, MockLLMClient};
    use crate::model::FlagSeverity;
    use crate::stages::CancellationToken;
    use crate::storage::SqliteStore;
    use crate::taxonomy::Taxonomy;
    use std::sync::Arc;

    fn ctx_with(client: MockLLMClient, config: Config) -> StageContext {
        let gateway = Arc::new(Gateway::new(Arc::new(client), config.retry.clone()));
        StageContext::new(
            SqliteStore::in_memory().unwrap(),
            "exec-test",
            config,
            gateway,
            Arc::new(Taxonomy::load_default().unwrap()),
            CancellationToken::new(),
        )
    }

    fn flagged(indicator_id: &str) -> FlaggedIndicator {
        FlaggedIndicator {
            indicator_id: indicator_id.to_string(),
            flag_type: "confidence-below-threshold".to_string(),
            flag_reason: "test".to_string(),
            current_value: None,
            expected_value: None,
            severity: FlagSeverity::Warn,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn unflagged_items_are_skipped_without_calling_the_model() {
        let client = MockLLMClient::new(vec![]);
        let mut config = Config::default();
        config.dry_run = true;
        let ctx = ctx_with(client, config);

        let items = vec![ReviewInput {
            indicator_id: "gdp".to_string(),
            candidate: json!({}),
            flags: vec![],
            validation: None,
        }];
        let decisions = run(&items, &ctx, false).await.unwrap();
        assert!(decisions.is_empty());
        assert_eq!(ctx.gateway.api_call_count(), 0);
    }

    #[tokio::test]
    async fn low_confidence_decision_is_escalated_regardless_of_action() {
        let response = r#"[{"indicator_id":"gdp","action":"accept","reasoning":"looks fine","confidence":0.3}]"#;
        let client = MockLLMClient::new(vec![("gdp".to_string(), response.to_string())]);
        let mut config = Config::default();
        config.dry_run = true;
        let ctx = ctx_with(client, config);

        let items = vec![ReviewInput {
            indicator_id: "gdp".to_string(),
            candidate: json!({"family": "physical-fundamental"}),
            flags: vec![flagged("gdp")],
            validation: None,
        }];
        let decisions = run(&items, &ctx, false).await.unwrap();
        assert_eq!(decisions[0].action, ReviewAction::Escalate);
    }

    #[tokio::test]
    async fn review_all_mode_forces_escalate_even_at_high_confidence() {
        let response = r#"[{"indicator_id":"gdp","action":"fix","target_field":"family","new_value":"price-value","reasoning":"looks off","confidence":0.9}]"#;
        let client = MockLLMClient::new(vec![("gdp".to_string(), response.to_string())]);
        let mut config = Config::default();
        config.dry_run = true;
        let ctx = ctx_with(client, config);

        let items = vec![ReviewInput {
            indicator_id: "gdp".to_string(),
            candidate: json!({"family": "physical-fundamental"}),
            flags: vec![flagged("gdp")],
            validation: None,
        }];
        let decisions = run(&items, &ctx, true).await.unwrap();
        assert_eq!(decisions[0].action, ReviewAction::Escalate);
        assert!(decisions[0].new_value.is_none());
    }

    #[tokio::test]
    async fn high_confidence_fix_is_applied_in_normal_mode() {
        let response = r#"[{"indicator_id":"gdp","action":"fix","target_field":"family","new_value":"price-value","reasoning":"looks off","confidence":0.9}]"#;
        let client = MockLLMClient::new(vec![("gdp".to_string(), response.to_string())]);
        let mut config = Config::default();
        config.dry_run = true;
        let ctx = ctx_with(client, config);

        let items = vec![ReviewInput {
            indicator_id: "gdp".to_string(),
            candidate: json!({"family": "physical-fundamental"}),
            flags: vec![flagged("gdp")],
            validation: None,
        }];
        let decisions = run(&items, &ctx, false).await.unwrap();
        assert_eq!(decisions[0].action, ReviewAction::Fix);
        assert_eq!(decisions[0].new_value.as_deref(), Some("price-value"));
    }
}
