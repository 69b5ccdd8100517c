//! Router stage (`spec.md` §4.2): assigns each indicator a `family` from
//! the closed seven-value enumeration, paired back to inputs by stable
//! `indicator_id`, not by position.

use std::collections::HashMap;

use chrono::Utc;
use serde_json::Value;
use tracing::{instrument, warn};

use crate::error::Result;
use crate::llm::{render_batch_prompt, user_message, validate_fields, BatchScheduler, CompletionRequest};
use crate::model::{FailedIndicator, Indicator, RouterResult};

use super::prompts::{project_for_router, router_response_fields, ROUTER_SYSTEM_PROMPT};
use super::StageContext;

const DEFAULT_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Clone)]
struct RouterAnswer {
    family: String,
    confidence_family: f64,
    reasoning: Option<String>,
}

fn parse_element(_id: &str, element: &Value) -> std::result::Result<RouterAnswer, String> {
    validate_fields(element, &router_response_fields())
        .map_err(|errs| errs.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; "))?;
    Ok(RouterAnswer {
        family: element["family"].as_str().expect("validated as enum string").to_string(),
        confidence_family: element["confidence_family"].as_f64().expect("validated as float"),
        reasoning: element.get("reasoning").and_then(|v| v.as_str()).map(str::to_string),
    })
}

fn build_request(
    by_id: &HashMap<String, &Indicator>,
    ids: &[String],
    model: &str,
) -> CompletionRequest {
    let entries: Vec<(String, String)> =
        ids.iter().map(|id| (id.clone(), project_for_router(by_id[id]))).collect();
    CompletionRequest::new(model)
        .with_system(ROUTER_SYSTEM_PROMPT)
        .with_message(user_message(render_batch_prompt(&entries)))
        .with_timeout_ms(DEFAULT_TIMEOUT_MS)
}

/// Runs the Router stage over a batch of indicators (no sample values).
#[instrument(skip_all, fields(execution_id = %ctx.execution_id, count = items.len()))]
pub async fn run(items: &[Indicator], ctx: &StageContext) -> Result<Vec<RouterResult>> {
    let by_id: HashMap<String, &Indicator> = items.iter().map(|i| (i.id.clone(), i)).collect();
    let ids: Vec<String> = items.iter().map(|i| i.id.clone()).collect();
    let model = ctx.config.models.router.clone();

    let scheduler = BatchScheduler::new(ctx.config.batch.router_batch_size, ctx.config.concurrency.router);

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

    let threshold = ctx.config.thresholds.confidence_family_min;
    let mut results = Vec::with_capacity(items.len());

    for (id, outcome) in outcomes {
        match outcome {
            Err(failed) => {
                warn!(indicator_id = %id, error = %failed.error, "router: schema/network retries exhausted");
                results.push(RouterResult {
                    indicator_id: id,
                    family: "qualitative".to_string(),
                    confidence_family: 0.0,
                    reasoning: Some(format!("router-failure: {}", failed.error)),
                    router_failure: true,
                    created_at: Utc::now(),
                });
            }
            Ok(answer) if answer.confidence_family >= threshold => {
                results.push(RouterResult {
                    indicator_id: id,
                    family: answer.family,
                    confidence_family: answer.confidence_family,
                    reasoning: answer.reasoning,
                    router_failure: false,
                    created_at: Utc::now(),
                });
            }
            Ok(answer) => {
                let resolved = retry_low_confidence(&id, answer, &by_id, &model, ctx).await;
                results.push(resolved);
            }
        }
    }

    for result in &results {
        ctx.store.put_router_result(&ctx.execution_id, result)?;
    }

    Ok(results)
}

/// Persistently-low-confidence items are retried individually up to
/// `maxRetries` with exponential backoff, keeping the last observed family
/// if every retry still falls short (`spec.md` §4.2).
async fn retry_low_confidence(
    id: &str,
    mut last: RouterAnswer,
    by_id: &HashMap<String, &Indicator>,
    model: &str,
    ctx: &StageContext,
) -> RouterResult {
    let threshold = ctx.config.thresholds.confidence_family_min;
    let single_id = vec![id.to_string()];

    for attempt in 0..ctx.config.retry.max_retries {
        if last.confidence_family >= threshold || ctx.cancellation.is_cancelled() {
            break;
        }
        tokio::time::sleep(ctx.config.retry.delay_for_attempt(attempt)).await;

        let outcome = ctx
            .gateway
            .run_batch(
                &single_id,
                |ids| build_request(by_id, ids, model),
                |id| build_request(by_id, std::slice::from_ref(&id.to_string()), model),
                parse_element,
            )
            .await;

        if let Some((_, Ok(answer))) = outcome.into_iter().next() {
            last = answer;
        }
    }

    let router_failure = last.confidence_family < threshold;
    if router_failure {
        warn!(indicator_id = %id, confidence = last.confidence_family, "router: persistently low confidence, flagging for review");
    }

    RouterResult {
        indicator_id: id.to_string(),
        family: last.family,
        confidence_family: last.confidence_family,
        reasoning: last.reasoning,
        router_failure,
        created_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::llm::{Gateway, MockLLMClient};
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

    #[tokio::test]
    async fn accepts_high_confidence_family() {
        let response = r#"[{"indicator_id":"gdp-us","family":"physical-fundamental","confidence_family":0.95,"reasoning":"flow"}]"#;
        let client = MockLLMClient::new(vec![("gdp-us".to_string(), response.to_string())]);
        let mut config = Config::default();
        config.dry_run = true;
        let ctx = ctx_with(client, config);

        let items = vec![Indicator::new("gdp-us", "Gross Domestic Product")];
        let results = run(&items, &ctx).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].family, "physical-fundamental");
        assert!(!results[0].router_failure);
    }

    #[tokio::test]
    async fn persistent_low_confidence_is_flagged() {
        let response = r#"[{"indicator_id":"mystery","family":"qualitative","confidence_family":0.2}]"#;
        let client = MockLLMClient::new(vec![("mystery".to_string(), response.to_string())]);
        let mut config = Config::default();
        config.dry_run = true;
        config.retry.max_retries = 1;
        config.retry.retry_delay_ms = 1;
        let ctx = ctx_with(client, config);

        let items = vec![Indicator::new("mystery", "Something Unclear")];
        let results = run(&items, &ctx).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].router_failure);
        assert_eq!(results[0].family, "qualitative");
    }

    #[tokio::test]
    async fn pairing_is_order_independent() {
        let response = r#"[{"indicator_id":"b","family":"price-value","confidence_family":0.9},{"indicator_id":"a","family":"physical-fundamental","confidence_family":0.9}]"#;
        let client = MockLLMClient::new(vec![("id=a".to_string(), response.to_string())]);
        let mut config = Config::default();
        config.dry_run = true;
        let ctx = ctx_with(client, config);

        let items = vec![Indicator::new("a", "A"), Indicator::new("b", "B")];
        let results = run(&items, &ctx).await.unwrap();
        let a = results.iter().find(|r| r.indicator_id == "a").unwrap();
        let b = results.iter().find(|r| r.indicator_id == "b").unwrap();
        assert_eq!(a.family, "physical-fundamental");
        assert_eq!(b.family, "price-value");
    }
}
