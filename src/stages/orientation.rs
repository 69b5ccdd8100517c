//! Orientation stage (`spec.md` §4.5): whether higher values read as
//! positive, lower values read as positive, or neither. A handful of
//! well-known indicator conventions are pinned by regex before the LLM is
//! even consulted, since these orientations are established convention
//! rather than a judgment call. Pinning CPI/PPI correctly needs the
//! `indicator_type` Specialist already assigned, so this stage runs after
//! Specialist and takes its rows alongside the raw indicators.

use std::collections::HashMap;

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::{instrument, warn};

use crate::error::Result;
use crate::llm::{render_batch_prompt, user_message, validate_fields, BatchScheduler, CompletionRequest};
use crate::model::{FailedIndicator, Indicator, OrientationResult, SpecialistResult};

use super::prompts::{orientation_response_fields, ORIENTATION_SYSTEM_PROMPT};
use super::StageContext;

const DEFAULT_TIMEOUT_MS: u64 = 30_000;

static FX_YIELD_RATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)fx rate|exchange rate|yield|interest rate|sofr|libor").unwrap());
static UNEMPLOYMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)unemployment").unwrap());
static INFLATION: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)inflation").unwrap());
static CPI_PPI: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bcpi\b|\bppi\b|consumer price|producer price").unwrap());
static DEBT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)debt|dt\.dod|dt\.amt").unwrap());

/// Deterministic orientation overrides, consulted before the LLM is asked
/// (`spec.md` §4.5). `None` means no pinned answer; fall through to the
/// model.
pub(crate) fn pinned_orientation(indicator: &Indicator, specialist: &SpecialistResult) -> Option<&'static str> {
    let name = &indicator.name;
    if FX_YIELD_RATE.is_match(name) {
        return Some("neutral");
    }
    if UNEMPLOYMENT.is_match(name) {
        return Some("lower-is-positive");
    }
    if INFLATION.is_match(name) {
        return Some("lower-is-positive");
    }
    if CPI_PPI.is_match(name) {
        if specialist.indicator_type == "rate" {
            return Some("lower-is-positive");
        }
        if specialist.indicator_type == "index" {
            return Some("neutral");
        }
    }
    if DEBT.is_match(name) {
        return Some("lower-is-positive");
    }
    None
}

#[derive(Debug, Clone)]
struct OrientationAnswer {
    heat_map_orientation: String,
    confidence_orient: f64,
    reasoning: Option<String>,
}

fn parse_element(_id: &str, element: &Value) -> std::result::Result<OrientationAnswer, String> {
    validate_fields(element, &orientation_response_fields())
        .map_err(|errs| errs.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; "))?;
    Ok(OrientationAnswer {
        heat_map_orientation: element["heat_map_orientation"]
            .as_str()
            .expect("validated as enum string")
            .to_string(),
        confidence_orient: element["confidence_orient"].as_f64().expect("validated as float"),
        reasoning: element.get("reasoning").and_then(|v| v.as_str()).map(str::to_string),
    })
}

fn build_request(by_id: &HashMap<String, &Indicator>, ids: &[String], model: &str) -> CompletionRequest {
    let entries: Vec<(String, String)> = ids
        .iter()
        .map(|id| {
            let indicator = by_id[id];
            let description = format!(
                "name=\"{}\"{}",
                indicator.name,
                indicator
                    .units
                    .as_ref()
                    .map(|u| format!(", units=\"{u}\""))
                    .unwrap_or_default()
            );
            (id.clone(), description)
        })
        .collect();
    CompletionRequest::new(model)
        .with_system(ORIENTATION_SYSTEM_PROMPT)
        .with_message(user_message(render_batch_prompt(&entries)))
        .with_timeout_ms(DEFAULT_TIMEOUT_MS)
}

/// Runs the Orientation stage. Indicators whose name (and, for CPI/PPI,
/// `indicator_type`) matches a pinned convention skip the LLM entirely.
#[instrument(skip_all, fields(execution_id = %ctx.execution_id, count = items.len()))]
pub async fn run(
    items: &[(Indicator, SpecialistResult)],
    ctx: &StageContext,
) -> Result<Vec<OrientationResult>> {
    let mut results = Vec::with_capacity(items.len());
    let mut remaining: Vec<&Indicator> = Vec::new();

    for (indicator, specialist) in items {
        if let Some(orientation) = pinned_orientation(indicator, specialist) {
            results.push(OrientationResult {
                indicator_id: indicator.id.clone(),
                heat_map_orientation: orientation.to_string(),
                confidence_orient: 1.0,
                reasoning: Some("pinned by naming convention".to_string()),
                created_at: Utc::now(),
            });
        } else {
            remaining.push(indicator);
        }
    }

    if !remaining.is_empty() {
        let by_id: HashMap<String, &Indicator> = remaining.iter().map(|i| (i.id.clone(), *i)).collect();
        let ids: Vec<String> = remaining.iter().map(|i| i.id.clone()).collect();
        let model = ctx.config.models.orientation.clone();

        let scheduler = BatchScheduler::new(
            ctx.config.batch.orientation_batch_size,
            ctx.config.concurrency.orientation,
        );

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
                                    Err(FailedIndicator {
                                        indicator_id: id,
                                        error: "cancelled".into(),
                                        retries: 0,
                                    }),
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

        let threshold = ctx.config.thresholds.confidence_orient_min;
        for (id, outcome) in outcomes {
            match outcome {
                Err(failed) => {
                    warn!(indicator_id = %id, error = %failed.error, "orientation: retries exhausted");
                    results.push(OrientationResult {
                        indicator_id: id,
                        heat_map_orientation: "neutral".to_string(),
                        confidence_orient: 0.0,
                        reasoning: Some(format!("orientation-failure: {}", failed.error)),
                        created_at: Utc::now(),
                    });
                }
                Ok(answer) => {
                    if answer.confidence_orient < threshold {
                        warn!(indicator_id = %id, confidence = answer.confidence_orient, "orientation: below threshold, kept as given");
                    }
                    results.push(OrientationResult {
                        indicator_id: id,
                        heat_map_orientation: answer.heat_map_orientation,
                        confidence_orient: answer.confidence_orient,
                        reasoning: answer.reasoning,
                        created_at: Utc::now(),
                    });
                }
            }
        }
    }

    for result in &results {
        ctx.store.put_orientation_result(&ctx.execution_id, result)?;
    }

    Ok(results)
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

    fn specialist(indicator_id: &str, indicator_type: &str) -> SpecialistResult {
        SpecialistResult {
            indicator_id: indicator_id.to_string(),
            family: "numeric-measurement".to_string(),
            indicator_type: indicator_type.to_string(),
            indicator_category: None,
            temporal_aggregation: "period-rate".to_string(),
            is_currency_denominated: false,
            confidence_cls: 0.9,
            reasoning: None,
            specialist_failure: false,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn fx_rate_is_pinned_neutral_without_calling_the_model() {
        let client = MockLLMClient::new(vec![]);
        let mut config = Config::default();
        config.dry_run = true;
        let ctx = ctx_with(client, config);

        let items = vec![(
            Indicator::new("xaf", "Official FX Rate, XAF per USD"),
            specialist("xaf", "rate"),
        )];
        let results = run(&items, &ctx).await.unwrap();
        assert_eq!(results[0].heat_map_orientation, "neutral");
        assert_eq!(ctx.gateway.api_call_count(), 0);
    }

    #[tokio::test]
    async fn unemployment_is_pinned_lower_is_positive() {
        let client = MockLLMClient::new(vec![]);
        let mut config = Config::default();
        config.dry_run = true;
        let ctx = ctx_with(client, config);

        let items = vec![(Indicator::new("unemp", "Unemployment Rate"), specialist("unemp", "rate"))];
        let results = run(&items, &ctx).await.unwrap();
        assert_eq!(results[0].heat_map_orientation, "lower-is-positive");
    }

    #[tokio::test]
    async fn cpi_rate_is_lower_is_positive_but_cpi_index_is_neutral() {
        let client = MockLLMClient::new(vec![]);
        let mut config = Config::default();
        config.dry_run = true;
        let ctx = ctx_with(client, config);

        let items = vec![
            (Indicator::new("cpi-rate", "CPI Inflation Rate"), specialist("cpi-rate", "rate")),
            (Indicator::new("cpi-index", "CPI Level Index"), specialist("cpi-index", "index")),
        ];
        let results = run(&items, &ctx).await.unwrap();
        let rate = results.iter().find(|r| r.indicator_id == "cpi-rate").unwrap();
        let index = results.iter().find(|r| r.indicator_id == "cpi-index").unwrap();
        assert_eq!(rate.heat_map_orientation, "lower-is-positive");
        assert_eq!(index.heat_map_orientation, "neutral");
    }

    #[tokio::test]
    async fn unrecognized_indicator_falls_through_to_the_model() {
        let response = r#"[{"indicator_id":"gdp","heat_map_orientation":"higher-is-positive","confidence_orient":0.9}]"#;
        let client = MockLLMClient::new(vec![("gdp".to_string(), response.to_string())]);
        let mut config = Config::default();
        config.dry_run = true;
        let ctx = ctx_with(client, config);

        let items = vec![(Indicator::new("gdp", "Gross Domestic Product"), specialist("gdp", "flow"))];
        let results = run(&items, &ctx).await.unwrap();
        assert_eq!(results[0].heat_map_orientation, "higher-is-positive");
        assert_eq!(ctx.gateway.api_call_count(), 1);
    }
}
