//! The pipeline driver: orchestrates Router, Specialist, Validation,
//! Orientation, Flagging, and Review under one `execution_id`, strictly in
//! that order (`spec.md` §2), merges their rows into the final
//! `Classification` set, and accumulates the telemetry `spec.md` §7 asks
//! for.
//!
//! A dry run (`config.dry_run`) skips every LLM call: Router, Specialist,
//! and Orientation are synthesized locally from the deterministic override
//! helpers those stages already expose, Validation and Flagging run exactly
//! as they would live (neither calls an LLM), and Review is skipped
//! entirely, since there is nothing real to review.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::config::{Config, ReviewMode};
use crate::error::{Error, Result};
use crate::llm::{estimate_tokens, AnthropicClient, CostTracker, Gateway, LLMClient, OpenAIClient};
use crate::model::{
    Classification, Family, FlagSeverity, FlaggedIndicator, Indicator, OrientationResult,
    PipelineExecution, ReviewAction, ReviewDecision, RouterResult, SpecialistResult, StageSummary,
    ValidationResult,
};
use crate::stages::{
    analyze_indicator, currency_denomination_heuristic, evaluate_flags, family_override_temporal,
    forced_temporal_aggregation, pinned_orientation, run_orientation, run_review, run_router,
    run_specialist, run_validation, CancellationToken, FlagInput, ReviewInput, StageContext,
};
use crate::storage::SqliteStore;
use crate::taxonomy::Taxonomy;

/// Fixed per-item token estimate used in dry runs, one per synthesized
/// LLM-shaped stage (Router, Specialist, Orientation). Dry runs perform no
/// real token accounting (`spec.md` §6's dry-run open question); this is a
/// planning estimate only.
const DRY_RUN_INPUT_OVERHEAD_TOKENS: u64 = 30;
const DRY_RUN_OUTPUT_TOKENS: u64 = 20;

/// The classification pipeline over one storage backend and one loaded
/// taxonomy. Cheap to construct per run; holds no in-flight state between
/// calls to [`run_pipeline`](Pipeline::run_pipeline).
pub struct Pipeline {
    store: SqliteStore,
    config: Config,
    taxonomy: Arc<Taxonomy>,
    #[cfg(any(test, feature = "test-support"))]
    test_gateway: Option<Arc<Gateway>>,
}

impl Pipeline {
    pub fn new(config: Config) -> Result<Self> {
        let store = SqliteStore::open(&config.database.path)?;
        let taxonomy = Arc::new(Taxonomy::load_default()?);
        Ok(Self {
            store,
            config,
            taxonomy,
            #[cfg(any(test, feature = "test-support"))]
            test_gateway: None,
        })
    }

    /// Test-only seam: runs the pipeline against a caller-supplied gateway
    /// (a [`MockLLMClient`](crate::llm::MockLLMClient) wrapped in one)
    /// instead of constructing a real provider client from config.
    #[cfg(any(test, feature = "test-support"))]
    pub fn with_test_gateway(mut self, gateway: Arc<Gateway>) -> Self {
        self.test_gateway = Some(gateway);
        self
    }

    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    fn build_gateway(&self) -> Result<Arc<Gateway>> {
        #[cfg(any(test, feature = "test-support"))]
        if let Some(gateway) = &self.test_gateway {
            return Ok(gateway.clone());
        }
        let client: Arc<dyn LLMClient> = if let Some(key) = self.config.anthropic_api_key.clone() {
            Arc::new(AnthropicClient::new(key)?)
        } else if let Some(key) = self.config.openai_api_key.clone() {
            Arc::new(OpenAIClient::new(key)?)
        } else if self.config.gemini_api_key.is_some() {
            return Err(Error::Config(
                "GEMINI_API_KEY is set but no Gemini client is wired into this build; use an Anthropic or OpenAI key, or pass --dry-run".into(),
            ));
        } else {
            return Err(Error::Config(
                "no provider API key configured for a live run; set ANTHROPIC_API_KEY/OPENAI_API_KEY, or pass --dry-run".into(),
            ));
        };
        Ok(Arc::new(Gateway::new(client, self.config.retry.clone())))
    }

    /// Runs the full pipeline over every indicator currently in storage (or
    /// the first `limit`), under a fresh or caller-supplied `execution_id`.
    #[instrument(skip_all, fields(execution_id = execution_id.as_deref().unwrap_or("<generated>")))]
    pub async fn run_pipeline(
        &self,
        execution_id: Option<String>,
        limit: Option<usize>,
        cancellation: CancellationToken,
    ) -> Result<PipelineExecution> {
        let execution_id = execution_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        self.store.start_execution(&execution_id, self.config.dry_run)?;
        let indicators = self.store.list_indicators(limit)?;

        let execution = if self.config.dry_run {
            self.run_dry(&execution_id, indicators)?
        } else {
            self.run_live(&execution_id, indicators, cancellation).await?
        };

        info!(
            execution_id = %execution.execution_id,
            dry_run = execution.dry_run,
            api_calls = execution.api_calls,
            input_tokens = execution.input_tokens,
            output_tokens = execution.output_tokens,
            cost_estimate = execution.cost_estimate,
            "pipeline execution finished"
        );
        Ok(execution)
    }

    async fn run_live(
        &self,
        execution_id: &str,
        indicators: Vec<Indicator>,
        cancellation: CancellationToken,
    ) -> Result<PipelineExecution> {
        let started_at = Utc::now();
        let gateway = self.build_gateway()?;
        let ctx = StageContext::new(
            self.store.clone(),
            execution_id,
            self.config.clone(),
            gateway.clone(),
            self.taxonomy.clone(),
            cancellation,
        );

        let mut stage_counts = HashMap::new();

        // Router
        let t0 = Instant::now();
        let (calls0, cost0) = (gateway.api_call_count(), gateway.cost_snapshot().await);
        let router_results = run_router(&indicators, &ctx).await?;
        let router_by_id: HashMap<String, RouterResult> =
            router_results.iter().cloned().map(|r| (r.indicator_id.clone(), r)).collect();
        stage_counts.insert(
            "router".to_string(),
            self.stage_summary(
                indicators.len() as u64,
                router_results.iter().filter(|r| !r.router_failure).count() as u64,
                router_results.iter().filter(|r| r.router_failure).count() as u64,
                0,
                0,
                0,
                0,
                t0,
                &gateway,
                calls0,
                &cost0,
            )
            .await,
        );

        // Specialist, grouped by the family Router assigned.
        let specialist_items: Vec<(Indicator, Family)> = indicators
            .iter()
            .filter_map(|ind| {
                let family = Family::parse(&router_by_id.get(&ind.id)?.family)?;
                Some((ind.clone(), family))
            })
            .collect();

        let t1 = Instant::now();
        let (calls1, cost1) = (gateway.api_call_count(), gateway.cost_snapshot().await);
        let specialist_results = run_specialist(&specialist_items, &ctx).await?;
        let specialist_by_id: HashMap<String, SpecialistResult> = specialist_results
            .iter()
            .cloned()
            .map(|s| (s.indicator_id.clone(), s))
            .collect();
        stage_counts.insert(
            "specialist".to_string(),
            self.stage_summary(
                specialist_items.len() as u64,
                specialist_results.iter().filter(|s| !s.specialist_failure).count() as u64,
                specialist_results.iter().filter(|s| s.specialist_failure).count() as u64,
                0,
                0,
                0,
                0,
                t1,
                &gateway,
                calls1,
                &cost1,
            )
            .await,
        );

        // Validation: no LLM call, runs regardless of what Router/Specialist did.
        let t2 = Instant::now();
        let validation_results = run_validation(&indicators, &ctx)?;
        let validation_by_id: HashMap<String, ValidationResult> = validation_results
            .into_iter()
            .map(|v| (v.indicator_id.clone(), v))
            .collect();
        stage_counts.insert(
            "validation".to_string(),
            StageSummary {
                processed: indicators.len() as u64,
                successful: validation_by_id.values().filter(|v| v.analyzed).count() as u64,
                elapsed_ms: t2.elapsed().as_millis() as u64,
                ..Default::default()
            },
        );

        // Orientation needs (Indicator, SpecialistResult) pairs.
        let orientation_items: Vec<(Indicator, SpecialistResult)> = indicators
            .iter()
            .filter_map(|ind| {
                let specialist = specialist_by_id.get(&ind.id)?;
                Some((ind.clone(), specialist.clone()))
            })
            .collect();

        let t3 = Instant::now();
        let (calls3, cost3) = (gateway.api_call_count(), gateway.cost_snapshot().await);
        let orientation_results = run_orientation(&orientation_items, &ctx).await?;
        let orientation_by_id: HashMap<String, OrientationResult> = orientation_results
            .into_iter()
            .map(|o| (o.indicator_id.clone(), o))
            .collect();
        stage_counts.insert(
            "orientation".to_string(),
            self.stage_summary(
                orientation_items.len() as u64,
                orientation_by_id.values().filter(|o| o.confidence_orient > 0.0).count() as u64,
                orientation_by_id.values().filter(|o| o.confidence_orient == 0.0).count() as u64,
                0,
                0,
                0,
                0,
                t3,
                &gateway,
                calls3,
                &cost3,
            )
            .await,
        );

        // Merge Router + Specialist + Orientation into candidate rows.
        let mut classifications: HashMap<String, Classification> = HashMap::new();
        for ind in &indicators {
            let (Some(router), Some(specialist), Some(orientation)) = (
                router_by_id.get(&ind.id),
                specialist_by_id.get(&ind.id),
                orientation_by_id.get(&ind.id),
            ) else {
                continue;
            };
            classifications.insert(
                ind.id.clone(),
                build_classification(execution_id, router, specialist, orientation),
            );
        }

        // Flagging: a pure rule engine, no LLM.
        let t4 = Instant::now();
        let mut flags_by_id: HashMap<String, Vec<FlaggedIndicator>> = HashMap::new();
        for ind in &indicators {
            let (Some(router), Some(specialist), Some(classification)) = (
                router_by_id.get(&ind.id),
                specialist_by_id.get(&ind.id),
                classifications.get(&ind.id),
            ) else {
                continue;
            };
            let input = flag_input(ind, classification, router, specialist);
            let validation = validation_by_id.get(&ind.id);
            let flags = evaluate_flags(&input, validation, &self.taxonomy, &self.config.thresholds);
            for f in &flags {
                self.store.put_flag(execution_id, f)?;
            }
            flags_by_id.insert(ind.id.clone(), flags);
        }
        stage_counts.insert(
            "flagging".to_string(),
            StageSummary {
                processed: indicators.len() as u64,
                flagged: flags_by_id.values().filter(|f| !f.is_empty()).count() as u64,
                elapsed_ms: t4.elapsed().as_millis() as u64,
                ..Default::default()
            },
        );

        // Review: only items with at least one warn-or-above flag get sent;
        // `run_review` itself filters further on that point.
        let t5 = Instant::now();
        let (calls5, cost5) = (gateway.api_call_count(), gateway.cost_snapshot().await);
        let review_inputs: Vec<ReviewInput> = classifications
            .iter()
            .filter_map(|(id, classification)| {
                let flags = flags_by_id.get(id).cloned().unwrap_or_default();
                Some(ReviewInput {
                    indicator_id: id.clone(),
                    candidate: serde_json::to_value(classification).ok()?,
                    flags,
                    validation: validation_by_id.get(id).cloned(),
                })
            })
            .collect();
        let decisions = run_review(&review_inputs, &ctx, false).await?;
        let fixed_count = decisions.iter().filter(|d| d.action == ReviewAction::Fix).count() as u64;
        let escalated_count =
            decisions.iter().filter(|d| d.action == ReviewAction::Escalate).count() as u64;
        stage_counts.insert(
            "review".to_string(),
            self.stage_summary(
                review_inputs.len() as u64,
                decisions.len() as u64,
                0,
                0,
                decisions.len() as u64,
                fixed_count,
                escalated_count,
                t5,
                &gateway,
                calls5,
                &cost5,
            )
            .await,
        );

        // Apply review decisions atomically, then exclude any row still
        // carrying an unresolved block-severity flag (`spec.md` §4.6).
        let decisions_by_id: HashMap<String, ReviewDecision> =
            decisions.into_iter().map(|d| (d.indicator_id.clone(), d)).collect();
        for (id, classification) in classifications.iter_mut() {
            let has_block = flags_by_id
                .get(id)
                .map(|flags| flags.iter().any(|f| f.severity == FlagSeverity::Block))
                .unwrap_or(false);
            let mut fix_applied = false;
            if let Some(decision) = decisions_by_id.get(id) {
                if self.config.review_mode == ReviewMode::AutoFix {
                    let action = apply_review_fix(classification, decision, &self.taxonomy);
                    fix_applied = action == ReviewAction::Fix;
                }
            }
            classification.excluded = has_block && !fix_applied;
        }

        for classification in classifications.values() {
            self.store.put_classification(classification)?;
        }

        let cost = gateway.cost_snapshot().await;
        self.store.finish_execution(
            execution_id,
            gateway.api_call_count(),
            cost.total_input_tokens,
            cost.total_output_tokens,
            cost.total_cost,
        )?;

        Ok(PipelineExecution {
            execution_id: execution_id.to_string(),
            started_at,
            finished_at: Some(Utc::now()),
            dry_run: false,
            stage_counts,
            api_calls: gateway.api_call_count(),
            input_tokens: cost.total_input_tokens,
            output_tokens: cost.total_output_tokens,
            cost_estimate: cost.total_cost,
        })
    }

    /// Synthesizes Router/Specialist/Orientation locally from the same
    /// deterministic override helpers a live run consults, runs Validation
    /// and Flagging exactly as they would live, and skips Review.
    fn run_dry(&self, execution_id: &str, indicators: Vec<Indicator>) -> Result<PipelineExecution> {
        let started_at = Utc::now();

        let dry_family = Family::all()
            .into_iter()
            .find(|f| !self.taxonomy.indicator_types(f.as_str()).is_empty())
            .unwrap_or(Family::Qualitative);
        let dry_indicator_type = self
            .taxonomy
            .generic_indicator_type(dry_family.as_str())
            .unwrap_or("qualitative")
            .to_string();
        let dry_temporal = forced_temporal_aggregation(&dry_indicator_type)
            .or_else(|| family_override_temporal(dry_family, &dry_indicator_type))
            .unwrap_or("not-applicable")
            .to_string();

        let t0 = Instant::now();
        let mut classifications: HashMap<String, Classification> = HashMap::new();
        let mut input_tokens = 0u64;
        let mut output_tokens = 0u64;

        for ind in &indicators {
            input_tokens += 3 * (estimate_tokens(&ind.name) + DRY_RUN_INPUT_OVERHEAD_TOKENS);
            output_tokens += 3 * DRY_RUN_OUTPUT_TOKENS;

            let router = RouterResult {
                indicator_id: ind.id.clone(),
                family: dry_family.as_str().to_string(),
                confidence_family: 0.5,
                reasoning: Some("dry-run placeholder".to_string()),
                router_failure: false,
                created_at: Utc::now(),
            };
            self.store.put_router_result(execution_id, &router)?;

            let is_currency_denominated =
                currency_denomination_heuristic(ind, &dry_indicator_type, false);
            let specialist = SpecialistResult {
                indicator_id: ind.id.clone(),
                family: dry_family.as_str().to_string(),
                indicator_type: dry_indicator_type.clone(),
                indicator_category: None,
                temporal_aggregation: dry_temporal.clone(),
                is_currency_denominated,
                confidence_cls: 0.5,
                reasoning: Some("dry-run placeholder".to_string()),
                specialist_failure: false,
                created_at: Utc::now(),
            };
            self.store.put_specialist_result(execution_id, &specialist)?;

            let heat_map_orientation =
                pinned_orientation(ind, &specialist).unwrap_or("neutral").to_string();
            let orientation = OrientationResult {
                indicator_id: ind.id.clone(),
                heat_map_orientation,
                confidence_orient: 0.5,
                reasoning: Some("dry-run placeholder".to_string()),
                created_at: Utc::now(),
            };
            self.store.put_orientation_result(execution_id, &orientation)?;

            classifications.insert(
                ind.id.clone(),
                build_classification(execution_id, &router, &specialist, &orientation),
            );
        }

        let mut stage_counts = HashMap::new();
        let synth_elapsed = t0.elapsed().as_millis() as u64;
        for name in ["router", "specialist", "orientation"] {
            stage_counts.insert(
                name.to_string(),
                StageSummary {
                    processed: indicators.len() as u64,
                    successful: indicators.len() as u64,
                    elapsed_ms: synth_elapsed,
                    input_tokens: input_tokens / 3,
                    output_tokens: output_tokens / 3,
                    ..Default::default()
                },
            );
        }

        // Validation: the real, deterministic stage.
        let t1 = Instant::now();
        let mut validation_by_id: HashMap<String, ValidationResult> = HashMap::new();
        for ind in &indicators {
            let result = analyze_indicator(ind);
            self.store.put_validation_result(execution_id, &result)?;
            validation_by_id.insert(ind.id.clone(), result);
        }
        stage_counts.insert(
            "validation".to_string(),
            StageSummary {
                processed: indicators.len() as u64,
                successful: validation_by_id.values().filter(|v| v.analyzed).count() as u64,
                elapsed_ms: t1.elapsed().as_millis() as u64,
                ..Default::default()
            },
        );

        // Flagging: the real rule engine over the synthesized candidates.
        let t2 = Instant::now();
        let mut flags_by_id: HashMap<String, Vec<FlaggedIndicator>> = HashMap::new();
        for ind in &indicators {
            let Some(classification) = classifications.get(&ind.id) else { continue };
            let input = FlagInput {
                indicator_id: classification.indicator_id.clone(),
                indicator_name: ind.name.clone(),
                family: classification.family.clone(),
                indicator_type: classification.indicator_type.clone(),
                temporal_aggregation: classification.temporal_aggregation.clone(),
                heat_map_orientation: classification.heat_map_orientation.clone(),
                confidence_family: classification.confidence_family,
                confidence_cls: classification.confidence_cls,
                confidence_orient: classification.confidence_orient,
                router_failure: false,
                specialist_failure: false,
            };
            let validation = validation_by_id.get(&ind.id);
            let flags = evaluate_flags(&input, validation, &self.taxonomy, &self.config.thresholds);
            for f in &flags {
                self.store.put_flag(execution_id, f)?;
            }
            flags_by_id.insert(ind.id.clone(), flags);
        }
        stage_counts.insert(
            "flagging".to_string(),
            StageSummary {
                processed: indicators.len() as u64,
                flagged: flags_by_id.values().filter(|f| !f.is_empty()).count() as u64,
                elapsed_ms: t2.elapsed().as_millis() as u64,
                ..Default::default()
            },
        );

        // Review is skipped in dry runs: a block-severity flag simply
        // excludes the row, since no fix can ever be applied without Review.
        for (id, classification) in classifications.iter_mut() {
            let has_block = flags_by_id
                .get(id)
                .map(|flags| flags.iter().any(|f| f.severity == FlagSeverity::Block))
                .unwrap_or(false);
            classification.excluded = has_block;
        }

        for classification in classifications.values() {
            self.store.put_classification(classification)?;
        }

        self.store.finish_execution(execution_id, 0, input_tokens, output_tokens, 0.0)?;

        Ok(PipelineExecution {
            execution_id: execution_id.to_string(),
            started_at,
            finished_at: Some(Utc::now()),
            dry_run: true,
            stage_counts,
            api_calls: 0,
            input_tokens,
            output_tokens,
            cost_estimate: 0.0,
        })
    }

    /// Re-reviews every indicator already flagged under a prior execution.
    /// `flag_only` forces the `review-all-flag` variant mode: every decision
    /// is recorded as `escalate` and no fix is ever applied, for audit-only
    /// runs (`spec.md` §4.6).
    #[instrument(skip_all, fields(execution_id, flag_only))]
    pub async fn review_all(&self, execution_id: &str, flag_only: bool) -> Result<StageSummary> {
        let gateway = self.build_gateway()?;
        let ctx = StageContext::new(
            self.store.clone(),
            execution_id,
            self.config.clone(),
            gateway.clone(),
            self.taxonomy.clone(),
            CancellationToken::new(),
        );

        let mut flags_by_id: HashMap<String, Vec<FlaggedIndicator>> = HashMap::new();
        for flag in self.store.scan_flags(execution_id)? {
            flags_by_id.entry(flag.indicator_id.clone()).or_default().push(flag);
        }

        let mut by_id_classification: HashMap<String, Classification> = self
            .store
            .scan_classifications(execution_id)?
            .into_iter()
            .map(|c| (c.indicator_id.clone(), c))
            .collect();

        let validation_by_id: HashMap<String, ValidationResult> = self
            .store
            .scan_validation_results(execution_id)?
            .into_iter()
            .map(|v| (v.indicator_id.clone(), v))
            .collect();

        let t0 = Instant::now();
        let (calls0, cost0) = (gateway.api_call_count(), gateway.cost_snapshot().await);

        let review_inputs: Vec<ReviewInput> = by_id_classification
            .iter()
            .filter_map(|(id, classification)| {
                let flags = flags_by_id.get(id)?.clone();
                Some(ReviewInput {
                    indicator_id: id.clone(),
                    candidate: serde_json::to_value(classification).ok()?,
                    flags,
                    validation: validation_by_id.get(id).cloned(),
                })
            })
            .collect();

        let decisions = run_review(&review_inputs, &ctx, flag_only).await?;

        let mut fixed = 0u64;
        let mut escalated = 0u64;
        for decision in &decisions {
            let Some(classification) = by_id_classification.get_mut(&decision.indicator_id) else {
                continue;
            };
            let apply = !flag_only && self.config.review_mode == ReviewMode::AutoFix;
            let action = if apply {
                apply_review_fix(classification, decision, &self.taxonomy)
            } else {
                decision.action
            };
            match action {
                ReviewAction::Fix => fixed += 1,
                ReviewAction::Escalate => escalated += 1,
                ReviewAction::Accept => {}
            }
            let has_block = flags_by_id
                .get(&decision.indicator_id)
                .map(|flags| flags.iter().any(|f| f.severity == FlagSeverity::Block))
                .unwrap_or(false);
            classification.excluded = has_block && action != ReviewAction::Fix;
            self.store.put_classification(classification)?;
        }

        let cost_after = gateway.cost_snapshot().await;
        Ok(StageSummary {
            processed: review_inputs.len() as u64,
            successful: decisions.len() as u64,
            failed: 0,
            flagged: flags_by_id.len() as u64,
            reviewed: decisions.len() as u64,
            fixed,
            escalated,
            elapsed_ms: t0.elapsed().as_millis() as u64,
            api_calls: gateway.api_call_count() - calls0,
            input_tokens: cost_after.total_input_tokens - cost0.total_input_tokens,
            output_tokens: cost_after.total_output_tokens - cost0.total_output_tokens,
            estimated_cost: cost_after.total_cost - cost0.total_cost,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn stage_summary(
        &self,
        processed: u64,
        successful: u64,
        failed: u64,
        flagged: u64,
        reviewed: u64,
        fixed: u64,
        escalated: u64,
        started_at: Instant,
        gateway: &Gateway,
        calls_before: u64,
        cost_before: &CostTracker,
    ) -> StageSummary {
        let cost_after = gateway.cost_snapshot().await;
        StageSummary {
            processed,
            successful,
            failed,
            flagged,
            reviewed,
            fixed,
            escalated,
            elapsed_ms: started_at.elapsed().as_millis() as u64,
            api_calls: gateway.api_call_count() - calls_before,
            input_tokens: cost_after.total_input_tokens - cost_before.total_input_tokens,
            output_tokens: cost_after.total_output_tokens - cost_before.total_output_tokens,
            estimated_cost: cost_after.total_cost - cost_before.total_cost,
        }
    }
}

fn build_classification(
    execution_id: &str,
    router: &RouterResult,
    specialist: &SpecialistResult,
    orientation: &OrientationResult,
) -> Classification {
    Classification {
        execution_id: execution_id.to_string(),
        indicator_id: router.indicator_id.clone(),
        family: specialist.family.clone(),
        indicator_type: specialist.indicator_type.clone(),
        temporal_aggregation: specialist.temporal_aggregation.clone(),
        is_currency_denominated: specialist.is_currency_denominated,
        heat_map_orientation: orientation.heat_map_orientation.clone(),
        confidence_family: router.confidence_family,
        confidence_cls: specialist.confidence_cls,
        confidence_orient: orientation.confidence_orient,
        excluded: false,
        created_at: Utc::now(),
    }
}

fn flag_input(
    indicator: &Indicator,
    classification: &Classification,
    router: &RouterResult,
    specialist: &SpecialistResult,
) -> FlagInput {
    FlagInput {
        indicator_id: classification.indicator_id.clone(),
        indicator_name: indicator.name.clone(),
        family: classification.family.clone(),
        indicator_type: classification.indicator_type.clone(),
        temporal_aggregation: classification.temporal_aggregation.clone(),
        heat_map_orientation: classification.heat_map_orientation.clone(),
        confidence_family: classification.confidence_family,
        confidence_cls: classification.confidence_cls,
        confidence_orient: classification.confidence_orient,
        router_failure: router.router_failure,
        specialist_failure: specialist.specialist_failure,
    }
}

/// Applies a `ReviewDecision` of action `fix` to the merged classification
/// row, validating `new_value` against the taxonomy before writing it.
/// An enum-valued `target_field` with an invalid `new_value` is downgraded
/// to `escalate` rather than silently applied, so a fix can never leave the
/// row in a state Flagging would immediately re-reject. `accept` and
/// `escalate` decisions pass through unchanged.
fn apply_review_fix(
    classification: &mut Classification,
    decision: &ReviewDecision,
    taxonomy: &Taxonomy,
) -> ReviewAction {
    if decision.action != ReviewAction::Fix {
        return decision.action;
    }
    let (Some(field), Some(value)) = (&decision.target_field, &decision.new_value) else {
        return ReviewAction::Escalate;
    };

    let valid = match field.as_str() {
        "family" => taxonomy.is_valid_family(value),
        "indicator_type" => taxonomy.is_valid_combination(&classification.family, value),
        "temporal_aggregation" => taxonomy.is_valid_temporal_aggregation(value),
        "heat_map_orientation" => taxonomy.is_valid_orientation(value),
        "is_currency_denominated" => value == "true" || value == "false",
        _ => false,
    };
    if !valid {
        return ReviewAction::Escalate;
    }

    match field.as_str() {
        "family" => classification.family = value.clone(),
        "indicator_type" => classification.indicator_type = value.clone(),
        "temporal_aggregation" => classification.temporal_aggregation = value.clone(),
        "heat_map_orientation" => classification.heat_map_orientation = value.clone(),
        "is_currency_denominated" => classification.is_currency_denominated = value == "true",
        _ => unreachable!("validated above"),
    }
    ReviewAction::Fix
}
