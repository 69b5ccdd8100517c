//! Flagging stage (`spec.md` §4.6): a rule engine, no LLM. Every rule is a
//! pure function of the candidate row plus the independent Validation
//! result; the flag set produced here is immutable once written (Review
//! never re-flags, `spec.md` §4.6).

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::ThresholdsConfig;
use crate::model::{FlagSeverity, FlaggedIndicator, ValidationResult};
use crate::taxonomy::Taxonomy;

static FX_YIELD_RATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)fx rate|exchange rate|yield|interest rate|sofr|libor").unwrap());
static UNEMPLOYMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)unemployment").unwrap());
static DEBT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)debt|dt\.dod|dt\.amt").unwrap());

/// The merged candidate row Flagging evaluates: Router + Specialist +
/// Orientation fields for one indicator under one execution, plus just
/// enough raw-indicator context for the naming-convention rules.
#[derive(Debug, Clone)]
pub struct FlagInput {
    pub indicator_id: String,
    pub indicator_name: String,
    pub family: String,
    pub indicator_type: String,
    pub temporal_aggregation: String,
    pub heat_map_orientation: String,
    pub confidence_family: f64,
    pub confidence_cls: f64,
    pub confidence_orient: f64,
    pub router_failure: bool,
    pub specialist_failure: bool,
}

/// Evaluates every rule against one candidate row. Order does not matter:
/// all applicable rules fire independently and every hit is returned.
pub fn evaluate_flags(
    input: &FlagInput,
    validation: Option<&ValidationResult>,
    taxonomy: &Taxonomy,
    thresholds: &ThresholdsConfig,
) -> Vec<FlaggedIndicator> {
    let mut flags = Vec::new();

    if input.router_failure {
        flag(&mut flags, input, "missing-field", "router exhausted retries without a confident family", None, None, FlagSeverity::Block);
    }
    if input.specialist_failure {
        flag(
            &mut flags,
            input,
            "missing-field",
            "specialist exhausted retries and received a placeholder indicator_type",
            None,
            None,
            FlagSeverity::Block,
        );
    }

    if input.confidence_family < thresholds.confidence_family_min {
        flag(
            &mut flags,
            input,
            "confidence-below-threshold",
            "confidence_family below configured minimum",
            Some(input.confidence_family.to_string()),
            Some(thresholds.confidence_family_min.to_string()),
            FlagSeverity::Warn,
        );
    }
    if input.confidence_cls < thresholds.confidence_cls_min {
        flag(
            &mut flags,
            input,
            "confidence-below-threshold",
            "confidence_cls below configured minimum",
            Some(input.confidence_cls.to_string()),
            Some(thresholds.confidence_cls_min.to_string()),
            FlagSeverity::Warn,
        );
    }
    if input.confidence_orient < thresholds.confidence_orient_min {
        flag(
            &mut flags,
            input,
            "confidence-below-threshold",
            "confidence_orient below configured minimum",
            Some(input.confidence_orient.to_string()),
            Some(thresholds.confidence_orient_min.to_string()),
            FlagSeverity::Warn,
        );
    }

    if !taxonomy.is_valid_combination(&input.family, &input.indicator_type) {
        flag(
            &mut flags,
            input,
            "type-family-mismatch",
            "indicator_type is not a member of family's declared type set",
            Some(input.indicator_type.clone()),
            None,
            FlagSeverity::Block,
        );
    }

    if let Some(expected) = forced_temporal_aggregation(&input.indicator_type) {
        if input.temporal_aggregation != expected {
            flag(
                &mut flags,
                input,
                "temporal-rule-violation",
                "temporal_aggregation disagrees with the deterministic rule for this indicator_type",
                Some(input.temporal_aggregation.clone()),
                Some(expected.to_string()),
                FlagSeverity::Block,
            );
        }
    }

    if let Some(validation) = validation {
        if validation.is_cumulative
            && validation.suggested_temporal.as_deref() == Some("period-cumulative")
            && input.temporal_aggregation != "period-cumulative"
        {
            flag(
                &mut flags,
                input,
                "validation-suggests-different-temporal",
                "time-series analysis suggests period-cumulative but Specialist returned otherwise",
                Some(input.temporal_aggregation.clone()),
                Some("period-cumulative".to_string()),
                FlagSeverity::Warn,
            );
        }
    }

    if let Some(expected) = expected_orientation_override(&input.indicator_name) {
        if input.heat_map_orientation != expected {
            flag(
                &mut flags,
                input,
                "orientation-conflicts-with-override",
                "heat_map_orientation disagrees with the naming-convention override for this indicator",
                Some(input.heat_map_orientation.clone()),
                Some(expected.to_string()),
                FlagSeverity::Warn,
            );
        }
    }

    flags
}

fn flag(
    flags: &mut Vec<FlaggedIndicator>,
    input: &FlagInput,
    flag_type: &str,
    reason: &str,
    current_value: Option<String>,
    expected_value: Option<String>,
    severity: FlagSeverity,
) {
    flags.push(FlaggedIndicator {
        indicator_id: input.indicator_id.clone(),
        flag_type: flag_type.to_string(),
        flag_reason: reason.to_string(),
        current_value,
        expected_value,
        severity,
        created_at: Utc::now(),
    });
}

/// Mirrors the Specialist stage's forced-temporal table (`spec.md` §4.3)
/// so a mismatch between the persisted row and that rule is catchable even
/// if the row was produced (or later edited) outside the normal path.
fn forced_temporal_aggregation(indicator_type: &str) -> Option<&'static str> {
    match indicator_type {
        "ratio" | "percentage" | "share" | "spread" => Some("not-applicable"),
        "count" | "volume" => Some("period-total"),
        _ => None,
    }
}

/// Mirrors the Orientation stage's naming-convention pins that don't
/// depend on `indicator_type` (`spec.md` §4.5), for cross-checking the
/// merged row independently of how Orientation itself produced it.
fn expected_orientation_override(name: &str) -> Option<&'static str> {
    if FX_YIELD_RATE.is_match(name) {
        Some("neutral")
    } else if UNEMPLOYMENT.is_match(name) {
        Some("lower-is-positive")
    } else if DEBT.is_match(name) {
        Some("lower-is-positive")
    } else {
        None
    }
}
