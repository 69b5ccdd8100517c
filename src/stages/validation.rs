//! Validation stage (`spec.md` §4.4): purely deterministic time-series
//! analysis from `sample_values` alone, no LLM involved. Publishes
//! independent rows that Flagging and Review consult but never writes
//! outside its own table (`spec.md` §3 ownership rule, property 6 of §8).

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::instrument;

use crate::error::Result;
use crate::model::{Indicator, SamplePoint, ValidationResult};

use super::StageContext;

/// Magnitude-consistency thresholds (`spec.md` §4.4, §9: "plausible but not
/// explicitly stated in the source", adopted verbatim here).
const PERCENTAGE_OUTLIER_FRACTION: f64 = 0.05;
const MONETARY_STOCK_MEDIAN_CEILING: f64 = 1e14;
const CUMULATIVE_INTRA_YEAR_THRESHOLD: f64 = 0.9;
const CUMULATIVE_CONFIDENCE_THRESHOLD: f64 = 0.7;
const RESET_TOLERANCE_FRACTION: f64 = 0.15;

static HYPERINFLATION_EXEMPT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)hyper|zimbabwe|venezuela").unwrap());
static PERCENTAGE_LIKE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)%|percent|\brate\b").unwrap());

/// Runs Validation over a batch of indicators. Synchronous: CPU-bound
/// analysis never suspends (`spec.md` §5).
#[instrument(skip_all, fields(execution_id = %ctx.execution_id, count = items.len()))]
pub fn run(items: &[Indicator], ctx: &StageContext) -> Result<Vec<ValidationResult>> {
    let mut results = Vec::with_capacity(items.len());
    for indicator in items {
        let result = analyze(indicator);
        ctx.store.put_validation_result(&ctx.execution_id, &result)?;
        results.push(result);
    }
    Ok(results)
}

/// Exposed `pub(crate)` so the dry-run synthesizer in `pipeline` can run the
/// same deterministic analysis without going through a [`StageContext`].
pub(crate) fn analyze(indicator: &Indicator) -> ValidationResult {
    let samples = indicator.numeric_samples_sorted();

    if samples.len() < 2 {
        return ValidationResult {
            indicator_id: indicator.id.clone(),
            is_cumulative: false,
            cumulative_confidence: 0.0,
            suggested_temporal: None,
            validation_reasoning: "insufficient numeric samples for time-series analysis".into(),
            analyzed: false,
            magnitude_suspicious: false,
            created_at: Utc::now(),
        };
    }

    let cumulative = detect_cumulative(&samples);
    let magnitude_suspicious = check_magnitude_consistency(indicator, &samples);

    let mut reasoning = cumulative.reasoning.clone();
    if magnitude_suspicious {
        reasoning.push_str("; magnitude-suspicious: values fall outside the plausible range");
    }

    ValidationResult {
        indicator_id: indicator.id.clone(),
        is_cumulative: cumulative.is_cumulative,
        cumulative_confidence: cumulative.confidence,
        suggested_temporal: cumulative.suggested_temporal,
        validation_reasoning: reasoning,
        analyzed: true,
        magnitude_suspicious,
        created_at: Utc::now(),
    }
}

struct CumulativeAnalysis {
    is_cumulative: bool,
    confidence: f64,
    suggested_temporal: Option<String>,
    reasoning: String,
}

/// An indicator is cumulative (YTD-style) if at least
/// [`CUMULATIVE_INTRA_YEAR_THRESHOLD`] of intra-year consecutive steps are
/// non-decreasing and the January value after a year boundary resets close
/// to the series minimum (`spec.md` §4.4).
fn detect_cumulative(samples: &[&SamplePoint]) -> CumulativeAnalysis {
    let values: Vec<f64> = samples.iter().map(|p| p.value).collect();
    let years: Vec<i32> = samples.iter().map(|p| parse_year(&p.date)).collect();

    let all_diffs: Vec<f64> = values.windows(2).map(|w| w[1] - w[0]).collect();
    let overall_nondecreasing =
        all_diffs.iter().filter(|&&d| d >= 0.0).count() as f64 / all_diffs.len().max(1) as f64;

    let mut intra_year_total = 0usize;
    let mut intra_year_nondecreasing = 0usize;
    let mut reset_boundaries = 0usize;
    let mut reset_hits = 0usize;

    let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let range = (max - min).max(1e-9);

    for i in 1..values.len() {
        let diff = values[i] - values[i - 1];
        if years[i] == years[i - 1] {
            intra_year_total += 1;
            if diff >= 0.0 {
                intra_year_nondecreasing += 1;
            }
        } else {
            reset_boundaries += 1;
            if (values[i] - min).abs() <= RESET_TOLERANCE_FRACTION * range {
                reset_hits += 1;
            }
        }
    }

    let intra_year_fraction = if intra_year_total > 0 {
        intra_year_nondecreasing as f64 / intra_year_total as f64
    } else {
        0.0
    };
    let reset_detected = reset_boundaries > 0 && reset_hits == reset_boundaries;

    // Rescaled so a fully non-decreasing intra-year series (fraction = 1.0)
    // reaches confidence 1.0 rather than saturating at 0.5, which is what a
    // literal "fraction minus 0.5, clamped to [0,1]" would do against the
    // 0.7 acceptance bar in the same section (`spec.md` §4.4; see DESIGN.md).
    let confidence = ((intra_year_fraction - 0.5) * 2.0).clamp(0.0, 1.0);

    let is_cumulative =
        intra_year_total > 0 && intra_year_fraction >= CUMULATIVE_INTRA_YEAR_THRESHOLD && reset_detected;

    let suggested_temporal = if is_cumulative && confidence >= CUMULATIVE_CONFIDENCE_THRESHOLD {
        Some("period-cumulative".to_string())
    } else {
        None
    };

    let reasoning = format!(
        "{:.0}% of all consecutive steps non-decreasing, {:.0}% of intra-year steps \
         non-decreasing across {reset_boundaries} year boundary(ies) ({reset_hits} resetting \
         near the series minimum)",
        overall_nondecreasing * 100.0,
        intra_year_fraction * 100.0,
    );

    CumulativeAnalysis { is_cumulative, confidence, suggested_temporal, reasoning }
}

/// Parses the leading `YYYY` from an ISO date. Symbolic tokens are already
/// filtered out by [`Indicator::numeric_samples_sorted`] before this runs.
fn parse_year(date: &str) -> i32 {
    date.get(0..4).and_then(|y| y.parse().ok()).unwrap_or(0)
}

/// `spec.md` §4.4: flags indicators whose values are implausible for their
/// apparent declared kind, with the hyperinflation and scale-hint
/// exemptions named there.
fn check_magnitude_consistency(indicator: &Indicator, samples: &[&SamplePoint]) -> bool {
    let looks_percentage_like = indicator
        .units
        .as_deref()
        .map(|u| PERCENTAGE_LIKE.is_match(u))
        .unwrap_or(false)
        || PERCENTAGE_LIKE.is_match(&indicator.name);

    if looks_percentage_like && !HYPERINFLATION_EXEMPT.is_match(&indicator.name) {
        let outliers = samples.iter().filter(|p| !(-100.0..=100.0).contains(&p.value)).count();
        let fraction = outliers as f64 / samples.len() as f64;
        if fraction > PERCENTAGE_OUTLIER_FRACTION {
            return true;
        }
    }

    let looks_monetary_stock = indicator.currency_code.is_some()
        || indicator
            .units
            .as_deref()
            .map(|u| u.to_lowercase().contains("usd") || u.to_lowercase().contains("currency"))
            .unwrap_or(false);

    if looks_monetary_stock && indicator.scale.is_none() {
        let mut sorted: Vec<f64> = samples.iter().map(|p| p.value.abs()).collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let median = sorted[sorted.len() / 2];
        if median > MONETARY_STOCK_MEDIAN_CEILING {
            return true;
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(date: &str, value: f64) -> SamplePoint {
        SamplePoint { date: date.to_string(), value }
    }

    #[test]
    fn flags_cumulative_ytd_series() {
        let indicator = Indicator::new("ytd", "Fiscal Revenue YTD").with_samples(vec![
            point("2019-01-01", 10.0),
            point("2019-06-01", 50.0),
            point("2019-12-01", 95.0),
            point("2020-01-01", 8.0),
            point("2020-06-01", 48.0),
            point("2020-12-01", 90.0),
        ]);
        let result = analyze(&indicator);
        assert!(result.is_cumulative);
        assert_eq!(result.suggested_temporal.as_deref(), Some("period-cumulative"));
    }

    #[test]
    fn non_cumulative_series_is_not_flagged() {
        let indicator = Indicator::new("rate", "Policy Rate").with_samples(vec![
            point("2020-01-01", 2.0),
            point("2020-02-01", 2.5),
            point("2020-03-01", 1.8),
            point("2020-04-01", 2.1),
        ]);
        let result = analyze(&indicator);
        assert!(!result.is_cumulative);
    }

    #[test]
    fn flags_percentage_outside_plausible_range() {
        let indicator = Indicator::new("weird-pct", "Weird Percentage Rate").with_samples(vec![
            point("2020-01-01", 500.0),
            point("2020-02-01", 600.0),
            point("2020-03-01", 700.0),
        ]);
        let result = analyze(&indicator);
        assert!(result.magnitude_suspicious);
    }

    #[test]
    fn hyperinflation_exemption_suppresses_magnitude_flag() {
        let indicator =
            Indicator::new("zwe-cpi", "Zimbabwe Hyperinflation Rate").with_samples(vec![
                point("2020-01-01", 5000.0),
                point("2020-02-01", 8000.0),
            ]);
        let result = analyze(&indicator);
        assert!(!result.magnitude_suspicious);
    }

    #[test]
    fn symbolic_dates_excluded_from_analysis() {
        let indicator = Indicator::new("gdp", "GDP").with_samples(vec![
            point("last10YearsAvg", 999.0),
            point("2020-01-01", 10.0),
        ]);
        let result = analyze(&indicator);
        assert!(!result.analyzed);
    }

    #[test]
    fn validation_never_writes_outside_its_own_table() {
        let store = crate::storage::SqliteStore::in_memory().unwrap();
        let gateway = std::sync::Arc::new(crate::llm::Gateway::new(
            std::sync::Arc::new(crate::llm::MockLLMClient::new(vec![])),
            crate::config::RetryConfig::default(),
        ));
        let ctx = StageContext::new(
            store.clone(),
            "exec-1",
            crate::config::Config::default(),
            gateway,
            std::sync::Arc::new(crate::taxonomy::Taxonomy::load_default().unwrap()),
            super::super::CancellationToken::new(),
        );
        let items = vec![Indicator::new("gdp", "GDP").with_samples(vec![
            point("2020-01-01", 1.0),
            point("2020-02-01", 2.0),
        ])];
        run(&items, &ctx).unwrap();
        assert!(store.scan_router_results("exec-1").unwrap().is_empty());
        assert!(store.scan_specialist_results("exec-1").unwrap().is_empty());
    }
}
