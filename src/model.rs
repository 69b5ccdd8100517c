//! The entities from the data model: `Indicator` and the per-stage result
//! rows that accumulate into a final `Classification`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An observed `(date, value)` pair, or a symbolic summary token
/// (`last10YearsAvg`, `last10YearsPeerAvg`) that must be filtered out
/// before time-series analysis.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SamplePoint {
    pub date: String,
    pub value: f64,
}

impl SamplePoint {
    /// True if `date` is a symbolic summary token rather than an ISO date.
    pub fn is_symbolic(&self) -> bool {
        !self.date.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false)
    }
}

/// Input indicator. Immutable during a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Indicator {
    pub id: String,
    pub name: String,
    pub units: Option<String>,
    pub periodicity: Option<String>,
    pub category_group: Option<String>,
    pub topic: Option<String>,
    pub aggregation_method: Option<String>,
    pub scale: Option<String>,
    pub currency_code: Option<String>,
    pub dataset: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub sample_values: Vec<SamplePoint>,
}

impl Indicator {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            units: None,
            periodicity: None,
            category_group: None,
            topic: None,
            aggregation_method: None,
            scale: None,
            currency_code: None,
            dataset: None,
            description: None,
            sample_values: Vec::new(),
        }
    }

    pub fn with_units(mut self, units: impl Into<String>) -> Self {
        self.units = Some(units.into());
        self
    }

    pub fn with_currency_code(mut self, code: impl Into<String>) -> Self {
        self.currency_code = Some(code.into());
        self
    }

    pub fn with_periodicity(mut self, periodicity: impl Into<String>) -> Self {
        self.periodicity = Some(periodicity.into());
        self
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn with_samples(mut self, samples: Vec<SamplePoint>) -> Self {
        self.sample_values = samples;
        self
    }

    /// Numeric samples, in date order, with symbolic summary tokens
    /// filtered out (`spec.md` §9).
    pub fn numeric_samples_sorted(&self) -> Vec<&SamplePoint> {
        let mut points: Vec<&SamplePoint> =
            self.sample_values.iter().filter(|p| !p.is_symbolic()).collect();
        points.sort_by(|a, b| a.date.cmp(&b.date));
        points
    }
}

/// The seven top-level families an indicator can be routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Family {
    PhysicalFundamental,
    NumericMeasurement,
    PriceValue,
    ChangeMovement,
    CompositeDerived,
    Temporal,
    Qualitative,
}

impl Family {
    pub fn as_str(&self) -> &'static str {
        match self {
            Family::PhysicalFundamental => "physical-fundamental",
            Family::NumericMeasurement => "numeric-measurement",
            Family::PriceValue => "price-value",
            Family::ChangeMovement => "change-movement",
            Family::CompositeDerived => "composite-derived",
            Family::Temporal => "temporal",
            Family::Qualitative => "qualitative",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "physical-fundamental" => Family::PhysicalFundamental,
            "numeric-measurement" => Family::NumericMeasurement,
            "price-value" => Family::PriceValue,
            "change-movement" => Family::ChangeMovement,
            "composite-derived" => Family::CompositeDerived,
            "temporal" => Family::Temporal,
            "qualitative" => Family::Qualitative,
            _ => return None,
        })
    }

    pub fn all() -> [Family; 7] {
        [
            Family::PhysicalFundamental,
            Family::NumericMeasurement,
            Family::PriceValue,
            Family::ChangeMovement,
            Family::CompositeDerived,
            Family::Temporal,
            Family::Qualitative,
        ]
    }
}

impl std::fmt::Display for Family {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// `RouterResult`: `{indicator_id, family, confidence_family, reasoning?, created_at}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterResult {
    pub indicator_id: String,
    pub family: String,
    pub confidence_family: f64,
    pub reasoning: Option<String>,
    pub router_failure: bool,
    pub created_at: DateTime<Utc>,
}

/// `SpecialistResult`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecialistResult {
    pub indicator_id: String,
    pub family: String,
    pub indicator_type: String,
    pub indicator_category: Option<String>,
    pub temporal_aggregation: String,
    pub is_currency_denominated: bool,
    pub confidence_cls: f64,
    pub reasoning: Option<String>,
    pub specialist_failure: bool,
    pub created_at: DateTime<Utc>,
}

/// `ValidationResult`, produced locally from `sample_values` alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub indicator_id: String,
    pub is_cumulative: bool,
    pub cumulative_confidence: f64,
    pub suggested_temporal: Option<String>,
    pub validation_reasoning: String,
    pub analyzed: bool,
    /// True when the magnitude-consistency check (`spec.md` §4.4) flagged
    /// this series as implausible for its apparent declared kind.
    pub magnitude_suspicious: bool,
    pub created_at: DateTime<Utc>,
}

/// `OrientationResult`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrientationResult {
    pub indicator_id: String,
    pub heat_map_orientation: String,
    pub confidence_orient: f64,
    pub reasoning: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Severity of a flag raised against a candidate classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagSeverity {
    Info,
    Warn,
    Block,
}

/// `FlaggedIndicator`, produced by rule evaluation only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlaggedIndicator {
    pub indicator_id: String,
    pub flag_type: String,
    pub flag_reason: String,
    pub current_value: Option<String>,
    pub expected_value: Option<String>,
    pub severity: FlagSeverity,
    pub created_at: DateTime<Utc>,
}

/// The action a `ReviewDecision` can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewAction {
    Accept,
    Fix,
    Escalate,
}

/// `ReviewDecision`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewDecision {
    pub indicator_id: String,
    pub action: ReviewAction,
    pub target_field: Option<String>,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub reasoning: String,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
}

/// The final, merged classification row for one indicator under one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub execution_id: String,
    pub indicator_id: String,
    pub family: String,
    pub indicator_type: String,
    pub temporal_aggregation: String,
    pub is_currency_denominated: bool,
    pub heat_map_orientation: String,
    pub confidence_family: f64,
    pub confidence_cls: f64,
    pub confidence_orient: f64,
    pub excluded: bool,
    pub created_at: DateTime<Utc>,
}

/// Explicit carrier for an item that exhausted its retry budget at some
/// stage (`spec.md` §4.7 point 4, §7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedIndicator {
    pub indicator_id: String,
    pub error: String,
    pub retries: u32,
}

/// Uniform per-item outcome used by Router, Specialist, and Orientation so
/// the Batch Executor's retry/fallback logic stays stage-agnostic.
#[derive(Debug, Clone)]
pub enum StageOutcome<T> {
    Accepted(T),
    Failed(FailedIndicator),
}

/// `PipelineExecution` telemetry record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineExecution {
    pub execution_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub dry_run: bool,
    pub stage_counts: std::collections::HashMap<String, StageSummary>,
    pub api_calls: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_estimate: f64,
}

/// Per-stage summary: "processed / successful / failed / flagged / reviewed
/// / fixed / escalated / elapsed / api-calls / tokens / estimated-cost".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageSummary {
    pub processed: u64,
    pub successful: u64,
    pub failed: u64,
    pub flagged: u64,
    pub reviewed: u64,
    pub fixed: u64,
    pub escalated: u64,
    pub elapsed_ms: u64,
    pub api_calls: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub estimated_cost: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbolic_dates_are_filtered_out() {
        let indicator = Indicator::new("i1", "Test").with_samples(vec![
            SamplePoint { date: "2020-01-01".into(), value: 1.0 },
            SamplePoint { date: "last10YearsAvg".into(), value: 999.0 },
            SamplePoint { date: "2019-01-01".into(), value: 0.5 },
        ]);
        let sorted = indicator.numeric_samples_sorted();
        assert_eq!(sorted.len(), 2);
        assert_eq!(sorted[0].date, "2019-01-01");
        assert_eq!(sorted[1].date, "2020-01-01");
    }

    #[test]
    fn family_round_trips_through_str() {
        for family in Family::all() {
            assert_eq!(Family::parse(family.as_str()), Some(family));
        }
    }
}
