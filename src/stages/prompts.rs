//! Prompt/Schema Registry (`spec.md` §2 point 2): a static, versioned
//! mapping from stage name (and, for Specialist, family) to system prompt
//! text, response schema, and input projection. Treated as data the stage
//! workers consult, not business logic in its own right.

use serde_json::{json, Value};

use crate::llm::{confidence_field, FieldSpec, FieldType};
use crate::model::{Family, Indicator};

/// Registry version. Bumped whenever a prompt or schema changes in a way
/// that would invalidate cached/replayed responses.
pub const REGISTRY_VERSION: u32 = 1;

pub const ROUTER_SYSTEM_PROMPT: &str = "\
You are an economic data classification specialist. For each indicator in \
the batch, assign exactly one family from this closed set:\n\
- physical-fundamental: stocks, flows, and balances of real economic quantities (debt, reserves, trade flows).\n\
- numeric-measurement: counts, volumes, percentages, ratios, shares, and index levels.\n\
- price-value: prices, yields, and exchange rates.\n\
- change-movement: rates of change, growth, and spreads.\n\
- composite-derived: composite indices built from multiple underlying series.\n\
- temporal: durations and lags.\n\
- qualitative: anything that does not fit the above, or that you cannot confidently classify.\n\
Respond with a JSON array. Each element must include the indicator_id you were given, \
the chosen family, a confidence_family between 0 and 1, and an optional one-sentence reasoning.";

pub fn router_response_fields() -> Vec<FieldSpec> {
    vec![
        FieldSpec::required("indicator_id", FieldType::String),
        FieldSpec::required(
            "family",
            FieldType::Enum(Family::all().iter().map(|f| f.as_str().to_string()).collect()),
        ),
        confidence_field("confidence_family"),
        FieldSpec::optional("reasoning", FieldType::String),
    ]
}

/// Project an indicator to the router's input shape: name and metadata,
/// explicitly no sample values (`spec.md` §4.2).
pub fn project_for_router(indicator: &Indicator) -> String {
    let mut parts = vec![format!("name=\"{}\"", indicator.name)];
    if let Some(units) = &indicator.units {
        parts.push(format!("units=\"{units}\""));
    }
    if let Some(topic) = &indicator.topic {
        parts.push(format!("topic=\"{topic}\""));
    }
    if let Some(category) = &indicator.category_group {
        parts.push(format!("category_group=\"{category}\""));
    }
    if let Some(dataset) = &indicator.dataset {
        parts.push(format!("dataset=\"{dataset}\""));
    }
    parts.join(", ")
}

/// Per-family specialist system prompt fragment. Each family sees its own
/// restricted `indicator_type` enumeration and its own framing of why
/// certain fields matter (`spec.md` §4.3).
pub fn specialist_system_prompt(family: Family, indicator_types: &[String]) -> String {
    let type_list = indicator_types.join(", ");
    let framing = match family {
        Family::PhysicalFundamental => {
            "Distinguish a point-in-time stock (e.g. total external debt outstanding) from a \
             period flow (e.g. exports during a quarter) from a balance (net of two flows)."
        }
        Family::NumericMeasurement => {
            "Distinguish raw counts and volumes from percentages, ratios, shares, and index \
             levels. A percentage or ratio describes a relationship, not an accumulation."
        }
        Family::PriceValue => {
            "currency_code is especially informative here: a price or yield is almost always \
             quoted in a specific currency or basis points, and is a point-in-time snapshot."
        }
        Family::ChangeMovement => {
            "units and the presence of a '%' sign are especially informative here: a rate \
             describes movement over a period, not a level."
        }
        Family::CompositeDerived => {
            "Composite and index indicator_types aggregate multiple underlying series; look \
             for a named index or wide-coverage description."
        }
        Family::Temporal => "Durations and lags describe elapsed time, not an economic quantity.",
        Family::Qualitative => {
            "Use this family's single qualitative indicator_type only when no other family fits."
        }
    };
    format!(
        "You are the {family} specialist in an economic indicator classification pipeline. \
         For each indicator, choose exactly one indicator_type from {{{type_list}}}, the \
         temporal_aggregation that best describes how its values accumulate, and whether it is \
         denominated in a currency. {framing} Respond with a JSON array; each element must \
         include the indicator_id you were given, indicator_type, temporal_aggregation, \
         is_currency_denominated, confidence_cls between 0 and 1, and an optional reasoning."
    )
}

pub fn specialist_response_fields(indicator_types: &[String]) -> Vec<FieldSpec> {
    vec![
        FieldSpec::required("indicator_id", FieldType::String),
        FieldSpec::required("indicator_type", FieldType::Enum(indicator_types.to_vec())),
        FieldSpec::required(
            "temporal_aggregation",
            FieldType::Enum(vec![
                "point-in-time".to_string(),
                "period-rate".to_string(),
                "period-cumulative".to_string(),
                "period-average".to_string(),
                "period-total".to_string(),
                "not-applicable".to_string(),
            ]),
        ),
        FieldSpec::required("is_currency_denominated", FieldType::Boolean),
        confidence_field("confidence_cls"),
        FieldSpec::optional("reasoning", FieldType::String),
    ]
}

/// Per-family input projection: each specialist emphasizes different
/// fields (`spec.md` §4.3: price-value sees `currency_code` prominently;
/// change-movement sees `units`/`%` hints).
pub fn project_for_specialist(family: Family, indicator: &Indicator) -> Value {
    let mut obj = json!({
        "name": indicator.name,
        "units": indicator.units,
    });
    let map = obj.as_object_mut().expect("constructed as object");
    match family {
        Family::PriceValue => {
            map.insert("currency_code".into(), json!(indicator.currency_code));
        }
        Family::ChangeMovement => {
            map.insert("periodicity".into(), json!(indicator.periodicity));
        }
        Family::PhysicalFundamental => {
            map.insert("aggregation_method".into(), json!(indicator.aggregation_method));
            map.insert("scale".into(), json!(indicator.scale));
        }
        Family::CompositeDerived => {
            map.insert("topic".into(), json!(indicator.topic));
            map.insert("category_group".into(), json!(indicator.category_group));
        }
        Family::NumericMeasurement | Family::Temporal | Family::Qualitative => {
            map.insert("description".into(), json!(indicator.description));
        }
    }
    obj
}

pub const ORIENTATION_SYSTEM_PROMPT: &str = "\
You classify economic indicators by heat-map orientation: whether a reader should see higher \
values as positive, lower values as positive, or neither (neutral). For example, GDP growth is \
higher-is-positive; an unemployment rate is lower-is-positive; an FX rate is usually neutral \
because direction of 'good' depends on the observer. Respond with a JSON array; each element \
must include the indicator_id you were given, heat_map_orientation, confidence_orient between 0 \
and 1, and an optional reasoning.";

pub fn orientation_response_fields() -> Vec<FieldSpec> {
    vec![
        FieldSpec::required("indicator_id", FieldType::String),
        FieldSpec::required(
            "heat_map_orientation",
            FieldType::Enum(vec![
                "higher-is-positive".to_string(),
                "lower-is-positive".to_string(),
                "neutral".to_string(),
            ]),
        ),
        confidence_field("confidence_orient"),
        FieldSpec::optional("reasoning", FieldType::String),
    ]
}

pub const REVIEW_SYSTEM_PROMPT: &str = "\
You are the second-pass reviewer for a flagged economic indicator classification. You are given \
the candidate classification, the reasons it was flagged, and the independent time-series \
validation result. Decide one action: accept the candidate unchanged, fix exactly one named \
field with a new_value, or escalate for human review when you are not confident enough to \
decide. Respond with a JSON array; each element must include the indicator_id you were given, \
action (accept|fix|escalate), target_field and new_value (only when action is fix), a \
one-sentence reasoning, and confidence between 0 and 1.";

pub fn review_response_fields() -> Vec<FieldSpec> {
    vec![
        FieldSpec::required("indicator_id", FieldType::String),
        FieldSpec::required(
            "action",
            FieldType::Enum(vec!["accept".to_string(), "fix".to_string(), "escalate".to_string()]),
        ),
        FieldSpec::optional("target_field", FieldType::String),
        FieldSpec::optional("new_value", FieldType::String),
        FieldSpec::required("reasoning", FieldType::String),
        confidence_field("confidence"),
    ]
}
