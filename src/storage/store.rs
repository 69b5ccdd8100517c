//! Durable, transactional storage for every entity in the data model.
//!
//! Concurrent writers from the same process serialize through a single
//! mutex guarding the connection (`spec.md` §5's "single writer" policy);
//! reads go through the same guard for simplicity since SQLite itself
//! serializes writers regardless.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Error, Result};
use crate::model::{
    Classification, FlagSeverity, FlaggedIndicator, Indicator, OrientationResult,
    PipelineExecution, ReviewAction, ReviewDecision, RouterResult, SamplePoint, SpecialistResult,
    ValidationResult,
};

use super::schema::initialize_schema;

/// A SQLite-backed store. On local deployments this is a single file; the
/// interface (`put`/`get`/`scan_by_execution`/`transaction`) is the same
/// shape a remote SQL-speaking endpoint would expose.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Acquire the write mutex and hand the closure a `&Connection`. Every
    /// public method funnels through here so lock discipline lives in one
    /// place.
    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> Result<T> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| Error::StorageUnavailable("store mutex poisoned".into()))?;
        f(&conn).map_err(Error::from)
    }

    /// Run `f` inside a SQLite transaction, committing on `Ok` and rolling
    /// back on `Err`.
    pub fn transaction<T>(
        &self,
        f: impl FnOnce(&rusqlite::Transaction) -> rusqlite::Result<T>,
    ) -> Result<T> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| Error::StorageUnavailable("store mutex poisoned".into()))?;
        let tx = conn.transaction()?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }

    // ---- source indicators ----------------------------------------------

    pub fn put_indicator(&self, indicator: &Indicator) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO source_indicators
                    (indicator_id, name, units, periodicity, category_group, topic,
                     aggregation_method, scale, currency_code, dataset, description)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT(indicator_id) DO UPDATE SET
                    name=excluded.name, units=excluded.units, periodicity=excluded.periodicity,
                    category_group=excluded.category_group, topic=excluded.topic,
                    aggregation_method=excluded.aggregation_method, scale=excluded.scale,
                    currency_code=excluded.currency_code, dataset=excluded.dataset,
                    description=excluded.description",
                params![
                    indicator.id,
                    indicator.name,
                    indicator.units,
                    indicator.periodicity,
                    indicator.category_group,
                    indicator.topic,
                    indicator.aggregation_method,
                    indicator.scale,
                    indicator.currency_code,
                    indicator.dataset,
                    indicator.description,
                ],
            )?;

            for sample in &indicator.sample_values {
                conn.execute(
                    "INSERT INTO source_country_indicators (indicator_id, date, value)
                     VALUES (?1, ?2, ?3)
                     ON CONFLICT(indicator_id, date) DO UPDATE SET value=excluded.value",
                    params![indicator.id, sample.date, sample.value],
                )?;
            }
            Ok(())
        })
    }

    pub fn get_indicator(&self, indicator_id: &str) -> Result<Option<Indicator>> {
        self.with_conn(|conn| {
            let indicator = conn
                .query_row(
                    "SELECT indicator_id, name, units, periodicity, category_group, topic,
                            aggregation_method, scale, currency_code, dataset, description
                     FROM source_indicators WHERE indicator_id = ?1",
                    [indicator_id],
                    row_to_indicator,
                )
                .optional()?;

            let Some(mut indicator) = indicator else {
                return Ok(None);
            };

            let mut stmt = conn.prepare(
                "SELECT date, value FROM source_country_indicators
                 WHERE indicator_id = ?1 ORDER BY date",
            )?;
            let samples = stmt
                .query_map([indicator_id], |row| {
                    Ok(SamplePoint {
                        date: row.get(0)?,
                        value: row.get(1)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            indicator.sample_values = samples;

            Ok(Some(indicator))
        })
    }

    pub fn list_indicators(&self, limit: Option<usize>) -> Result<Vec<Indicator>> {
        self.with_conn(|conn| {
            let sql = match limit {
                Some(n) => format!(
                    "SELECT indicator_id, name, units, periodicity, category_group, topic,
                            aggregation_method, scale, currency_code, dataset, description
                     FROM source_indicators ORDER BY indicator_id LIMIT {n}"
                ),
                None => "SELECT indicator_id, name, units, periodicity, category_group, topic,
                            aggregation_method, scale, currency_code, dataset, description
                     FROM source_indicators ORDER BY indicator_id"
                    .to_string(),
            };
            let mut stmt = conn.prepare(&sql)?;
            let mut indicators = stmt
                .query_map([], row_to_indicator)?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            for indicator in &mut indicators {
                let mut sample_stmt = conn.prepare(
                    "SELECT date, value FROM source_country_indicators
                     WHERE indicator_id = ?1 ORDER BY date",
                )?;
                indicator.sample_values = sample_stmt
                    .query_map([&indicator.id], |row| {
                        Ok(SamplePoint {
                            date: row.get(0)?,
                            value: row.get(1)?,
                        })
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
            }
            Ok(indicators)
        })
    }

    // ---- router results ---------------------------------------------------

    pub fn put_router_result(&self, execution_id: &str, result: &RouterResult) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO router_results
                    (execution_id, indicator_id, family, confidence_family, reasoning, router_failure, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(execution_id, indicator_id) DO UPDATE SET
                    family=excluded.family, confidence_family=excluded.confidence_family,
                    reasoning=excluded.reasoning, router_failure=excluded.router_failure",
                params![
                    execution_id,
                    result.indicator_id,
                    result.family,
                    result.confidence_family,
                    result.reasoning,
                    result.router_failure,
                    result.created_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_router_result(
        &self,
        execution_id: &str,
        indicator_id: &str,
    ) -> Result<Option<RouterResult>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT indicator_id, family, confidence_family, reasoning, router_failure, created_at
                 FROM router_results WHERE execution_id = ?1 AND indicator_id = ?2",
                params![execution_id, indicator_id],
                row_to_router_result,
            )
            .optional()
        })
    }

    pub fn scan_router_results(&self, execution_id: &str) -> Result<Vec<RouterResult>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT indicator_id, family, confidence_family, reasoning, router_failure, created_at
                 FROM router_results WHERE execution_id = ?1 ORDER BY indicator_id",
            )?;
            stmt.query_map([execution_id], row_to_router_result)?
                .collect()
        })
    }

    // ---- specialist results ------------------------------------------------

    pub fn put_specialist_result(
        &self,
        execution_id: &str,
        result: &SpecialistResult,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO specialist_results
                    (execution_id, indicator_id, family, indicator_type, indicator_category,
                     temporal_aggregation, is_currency_denominated, confidence_cls, reasoning,
                     specialist_failure, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT(execution_id, indicator_id) DO UPDATE SET
                    family=excluded.family, indicator_type=excluded.indicator_type,
                    indicator_category=excluded.indicator_category,
                    temporal_aggregation=excluded.temporal_aggregation,
                    is_currency_denominated=excluded.is_currency_denominated,
                    confidence_cls=excluded.confidence_cls, reasoning=excluded.reasoning,
                    specialist_failure=excluded.specialist_failure",
                params![
                    execution_id,
                    result.indicator_id,
                    result.family,
                    result.indicator_type,
                    result.indicator_category,
                    result.temporal_aggregation,
                    result.is_currency_denominated,
                    result.confidence_cls,
                    result.reasoning,
                    result.specialist_failure,
                    result.created_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_specialist_result(
        &self,
        execution_id: &str,
        indicator_id: &str,
    ) -> Result<Option<SpecialistResult>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT indicator_id, family, indicator_type, indicator_category,
                        temporal_aggregation, is_currency_denominated, confidence_cls, reasoning,
                        specialist_failure, created_at
                 FROM specialist_results WHERE execution_id = ?1 AND indicator_id = ?2",
                params![execution_id, indicator_id],
                row_to_specialist_result,
            )
            .optional()
        })
    }

    pub fn scan_specialist_results(&self, execution_id: &str) -> Result<Vec<SpecialistResult>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT indicator_id, family, indicator_type, indicator_category,
                        temporal_aggregation, is_currency_denominated, confidence_cls, reasoning,
                        specialist_failure, created_at
                 FROM specialist_results WHERE execution_id = ?1 ORDER BY indicator_id",
            )?;
            stmt.query_map([execution_id], row_to_specialist_result)?
                .collect()
        })
    }

    // ---- validation results -------------------------------------------------

    pub fn put_validation_result(
        &self,
        execution_id: &str,
        result: &ValidationResult,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO validation_results
                    (execution_id, indicator_id, is_cumulative, cumulative_confidence,
                     suggested_temporal, validation_reasoning, analyzed, magnitude_suspicious, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(execution_id, indicator_id) DO UPDATE SET
                    is_cumulative=excluded.is_cumulative,
                    cumulative_confidence=excluded.cumulative_confidence,
                    suggested_temporal=excluded.suggested_temporal,
                    validation_reasoning=excluded.validation_reasoning,
                    analyzed=excluded.analyzed,
                    magnitude_suspicious=excluded.magnitude_suspicious",
                params![
                    execution_id,
                    result.indicator_id,
                    result.is_cumulative,
                    result.cumulative_confidence,
                    result.suggested_temporal,
                    result.validation_reasoning,
                    result.analyzed,
                    result.magnitude_suspicious,
                    result.created_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_validation_result(
        &self,
        execution_id: &str,
        indicator_id: &str,
    ) -> Result<Option<ValidationResult>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT indicator_id, is_cumulative, cumulative_confidence, suggested_temporal,
                        validation_reasoning, analyzed, magnitude_suspicious, created_at
                 FROM validation_results WHERE execution_id = ?1 AND indicator_id = ?2",
                params![execution_id, indicator_id],
                row_to_validation_result,
            )
            .optional()
        })
    }

    pub fn scan_validation_results(&self, execution_id: &str) -> Result<Vec<ValidationResult>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT indicator_id, is_cumulative, cumulative_confidence, suggested_temporal,
                        validation_reasoning, analyzed, magnitude_suspicious, created_at
                 FROM validation_results WHERE execution_id = ?1 ORDER BY indicator_id",
            )?;
            stmt.query_map([execution_id], row_to_validation_result)?.collect()
        })
    }

    // ---- orientation results ------------------------------------------------

    pub fn put_orientation_result(
        &self,
        execution_id: &str,
        result: &OrientationResult,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO orientation_results
                    (execution_id, indicator_id, heat_map_orientation, confidence_orient, reasoning, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(execution_id, indicator_id) DO UPDATE SET
                    heat_map_orientation=excluded.heat_map_orientation,
                    confidence_orient=excluded.confidence_orient, reasoning=excluded.reasoning",
                params![
                    execution_id,
                    result.indicator_id,
                    result.heat_map_orientation,
                    result.confidence_orient,
                    result.reasoning,
                    result.created_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_orientation_result(
        &self,
        execution_id: &str,
        indicator_id: &str,
    ) -> Result<Option<OrientationResult>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT indicator_id, heat_map_orientation, confidence_orient, reasoning, created_at
                 FROM orientation_results WHERE execution_id = ?1 AND indicator_id = ?2",
                params![execution_id, indicator_id],
                row_to_orientation_result,
            )
            .optional()
        })
    }

    pub fn scan_orientation_results(&self, execution_id: &str) -> Result<Vec<OrientationResult>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT indicator_id, heat_map_orientation, confidence_orient, reasoning, created_at
                 FROM orientation_results WHERE execution_id = ?1 ORDER BY indicator_id",
            )?;
            stmt.query_map([execution_id], row_to_orientation_result)?.collect()
        })
    }

    // ---- flagging -----------------------------------------------------------

    pub fn put_flag(&self, execution_id: &str, flag: &FlaggedIndicator) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO flagging_results
                    (execution_id, indicator_id, flag_type, flag_reason, current_value,
                     expected_value, severity, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    execution_id,
                    flag.indicator_id,
                    flag.flag_type,
                    flag.flag_reason,
                    flag.current_value,
                    flag.expected_value,
                    severity_to_str(flag.severity),
                    flag.created_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
    }

    pub fn scan_flags(&self, execution_id: &str) -> Result<Vec<FlaggedIndicator>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT indicator_id, flag_type, flag_reason, current_value, expected_value,
                        severity, created_at
                 FROM flagging_results WHERE execution_id = ?1 ORDER BY indicator_id",
            )?;
            stmt.query_map([execution_id], row_to_flag)?.collect()
        })
    }

    // ---- review ---------------------------------------------------------

    pub fn put_review_decision(&self, execution_id: &str, decision: &ReviewDecision) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO review_decisions
                    (execution_id, indicator_id, action, target_field, old_value, new_value,
                     reasoning, confidence, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    execution_id,
                    decision.indicator_id,
                    action_to_str(decision.action),
                    decision.target_field,
                    decision.old_value,
                    decision.new_value,
                    decision.reasoning,
                    decision.confidence,
                    decision.created_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
    }

    pub fn scan_review_decisions(&self, execution_id: &str) -> Result<Vec<ReviewDecision>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT indicator_id, action, target_field, old_value, new_value, reasoning,
                        confidence, created_at
                 FROM review_decisions WHERE execution_id = ?1 ORDER BY indicator_id",
            )?;
            stmt.query_map([execution_id], row_to_review_decision)?
                .collect()
        })
    }

    // ---- classifications --------------------------------------------------

    pub fn put_classification(&self, classification: &Classification) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO classifications
                    (execution_id, indicator_id, family, indicator_type, temporal_aggregation,
                     is_currency_denominated, heat_map_orientation, confidence_family,
                     confidence_cls, confidence_orient, excluded, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                 ON CONFLICT(execution_id, indicator_id) DO UPDATE SET
                    family=excluded.family, indicator_type=excluded.indicator_type,
                    temporal_aggregation=excluded.temporal_aggregation,
                    is_currency_denominated=excluded.is_currency_denominated,
                    heat_map_orientation=excluded.heat_map_orientation,
                    confidence_family=excluded.confidence_family,
                    confidence_cls=excluded.confidence_cls,
                    confidence_orient=excluded.confidence_orient,
                    excluded=excluded.excluded",
                params![
                    classification.execution_id,
                    classification.indicator_id,
                    classification.family,
                    classification.indicator_type,
                    classification.temporal_aggregation,
                    classification.is_currency_denominated,
                    classification.heat_map_orientation,
                    classification.confidence_family,
                    classification.confidence_cls,
                    classification.confidence_orient,
                    classification.excluded,
                    classification.created_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_classification(
        &self,
        execution_id: &str,
        indicator_id: &str,
    ) -> Result<Option<Classification>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT execution_id, indicator_id, family, indicator_type, temporal_aggregation,
                        is_currency_denominated, heat_map_orientation, confidence_family,
                        confidence_cls, confidence_orient, excluded, created_at
                 FROM classifications WHERE execution_id = ?1 AND indicator_id = ?2",
                params![execution_id, indicator_id],
                row_to_classification,
            )
            .optional()
        })
    }

    pub fn scan_classifications(&self, execution_id: &str) -> Result<Vec<Classification>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT execution_id, indicator_id, family, indicator_type, temporal_aggregation,
                        is_currency_denominated, heat_map_orientation, confidence_family,
                        confidence_cls, confidence_orient, excluded, created_at
                 FROM classifications WHERE execution_id = ?1 ORDER BY indicator_id",
            )?;
            stmt.query_map([execution_id], row_to_classification)?
                .collect()
        })
    }

    // ---- pipeline execution telemetry --------------------------------------

    pub fn start_execution(&self, execution_id: &str, dry_run: bool) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO pipeline_executions (execution_id, started_at, dry_run)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(execution_id) DO NOTHING",
                params![execution_id, Utc::now().to_rfc3339(), dry_run],
            )?;
            Ok(())
        })
    }

    pub fn finish_execution(
        &self,
        execution_id: &str,
        api_calls: u64,
        input_tokens: u64,
        output_tokens: u64,
        cost_estimate: f64,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE pipeline_executions SET
                    finished_at = ?2, api_calls = ?3, input_tokens = ?4, output_tokens = ?5,
                    cost_estimate = ?6
                 WHERE execution_id = ?1",
                params![
                    execution_id,
                    Utc::now().to_rfc3339(),
                    api_calls,
                    input_tokens,
                    output_tokens,
                    cost_estimate,
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_execution(&self, execution_id: &str) -> Result<Option<PipelineExecution>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT execution_id, started_at, finished_at, dry_run, api_calls, input_tokens,
                        output_tokens, cost_estimate
                 FROM pipeline_executions WHERE execution_id = ?1",
                [execution_id],
                |row| {
                    let started_at: String = row.get(1)?;
                    let finished_at: Option<String> = row.get(2)?;
                    Ok(PipelineExecution {
                        execution_id: row.get(0)?,
                        started_at: chrono::DateTime::parse_from_rfc3339(&started_at)
                            .unwrap()
                            .with_timezone(&Utc),
                        finished_at: finished_at.map(|s| {
                            chrono::DateTime::parse_from_rfc3339(&s).unwrap().with_timezone(&Utc)
                        }),
                        dry_run: row.get(3)?,
                        stage_counts: std::collections::HashMap::new(),
                        api_calls: row.get(4)?,
                        input_tokens: row.get(5)?,
                        output_tokens: row.get(6)?,
                        cost_estimate: row.get(7)?,
                    })
                },
            )
            .optional()
        })
    }
}

fn severity_to_str(severity: FlagSeverity) -> &'static str {
    match severity {
        FlagSeverity::Info => "info",
        FlagSeverity::Warn => "warn",
        FlagSeverity::Block => "block",
    }
}

fn severity_from_str(value: &str) -> FlagSeverity {
    match value {
        "warn" => FlagSeverity::Warn,
        "block" => FlagSeverity::Block,
        _ => FlagSeverity::Info,
    }
}

fn action_to_str(action: ReviewAction) -> &'static str {
    match action {
        ReviewAction::Accept => "accept",
        ReviewAction::Fix => "fix",
        ReviewAction::Escalate => "escalate",
    }
}

fn action_from_str(value: &str) -> ReviewAction {
    match value {
        "fix" => ReviewAction::Fix,
        "escalate" => ReviewAction::Escalate,
        _ => ReviewAction::Accept,
    }
}

fn parse_timestamp(value: &str) -> chrono::DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn row_to_indicator(row: &rusqlite::Row) -> rusqlite::Result<Indicator> {
    Ok(Indicator {
        id: row.get(0)?,
        name: row.get(1)?,
        units: row.get(2)?,
        periodicity: row.get(3)?,
        category_group: row.get(4)?,
        topic: row.get(5)?,
        aggregation_method: row.get(6)?,
        scale: row.get(7)?,
        currency_code: row.get(8)?,
        dataset: row.get(9)?,
        description: row.get(10)?,
        sample_values: Vec::new(),
    })
}

fn row_to_router_result(row: &rusqlite::Row) -> rusqlite::Result<RouterResult> {
    let created_at: String = row.get(5)?;
    Ok(RouterResult {
        indicator_id: row.get(0)?,
        family: row.get(1)?,
        confidence_family: row.get(2)?,
        reasoning: row.get(3)?,
        router_failure: row.get(4)?,
        created_at: parse_timestamp(&created_at),
    })
}

fn row_to_specialist_result(row: &rusqlite::Row) -> rusqlite::Result<SpecialistResult> {
    let created_at: String = row.get(9)?;
    Ok(SpecialistResult {
        indicator_id: row.get(0)?,
        family: row.get(1)?,
        indicator_type: row.get(2)?,
        indicator_category: row.get(3)?,
        temporal_aggregation: row.get(4)?,
        is_currency_denominated: row.get(5)?,
        confidence_cls: row.get(6)?,
        reasoning: row.get(7)?,
        specialist_failure: row.get(8)?,
        created_at: parse_timestamp(&created_at),
    })
}

fn row_to_validation_result(row: &rusqlite::Row) -> rusqlite::Result<ValidationResult> {
    let created_at: String = row.get(7)?;
    Ok(ValidationResult {
        indicator_id: row.get(0)?,
        is_cumulative: row.get(1)?,
        cumulative_confidence: row.get(2)?,
        suggested_temporal: row.get(3)?,
        validation_reasoning: row.get(4)?,
        analyzed: row.get(5)?,
        magnitude_suspicious: row.get(6)?,
        created_at: parse_timestamp(&created_at),
    })
}

fn row_to_orientation_result(row: &rusqlite::Row) -> rusqlite::Result<OrientationResult> {
    let created_at: String = row.get(4)?;
    Ok(OrientationResult {
        indicator_id: row.get(0)?,
        heat_map_orientation: row.get(1)?,
        confidence_orient: row.get(2)?,
        reasoning: row.get(3)?,
        created_at: parse_timestamp(&created_at),
    })
}

fn row_to_flag(row: &rusqlite::Row) -> rusqlite::Result<FlaggedIndicator> {
    let severity: String = row.get(5)?;
    let created_at: String = row.get(6)?;
    Ok(FlaggedIndicator {
        indicator_id: row.get(0)?,
        flag_type: row.get(1)?,
        flag_reason: row.get(2)?,
        current_value: row.get(3)?,
        expected_value: row.get(4)?,
        severity: severity_from_str(&severity),
        created_at: parse_timestamp(&created_at),
    })
}

fn row_to_review_decision(row: &rusqlite::Row) -> rusqlite::Result<ReviewDecision> {
    let action: String = row.get(1)?;
    let created_at: String = row.get(7)?;
    Ok(ReviewDecision {
        indicator_id: row.get(0)?,
        action: action_from_str(&action),
        target_field: row.get(2)?,
        old_value: row.get(3)?,
        new_value: row.get(4)?,
        reasoning: row.get(5)?,
        confidence: row.get(6)?,
        created_at: parse_timestamp(&created_at),
    })
}

fn row_to_classification(row: &rusqlite::Row) -> rusqlite::Result<Classification> {
    let created_at: String = row.get(11)?;
    Ok(Classification {
        execution_id: row.get(0)?,
        indicator_id: row.get(1)?,
        family: row.get(2)?,
        indicator_type: row.get(3)?,
        temporal_aggregation: row.get(4)?,
        is_currency_denominated: row.get(5)?,
        heat_map_orientation: row.get(6)?,
        confidence_family: row.get(7)?,
        confidence_cls: row.get(8)?,
        confidence_orient: row.get(9)?,
        excluded: row.get(10)?,
        created_at: parse_timestamp(&created_at),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_indicator() -> Indicator {
        Indicator::new("gdp-us", "Gross Domestic Product")
            .with_units("USD")
            .with_samples(vec![
                SamplePoint { date: "2020-01-01".into(), value: 21000.0 },
                SamplePoint { date: "2020-04-01".into(), value: 21500.0 },
            ])
    }

    #[test]
    fn round_trips_an_indicator() {
        let store = SqliteStore::in_memory().unwrap();
        store.put_indicator(&sample_indicator()).unwrap();
        let fetched = store.get_indicator("gdp-us").unwrap().unwrap();
        assert_eq!(fetched.name, "Gross Domestic Product");
        assert_eq!(fetched.sample_values.len(), 2);
    }

    #[test]
    fn upsert_is_idempotent() {
        let store = SqliteStore::in_memory().unwrap();
        let execution_id = "exec-1";
        let result = RouterResult {
            indicator_id: "gdp-us".into(),
            family: "physical-fundamental".into(),
            confidence_family: 0.9,
            reasoning: None,
            router_failure: false,
            created_at: Utc::now(),
        };
        store.put_router_result(execution_id, &result).unwrap();
        store.put_router_result(execution_id, &result).unwrap();

        let rows = store.scan_router_results(execution_id).unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn missing_row_is_none() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.get_indicator("nope").unwrap().is_none());
    }

    #[test]
    fn opens_and_survives_reopen_on_a_real_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("econ-classify.sqlite3");
        let path_str = path.to_str().unwrap();

        {
            let store = SqliteStore::open(path_str).unwrap();
            store.put_indicator(&sample_indicator()).unwrap();
        }

        let reopened = SqliteStore::open(path_str).unwrap();
        let fetched = reopened.get_indicator("gdp-us").unwrap().unwrap();
        assert_eq!(fetched.sample_values.len(), 2);
    }
}
