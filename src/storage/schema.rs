//! Idempotent DDL, versioned so schema evolution is safe to re-apply.

use rusqlite::Connection;

use crate::error::Result;

/// Current schema version. Bump and add a new `apply_vN_schema` when the
/// schema changes; `initialize_schema` applies every version in order.
pub const SCHEMA_VERSION: i64 = 1;

pub fn initialize_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA foreign_keys=ON;",
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER NOT NULL
        )",
        [],
    )?;

    let current = get_schema_version(conn)?;
    if current < 1 {
        apply_v1_schema(conn)?;
        bump_version(conn, 1)?;
    }

    Ok(())
}

fn bump_version(conn: &Connection, version: i64) -> Result<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}

pub fn get_schema_version(conn: &Connection) -> Result<i64> {
    let version: Option<i64> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .ok();
    Ok(version.unwrap_or(0))
}

pub fn is_initialized(conn: &Connection) -> Result<bool> {
    Ok(get_schema_version(conn)? >= SCHEMA_VERSION)
}

fn apply_v1_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS source_indicators (
            indicator_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            units TEXT,
            periodicity TEXT,
            category_group TEXT,
            topic TEXT,
            aggregation_method TEXT,
            scale TEXT,
            currency_code TEXT,
            dataset TEXT,
            description TEXT
        );

        CREATE TABLE IF NOT EXISTS source_country_indicators (
            indicator_id TEXT NOT NULL,
            date TEXT NOT NULL,
            value REAL NOT NULL,
            PRIMARY KEY (indicator_id, date),
            FOREIGN KEY (indicator_id) REFERENCES source_indicators(indicator_id)
        );

        CREATE TABLE IF NOT EXISTS router_results (
            execution_id TEXT NOT NULL,
            indicator_id TEXT NOT NULL,
            family TEXT NOT NULL,
            confidence_family REAL NOT NULL,
            reasoning TEXT,
            router_failure INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            PRIMARY KEY (execution_id, indicator_id)
        );

        CREATE TABLE IF NOT EXISTS specialist_results (
            execution_id TEXT NOT NULL,
            indicator_id TEXT NOT NULL,
            family TEXT NOT NULL,
            indicator_type TEXT NOT NULL,
            indicator_category TEXT,
            temporal_aggregation TEXT NOT NULL,
            is_currency_denominated INTEGER NOT NULL,
            confidence_cls REAL NOT NULL,
            reasoning TEXT,
            specialist_failure INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            PRIMARY KEY (execution_id, indicator_id)
        );

        CREATE TABLE IF NOT EXISTS validation_results (
            execution_id TEXT NOT NULL,
            indicator_id TEXT NOT NULL,
            is_cumulative INTEGER NOT NULL,
            cumulative_confidence REAL NOT NULL,
            suggested_temporal TEXT,
            validation_reasoning TEXT NOT NULL,
            analyzed INTEGER NOT NULL,
            magnitude_suspicious INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            PRIMARY KEY (execution_id, indicator_id)
        );

        CREATE TABLE IF NOT EXISTS orientation_results (
            execution_id TEXT NOT NULL,
            indicator_id TEXT NOT NULL,
            heat_map_orientation TEXT NOT NULL,
            confidence_orient REAL NOT NULL,
            reasoning TEXT,
            created_at TEXT NOT NULL,
            PRIMARY KEY (execution_id, indicator_id)
        );

        CREATE TABLE IF NOT EXISTS flagging_results (
            execution_id TEXT NOT NULL,
            indicator_id TEXT NOT NULL,
            flag_type TEXT NOT NULL,
            flag_reason TEXT NOT NULL,
            current_value TEXT,
            expected_value TEXT,
            severity TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS review_decisions (
            execution_id TEXT NOT NULL,
            indicator_id TEXT NOT NULL,
            action TEXT NOT NULL,
            target_field TEXT,
            old_value TEXT,
            new_value TEXT,
            reasoning TEXT NOT NULL,
            confidence REAL NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS classifications (
            execution_id TEXT NOT NULL,
            indicator_id TEXT NOT NULL,
            family TEXT NOT NULL,
            indicator_type TEXT NOT NULL,
            temporal_aggregation TEXT NOT NULL,
            is_currency_denominated INTEGER NOT NULL,
            heat_map_orientation TEXT NOT NULL,
            confidence_family REAL NOT NULL,
            confidence_cls REAL NOT NULL,
            confidence_orient REAL NOT NULL,
            excluded INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            PRIMARY KEY (execution_id, indicator_id)
        );

        CREATE TABLE IF NOT EXISTS pipeline_executions (
            execution_id TEXT PRIMARY KEY,
            started_at TEXT NOT NULL,
            finished_at TEXT,
            dry_run INTEGER NOT NULL,
            api_calls INTEGER NOT NULL DEFAULT 0,
            input_tokens INTEGER NOT NULL DEFAULT 0,
            output_tokens INTEGER NOT NULL DEFAULT 0,
            cost_estimate REAL NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_router_execution ON router_results(execution_id);
        CREATE INDEX IF NOT EXISTS idx_specialist_execution ON specialist_results(execution_id);
        CREATE INDEX IF NOT EXISTS idx_validation_execution ON validation_results(execution_id);
        CREATE INDEX IF NOT EXISTS idx_orientation_execution ON orientation_results(execution_id);
        CREATE INDEX IF NOT EXISTS idx_flagging_execution ON flagging_results(execution_id);
        CREATE INDEX IF NOT EXISTS idx_review_execution ON review_decisions(execution_id);
        CREATE INDEX IF NOT EXISTS idx_classifications_execution ON classifications(execution_id);
        ",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idempotent_initialization() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        initialize_schema(&conn).unwrap();
        assert!(is_initialized(&conn).unwrap());
    }

    #[test]
    fn tables_exist_after_init() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type='table' AND name='classifications'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }
}
