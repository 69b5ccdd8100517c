//! Durable storage for source indicators, per-stage intermediate results,
//! and final classifications.

mod schema;
mod store;

pub use schema::{get_schema_version, initialize_schema, is_initialized, SCHEMA_VERSION};
pub use store::SqliteStore;
