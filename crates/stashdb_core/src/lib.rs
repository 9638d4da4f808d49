//! Embedded per-named-database storage core.
//! This crate is the single source of truth for connection, schema and
//! query invariants.

pub mod db;
pub mod logging;
pub mod query;
pub mod value;

pub use db::{
    get_instance, ColumnDef, ColumnType, Database, DbError, DbResult, JournalMode, MigrationStep,
    QueryLogEntry, SchemaBatch,
};
pub use logging::{default_log_level, init_logging, logging_status};
pub use query::{Direction, Group, Pagination, Query};
pub use value::{escape_column, IntoValue, SqlRow};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
