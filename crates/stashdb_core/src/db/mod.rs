//! Storage bootstrap, connection registry and schema migration entry points.
//!
//! # Responsibility
//! - Map logical database names to live SQLite connections.
//! - Apply schema migrations in deterministic order before use.
//! - Surface one error taxonomy for connection, schema and query failures.
//!
//! # Invariants
//! - Schema version is tracked via `PRAGMA user_version`.
//! - Callers never see an instance whose migrations did not succeed.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod database;
pub mod migrations;
pub mod registry;

pub use database::{Database, QueryLogEntry};
pub use migrations::{ColumnDef, ColumnType, MigrationStep, SchemaBatch};
pub use registry::{get_instance, JournalMode};

pub type DbResult<T> = Result<T, DbError>;

/// Storage-layer error taxonomy.
///
/// Connection and schema variants are fatal for the logical database
/// they name; engine-level failures (malformed SQL, constraint
/// violations, busy/locked after the busy timeout) surface unmodified
/// as `Sqlite` and are never retried here.
#[derive(Debug)]
pub enum DbError {
    /// Path resolution, directory creation or file open failed.
    Connection { name: String, message: String },
    /// The file reports a schema version newer than any known chain.
    UnsupportedSchemaVersion {
        name: String,
        db_version: u32,
        latest_supported: u32,
    },
    /// No step continues the chain from `stuck_at` toward `latest`.
    BrokenMigrationChain {
        name: String,
        stuck_at: u32,
        latest: u32,
    },
    /// A migration step's DDL failed; nothing from the step persists.
    MigrationFailed {
        name: String,
        from_version: u32,
        to_version: u32,
        source: rusqlite::Error,
    },
    /// A cached entry exists under this key with a different value type.
    CacheType { key: String },
    Sqlite(rusqlite::Error),
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connection { name, message } => {
                write!(f, "cannot open database `{name}`: {message}")
            }
            Self::UnsupportedSchemaVersion {
                name,
                db_version,
                latest_supported,
            } => write!(
                f,
                "database `{name}` schema version {db_version} is newer than supported {latest_supported}"
            ),
            Self::BrokenMigrationChain {
                name,
                stuck_at,
                latest,
            } => write!(
                f,
                "database `{name}` migration chain is broken: no step continues from version {stuck_at} toward {latest}"
            ),
            Self::MigrationFailed {
                name,
                from_version,
                to_version,
                source,
            } => write!(
                f,
                "database `{name}` migration {from_version}->{to_version} failed: {source}"
            ),
            Self::CacheType { key } => {
                write!(f, "cache entry `{key}` holds a different value type")
            }
            Self::Sqlite(err) => write!(f, "{err}"),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::MigrationFailed { source, .. } => Some(source),
            Self::Sqlite(err) => Some(err),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}
