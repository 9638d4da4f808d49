//! Migration step registry, schema DSL and forward-only executor.
//!
//! # Responsibility
//! - Hold migration steps registered for each logical database name.
//! - Replay the minimal chain from the persisted schema version to the
//!   latest declared version on a freshly opened connection.
//!
//! # Invariants
//! - Steps execute strictly by version number, never registration order.
//! - A gap in the chain fails closed; it is a configuration error.
//! - A file reporting a version newer than any known step fails closed.
//! - Each step's DDL and version bump commit together or not at all.

use crate::db::database::Database;
use crate::db::{DbError, DbResult};
use crate::value::escape_column;
use log::info;
use once_cell::sync::Lazy;
use serde::Serialize;
use std::fmt::{Debug, Formatter};
use std::sync::{Arc, Mutex, PoisonError};

/// Engine storage class used in column declarations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ColumnType {
    Integer,
    Text,
    Real,
    Blob,
    Numeric,
}

impl ColumnType {
    fn as_sql(self) -> &'static str {
        match self {
            Self::Integer => "INTEGER",
            Self::Text => "TEXT",
            Self::Real => "REAL",
            Self::Blob => "BLOB",
            Self::Numeric => "NUMERIC",
        }
    }
}

/// Statically declared column descriptor used by the schema DSL.
#[derive(Debug, Clone, Serialize)]
pub struct ColumnDef {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
    pub primary_key: bool,
    pub auto_increment: bool,
    /// Raw SQL literal rendered after `DEFAULT`.
    pub default_value: Option<String>,
}

impl ColumnDef {
    pub fn new(name: &str, column_type: ColumnType) -> Self {
        Self {
            name: name.to_string(),
            column_type,
            nullable: true,
            primary_key: false,
            auto_increment: false,
            default_value: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Only meaningful on an `INTEGER PRIMARY KEY` column.
    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    pub fn with_default(mut self, literal: &str) -> Self {
        self.default_value = Some(literal.to_string());
        self
    }

    fn render(&self) -> String {
        let mut sql = format!("{} {}", escape_column(&self.name), self.column_type.as_sql());
        if self.primary_key {
            sql.push_str(" PRIMARY KEY");
            if self.auto_increment {
                sql.push_str(" AUTOINCREMENT");
            }
        }
        if !self.nullable {
            sql.push_str(" NOT NULL");
        }
        if let Some(default) = &self.default_value {
            sql.push_str(" DEFAULT ");
            sql.push_str(default);
        }
        sql
    }
}

enum SchemaOp {
    CreateTable { name: String, columns: Vec<ColumnDef> },
    RenameTable { from: String, to: String },
    DropTable { name: String },
    AddColumn { table: String, column: ColumnDef },
    RenameColumn { table: String, from: String, to: String },
    DropColumn { table: String, column: String },
    RawSql { sql: String },
}

impl SchemaOp {
    fn render(&self) -> String {
        match self {
            Self::CreateTable { name, columns } => {
                let body = columns
                    .iter()
                    .map(ColumnDef::render)
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("CREATE TABLE {} ({body})", escape_column(name))
            }
            Self::RenameTable { from, to } => format!(
                "ALTER TABLE {} RENAME TO {}",
                escape_column(from),
                escape_column(to)
            ),
            Self::DropTable { name } => format!("DROP TABLE {}", escape_column(name)),
            Self::AddColumn { table, column } => format!(
                "ALTER TABLE {} ADD COLUMN {}",
                escape_column(table),
                column.render()
            ),
            Self::RenameColumn { table, from, to } => format!(
                "ALTER TABLE {} RENAME COLUMN {} TO {}",
                escape_column(table),
                escape_column(from),
                escape_column(to)
            ),
            Self::DropColumn { table, column } => format!(
                "ALTER TABLE {} DROP COLUMN {}",
                escape_column(table),
                escape_column(column)
            ),
            Self::RawSql { sql } => sql.clone(),
        }
    }
}

/// Accumulates structural operations for one migration step and
/// renders them as a single SQL batch.
#[derive(Default)]
pub struct SchemaBatch {
    ops: Vec<SchemaOp>,
}

impl SchemaBatch {
    pub fn create_table(&mut self, name: &str, columns: Vec<ColumnDef>) -> &mut Self {
        self.ops.push(SchemaOp::CreateTable {
            name: name.to_string(),
            columns,
        });
        self
    }

    pub fn rename_table(&mut self, from: &str, to: &str) -> &mut Self {
        self.ops.push(SchemaOp::RenameTable {
            from: from.to_string(),
            to: to.to_string(),
        });
        self
    }

    pub fn drop_table(&mut self, name: &str) -> &mut Self {
        self.ops.push(SchemaOp::DropTable {
            name: name.to_string(),
        });
        self
    }

    pub fn add_column(&mut self, table: &str, column: ColumnDef) -> &mut Self {
        self.ops.push(SchemaOp::AddColumn {
            table: table.to_string(),
            column,
        });
        self
    }

    pub fn rename_column(&mut self, table: &str, from: &str, to: &str) -> &mut Self {
        self.ops.push(SchemaOp::RenameColumn {
            table: table.to_string(),
            from: from.to_string(),
            to: to.to_string(),
        });
        self
    }

    pub fn drop_column(&mut self, table: &str, column: &str) -> &mut Self {
        self.ops.push(SchemaOp::DropColumn {
            table: table.to_string(),
            column: column.to_string(),
        });
        self
    }

    pub fn raw_sql(&mut self, sql: &str) -> &mut Self {
        self.ops.push(SchemaOp::RawSql {
            sql: sql.to_string(),
        });
        self
    }

    /// Renders the accumulated operations as one executable batch.
    pub fn to_sql(&self) -> String {
        let mut sql = self
            .ops
            .iter()
            .map(SchemaOp::render)
            .collect::<Vec<_>>()
            .join(";\n");
        if !sql.is_empty() {
            sql.push(';');
        }
        sql
    }
}

type Transform = Arc<dyn Fn(&mut SchemaBatch) + Send + Sync>;

/// One forward-only schema transition for a logical database.
#[derive(Clone)]
pub struct MigrationStep {
    database: String,
    from_version: u32,
    to_version: u32,
    transform: Transform,
}

impl Debug for MigrationStep {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationStep")
            .field("database", &self.database)
            .field("from_version", &self.from_version)
            .field("to_version", &self.to_version)
            .finish_non_exhaustive()
    }
}

impl MigrationStep {
    /// Declares a step taking `database` from `from_version` to
    /// `to_version`.
    ///
    /// # Invariants
    /// - `from_version < to_version`; migrations are forward-only.
    pub fn new(
        database: &str,
        from_version: u32,
        to_version: u32,
        transform: impl Fn(&mut SchemaBatch) + Send + Sync + 'static,
    ) -> Self {
        debug_assert!(from_version < to_version);
        Self {
            database: database.to_ascii_lowercase(),
            from_version,
            to_version,
            transform: Arc::new(transform),
        }
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn from_version(&self) -> u32 {
        self.from_version
    }

    pub fn to_version(&self) -> u32 {
        self.to_version
    }
}

static STEPS: Lazy<Mutex<Vec<MigrationStep>>> = Lazy::new(|| Mutex::new(Vec::new()));

/// Registers a step in the process-wide migration registry.
///
/// Steps registered after an instance has been opened only affect
/// future opens of that name.
pub fn register_migration(step: MigrationStep) {
    STEPS
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .push(step);
}

/// Returns the registered steps targeting `database`, in registration
/// order (the executor re-sorts by version).
pub fn registered_for(database: &str) -> Vec<MigrationStep> {
    let key = database.to_ascii_lowercase();
    STEPS
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .iter()
        .filter(|step| step.database == key)
        .cloned()
        .collect()
}

/// Brings `db` from its persisted schema version to the latest version
/// registered for its name. No registered steps means a no-op.
pub fn apply(db: &Database) -> DbResult<()> {
    apply_steps(db, &registered_for(db.name()))
}

/// Replays the relevant suffix of `steps` against `db`.
///
/// # Contract
/// - Duplicate `(from, to)` declarations collapse to the first one.
/// - Fails closed on a version gap or a future-versioned file.
pub fn apply_steps(db: &Database, steps: &[MigrationStep]) -> DbResult<()> {
    let mut chain: Vec<&MigrationStep> = Vec::new();
    for step in steps {
        let duplicate = chain
            .iter()
            .any(|known| known.from_version == step.from_version && known.to_version == step.to_version);
        if !duplicate {
            chain.push(step);
        }
    }
    chain.sort_by_key(|step| step.from_version);

    let Some(latest) = chain.iter().map(|step| step.to_version).max() else {
        return Ok(());
    };

    let mut version = db.schema_version()?;
    if version > latest {
        return Err(DbError::UnsupportedSchemaVersion {
            name: db.name().to_string(),
            db_version: version,
            latest_supported: latest,
        });
    }

    while version < latest {
        let Some(step) = chain.iter().copied().find(|step| step.from_version == version) else {
            return Err(DbError::BrokenMigrationChain {
                name: db.name().to_string(),
                stuck_at: version,
                latest,
            });
        };
        run_step(db, step)?;
        version = step.to_version;
    }

    Ok(())
}

fn run_step(db: &Database, step: &MigrationStep) -> DbResult<()> {
    info!(
        "event=db_migrate module=migrations status=start name={} from={} to={}",
        db.name(),
        step.from_version,
        step.to_version
    );

    let mut batch = SchemaBatch::default();
    (step.transform)(&mut batch);

    db.begin_transaction()?;
    let applied = db
        .execute_batch(&batch.to_sql())
        .and_then(|()| db.set_schema_version(step.to_version));

    match applied {
        Ok(()) => {
            db.commit()?;
            info!(
                "event=db_migrate module=migrations status=ok name={} from={} to={}",
                db.name(),
                step.from_version,
                step.to_version
            );
            Ok(())
        }
        Err(err) => {
            let _ = db.rollback();
            match err {
                DbError::Sqlite(source) => Err(DbError::MigrationFailed {
                    name: db.name().to_string(),
                    from_version: step.from_version,
                    to_version: step.to_version,
                    source,
                }),
                other => Err(other),
            }
        }
    }
}
