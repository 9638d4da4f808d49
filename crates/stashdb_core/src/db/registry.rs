//! Process-wide registry mapping logical names to live instances.
//!
//! # Responsibility
//! - Resolve a logical name to a database file path, honoring per-name
//!   directory overrides.
//! - Construct each instance exactly once (double-checked under a
//!   write lock) and run migrations before handing it out.
//!
//! # Invariants
//! - At most one instance exists per lowercased logical name.
//! - An instance whose open or migration failed is never registered.
//! - Settings are read at construction time; later changes affect only
//!   future opens.

use crate::db::database::Database;
use crate::db::{migrations, DbError, DbResult};
use log::{error, info};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};

const DATABASES_SUBDIR: &str = "Databases";

/// Journal pragma applied when a file-backed connection opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalMode {
    /// Write-ahead logging (process-wide default).
    Wal,
    /// Classic rollback journal.
    Rollback,
}

impl JournalMode {
    pub(crate) fn as_sql(self) -> &'static str {
        match self {
            Self::Wal => "WAL",
            Self::Rollback => "DELETE",
        }
    }
}

struct Settings {
    base_dir: Option<PathBuf>,
    journal_mode: JournalMode,
    busy_timeout: Duration,
    overrides: HashMap<String, PathBuf>,
}

static SETTINGS: Lazy<Mutex<Settings>> = Lazy::new(|| {
    Mutex::new(Settings {
        base_dir: None,
        journal_mode: JournalMode::Wal,
        busy_timeout: Duration::from_secs(5),
        overrides: HashMap::new(),
    })
});

static REGISTRY: Lazy<RwLock<HashMap<String, Arc<Database>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

fn lock_settings() -> MutexGuard<'static, Settings> {
    SETTINGS.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Sets the base config directory under which `Databases/` lives.
///
/// Must be called before the first [`get_instance`] for any name
/// without a directory override.
pub fn set_base_dir(path: impl Into<PathBuf>) {
    lock_settings().base_dir = Some(path.into());
}

/// Sets the journal mode applied to future opens (default WAL).
pub fn set_journal_mode(mode: JournalMode) {
    lock_settings().journal_mode = mode;
}

/// Sets the busy timeout applied to future opens (default 5 s).
pub fn set_busy_timeout(timeout: Duration) {
    lock_settings().busy_timeout = timeout;
}

/// Registers a directory override for one logical name: its file lives
/// at `<dir>/<name>.db` instead of under the base directory.
pub fn set_directory_override(name: &str, dir: impl Into<PathBuf>) {
    lock_settings()
        .overrides
        .insert(name.to_ascii_lowercase(), dir.into());
}

/// Returns the live instance for `name`, constructing it on first use.
///
/// # Contract
/// - Names are case-insensitive.
/// - Construction resolves the path, opens the file, applies pragmas
///   and runs all pending migrations; any failure propagates and the
///   instance is not registered.
pub fn get_instance(name: &str) -> DbResult<Arc<Database>> {
    let key = name.to_ascii_lowercase();

    {
        let registry = REGISTRY.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(db) = registry.get(&key) {
            return Ok(Arc::clone(db));
        }
    }

    let mut registry = REGISTRY.write().unwrap_or_else(PoisonError::into_inner);
    if let Some(db) = registry.get(&key) {
        return Ok(Arc::clone(db));
    }

    let started_at = Instant::now();
    info!("event=db_open module=registry status=start name={key}");

    match construct(&key) {
        Ok(db) => {
            info!(
                "event=db_open module=registry status=ok name={key} version={} duration_ms={}",
                db.schema_version().unwrap_or(0),
                started_at.elapsed().as_millis()
            );
            let db = Arc::new(db);
            registry.insert(key, Arc::clone(&db));
            Ok(db)
        }
        Err(err) => {
            error!(
                "event=db_open module=registry status=error name={key} duration_ms={} error={err}",
                started_at.elapsed().as_millis()
            );
            Err(err)
        }
    }
}

fn construct(key: &str) -> DbResult<Database> {
    let (path, journal_mode, busy_timeout) = resolve_open_config(key)?;
    let db = Database::open_file(key, path, journal_mode, busy_timeout)?;
    migrations::apply(&db)?;
    Ok(db)
}

fn resolve_open_config(key: &str) -> DbResult<(PathBuf, JournalMode, Duration)> {
    let settings = lock_settings();

    let dir = match settings.overrides.get(key) {
        Some(dir) => dir.clone(),
        None => match &settings.base_dir {
            Some(base) => base.join(DATABASES_SUBDIR),
            None => {
                return Err(DbError::Connection {
                    name: key.to_string(),
                    message: "no base config directory set and no directory override registered"
                        .to_string(),
                });
            }
        },
    };

    std::fs::create_dir_all(&dir).map_err(|err| DbError::Connection {
        name: key.to_string(),
        message: format!("cannot create directory `{}`: {err}", dir.display()),
    })?;

    Ok((
        dir.join(format!("{key}.db")),
        settings.journal_mode,
        settings.busy_timeout,
    ))
}

/// Drops one registered instance, closing its connection.
///
/// Returns whether an instance was registered under `name`.
pub fn close(name: &str) -> bool {
    let key = name.to_ascii_lowercase();
    let mut registry = REGISTRY.write().unwrap_or_else(PoisonError::into_inner);
    registry.remove(&key).is_some()
}

/// Drops every registered instance. Intended for process shutdown.
pub fn shutdown() {
    let mut registry = REGISTRY.write().unwrap_or_else(PoisonError::into_inner);
    let count = registry.len();
    registry.clear();
    info!("event=db_shutdown module=registry status=ok closed={count}");
}
