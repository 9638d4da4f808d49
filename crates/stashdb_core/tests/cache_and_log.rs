use rusqlite::types::Value;
use stashdb_core::db::migrations::{apply_steps, MigrationStep};
use stashdb_core::{ColumnDef, ColumnType, Database, DbError};
use std::time::Duration;

fn setup() -> Database {
    let db = Database::open_in_memory("cache_tests").unwrap();
    let step = MigrationStep::new("cache_tests", 0, 1, |batch| {
        batch.create_table(
            "items",
            vec![
                ColumnDef::new("id", ColumnType::Integer).primary_key(),
                ColumnDef::new("name", ColumnType::Text),
            ],
        );
    });
    apply_steps(&db, &[step]).unwrap();
    db
}

#[test]
fn cache_hit_skips_factory_within_ttl() {
    let db = setup();
    let mut calls = 0;

    for _ in 0..2 {
        let value: u64 = db
            .cached("item_count", Some(Duration::from_millis(100)), |db| {
                calls += 1;
                db.count("items", None, &[])
            })
            .unwrap();
        assert_eq!(value, 0);
    }
    assert_eq!(calls, 1);
}

#[test]
fn cache_expires_lazily_after_ttl() {
    let db = setup();
    let mut calls = 0;
    let mut fetch = |db: &Database| {
        db.cached("stamp", Some(Duration::from_millis(100)), |_| {
            calls += 1;
            Ok(calls)
        })
        .unwrap()
    };

    assert_eq!(fetch(&db), 1);
    assert_eq!(fetch(&db), 1);
    std::thread::sleep(Duration::from_millis(150));
    assert_eq!(fetch(&db), 2);
}

#[test]
fn clear_cache_removes_one_or_all_entries() {
    let db = setup();
    let fill = |db: &Database, key: &str, n: i64| -> i64 {
        db.cached(key, None, |_| Ok(n)).unwrap()
    };

    assert_eq!(fill(&db, "a", 1), 1);
    assert_eq!(fill(&db, "b", 2), 2);

    db.clear_cache(Some("a"));
    assert_eq!(fill(&db, "a", 10), 10);
    assert_eq!(fill(&db, "b", 20), 2);

    db.clear_cache(None);
    assert_eq!(fill(&db, "b", 20), 20);
}

#[test]
fn cache_type_mismatch_is_reported() {
    let db = setup();
    let _: i64 = db.cached("typed", None, |_| Ok(7)).unwrap();

    let err = db
        .cached::<String, _>("typed", None, |_| Ok("seven".to_string()))
        .unwrap_err();
    assert!(matches!(err, DbError::CacheType { .. }));
}

#[test]
fn query_log_records_successful_executions_only() {
    let db = setup();
    db.set_query_logging(true);

    db.insert("items", &[("id", Value::Integer(1))]).unwrap();
    db.fetch_all("SELECT * FROM \"items\"", &[]).unwrap();
    db.execute("not valid sql", &[]).unwrap_err();

    let log = db.query_log();
    assert_eq!(log.len(), 2);
    assert!(log[0].sql.starts_with("INSERT INTO \"items\""));
    assert_eq!(log[0].params, vec!["1".to_string()]);
    assert!(log[1].sql.starts_with("SELECT"));
    assert!(log.iter().all(|entry| entry.elapsed_secs >= 0.0));

    db.clear_query_log();
    assert!(db.query_log().is_empty());
}

#[test]
fn query_log_serializes_for_diagnostics_export() {
    let db = setup();
    db.set_query_logging(true);
    db.insert("items", &[("id", Value::Integer(1))]).unwrap();

    let json = serde_json::to_string(&db.query_log()).unwrap();
    assert!(json.contains("\"sql\""));
    assert!(json.contains("INSERT INTO"));
    assert!(json.contains("\"params\""));
    assert!(json.contains("\"elapsed_secs\""));
}

#[test]
fn query_logging_is_off_by_default() {
    let db = setup();
    db.insert("items", &[("id", Value::Integer(1))]).unwrap();
    assert!(db.query_log().is_empty());
}

#[test]
fn convenience_wrappers_share_the_binding_path() {
    let db = setup();

    db.insert(
        "items",
        &[("id", Value::Integer(1)), ("name", Value::Text("a".into()))],
    )
    .unwrap();
    db.insert(
        "items",
        &[("id", Value::Integer(2)), ("name", Value::Text("b".into()))],
    )
    .unwrap();

    assert_eq!(db.count("items", None, &[]).unwrap(), 2);
    assert!(db
        .exists("items", Some("\"name\" = ?"), &[Value::Text("b".into())])
        .unwrap());

    let changed = db
        .update(
            "items",
            &[("name", Value::Text("renamed".into()))],
            "\"id\" = ?",
            &[Value::Integer(1)],
        )
        .unwrap();
    assert_eq!(changed, 1);
    assert_eq!(
        db.fetch_scalar(
            "SELECT \"name\" FROM \"items\" WHERE \"id\" = ?1",
            &[Value::Integer(1)]
        )
        .unwrap(),
        Some(Value::Text("renamed".into()))
    );

    let removed = db
        .delete("items", "\"id\" = ?", &[Value::Integer(2)])
        .unwrap();
    assert_eq!(removed, 1);
    assert_eq!(db.count("items", None, &[]).unwrap(), 1);

    assert_eq!(db.fetch_scalar("SELECT \"id\" FROM \"items\" WHERE \"id\" = 99", &[]).unwrap(), None);
}

#[test]
fn option_values_collapse_to_sql_null() {
    use stashdb_core::IntoValue;

    let db = setup();
    let none: Option<String> = None;
    db.insert(
        "items",
        &[("id", Value::Integer(1)), ("name", none.into_value())],
    )
    .unwrap();

    assert_eq!(db.count("items", Some("\"name\" IS NULL"), &[]).unwrap(), 1);
}
