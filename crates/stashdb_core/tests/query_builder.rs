use rusqlite::types::Value;
use stashdb_core::db::migrations::{apply_steps, MigrationStep};
use stashdb_core::{ColumnDef, ColumnType, Database, Direction};

fn setup() -> Database {
    let db = Database::open_in_memory("query_tests").unwrap();
    let step = MigrationStep::new("query_tests", 0, 1, |batch| {
        batch
            .create_table(
                "games",
                vec![
                    ColumnDef::new("id", ColumnType::Integer).primary_key(),
                    ColumnDef::new("name", ColumnType::Text).not_null(),
                    ColumnDef::new("genre", ColumnType::Text),
                    ColumnDef::new("hidden", ColumnType::Integer)
                        .not_null()
                        .with_default("0"),
                    ColumnDef::new("playtime", ColumnType::Integer),
                ],
            )
            .create_table(
                "tags",
                vec![
                    ColumnDef::new("game_id", ColumnType::Integer).not_null(),
                    ColumnDef::new("label", ColumnType::Text).not_null(),
                ],
            );
    });
    apply_steps(&db, &[step]).unwrap();
    db
}

fn seed_25_games(db: &Database) {
    let rows: Vec<Vec<Value>> = (1..=25)
        .map(|id| {
            vec![
                Value::Integer(id),
                Value::Text(format!("game {id:02}")),
                Value::Integer(i64::from(id % 2 == 0)),
                Value::Integer(id * 10),
            ]
        })
        .collect();
    db.query("games")
        .insert_many(&["id", "name", "hidden", "playtime"], &rows)
        .unwrap();
}

fn row_id(row: &stashdb_core::SqlRow) -> i64 {
    match row.get("id") {
        Some(Value::Integer(id)) => *id,
        other => panic!("unexpected id: {other:?}"),
    }
}

#[test]
fn paginate_returns_requested_window_and_bookkeeping() {
    let db = setup();
    seed_25_games(&db);

    let page = db
        .query("games")
        .order_by("id", Direction::Asc)
        .paginate(10, 2)
        .unwrap();

    let ids: Vec<i64> = page.rows.iter().map(row_id).collect();
    assert_eq!(ids, (11..=20).collect::<Vec<i64>>());
    assert_eq!(page.total, 25);
    assert_eq!(page.per_page, 10);
    assert_eq!(page.current_page, 2);
    assert_eq!(page.last_page, 3);
    assert_eq!(page.next_page, Some(3));
    assert_eq!(page.prev_page, Some(1));
}

#[test]
fn paginate_edges_clamp_and_terminate() {
    let db = setup();
    seed_25_games(&db);

    let last = db
        .query("games")
        .order_by("id", Direction::Asc)
        .paginate(10, 3)
        .unwrap();
    assert_eq!(last.rows.len(), 5);
    assert_eq!(last.next_page, None);
    assert_eq!(last.prev_page, Some(2));

    let empty = db.query("tags").paginate(10, 1).unwrap();
    assert_eq!(empty.total, 0);
    assert_eq!(empty.last_page, 1);
    assert_eq!(empty.next_page, None);
    assert_eq!(empty.prev_page, None);
}

#[test]
fn chunk_pages_through_all_rows_and_can_stop_early() {
    let db = setup();
    seed_25_games(&db);

    let mut sizes = Vec::new();
    db.query("games")
        .order_by("id", Direction::Asc)
        .chunk(10, |rows| {
            sizes.push(rows.len());
            Ok(true)
        })
        .unwrap();
    assert_eq!(sizes, vec![10, 10, 5]);

    let mut calls = 0;
    db.query("games")
        .chunk(10, |_| {
            calls += 1;
            Ok(false)
        })
        .unwrap();
    assert_eq!(calls, 1);
}

#[test]
fn filters_compose_across_clause_kinds() {
    let db = setup();
    seed_25_games(&db);
    db.query("games")
        .filter("id", "=", 5i64)
        .update(&[("genre", Value::Text("rpg".into()))])
        .unwrap();

    let visible_rpg_or_low_id: Vec<i64> = db
        .query("games")
        .filter("hidden", "=", 0i64)
        .filter_group(|g| g.filter("genre", "=", "rpg").or_filter("id", "<=", 3i64))
        .order_by("id", Direction::Asc)
        .get()
        .unwrap()
        .iter()
        .map(row_id)
        .collect();
    assert_eq!(visible_rpg_or_low_id, vec![1, 3, 5]);

    let in_set: Vec<i64> = db
        .query("games")
        .filter_in("id", vec![2i64, 4, 40])
        .order_by("id", Direction::Asc)
        .get()
        .unwrap()
        .iter()
        .map(row_id)
        .collect();
    assert_eq!(in_set, vec![2, 4]);

    let between: Vec<i64> = db
        .query("games")
        .filter_between("id", 23i64, 27i64)
        .order_by("id", Direction::Asc)
        .get()
        .unwrap()
        .iter()
        .map(row_id)
        .collect();
    assert_eq!(between, vec![23, 24, 25]);

    let no_genre = db.query("games").filter_null("genre").count().unwrap();
    assert_eq!(no_genre, 24);
}

#[test]
fn join_binds_parameters_after_where_bindings() {
    let db = setup();
    seed_25_games(&db);
    let tags = db.query("tags");
    tags.insert(&[("game_id", Value::Integer(1)), ("label", Value::Text("coop".into()))])
        .unwrap();
    tags.insert(&[("game_id", Value::Integer(2)), ("label", Value::Text("coop".into()))])
        .unwrap();
    tags.insert(&[("game_id", Value::Integer(1)), ("label", Value::Text("solo".into()))])
        .unwrap();

    // Where param binds before the join param even though the join
    // fragment appears first in the SQL text.
    let ids: Vec<i64> = db
        .query("games")
        .select(&["games.id"])
        .filter("hidden", "=", 0i64)
        .join_raw(
            "tags",
            "\"tags\".\"game_id\" = \"games\".\"id\" AND \"tags\".\"label\" = ?",
            vec![Value::Text("coop".into())],
        )
        .order_by("games.id", Direction::Asc)
        .get()
        .unwrap()
        .iter()
        .map(row_id)
        .collect();
    assert_eq!(ids, vec![1]);

    let joined = db
        .query("games")
        .join("tags", "tags.game_id", "=", "games.id")
        .count()
        .unwrap();
    assert_eq!(joined, 3);
}

#[test]
fn group_by_and_having_filter_aggregated_rows() {
    let db = setup();
    seed_25_games(&db);
    let tags = db.query("tags");
    for (game_id, label) in [(1, "a"), (1, "b"), (2, "a"), (3, "a"), (3, "b")] {
        tags.insert(&[
            ("game_id", Value::Integer(game_id)),
            ("label", Value::Text(label.into())),
        ])
        .unwrap();
    }

    let multi_tagged = db
        .query("tags")
        .select(&["game_id"])
        .group_by(&["game_id"])
        .having("COUNT(*)", ">=", 2i64)
        .order_by("game_id", Direction::Asc)
        .pluck("game_id")
        .unwrap();
    assert_eq!(
        multi_tagged,
        vec![Value::Integer(1), Value::Integer(3)]
    );

    // Aggregates over grouped builders count groups, not rows.
    let groups = db
        .query("tags")
        .group_by(&["game_id"])
        .count()
        .unwrap();
    assert_eq!(groups, 3);
}

#[test]
fn aggregates_and_scalars() {
    let db = setup();
    seed_25_games(&db);

    assert_eq!(db.query("games").count().unwrap(), 25);
    assert!(db.query("games").filter("id", "=", 7i64).exists().unwrap());
    assert!(!db.query("games").filter("id", "=", 70i64).exists().unwrap());

    assert_eq!(
        db.query("games").max("playtime").unwrap(),
        Some(Value::Integer(250))
    );
    assert_eq!(
        db.query("games").min("playtime").unwrap(),
        Some(Value::Integer(10))
    );
    assert_eq!(
        db.query("games").sum("playtime").unwrap(),
        Some(Value::Integer((1..=25).map(|n| n * 10).sum()))
    );
    assert_eq!(db.query("tags").sum("game_id").unwrap(), None);

    assert_eq!(
        db.query("games")
            .filter("id", "=", 3i64)
            .value("name")
            .unwrap(),
        Some(Value::Text("game 03".into()))
    );
    assert_eq!(db.query("tags").value("label").unwrap(), None);
}

#[test]
fn mutations_respect_the_where_tree() {
    let db = setup();
    seed_25_games(&db);

    let hidden_before = db.query("games").filter("hidden", "=", 1i64).count().unwrap();
    assert_eq!(hidden_before, 12);

    let changed = db
        .query("games")
        .filter("hidden", "=", 1i64)
        .filter("id", "<=", 10i64)
        .update(&[("hidden", Value::Integer(0))])
        .unwrap();
    assert_eq!(changed, 5);
    assert_eq!(
        db.query("games").filter("hidden", "=", 1i64).count().unwrap(),
        7
    );

    let removed = db
        .query("games")
        .filter("id", ">", 20i64)
        .delete()
        .unwrap();
    assert_eq!(removed, 5);
    assert_eq!(db.query("games").count().unwrap(), 20);

    let rowid = db
        .query("games")
        .insert(&[
            ("id", Value::Integer(100)),
            ("name", Value::Text("late arrival".into())),
        ])
        .unwrap();
    assert_eq!(rowid, 100);
}

#[test]
fn distinct_and_pluck() {
    let db = setup();
    seed_25_games(&db);

    let flags = db
        .query("games")
        .select(&["hidden"])
        .distinct()
        .order_by("hidden", Direction::Asc)
        .pluck("hidden")
        .unwrap();
    // pluck recompiles with its own projection; distinct still applies.
    assert_eq!(flags, vec![Value::Integer(0), Value::Integer(1)]);

    // Aggregates over a distinct builder count distinct values, not
    // underlying rows.
    let distinct_flags = db
        .query("games")
        .select(&["hidden"])
        .distinct()
        .count()
        .unwrap();
    assert_eq!(distinct_flags, 2);
}
