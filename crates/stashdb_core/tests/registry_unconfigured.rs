use stashdb_core::db::registry;
use stashdb_core::DbError;

// Runs in its own test binary so no other test has set the process-wide
// base directory first.
#[test]
fn get_instance_without_base_dir_or_override_fails() {
    let err = registry::get_instance("orphan").unwrap_err();
    match err {
        DbError::Connection { name, message } => {
            assert_eq!(name, "orphan");
            assert!(message.contains("no base config directory"));
        }
        other => panic!("unexpected error: {other}"),
    }

    // The failure is not cached; configuring afterwards recovers.
    let dir = tempfile::tempdir().unwrap();
    registry::set_directory_override("orphan", dir.path());
    let db = registry::get_instance("orphan").unwrap();
    assert_eq!(db.schema_version().unwrap(), 0);
}
