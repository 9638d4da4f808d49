//! CLI smoke entry point.
//!
//! # Responsibility
//! - Provide a minimal executable to verify `stashdb_core` linkage.
//! - Keep output deterministic for quick local sanity checks.

fn main() {
    println!("stashdb_core version={}", stashdb_core::core_version());
    println!(
        "stashdb_core escape_demo={}",
        stashdb_core::escape_column("games.name")
    );
}
