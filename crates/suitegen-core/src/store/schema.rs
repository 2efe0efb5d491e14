//! SQLite schema DDL and migration framework for the exchange cache.

use rusqlite::Connection;

use crate::errors::SuitegenResult;

/// Current schema version. Migrations run from whatever the DB currently
/// reports up to this value.
pub const SCHEMA_VERSION: i32 = 2;

/// Baseline DDL, safe to replay on an initialised database.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS schema_meta (
        key TEXT PRIMARY KEY,
        value TEXT
    );",
    "CREATE TABLE IF NOT EXISTS projects (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        created_at TEXT DEFAULT CURRENT_TIMESTAMP
    );",
    "CREATE TABLE IF NOT EXISTS cache_entries (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        project_id INTEGER NOT NULL REFERENCES projects(id),
        prompt TEXT NOT NULL,
        prompt_digest TEXT NOT NULL,
        model_name TEXT NOT NULL,
        attempt_number INTEGER NOT NULL,
        artifact TEXT NOT NULL,
        created_at TEXT DEFAULT CURRENT_TIMESTAMP,
        UNIQUE(project_id, prompt_digest, model_name, attempt_number)
    );",
    "CREATE TABLE IF NOT EXISTS migration_history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        from_version INTEGER NOT NULL,
        to_version INTEGER NOT NULL,
        status TEXT NOT NULL,
        error_message TEXT,
        created_at TEXT DEFAULT CURRENT_TIMESTAMP
    );",
    "CREATE INDEX IF NOT EXISTS idx_cache_entries_lookup \
         ON cache_entries(project_id, prompt_digest, model_name);",
];

// ─── Migration framework ────────────────────────────────────────────────────

/// Run all pending migrations up to [`SCHEMA_VERSION`]. Each step runs in a
/// SAVEPOINT so a failure rolls back only that step.
pub fn migrate_schema(conn: &Connection) -> SuitegenResult<()> {
    let mut current_version = get_schema_version(conn);

    while current_version < SCHEMA_VERSION {
        let next_version = current_version + 1;
        conn.execute_batch("SAVEPOINT suitegen_migrate_step;")?;

        let step_result = (|| -> SuitegenResult<()> {
            match next_version {
                1 => migrate_to_v1(conn)?,
                2 => migrate_to_v2(conn)?,
                _ => {}
            }
            set_schema_version(conn, next_version)?;
            record_migration_step(conn, current_version, next_version, "success", None)?;
            conn.execute_batch("RELEASE SAVEPOINT suitegen_migrate_step;")?;
            Ok(())
        })();

        match step_result {
            Ok(()) => current_version = next_version,
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK TO SAVEPOINT suitegen_migrate_step;");
                let _ = conn.execute_batch("RELEASE SAVEPOINT suitegen_migrate_step;");
                let _ = record_migration_step(
                    conn,
                    current_version,
                    next_version,
                    "failed",
                    Some(&e.to_string()),
                );
                return Err(e);
            }
        }
    }

    Ok(())
}

/// Returns 0 when the key is absent or unparseable.
pub fn get_schema_version(conn: &Connection) -> i32 {
    let result: Result<String, _> = conn.query_row(
        "SELECT value FROM schema_meta WHERE key = 'schema_version' LIMIT 1;",
        [],
        |row| row.get(0),
    );
    match result {
        Ok(v) => v.parse::<i32>().unwrap_or(0),
        Err(_) => 0,
    }
}

fn set_schema_version(conn: &Connection, version: i32) -> SuitegenResult<()> {
    conn.execute(
        "INSERT INTO schema_meta(key, value) VALUES('schema_version', ?1) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value;",
        rusqlite::params![version.to_string()],
    )?;
    Ok(())
}

fn record_migration_step(
    conn: &Connection,
    from_v: i32,
    to_v: i32,
    status: &str,
    error_msg: Option<&str>,
) -> SuitegenResult<()> {
    conn.execute(
        "INSERT INTO migration_history(from_version, to_version, status, error_message) \
         VALUES (?1, ?2, ?3, ?4);",
        rusqlite::params![from_v, to_v, status, error_msg],
    )?;
    Ok(())
}

// ─── Individual migration steps ─────────────────────────────────────────────

/// v0 -> v1: baseline, created by `SCHEMA_STATEMENTS`.
fn migrate_to_v1(_conn: &Connection) -> SuitegenResult<()> {
    Ok(())
}

/// v1 -> v2: terminal-result markers. Entries stay immutable; consumption is
/// recorded beside them.
fn migrate_to_v2(conn: &Connection) -> SuitegenResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS consumed_entries (
            entry_id INTEGER PRIMARY KEY REFERENCES cache_entries(id),
            consumed_at TEXT DEFAULT CURRENT_TIMESTAMP
        );",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        for stmt in SCHEMA_STATEMENTS {
            conn.execute_batch(stmt).unwrap();
        }
        conn
    }

    #[test]
    fn test_migrates_to_latest() {
        let conn = fresh();
        assert_eq!(get_schema_version(&conn), 0);
        migrate_schema(&conn).unwrap();
        assert_eq!(get_schema_version(&conn), SCHEMA_VERSION);
        let steps: i64 = conn
            .query_row("SELECT COUNT(*) FROM migration_history;", [], |r| r.get(0))
            .unwrap();
        assert_eq!(steps, SCHEMA_VERSION as i64);
        conn.prepare("SELECT entry_id FROM consumed_entries;").unwrap();
    }

    #[test]
    fn test_migration_is_idempotent() {
        let conn = fresh();
        migrate_schema(&conn).unwrap();
        migrate_schema(&conn).unwrap();
        let steps: i64 = conn
            .query_row("SELECT COUNT(*) FROM migration_history;", [], |r| r.get(0))
            .unwrap();
        assert_eq!(steps, SCHEMA_VERSION as i64);
    }
}
