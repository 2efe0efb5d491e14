//! Write-once SQLite cache of model exchanges.
//!
//! Every artifact the model produced is stored under
//! `(project, exact prompt, model, attempt)` the first time it is obtained and
//! replayed on later runs instead of re-querying the model. Each public method
//! opens its own connection, so one `CacheAccessor` value can be cloned into
//! any number of workers.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::errors::{SuitegenError, SuitegenResult};
use crate::models::CacheKey;
use crate::store::schema;

/// How long a writer waits for a competing transaction before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let text = path.to_string_lossy();
    if text == "~" || text.starts_with("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            let mut expanded = PathBuf::from(home);
            if text.len() > 2 {
                expanded.push(&text[2..]);
            }
            return expanded;
        }
    }
    path.to_path_buf()
}

fn prompt_digest(prompt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn describe(project: &str, model: &str, attempt: u32) -> String {
    format!("cache entry (project={project}, model={model}, attempt={attempt})")
}

#[derive(Clone, Debug)]
pub struct CacheAccessor {
    db_path: PathBuf,
}

impl CacheAccessor {
    /// Open (creating when needed) the cache database at `path` and bring its
    /// schema up to date.
    pub fn open(path: impl AsRef<Path>) -> SuitegenResult<Self> {
        let expanded = expand_tilde(path.as_ref());
        let resolved = if expanded.is_absolute() {
            expanded
        } else {
            std::env::current_dir()?.join(expanded)
        };
        if let Some(parent) = resolved.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let cache = Self { db_path: resolved };
        cache.init_schema()?;
        Ok(cache)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn connect(&self) -> SuitegenResult<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(conn)
    }

    fn init_schema(&self) -> SuitegenResult<()> {
        let conn = self.connect()?;
        conn.query_row("PRAGMA journal_mode = WAL;", [], |_| Ok(()))?;
        for stmt in schema::SCHEMA_STATEMENTS {
            conn.execute_batch(stmt)?;
        }
        schema::migrate_schema(&conn)?;
        Ok(())
    }

    fn project_id(conn: &Connection, project: &str) -> SuitegenResult<Option<i64>> {
        Ok(conn
            .query_row(
                "SELECT id FROM projects WHERE name = ?1 LIMIT 1;",
                params![project],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn entry_id(
        conn: &Connection,
        project: &str,
        prompt: &str,
        model: &str,
        attempt: u32,
    ) -> SuitegenResult<Option<i64>> {
        Ok(conn
            .query_row(
                "SELECT e.id FROM cache_entries e JOIN projects p ON p.id = e.project_id \
                 WHERE p.name = ?1 AND e.prompt_digest = ?2 AND e.prompt = ?3 \
                   AND e.model_name = ?4 AND e.attempt_number = ?5 LIMIT 1;",
                params![project, prompt_digest(prompt), prompt, model, attempt],
                |row| row.get(0),
            )
            .optional()?)
    }

    // -- project spaces -------------------------------------------------------

    /// Create the namespace for `name`. Creating it twice is a no-op.
    pub fn create_project_space(&self, name: &str) -> SuitegenResult<()> {
        let conn = self.connect()?;
        let created = conn.execute(
            "INSERT OR IGNORE INTO projects(name) VALUES(?1);",
            params![name],
        )?;
        if created > 0 {
            debug!("created cache project space {name}");
        }
        Ok(())
    }

    pub fn has_project_space(&self, name: &str) -> SuitegenResult<bool> {
        let conn = self.connect()?;
        Ok(Self::project_id(&conn, name)?.is_some())
    }

    // -- entries --------------------------------------------------------------

    pub fn exists(
        &self,
        project: &str,
        prompt: &str,
        model: &str,
        attempt: u32,
    ) -> SuitegenResult<bool> {
        let conn = self.connect()?;
        Ok(Self::entry_id(&conn, project, prompt, model, attempt)?.is_some())
    }

    /// Store `artifact` under the key. Fails with `NotExists` when the
    /// project space is missing and `AlreadyExists` when the key is taken;
    /// the stored value is never replaced.
    pub fn register(
        &self,
        project: &str,
        prompt: &str,
        model: &str,
        attempt: u32,
        artifact: &str,
    ) -> SuitegenResult<()> {
        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let project_id = Self::project_id(&tx, project)?
            .ok_or_else(|| SuitegenError::NotExists(format!("project space {project}")))?;
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO cache_entries \
                 (project_id, prompt, prompt_digest, model_name, attempt_number, artifact) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
            params![
                project_id,
                prompt,
                prompt_digest(prompt),
                model,
                attempt,
                artifact
            ],
        )?;
        if inserted == 0 {
            return Err(SuitegenError::AlreadyExists(describe(project, model, attempt)));
        }
        tx.commit()?;
        debug!("registered {}", describe(project, model, attempt));
        Ok(())
    }

    pub fn get(
        &self,
        project: &str,
        prompt: &str,
        model: &str,
        attempt: u32,
    ) -> SuitegenResult<String> {
        let conn = self.connect()?;
        conn.query_row(
            "SELECT e.artifact FROM cache_entries e JOIN projects p ON p.id = e.project_id \
             WHERE p.name = ?1 AND e.prompt_digest = ?2 AND e.prompt = ?3 \
               AND e.model_name = ?4 AND e.attempt_number = ?5 LIMIT 1;",
            params![project, prompt_digest(prompt), prompt, model, attempt],
            |row| row.get(0),
        )
        .optional()?
        .ok_or_else(|| SuitegenError::NotExists(describe(project, model, attempt)))
    }

    pub fn exists_key(&self, key: &CacheKey) -> SuitegenResult<bool> {
        self.exists(&key.project, &key.prompt, &key.model, key.attempt)
    }

    pub fn get_key(&self, key: &CacheKey) -> SuitegenResult<String> {
        self.get(&key.project, &key.prompt, &key.model, key.attempt)
    }

    pub fn register_key(&self, key: &CacheKey, artifact: &str) -> SuitegenResult<()> {
        self.register(&key.project, &key.prompt, &key.model, key.attempt, artifact)
    }

    /// Number of entries stored for `project`.
    pub fn count(&self, project: &str) -> SuitegenResult<u64> {
        let conn = self.connect()?;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM cache_entries e JOIN projects p ON p.id = e.project_id \
             WHERE p.name = ?1;",
            params![project],
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }

    /// `(attempt, artifact)` pairs stored for one prompt, ordered by attempt.
    pub fn entries_for_prompt(
        &self,
        project: &str,
        prompt: &str,
        model: &str,
    ) -> SuitegenResult<Vec<(u32, String)>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT e.attempt_number, e.artifact FROM cache_entries e \
             JOIN projects p ON p.id = e.project_id \
             WHERE p.name = ?1 AND e.prompt_digest = ?2 AND e.prompt = ?3 AND e.model_name = ?4 \
             ORDER BY e.attempt_number;",
        )?;
        let rows = stmt.query_map(
            params![project, prompt_digest(prompt), prompt, model],
            |row| Ok((row.get::<_, u32>(0)?, row.get::<_, String>(1)?)),
        )?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    // -- terminal results -----------------------------------------------------

    /// Mark the entry at `key` as the terminal result of its entity. Marking
    /// twice is a no-op.
    pub fn mark_consumed(&self, key: &CacheKey) -> SuitegenResult<()> {
        let conn = self.connect()?;
        let entry = Self::entry_id(&conn, &key.project, &key.prompt, &key.model, key.attempt)?
            .ok_or_else(|| {
                SuitegenError::NotExists(describe(&key.project, &key.model, key.attempt))
            })?;
        conn.execute(
            "INSERT OR IGNORE INTO consumed_entries(entry_id) VALUES(?1);",
            params![entry],
        )?;
        Ok(())
    }

    pub fn is_consumed(&self, key: &CacheKey) -> SuitegenResult<bool> {
        let conn = self.connect()?;
        let Some(entry) =
            Self::entry_id(&conn, &key.project, &key.prompt, &key.model, key.attempt)?
        else {
            return Ok(false);
        };
        let found: Option<i64> = conn
            .query_row(
                "SELECT entry_id FROM consumed_entries WHERE entry_id = ?1;",
                params![entry],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn consumed_count(&self, project: &str) -> SuitegenResult<u64> {
        let conn = self.connect()?;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM consumed_entries c \
             JOIN cache_entries e ON e.id = c.entry_id \
             JOIN projects p ON p.id = e.project_id WHERE p.name = ?1;",
            params![project],
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> (tempfile::TempDir, CacheAccessor) {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheAccessor::open(dir.path().join("nested/cache.db")).unwrap();
        (dir, cache)
    }

    #[test]
    fn test_open_creates_parents_and_schema() {
        let (dir, cache) = cache();
        assert!(dir.path().join("nested/cache.db").exists());
        let conn = cache.connect().unwrap();
        assert_eq!(schema::get_schema_version(&conn), schema::SCHEMA_VERSION);
    }

    #[test]
    fn test_create_project_space_is_idempotent() {
        let (_dir, cache) = cache();
        assert!(!cache.has_project_space("proj").unwrap());
        cache.create_project_space("proj").unwrap();
        cache.create_project_space("proj").unwrap();
        assert!(cache.has_project_space("proj").unwrap());
    }

    #[test]
    fn test_register_then_get() {
        let (_dir, cache) = cache();
        cache.create_project_space("proj").unwrap();
        assert!(!cache.exists("proj", "p", "m", 1).unwrap());
        cache.register("proj", "p", "m", 1, "artifact-1").unwrap();
        assert!(cache.exists("proj", "p", "m", 1).unwrap());
        assert_eq!(cache.get("proj", "p", "m", 1).unwrap(), "artifact-1");
    }

    #[test]
    fn test_register_twice_fails_and_keeps_value() {
        let (_dir, cache) = cache();
        cache.create_project_space("proj").unwrap();
        cache.register("proj", "p", "m", 1, "first").unwrap();
        let err = cache.register("proj", "p", "m", 1, "second").unwrap_err();
        assert!(matches!(err, SuitegenError::AlreadyExists(_)));
        assert_eq!(cache.get("proj", "p", "m", 1).unwrap(), "first");
        assert_eq!(cache.count("proj").unwrap(), 1);
    }

    #[test]
    fn test_register_requires_project_space() {
        let (_dir, cache) = cache();
        let err = cache.register("ghost", "p", "m", 1, "x").unwrap_err();
        assert!(matches!(err, SuitegenError::NotExists(_)));
    }

    #[test]
    fn test_get_missing_is_not_exists() {
        let (_dir, cache) = cache();
        cache.create_project_space("proj").unwrap();
        assert!(matches!(
            cache.get("proj", "p", "m", 1),
            Err(SuitegenError::NotExists(_))
        ));
    }

    #[test]
    fn test_key_components_are_independent() {
        let (_dir, cache) = cache();
        cache.create_project_space("a").unwrap();
        cache.create_project_space("b").unwrap();
        cache.register("a", "p", "m", 1, "x").unwrap();
        cache.register("b", "p", "m", 1, "x").unwrap();
        cache.register("a", "p2", "m", 1, "x").unwrap();
        cache.register("a", "p", "m2", 1, "x").unwrap();
        cache.register("a", "p", "m", 2, "x").unwrap();
        assert_eq!(cache.count("a").unwrap(), 4);
        assert_eq!(cache.count("b").unwrap(), 1);
        let attempts: Vec<u32> = cache
            .entries_for_prompt("a", "p", "m")
            .unwrap()
            .into_iter()
            .map(|(n, _)| n)
            .collect();
        assert_eq!(attempts, vec![1, 2]);
    }

    #[test]
    fn test_entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");
        {
            let cache = CacheAccessor::open(&path).unwrap();
            cache.create_project_space("proj").unwrap();
            cache.register("proj", "p", "m", 1, "durable").unwrap();
        }
        let reopened = CacheAccessor::open(&path).unwrap();
        assert_eq!(reopened.get("proj", "p", "m", 1).unwrap(), "durable");
    }

    #[test]
    fn test_racing_registers_have_one_winner() {
        let (_dir, cache) = cache();
        cache.create_project_space("proj").unwrap();
        let results: Vec<SuitegenResult<()>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let cache = cache.clone();
                    scope.spawn(move || {
                        cache.register("proj", "same prompt", "m", 1, &format!("worker-{i}"))
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        let winners = results.iter().filter(|r| r.is_ok()).count();
        let losers = results
            .iter()
            .filter(|r| matches!(r, Err(SuitegenError::AlreadyExists(_))))
            .count();
        assert_eq!(winners, 1);
        assert_eq!(losers, 7);
        assert_eq!(cache.count("proj").unwrap(), 1);
    }

    #[test]
    fn test_mark_consumed() {
        let (_dir, cache) = cache();
        cache.create_project_space("proj").unwrap();
        let key = CacheKey::new("proj", "p", "m", 2);
        assert!(cache.mark_consumed(&key).is_err());
        cache.register_key(&key, "final").unwrap();
        assert!(!cache.is_consumed(&key).unwrap());
        cache.mark_consumed(&key).unwrap();
        cache.mark_consumed(&key).unwrap();
        assert!(cache.is_consumed(&key).unwrap());
        assert_eq!(cache.consumed_count("proj").unwrap(), 1);
        assert_eq!(cache.get_key(&key).unwrap(), "final");
    }
}
