//! Append-only JSON-lines log of entities the pipeline gave up on.

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::SuitegenResult;

/// Pipeline stage at which an entity was abandoned.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipStage {
    Generation,
    SyntaxCorrection,
    LintCorrection,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipRecord {
    pub project: String,
    pub entity: String,
    pub stage: SkipStage,
    pub reason: String,
    pub attempts: u32,
    /// Seconds since the Unix epoch.
    pub recorded_at: u64,
}

impl SkipRecord {
    pub fn new(
        project: impl Into<String>,
        entity: impl Into<String>,
        stage: SkipStage,
        reason: impl Into<String>,
        attempts: u32,
    ) -> Self {
        let recorded_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            project: project.into(),
            entity: entity.into(),
            stage,
            reason: reason.into(),
            attempts,
            recorded_at,
        }
    }
}

/// Writers on several threads may share one log; each record is written as a
/// single line under a lock.
#[derive(Debug)]
pub struct SkipLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl SkipLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, record: &SkipRecord) -> SuitegenResult<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let _guard = self.lock.lock();
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        info!(
            "skipped {} in {} at {:?}: {}",
            record.entity, record.project, record.stage, record.reason
        );
        Ok(())
    }

    /// All records written so far; an absent file reads as empty.
    pub fn read_all(&self) -> SuitegenResult<Vec<SkipRecord>> {
        let file = match std::fs::File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut records = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            records.push(serde_json::from_str(&line)?);
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let log = SkipLog::new(dir.path().join("logs/skipped.jsonl"));
        assert!(log.read_all().unwrap().is_empty());
        log.append(&SkipRecord::new("proj", "foo", SkipStage::Generation, "exhausted", 3))
            .unwrap();
        log.append(&SkipRecord::new(
            "proj",
            "Bar.baz",
            SkipStage::LintCorrection,
            "E0602",
            2,
        ))
        .unwrap();
        let records = log.read_all().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].entity, "foo");
        assert_eq!(records[1].stage, SkipStage::LintCorrection);
        assert!(records[1].recorded_at > 0);
    }

    #[test]
    fn test_stage_serializes_snake_case() {
        let record = SkipRecord::new("p", "e", SkipStage::SyntaxCorrection, "r", 1);
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"stage\":\"syntax_correction\""));
    }
}
