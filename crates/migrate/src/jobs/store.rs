//! Job persistence

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::{JobKind, Trigger};

/// Last known state of a job
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Idle,
    Running,
    Success,
    Error,
}

fn default_true() -> bool {
    true
}

/// A scheduled migration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    pub kind: JobKind,
    /// Migration document; relative paths resolve against the job file
    pub config_file: PathBuf,
    pub trigger: Trigger,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub status: JobStatus,
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_success: Option<DateTime<Utc>>,
    /// Message of the most recent failure; kept after later successes
    #[serde(default)]
    pub last_error: Option<String>,
}

impl JobConfig {
    /// A new enabled, idle job created now
    pub fn new(kind: JobKind, config_file: impl Into<PathBuf>, trigger: Trigger) -> Self {
        Self {
            kind,
            config_file: config_file.into(),
            trigger,
            enabled: true,
            created: Utc::now(),
            status: JobStatus::Idle,
            last_run: None,
            last_success: None,
            last_error: None,
        }
    }
}

/// Persistent `job id -> JobConfig` mapping
pub trait JobStore {
    /// All jobs, ordered by id
    fn list(&self) -> Result<BTreeMap<String, JobConfig>>;

    fn get(&self, id: &str) -> Result<Option<JobConfig>>;

    /// Insert or replace a job
    fn put(&mut self, id: &str, job: &JobConfig) -> Result<()>;

    /// Remove a job; returns whether it existed
    fn remove(&mut self, id: &str) -> Result<bool>;

    /// Resolve a job's `config_file` for opening
    fn resolve_path(&self, path: &Path) -> PathBuf {
        path.to_path_buf()
    }
}

/// Jobs kept in a single JSON document
///
/// Every mutation rewrites the whole document atomically. A missing file is
/// an empty job list.
#[derive(Debug, Clone)]
pub struct JsonFileJobStore {
    path: PathBuf,
}

impl JsonFileJobStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self, jobs: &BTreeMap<String, JobConfig>) -> Result<()> {
        config::save_json_file(&self.path, jobs)
            .with_context(|| format!("Failed to save jobs to {}", self.path.display()))
    }
}

impl JobStore for JsonFileJobStore {
    fn list(&self) -> Result<BTreeMap<String, JobConfig>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        config::load_json_file(&self.path)
            .with_context(|| format!("Failed to load jobs from {}", self.path.display()))
    }

    fn get(&self, id: &str) -> Result<Option<JobConfig>> {
        Ok(self.list()?.remove(id))
    }

    fn put(&mut self, id: &str, job: &JobConfig) -> Result<()> {
        let mut jobs = self.list()?;
        jobs.insert(id.to_string(), job.clone());
        self.save(&jobs)
    }

    fn remove(&mut self, id: &str) -> Result<bool> {
        let mut jobs = self.list()?;
        if jobs.remove(id).is_none() {
            return Ok(false);
        }
        self.save(&jobs)?;
        Ok(true)
    }

    fn resolve_path(&self, path: &Path) -> PathBuf {
        config::resolve_relative(&self.path, path)
    }
}

/// Jobs held in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryJobStore {
    jobs: BTreeMap<String, JobConfig>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobStore for InMemoryJobStore {
    fn list(&self) -> Result<BTreeMap<String, JobConfig>> {
        Ok(self.jobs.clone())
    }

    fn get(&self, id: &str) -> Result<Option<JobConfig>> {
        Ok(self.jobs.get(id).cloned())
    }

    fn put(&mut self, id: &str, job: &JobConfig) -> Result<()> {
        self.jobs.insert(id.to_string(), job.clone());
        Ok(())
    }

    fn remove(&mut self, id: &str) -> Result<bool> {
        Ok(self.jobs.remove(id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::IntervalUnit;

    fn job() -> JobConfig {
        JobConfig::new(
            JobKind::EmailMove,
            "move.json",
            Trigger::interval(IntervalUnit::Hours, 1),
        )
    }

    #[test]
    fn test_json_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");
        let mut store = JsonFileJobStore::new(&path);

        assert!(store.list().unwrap().is_empty());
        store.put("nightly", &job()).unwrap();
        assert!(path.exists());

        let reopened = JsonFileJobStore::new(&path);
        let loaded = reopened.get("nightly").unwrap().unwrap();
        assert_eq!(loaded, job_with_created(loaded.created));
        assert!(reopened.get("other").unwrap().is_none());

        assert!(store.remove("nightly").unwrap());
        assert!(!store.remove("nightly").unwrap());
        assert!(reopened.list().unwrap().is_empty());
    }

    fn job_with_created(created: DateTime<Utc>) -> JobConfig {
        JobConfig { created, ..job() }
    }

    #[test]
    fn test_json_store_resolves_relative_config() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileJobStore::new(dir.path().join("jobs.json"));
        assert_eq!(
            store.resolve_path(Path::new("move.json")),
            dir.path().join("move.json")
        );
        assert_eq!(
            store.resolve_path(Path::new("/etc/move.json")),
            PathBuf::from("/etc/move.json")
        );
    }

    #[test]
    fn test_job_document_defaults() {
        let json = r#"{
            "nightly": {
                "kind": "imap_to_gmail",
                "config_file": "gmail.json",
                "trigger": {"type": "cron", "expression": "0 2 * * *"},
                "created": "2024-05-01T10:00:00Z"
            }
        }"#;
        let jobs: BTreeMap<String, JobConfig> = serde_json::from_str(json).unwrap();
        let job = &jobs["nightly"];
        assert_eq!(job.kind, JobKind::ImapToGmail);
        assert!(job.enabled);
        assert_eq!(job.status, JobStatus::Idle);
        assert!(job.last_run.is_none());
    }

    #[test]
    fn test_in_memory_store() {
        let mut store = InMemoryJobStore::new();
        store.put("a", &job()).unwrap();
        store.put("b", &job()).unwrap();
        assert_eq!(store.list().unwrap().keys().collect::<Vec<_>>(), vec!["a", "b"]);
        assert!(store.remove("a").unwrap());
        assert!(store.get("a").unwrap().is_none());
    }
}
