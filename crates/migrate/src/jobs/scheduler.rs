//! Sequential job scheduler
//!
//! Jobs never overlap: each due job runs to completion before the next one
//! starts, so two jobs writing to the same destination are serialized.

use anyhow::Result;
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use std::collections::HashMap;
use std::time::Duration;

use super::{JobConfig, JobError, JobStatus, JobStore, MigratorRegistry, next_fire_time};
use crate::engine::RunReport;

/// Runs stored jobs when their triggers fire
pub struct Scheduler<'a, S: JobStore> {
    store: &'a mut S,
    registry: MigratorRegistry,
    /// Next fire time per job, computed lazily from the stored timestamps
    next_runs: HashMap<String, DateTime<Utc>>,
}

impl<'a, S: JobStore> Scheduler<'a, S> {
    pub fn new(store: &'a mut S, registry: MigratorRegistry) -> Self {
        Self {
            store,
            registry,
            next_runs: HashMap::new(),
        }
    }

    pub fn store(&self) -> &S {
        self.store
    }

    /// Add a new job
    ///
    /// # Errors
    /// [`JobError`] for an empty or taken id, an invalid trigger or a kind
    /// without a registered migrator; store errors otherwise.
    pub fn add_job(&mut self, id: &str, job: JobConfig) -> Result<()> {
        if id.trim().is_empty() {
            return Err(JobError::EmptyId.into());
        }
        if self.store.get(id)?.is_some() {
            return Err(JobError::AlreadyExists(id.to_string()).into());
        }
        if !self.registry.contains(job.kind) {
            return Err(JobError::NoMigrator(job.kind).into());
        }
        job.trigger.validate()?;

        self.store.put(id, &job)?;
        self.next_runs.remove(id);
        info!("Added job {} ({}, {})", id, job.kind, job.trigger);
        Ok(())
    }

    /// Remove a job; returns whether it existed
    pub fn remove_job(&mut self, id: &str) -> Result<bool> {
        self.next_runs.remove(id);
        let removed = self.store.remove(id)?;
        if removed {
            info!("Removed job {}", id);
        }
        Ok(removed)
    }

    /// Flip a job's enabled flag; returns the new state
    pub fn toggle_job(&mut self, id: &str) -> Result<bool> {
        let mut job = self.load(id)?;
        job.enabled = !job.enabled;
        self.store.put(id, &job)?;
        self.next_runs.remove(id);
        info!(
            "Job {} {}",
            id,
            if job.enabled { "enabled" } else { "disabled" }
        );
        Ok(job.enabled)
    }

    /// Run a job immediately, whether or not it is enabled
    pub fn run_job_now(&mut self, id: &str) -> Result<JobStatus> {
        let now = Utc::now();
        let status = self.execute(id, now)?;
        if let Some(job) = self.store.get(id)?
            && let Some(next) = next_fire_time(&job.trigger, now)
        {
            self.next_runs.insert(id.to_string(), next);
        }
        Ok(status)
    }

    /// Enabled jobs whose next fire time is at or before `now`, earliest first
    pub fn due_jobs(&mut self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let jobs = self.store.list()?;
        self.next_runs.retain(|id, _| jobs.contains_key(id));

        let mut due: Vec<(DateTime<Utc>, String)> = Vec::new();
        for (id, job) in jobs.iter().filter(|(_, job)| job.enabled) {
            let next = match self.next_runs.get(id) {
                Some(next) => *next,
                None => {
                    let anchor = job.last_run.unwrap_or(job.created);
                    let Some(next) = next_fire_time(&job.trigger, anchor) else {
                        warn!("Job {} has a trigger that never fires: {}", id, job.trigger);
                        continue;
                    };
                    self.next_runs.insert(id.clone(), next);
                    next
                }
            };
            if next <= now {
                due.push((next, id.clone()));
            }
        }

        due.sort();
        Ok(due.into_iter().map(|(_, id)| id).collect())
    }

    /// Run every due job once; returns how many ran
    ///
    /// Missed fire times are coalesced into a single run. A failing job is
    /// recorded in its status and does not stop the remaining jobs.
    pub fn run_pending(&mut self, now: DateTime<Utc>) -> Result<usize> {
        let due = self.due_jobs(now)?;

        for id in &due {
            if let Err(e) = self.execute(id, now) {
                error!("Job {} could not be run: {:#}", id, e);
            }
            self.next_runs.remove(id);
            if let Some(job) = self.store.get(id)?
                && let Some(next) = next_fire_time(&job.trigger, now)
            {
                self.next_runs.insert(id.clone(), next);
            }
        }
        Ok(due.len())
    }

    /// Poll for due jobs forever
    pub fn run_forever(&mut self, poll: Duration) -> ! {
        info!("Scheduler started (poll every {}s)", poll.as_secs());
        loop {
            match self.run_pending(Utc::now()) {
                Ok(0) => {}
                Ok(ran) => info!("Ran {} job(s)", ran),
                Err(e) => error!("Scheduler pass failed: {:#}", e),
            }
            std::thread::sleep(poll);
        }
    }

    fn load(&self, id: &str) -> Result<JobConfig> {
        self.store
            .get(id)?
            .ok_or_else(|| JobError::NotFound(id.to_string()).into())
    }

    /// Run one job and persist its status before and after
    fn execute(&mut self, id: &str, now: DateTime<Utc>) -> Result<JobStatus> {
        let mut job = self.load(id)?;

        job.status = JobStatus::Running;
        job.last_run = Some(now);
        self.store.put(id, &job)?;
        info!("Running job {} ({})", id, job.kind);

        match self.run_migration(&job) {
            Ok(report) => {
                info!(
                    "Job {} succeeded: migrated {}, skipped {}, deleted {}",
                    id,
                    report.migrated,
                    report.skipped(),
                    report.deleted
                );
                job.status = JobStatus::Success;
                job.last_success = Some(Utc::now());
            }
            Err(e) => {
                error!("Job {} failed: {:#}", id, e);
                job.status = JobStatus::Error;
                job.last_error = Some(format!("{:#}", e));
            }
        }

        self.store.put(id, &job)?;
        Ok(job.status)
    }

    fn run_migration(&self, job: &JobConfig) -> Result<RunReport> {
        let migrator = self
            .registry
            .get(job.kind)
            .ok_or(JobError::NoMigrator(job.kind))?;
        let path = self.store.resolve_path(&job.config_file);
        let config = migrator.load_config(&path)?;
        migrator.run(&config)
    }
}
