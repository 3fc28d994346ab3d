//! Run report

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

use crate::models::TransferOutcome;

/// Aggregate counters for one migration run
///
/// `migrated` counts every message written to the destination; `deleted`
/// counts only those removed from the source. A migrated message that failed
/// verification appears in `migrated` and `unverified` but never in
/// `deleted`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunReport {
    /// Source messages matched by the search query
    pub considered: usize,
    pub migrated: usize,
    pub skipped_duplicate: usize,
    /// Listed but no longer present when fetched
    pub skipped_missing: usize,
    /// Could not be fetched because the batch fetch failed
    pub failed_fetch: usize,
    /// Write retries exhausted
    pub failed: usize,
    /// Migrated but not confirmed, so kept at the source
    pub unverified: usize,
    pub deleted: usize,
    /// Approved for deletion but the final delete failed
    pub delete_failed: usize,
    pub delete_after_copy: bool,
    pub safety_mode: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunReport {
    pub fn new(delete_after_copy: bool, safety_mode: bool) -> Self {
        Self {
            delete_after_copy,
            safety_mode,
            started_at: Some(Utc::now()),
            ..Self::default()
        }
    }

    /// Count one message's outcome
    pub fn record(&mut self, outcome: TransferOutcome) {
        if outcome.is_migrated() {
            self.migrated += 1;
        }
        match outcome {
            TransferOutcome::SkippedDuplicate => self.skipped_duplicate += 1,
            TransferOutcome::SkippedMissing => self.skipped_missing += 1,
            TransferOutcome::FailedFetch => self.failed_fetch += 1,
            TransferOutcome::FailedWrite => self.failed += 1,
            TransferOutcome::MigratedUnverified => self.unverified += 1,
            TransferOutcome::Migrated | TransferOutcome::MigratedDeletable => {}
        }
    }

    /// Skipped for any reason
    pub fn skipped(&self) -> usize {
        self.skipped_duplicate + self.skipped_missing
    }

    /// Messages processed so far
    pub fn processed(&self) -> usize {
        self.migrated + self.skipped() + self.failed + self.failed_fetch
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// Wall-clock duration in milliseconds, once finished
    pub fn duration_ms(&self) -> Option<i64> {
        Some((self.finished_at? - self.started_at?).num_milliseconds())
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Migrated: {}", self.migrated)?;
        writeln!(f, "Skipped (dedupe): {}", self.skipped_duplicate)?;
        if self.skipped_missing > 0 {
            writeln!(f, "Skipped (missing at source): {}", self.skipped_missing)?;
        }
        if self.failed > 0 || self.failed_fetch > 0 {
            writeln!(f, "Failed: {}", self.failed + self.failed_fetch)?;
        }
        if self.delete_after_copy {
            writeln!(
                f,
                "Deleted from source: {} (safety_mode={})",
                self.deleted,
                if self.safety_mode { "on" } else { "off" }
            )?;
            if self.unverified > 0 {
                writeln!(f, "Kept at source (unverified): {}", self.unverified)?;
            }
            if self.delete_failed > 0 {
                writeln!(f, "Kept at source (delete failed): {}", self.delete_failed)?;
            }
        }
        Ok(())
    }
}
