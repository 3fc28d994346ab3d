//! Transfer engine: the batch copy loop
//!
//! Each source message moves through a linear sequence and stops at the
//! first terminal state:
//!
//! 1. listed, then fetched (no data: skipped as missing)
//! 2. dedup-checked against the destination index (hit: skipped)
//! 3. `\Seen` stripped so the copy arrives unread
//! 4. written with bounded retry (exhausted: failed, source untouched)
//! 5. identity added to the index
//! 6. if deleting: verified (or waived) and queued for the final delete
//!
//! Everything runs sequentially on the caller's thread.

use log::{error, info};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::index::{DestinationIndex, build_index};
use super::report::RunReport;
use super::retry::{RetryPolicy, Sleeper, ThreadSleeper, with_retry};
use super::verify::{Confirmation, DeletionSet, VerifyStrategy, verify};
use crate::error::StoreError;
use crate::models::{MessageRecord, TransferOutcome, TransferRecord, strip_seen};
use crate::store::{MailStoreClient, OutgoingMessage};

static THREAD_SLEEPER: ThreadSleeper = ThreadSleeper;

/// Deduplication mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupeBy {
    /// Skip messages whose `Message-ID` already exists at the destination
    #[default]
    MessageId,
    /// Copy everything; avoids the destination index pre-pass
    None,
}

/// Settings for one run
#[derive(Debug, Clone, PartialEq)]
pub struct TransferOptions {
    pub source_mailbox: String,
    pub dest_mailbox: String,
    /// Backend search expression selecting source messages
    pub search_query: String,
    /// Messages fetched per round trip; bounds resident message content
    pub batch_size: usize,
    pub dedupe_by: DedupeBy,
    pub create_dest_mailbox: bool,
    /// Pause after each successfully written message
    pub idle_delay: Duration,
    pub delete_after_copy: bool,
    /// Verify each copy before approving deletion
    pub safety_mode: bool,
    pub verify_strategy: VerifyStrategy,
    pub retry: RetryPolicy,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            source_mailbox: "INBOX".to_string(),
            dest_mailbox: "INBOX".to_string(),
            search_query: "ALL".to_string(),
            batch_size: 200,
            dedupe_by: DedupeBy::MessageId,
            create_dest_mailbox: true,
            idle_delay: Duration::ZERO,
            delete_after_copy: false,
            safety_mode: true,
            verify_strategy: VerifyStrategy::MessageId,
            retry: RetryPolicy::default(),
        }
    }
}

/// Copies messages from `source` to `dest` under [`TransferOptions`]
pub struct TransferEngine<'a, S: MailStoreClient, D: MailStoreClient> {
    source: &'a mut S,
    dest: &'a mut D,
    options: TransferOptions,
    sleeper: &'a dyn Sleeper,
}

impl<'a, S: MailStoreClient, D: MailStoreClient> TransferEngine<'a, S, D> {
    pub fn new(source: &'a mut S, dest: &'a mut D, options: TransferOptions) -> Self {
        Self {
            source,
            dest,
            options,
            sleeper: &THREAD_SLEEPER,
        }
    }

    /// Use a different sleeper for backoff and idle delays
    pub fn with_sleeper(mut self, sleeper: &'a dyn Sleeper) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn options(&self) -> &TransferOptions {
        &self.options
    }

    /// Run the migration
    ///
    /// # Errors
    /// Only setup failures are returned: creating or selecting mailboxes,
    /// listing the source and building the destination index. Per-message
    /// failures are counted in the report.
    pub fn run(&mut self) -> Result<RunReport, StoreError> {
        self.run_with(|_| {})
    }

    /// Run the migration, passing every per-message outcome to `observe`
    pub fn run_with<F>(&mut self, mut observe: F) -> Result<RunReport, StoreError>
    where
        F: FnMut(&TransferRecord<S::Handle>),
    {
        let opts = self.options.clone();
        let mut report = RunReport::new(opts.delete_after_copy, opts.safety_mode);

        if opts.create_dest_mailbox {
            self.dest.ensure_mailbox(&opts.dest_mailbox)?;
        }

        info!("Selecting source mailbox: {}", opts.source_mailbox);
        self.source.select_mailbox(&opts.source_mailbox)?;
        info!("Selecting dest mailbox: {}", opts.dest_mailbox);
        self.dest.select_mailbox(&opts.dest_mailbox)?;

        info!("Listing source messages ({})", opts.search_query);
        let handles = self.source.list_identifiers(&opts.search_query)?;
        report.considered = handles.len();
        info!("Found {} messages to consider", handles.len());

        let mut index = match opts.dedupe_by {
            DedupeBy::MessageId => {
                info!("Building destination Message-ID index (this can take a while for large mailboxes)");
                build_index(self.dest, &opts.dest_mailbox)?
            }
            DedupeBy::None => DestinationIndex::new(),
        };

        let mut deletions = DeletionSet::new();
        let batch_size = opts.batch_size.max(1);

        for batch in handles.chunks(batch_size) {
            // Only this batch's content is resident; dropped at the end of the iteration
            let mut fetched = match self.source.fetch(batch) {
                Ok(fetched) => fetched,
                Err(e) => {
                    error!("Failed to fetch batch of {} messages: {}", batch.len(), e);
                    for handle in batch {
                        let record = TransferRecord {
                            handle: handle.clone(),
                            identity: None,
                            outcome: TransferOutcome::FailedFetch,
                        };
                        report.record(record.outcome);
                        observe(&record);
                    }
                    continue;
                }
            };

            for handle in batch {
                let message = fetched.remove(handle);
                let identity = message.as_ref().and_then(|m| m.identity.clone());
                let outcome = self.process(handle, message, &mut index, &mut deletions);

                report.record(outcome);
                observe(&TransferRecord {
                    handle: handle.clone(),
                    identity,
                    outcome,
                });
            }

            info!(
                "Progress: migrated {}, skipped {} of {} total",
                report.migrated,
                report.skipped(),
                report.considered
            );
        }

        if opts.delete_after_copy {
            let outcome = deletions.flush(self.source);
            report.deleted = outcome.deleted;
            report.delete_failed = outcome.failed;
        }

        report.finish();
        Ok(report)
    }

    /// Drive one message to its terminal state
    fn process(
        &mut self,
        handle: &S::Handle,
        message: Option<MessageRecord<S::Handle>>,
        index: &mut DestinationIndex,
        deletions: &mut DeletionSet<S::Handle>,
    ) -> TransferOutcome {
        let Some(message) = message.filter(|m| !m.raw.is_empty()) else {
            info!("Message {} is gone from the source; skipping", handle);
            return TransferOutcome::SkippedMissing;
        };

        if self.options.dedupe_by == DedupeBy::MessageId
            && let Some(key) = &message.identity
            && index.contains(key)
        {
            return TransferOutcome::SkippedDuplicate;
        }

        let flags = strip_seen(&message.flags);
        let outgoing = OutgoingMessage {
            mailbox: &self.options.dest_mailbox,
            raw: &message.raw,
            flags: &flags,
            internal_date: message.internal_date,
        };
        let what = format!("Append of message {}", handle);
        let written = with_retry(&self.options.retry, self.sleeper, &what, || {
            self.dest.write(&outgoing)
        });
        if written.is_err() {
            return TransferOutcome::FailedWrite;
        }
        self.sleeper.sleep(self.options.idle_delay);

        if let Some(key) = &message.identity {
            index.insert(key.clone());
        }

        if !self.options.delete_after_copy {
            return TransferOutcome::Migrated;
        }

        let confirmation = if self.options.safety_mode {
            verify(
                self.dest,
                &self.options.dest_mailbox,
                message.identity.as_ref(),
                self.options.verify_strategy,
            )
        } else {
            Some(Confirmation::waived())
        };

        match confirmation {
            Some(confirmation) => {
                deletions.approve(handle.clone(), confirmation);
                TransferOutcome::MigratedDeletable
            }
            None => {
                info!("Skipping deletion for {}: verification not confirmed", handle);
                TransferOutcome::MigratedUnverified
            }
        }
    }
}
