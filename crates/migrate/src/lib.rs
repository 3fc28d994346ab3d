//! Migrate crate - Safe mailbox migration
//!
//! This crate moves messages between mail stores without losing data:
//! - Message identity by `Message-ID` and a destination dedup index
//! - Batched transfer with retried writes and unread normalization
//! - Per-message verification before any source message is deleted
//! - IMAP (TLS, STARTTLS, plaintext) and Gmail API adapters
//! - Recurring jobs with interval and cron triggers
//!
//! The engine is synchronous and talks to stores only through
//! [`MailStoreClient`], so it runs unchanged against the in-memory store.

pub mod engine;
pub mod error;
pub mod gmail;
pub mod identity;
pub mod jobs;
pub mod models;
pub mod runner;
pub mod settings;
pub mod store;

pub use engine::{
    DedupeBy, DeletionSet, DestinationIndex, RetryPolicy, RunReport, Sleeper, ThreadSleeper,
    TransferEngine, TransferOptions, VerifyStrategy, build_index, verify,
};
pub use error::StoreError;
pub use gmail::{GmailAuth, GmailClient, GmailStore};
pub use identity::IdentityKey;
pub use jobs::{
    JobConfig, JobKind, JobStatus, JobStore, JsonFileJobStore, Migrator, MigratorRegistry,
    Scheduler, Trigger,
};
pub use models::{MessageRecord, TransferOutcome, TransferRecord};
pub use runner::run_migration;
pub use settings::{GmailCredentials, MigrationConfig};
pub use store::{ImapStore, InMemoryMailStore, MailStoreClient, OutgoingMessage};
