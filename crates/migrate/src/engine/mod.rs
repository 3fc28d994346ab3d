//! Migration engine
//!
//! Moves messages from a source store to a destination store:
//! - builds a destination identity index for deduplication
//! - copies source messages in bounded batches with retried writes
//! - verifies each copy before approving the source message for deletion
//! - deletes approved messages once, at the end of the run

mod index;
mod report;
mod retry;
mod transfer;
mod verify;

pub use index::{DestinationIndex, INDEX_FETCH_BATCH, build_index};
pub use report::RunReport;
pub use retry::{RetryPolicy, Sleeper, ThreadSleeper, with_retry};
pub use transfer::{DedupeBy, TransferEngine, TransferOptions};
pub use verify::{Confirmation, DeletionSet, FlushOutcome, VerifyStrategy, verify};
