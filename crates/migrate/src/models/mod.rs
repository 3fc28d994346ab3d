//! Domain models for a migration run

mod message;
mod transfer;

pub use message::{MessageRecord, flags, strip_seen};
pub use transfer::{TransferOutcome, TransferRecord};
