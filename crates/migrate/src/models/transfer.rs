//! Per-message transfer outcomes

use serde::Serialize;

use crate::identity::IdentityKey;

/// Terminal state of one source message within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferOutcome {
    /// Written to the destination; deletion was not requested
    Migrated,
    /// Identity already present at the destination
    SkippedDuplicate,
    /// The source returned no data for the handle (removed concurrently)
    SkippedMissing,
    /// The batch containing this message could not be fetched
    FailedFetch,
    /// Every write attempt failed; the source copy is untouched
    FailedWrite,
    /// Written, but the destination copy could not be confirmed
    MigratedUnverified,
    /// Written and confirmed (or verification waived); queued for deletion
    MigratedDeletable,
}

impl TransferOutcome {
    /// Whether the message now exists at the destination because of this run
    pub fn is_migrated(self) -> bool {
        matches!(
            self,
            TransferOutcome::Migrated
                | TransferOutcome::MigratedUnverified
                | TransferOutcome::MigratedDeletable
        )
    }
}

/// Outcome of processing a single source message
#[derive(Debug, Clone, Serialize)]
pub struct TransferRecord<H> {
    pub handle: H,
    pub identity: Option<IdentityKey>,
    pub outcome: TransferOutcome,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_migrated() {
        assert!(TransferOutcome::Migrated.is_migrated());
        assert!(TransferOutcome::MigratedUnverified.is_migrated());
        assert!(TransferOutcome::MigratedDeletable.is_migrated());
        assert!(!TransferOutcome::SkippedDuplicate.is_migrated());
        assert!(!TransferOutcome::SkippedMissing.is_migrated());
        assert!(!TransferOutcome::FailedWrite.is_migrated());
        assert!(!TransferOutcome::FailedFetch.is_migrated());
    }
}
