//! Verification and deferred deletion
//!
//! A source message can only enter the [`DeletionSet`] with a
//! [`Confirmation`], and confirmations are only produced by [`verify`] or by
//! an explicit waiver from the engine configuration.

use log::{error, info, warn};
use serde::{Deserialize, Serialize};

use crate::identity::IdentityKey;
use crate::store::MailStoreClient;

/// How a written message is confirmed at the destination
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyStrategy {
    /// Search the destination for the message's `Message-ID`
    #[default]
    MessageId,
    /// Assume success; only meaningful when deletion safety is waived
    None,
}

/// Proof that a written message may be deleted at the source
#[derive(Debug)]
pub struct Confirmation {
    _private: (),
}

impl Confirmation {
    /// Deletion approved without a destination lookup
    pub(crate) fn waived() -> Self {
        Self { _private: () }
    }
}

/// Confirm that a just-written message exists at the destination
///
/// With [`VerifyStrategy::MessageId`] this issues one independent search per
/// call. A missing identity, a search with no match and a failed search all
/// yield `None`: a message is never approved for deletion unless it was
/// positively found.
pub fn verify<D: MailStoreClient>(
    dest: &mut D,
    mailbox: &str,
    identity: Option<&IdentityKey>,
    strategy: VerifyStrategy,
) -> Option<Confirmation> {
    match strategy {
        VerifyStrategy::None => Some(Confirmation::waived()),
        VerifyStrategy::MessageId => {
            let key = identity?;
            match dest.search(mailbox, key) {
                Ok(true) => Some(Confirmation { _private: () }),
                Ok(false) => None,
                Err(e) => {
                    warn!("Verification search for {} failed: {}", key, e);
                    None
                }
            }
        }
    }
}

/// Result of flushing a [`DeletionSet`]
#[derive(Debug, PartialEq, Eq)]
pub struct FlushOutcome {
    /// Messages flagged and expunged
    pub deleted: usize,
    /// Messages that remain at the source because the delete failed
    pub failed: usize,
}

/// Source handles approved for deletion, in approval order
#[derive(Debug)]
pub struct DeletionSet<H> {
    handles: Vec<H>,
}

impl<H> Default for DeletionSet<H> {
    fn default() -> Self {
        Self {
            handles: Vec::new(),
        }
    }
}

impl<H> DeletionSet<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a handle; requires a confirmation for that message
    pub fn approve(&mut self, handle: H, _confirmation: Confirmation) {
        self.handles.push(handle);
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn handles(&self) -> &[H] {
        &self.handles
    }

    /// Delete every approved handle in one flag+expunge operation
    ///
    /// Not retried: on failure the messages stay at the source and a later
    /// run skips them as duplicates.
    pub fn flush<S>(self, source: &mut S) -> FlushOutcome
    where
        S: MailStoreClient<Handle = H>,
    {
        if self.handles.is_empty() {
            return FlushOutcome {
                deleted: 0,
                failed: 0,
            };
        }

        info!("Deleting {} source messages", self.handles.len());
        match source.mark_deleted_and_expunge(&self.handles) {
            Ok(()) => FlushOutcome {
                deleted: self.handles.len(),
                failed: 0,
            },
            Err(e) => {
                error!("Failed to delete/expunge on source: {}", e);
                FlushOutcome {
                    deleted: 0,
                    failed: self.handles.len(),
                }
            }
        }
    }
}
