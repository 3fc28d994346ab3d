//! Mail-store trait definitions

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt::{Debug, Display};
use std::hash::Hash;

use crate::error::StoreError;
use crate::identity::IdentityKey;
use crate::models::MessageRecord;

/// A message to append or import at the destination
#[derive(Debug, Clone, Copy)]
pub struct OutgoingMessage<'a> {
    /// Destination mailbox (ignored by label-based backends)
    pub mailbox: &'a str,
    /// Full RFC 5322 content
    pub raw: &'a [u8],
    /// Flags to set; `\Seen` has already been removed by the engine
    pub flags: &'a [String],
    /// Original storage timestamp to preserve
    pub internal_date: Option<DateTime<Utc>>,
}

/// Uniform interface over an authenticated mail-store session
///
/// Every method is a blocking round trip. Handles are opaque and only valid
/// within the session that produced them.
pub trait MailStoreClient {
    /// Backend message handle (IMAP UID, Gmail message ID, ...)
    type Handle: Clone + Eq + Hash + Debug + Display;

    /// Create `name` if it does not exist. Idempotent.
    fn ensure_mailbox(&mut self, name: &str) -> Result<(), StoreError>;

    /// Make `name` the mailbox that listing, fetching and deleting act on
    fn select_mailbox(&mut self, name: &str) -> Result<(), StoreError>;

    /// List message handles matching a backend-specific query
    ///
    /// Ordering is backend-defined and only used for batching.
    fn list_identifiers(&mut self, query: &str) -> Result<Vec<Self::Handle>, StoreError>;

    /// Fetch raw content, flags, internal date and identity for a batch
    ///
    /// One round trip per batch. Handles with no data are absent from the map.
    fn fetch(
        &mut self,
        handles: &[Self::Handle],
    ) -> Result<HashMap<Self::Handle, MessageRecord<Self::Handle>>, StoreError>;

    /// Fetch only the header block carrying `Message-ID` for a batch
    ///
    /// Used to build the destination index. Per-message failures are
    /// dropped from the result rather than failing the batch.
    fn fetch_headers(
        &mut self,
        handles: &[Self::Handle],
    ) -> Result<HashMap<Self::Handle, Vec<u8>>, StoreError>;

    /// Append or import a message, preserving its timestamp and unread state
    fn write(&mut self, message: &OutgoingMessage<'_>) -> Result<(), StoreError>;

    /// Independent existence check by identity; always a fresh round trip
    fn search(&mut self, mailbox: &str, key: &IdentityKey) -> Result<bool, StoreError>;

    /// Flag the handles deleted and purge them in one operation
    fn mark_deleted_and_expunge(&mut self, handles: &[Self::Handle]) -> Result<(), StoreError>;

    /// Close the session
    fn logout(&mut self) -> Result<(), StoreError> {
        Ok(())
    }
}
