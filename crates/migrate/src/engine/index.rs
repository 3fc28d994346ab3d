//! Destination identity index

use log::{info, warn};
use std::collections::HashSet;

use crate::error::StoreError;
use crate::identity::{self, IdentityKey};
use crate::store::MailStoreClient;

/// Header fetches per round trip while indexing
pub const INDEX_FETCH_BATCH: usize = 500;

/// Identity keys known to exist at the destination
///
/// Built once per run and extended in memory as messages are written, so a
/// run never copies the same identity twice. Never persisted.
#[derive(Debug, Default, Clone)]
pub struct DestinationIndex {
    keys: HashSet<IdentityKey>,
}

impl DestinationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &IdentityKey) -> bool {
        self.keys.contains(key)
    }

    /// Record a key; returns `false` if it was already present
    pub fn insert(&mut self, key: IdentityKey) -> bool {
        self.keys.insert(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl FromIterator<IdentityKey> for DestinationIndex {
    fn from_iter<I: IntoIterator<Item = IdentityKey>>(iter: I) -> Self {
        Self {
            keys: iter.into_iter().collect(),
        }
    }
}

/// Scan every message in `mailbox` and collect their identity keys
///
/// Messages without a `Message-ID` are ignored. A failed header batch is
/// logged and skipped; only a failure to select or list the mailbox is
/// returned as an error.
pub fn build_index<D: MailStoreClient>(
    dest: &mut D,
    mailbox: &str,
) -> Result<DestinationIndex, StoreError> {
    dest.select_mailbox(mailbox)?;
    let handles = dest.list_identifiers("ALL")?;
    info!("Indexing {} destination messages in {}", handles.len(), mailbox);

    let mut index = DestinationIndex::new();
    let mut without_identity = 0usize;

    for batch in handles.chunks(INDEX_FETCH_BATCH) {
        let headers = match dest.fetch_headers(batch) {
            Ok(headers) => headers,
            Err(e) => {
                warn!("Skipping {} destination messages: header fetch failed: {}", batch.len(), e);
                continue;
            }
        };

        for header in headers.values() {
            match identity::extract(header) {
                Some(key) => {
                    index.insert(key);
                }
                None => without_identity += 1,
            }
        }
    }

    info!(
        "Indexed {} Message-IDs in destination ({} without Message-ID)",
        index.len(),
        without_identity
    );
    Ok(index)
}
