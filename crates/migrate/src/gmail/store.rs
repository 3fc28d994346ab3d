//! Gmail as a migration destination
//!
//! Gmail has no mailboxes to create or select and no way to receive raw
//! content back in a form the engine needs, so source-side operations are
//! `Unsupported`. Unread state and stars are expressed as labels.

use log::{debug, warn};
use std::collections::HashMap;

use super::{AuthFailedError, GmailClient};
use crate::error::StoreError;
use crate::identity::IdentityKey;
use crate::models::{MessageRecord, flags};
use crate::store::{MailStoreClient, OutgoingMessage};

/// Label IDs Gmail uses for message state
pub mod labels {
    pub const UNREAD: &str = "UNREAD";
    pub const STARRED: &str = "STARRED";
}

/// Retries for a single metadata read while indexing
const METADATA_RETRIES: u32 = 3;

/// Gmail destination session
pub struct GmailStore {
    client: GmailClient,
    labels: Vec<String>,
    mark_as_unread: bool,
}

impl GmailStore {
    /// Wrap an authenticated client
    ///
    /// # Arguments
    /// * `labels` - Label IDs applied to every imported message
    /// * `mark_as_unread` - Import messages with the `UNREAD` label
    pub fn new(client: GmailClient, labels: Vec<String>, mark_as_unread: bool) -> Self {
        Self {
            client,
            labels,
            mark_as_unread,
        }
    }

    /// Obtain a token up front so bad credentials fail the run at setup
    pub fn connect(
        client: GmailClient,
        labels: Vec<String>,
        mark_as_unread: bool,
    ) -> Result<Self, StoreError> {
        client.authenticate().map_err(store_error)?;
        Ok(Self::new(client, labels, mark_as_unread))
    }

    /// Label IDs for one imported message
    fn label_ids_for(&self, message_flags: &[String]) -> Vec<String> {
        import_labels(&self.labels, self.mark_as_unread, message_flags)
    }
}

/// Compute the label set for an import
///
/// Configured labels first, then `UNREAD` when requested, then `STARRED`
/// for messages flagged at the source. No duplicates.
pub fn import_labels(configured: &[String], mark_as_unread: bool, message_flags: &[String]) -> Vec<String> {
    let mut label_ids: Vec<String> = Vec::with_capacity(configured.len() + 2);
    let mut push = |label: &str| {
        if !label_ids.iter().any(|l| l == label) {
            label_ids.push(label.to_string());
        }
    };

    for label in configured {
        push(label);
    }
    if mark_as_unread {
        push(labels::UNREAD);
    }
    if message_flags
        .iter()
        .any(|f| f.eq_ignore_ascii_case(flags::FLAGGED))
    {
        push(labels::STARRED);
    }
    label_ids
}

/// Map a client error onto the store taxonomy
fn store_error(e: anyhow::Error) -> StoreError {
    if e.downcast_ref::<AuthFailedError>().is_some() {
        return StoreError::Auth(format!("{:#}", e));
    }
    match e.downcast_ref::<ureq::Error>() {
        Some(ureq::Error::StatusCode(401 | 403)) => StoreError::Auth(format!("{:#}", e)),
        Some(ureq::Error::StatusCode(_)) => StoreError::Remote(format!("{:#}", e)),
        Some(_) => StoreError::Transport(format!("{:#}", e)),
        None => StoreError::Remote(format!("{:#}", e)),
    }
}

impl MailStoreClient for GmailStore {
    type Handle = String;

    fn ensure_mailbox(&mut self, name: &str) -> Result<(), StoreError> {
        debug!("Gmail has no mailboxes; ignoring ensure_mailbox({})", name);
        Ok(())
    }

    fn select_mailbox(&mut self, _name: &str) -> Result<(), StoreError> {
        Ok(())
    }

    fn list_identifiers(&mut self, query: &str) -> Result<Vec<String>, StoreError> {
        let query = match query.trim() {
            "" | "ALL" => None,
            q => Some(q),
        };
        self.client.list_message_ids_all(query).map_err(store_error)
    }

    fn fetch(
        &mut self,
        _handles: &[String],
    ) -> Result<HashMap<String, MessageRecord<String>>, StoreError> {
        Err(StoreError::Unsupported("fetching raw messages from Gmail"))
    }

    fn fetch_headers(&mut self, handles: &[String]) -> Result<HashMap<String, Vec<u8>>, StoreError> {
        let mut headers = HashMap::with_capacity(handles.len());

        for id in handles {
            let message = match self
                .client
                .get_message_metadata_with_retry(id, &["Message-ID"], METADATA_RETRIES)
            {
                Ok(message) => message,
                Err(e) => {
                    warn!("Error fetching Gmail message {}: {:#}", id, e);
                    continue;
                }
            };

            let value = message
                .payload
                .and_then(|p| p.headers)
                .unwrap_or_default()
                .into_iter()
                .find(|h| h.name.eq_ignore_ascii_case("message-id"))
                .map(|h| h.value);
            if let Some(value) = value {
                headers.insert(id.clone(), format!("Message-ID: {}\r\n\r\n", value).into_bytes());
            }
        }

        Ok(headers)
    }

    fn write(&mut self, message: &OutgoingMessage<'_>) -> Result<(), StoreError> {
        let label_ids = self.label_ids_for(message.flags);
        let imported = self
            .client
            .import_message(message.raw, &label_ids)
            .map_err(store_error)?;
        debug!("Imported Gmail message {}", imported.id);
        Ok(())
    }

    fn search(&mut self, _mailbox: &str, key: &IdentityKey) -> Result<bool, StoreError> {
        self.client
            .exists_by_message_id(key.as_str())
            .map_err(store_error)
    }

    fn mark_deleted_and_expunge(&mut self, _handles: &[String]) -> Result<(), StoreError> {
        Err(StoreError::Unsupported("deleting from Gmail"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_import_labels_unread_and_starred() {
        let labels = import_labels(&strings(&["INBOX"]), true, &strings(&["\\Flagged"]));
        assert_eq!(labels, strings(&["INBOX", "UNREAD", "STARRED"]));
    }

    #[test]
    fn test_import_labels_without_unread() {
        let labels = import_labels(&[], false, &strings(&["\\Answered"]));
        assert!(labels.is_empty());
    }

    #[test]
    fn test_import_labels_no_duplicates() {
        let labels = import_labels(&strings(&["UNREAD", "Label_7"]), true, &[]);
        assert_eq!(labels, strings(&["UNREAD", "Label_7"]));
    }

    #[test]
    fn test_store_error_mapping() {
        let e = anyhow::Error::new(ureq::Error::StatusCode(403)).context("import");
        assert!(matches!(store_error(e), StoreError::Auth(_)));

        let e = anyhow::Error::new(ureq::Error::StatusCode(429)).context("import");
        assert!(matches!(store_error(e), StoreError::Remote(_)));

        let e = anyhow::anyhow!("token file unreadable").context(AuthFailedError);
        assert!(matches!(store_error(e), StoreError::Auth(_)));

        let e = anyhow::anyhow!("bad json");
        assert!(matches!(store_error(e), StoreError::Remote(_)));
    }
}
