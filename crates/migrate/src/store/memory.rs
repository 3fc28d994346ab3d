//! In-memory mail store
//!
//! Behaves like a single-user IMAP account with UID handles. Used to
//! exercise the transfer engine without a network, with hooks to inject the
//! failures a real server produces.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};

use super::{MailStoreClient, OutgoingMessage};
use crate::error::StoreError;
use crate::identity::{self, IdentityKey};
use crate::models::{MessageRecord, flags};

/// A message held by [`InMemoryMailStore`]
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMessage {
    pub raw: Vec<u8>,
    pub flags: Vec<String>,
    pub internal_date: Option<DateTime<Utc>>,
}

impl StoredMessage {
    /// Identity derived from the stored content
    pub fn identity(&self) -> Option<IdentityKey> {
        identity::extract(&self.raw)
    }

    /// Whether the message carries `\Seen`
    pub fn is_seen(&self) -> bool {
        self.flags.iter().any(|f| f.eq_ignore_ascii_case(flags::SEEN))
    }
}

/// In-memory implementation of [`MailStoreClient`]
#[derive(Debug, Default)]
pub struct InMemoryMailStore {
    mailboxes: BTreeMap<String, BTreeMap<u32, StoredMessage>>,
    selected: Option<String>,
    next_uid: u32,

    // Failure injection
    transient_write_failures: u32,
    rejected_identities: HashSet<IdentityKey>,
    hidden_from_search: HashSet<IdentityKey>,
    search_outage: bool,
    vanished: HashSet<u32>,
    failed_fetch_batches: HashSet<usize>,
    delete_failure: bool,
    immutable_mailboxes: bool,

    // Observations
    write_attempts: u32,
    search_calls: u32,
    delete_calls: u32,
    fetch_calls: usize,
    largest_fetch: usize,
}

impl InMemoryMailStore {
    /// Create an empty store with a single `INBOX`
    pub fn new() -> Self {
        let mut store = Self::default();
        store.mailboxes.insert("INBOX".to_string(), BTreeMap::new());
        store.next_uid = 1;
        store
    }

    /// Add a message to `mailbox`, creating it if needed. Returns its UID.
    pub fn insert(&mut self, mailbox: &str, raw: impl Into<Vec<u8>>, flags: &[&str]) -> u32 {
        self.insert_message(
            mailbox,
            StoredMessage {
                raw: raw.into(),
                flags: flags.iter().map(|f| f.to_string()).collect(),
                internal_date: None,
            },
        )
    }

    /// Add a fully specified message to `mailbox`. Returns its UID.
    pub fn insert_message(&mut self, mailbox: &str, message: StoredMessage) -> u32 {
        let uid = self.next_uid.max(1);
        self.next_uid = uid + 1;
        self.mailboxes
            .entry(mailbox.to_string())
            .or_default()
            .insert(uid, message);
        uid
    }

    /// Messages currently in `mailbox`, in UID order
    pub fn messages(&self, mailbox: &str) -> Vec<&StoredMessage> {
        self.mailboxes
            .get(mailbox)
            .map(|m| m.values().collect())
            .unwrap_or_default()
    }

    /// Number of messages in `mailbox`
    pub fn count(&self, mailbox: &str) -> usize {
        self.mailboxes.get(mailbox).map_or(0, |m| m.len())
    }

    /// Whether `mailbox` still holds `uid`
    pub fn contains_uid(&self, mailbox: &str, uid: u32) -> bool {
        self.mailboxes.get(mailbox).is_some_and(|m| m.contains_key(&uid))
    }

    /// Whether `mailbox` exists
    pub fn has_mailbox(&self, mailbox: &str) -> bool {
        self.mailboxes.contains_key(mailbox)
    }

    /// Fail the next `count` writes, then accept writes again
    pub fn fail_next_writes(&mut self, count: u32) {
        self.transient_write_failures = count;
    }

    /// Reject every write of a message with this identity
    pub fn reject_identity(&mut self, key: IdentityKey) {
        self.rejected_identities.insert(key);
    }

    /// Make searches for this identity find nothing, even if stored
    pub fn hide_from_search(&mut self, key: IdentityKey) {
        self.hidden_from_search.insert(key);
    }

    /// Make every search fail with a remote error
    pub fn set_search_outage(&mut self, outage: bool) {
        self.search_outage = outage;
    }

    /// Make fetches return no data for `uid`, as if removed concurrently
    pub fn vanish(&mut self, uid: u32) {
        self.vanished.insert(uid);
    }

    /// Fail the n-th fetch call (0-based) with a remote error
    pub fn fail_fetch_call(&mut self, call: usize) {
        self.failed_fetch_batches.insert(call);
    }

    /// Make the final flag+expunge fail
    pub fn set_delete_failure(&mut self, fail: bool) {
        self.delete_failure = fail;
    }

    /// Refuse to create mailboxes
    pub fn set_immutable_mailboxes(&mut self, immutable: bool) {
        self.immutable_mailboxes = immutable;
    }

    /// Total write attempts, successful or not
    pub fn write_attempts(&self) -> u32 {
        self.write_attempts
    }

    /// Total search round trips
    pub fn search_calls(&self) -> u32 {
        self.search_calls
    }

    /// Total flag+expunge operations
    pub fn delete_calls(&self) -> u32 {
        self.delete_calls
    }

    /// Largest number of handles requested by a single fetch
    pub fn largest_fetch(&self) -> usize {
        self.largest_fetch
    }

    fn selected_mailbox(&self) -> Result<&BTreeMap<u32, StoredMessage>, StoreError> {
        let name = self
            .selected
            .as_deref()
            .ok_or_else(|| StoreError::Storage("no mailbox selected".to_string()))?;
        self.mailboxes
            .get(name)
            .ok_or_else(|| StoreError::Storage(format!("mailbox {} does not exist", name)))
    }

    fn track_fetch(&mut self, batch: usize) -> Result<(), StoreError> {
        let call = self.fetch_calls;
        self.fetch_calls += 1;
        self.largest_fetch = self.largest_fetch.max(batch);
        if self.failed_fetch_batches.contains(&call) {
            return Err(StoreError::Remote(format!("fetch call {} failed", call)));
        }
        Ok(())
    }
}

impl MailStoreClient for InMemoryMailStore {
    type Handle = u32;

    fn ensure_mailbox(&mut self, name: &str) -> Result<(), StoreError> {
        if self.mailboxes.contains_key(name) {
            return Ok(());
        }
        if self.immutable_mailboxes {
            return Err(StoreError::Storage(format!("cannot create mailbox {}", name)));
        }
        self.mailboxes.insert(name.to_string(), BTreeMap::new());
        Ok(())
    }

    fn select_mailbox(&mut self, name: &str) -> Result<(), StoreError> {
        if !self.mailboxes.contains_key(name) {
            return Err(StoreError::Storage(format!("mailbox {} does not exist", name)));
        }
        self.selected = Some(name.to_string());
        Ok(())
    }

    fn list_identifiers(&mut self, query: &str) -> Result<Vec<u32>, StoreError> {
        let mailbox = self.selected_mailbox()?;
        let uids = match query.trim().to_ascii_uppercase().as_str() {
            "ALL" | "" => mailbox.keys().copied().collect(),
            "UNSEEN" => mailbox
                .iter()
                .filter(|(_, m)| !m.is_seen())
                .map(|(uid, _)| *uid)
                .collect(),
            "SEEN" => mailbox
                .iter()
                .filter(|(_, m)| m.is_seen())
                .map(|(uid, _)| *uid)
                .collect(),
            other => {
                return Err(StoreError::Remote(format!(
                    "unsupported search query {}",
                    other
                )));
            }
        };
        Ok(uids)
    }

    fn fetch(&mut self, handles: &[u32]) -> Result<HashMap<u32, MessageRecord<u32>>, StoreError> {
        self.track_fetch(handles.len())?;
        let mailbox = self.selected_mailbox()?;

        Ok(handles
            .iter()
            .filter(|uid| !self.vanished.contains(uid))
            .filter_map(|uid| {
                mailbox.get(uid).map(|m| {
                    (
                        *uid,
                        MessageRecord::new(*uid, m.raw.clone(), m.flags.clone(), m.internal_date),
                    )
                })
            })
            .collect())
    }

    fn fetch_headers(&mut self, handles: &[u32]) -> Result<HashMap<u32, Vec<u8>>, StoreError> {
        self.track_fetch(handles.len())?;
        let mailbox = self.selected_mailbox()?;

        Ok(handles
            .iter()
            .filter_map(|uid| mailbox.get(uid).map(|m| (*uid, header_block(&m.raw).to_vec())))
            .collect())
    }

    fn write(&mut self, message: &OutgoingMessage<'_>) -> Result<(), StoreError> {
        self.write_attempts += 1;

        if self.transient_write_failures > 0 {
            self.transient_write_failures -= 1;
            return Err(StoreError::Remote("temporary append failure".to_string()));
        }
        if let Some(key) = identity::extract(message.raw)
            && self.rejected_identities.contains(&key)
        {
            return Err(StoreError::Remote(format!("append rejected for {}", key)));
        }
        if !self.mailboxes.contains_key(message.mailbox) {
            return Err(StoreError::Storage(format!(
                "mailbox {} does not exist",
                message.mailbox
            )));
        }

        self.insert_message(
            message.mailbox,
            StoredMessage {
                raw: message.raw.to_vec(),
                flags: message.flags.to_vec(),
                internal_date: message.internal_date,
            },
        );
        Ok(())
    }

    fn search(&mut self, mailbox: &str, key: &IdentityKey) -> Result<bool, StoreError> {
        self.search_calls += 1;

        if self.search_outage {
            return Err(StoreError::Remote("search unavailable".to_string()));
        }
        if self.hidden_from_search.contains(key) {
            return Ok(false);
        }
        let messages = self
            .mailboxes
            .get(mailbox)
            .ok_or_else(|| StoreError::Storage(format!("mailbox {} does not exist", mailbox)))?;
        Ok(messages.values().any(|m| m.identity().as_ref() == Some(key)))
    }

    fn mark_deleted_and_expunge(&mut self, handles: &[u32]) -> Result<(), StoreError> {
        self.delete_calls += 1;

        if self.delete_failure {
            return Err(StoreError::Remote("expunge failed".to_string()));
        }
        let name = self
            .selected
            .clone()
            .ok_or_else(|| StoreError::Storage("no mailbox selected".to_string()))?;
        if let Some(mailbox) = self.mailboxes.get_mut(&name) {
            for uid in handles {
                mailbox.remove(uid);
            }
        }
        Ok(())
    }
}

/// The header section of a raw message, including the terminating blank line
fn header_block(raw: &[u8]) -> &[u8] {
    raw.windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|i| &raw[..i + 4])
        .or_else(|| raw.windows(2).position(|w| w == b"\n\n").map(|i| &raw[..i + 2]))
        .unwrap_or(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    const RAW: &[u8] = b"Message-ID: <m1@host>\r\nSubject: one\r\n\r\nbody";

    #[test]
    fn test_insert_and_list() {
        let mut store = InMemoryMailStore::new();
        let a = store.insert("INBOX", RAW, &["\\Seen"]);
        let b = store.insert("INBOX", RAW, &[]);
        assert!(b > a);

        store.select_mailbox("INBOX").unwrap();
        assert_eq!(store.list_identifiers("ALL").unwrap(), vec![a, b]);
        assert_eq!(store.list_identifiers("UNSEEN").unwrap(), vec![b]);
        assert!(store.list_identifiers("FROM x").is_err());
    }

    #[test]
    fn test_fetch_skips_vanished() {
        let mut store = InMemoryMailStore::new();
        let a = store.insert("INBOX", RAW, &[]);
        let b = store.insert("INBOX", RAW, &[]);
        store.vanish(b);
        store.select_mailbox("INBOX").unwrap();

        let fetched = store.fetch(&[a, b, 999]).unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[&a].identity.as_ref().unwrap().as_str(), "m1@host");
        assert_eq!(store.largest_fetch(), 3);
    }

    #[test]
    fn test_fetch_headers_excludes_body() {
        let mut store = InMemoryMailStore::new();
        let a = store.insert("INBOX", RAW, &[]);
        store.select_mailbox("INBOX").unwrap();

        let headers = store.fetch_headers(&[a]).unwrap();
        assert_eq!(headers[&a], b"Message-ID: <m1@host>\r\nSubject: one\r\n\r\n".to_vec());
    }

    #[test]
    fn test_transient_write_failures() {
        let mut store = InMemoryMailStore::new();
        store.fail_next_writes(1);
        let msg = OutgoingMessage {
            mailbox: "INBOX",
            raw: RAW,
            flags: &[],
            internal_date: None,
        };

        assert!(store.write(&msg).is_err());
        assert!(store.write(&msg).is_ok());
        assert_eq!(store.write_attempts(), 2);
        assert_eq!(store.count("INBOX"), 1);
    }

    #[test]
    fn test_write_to_missing_mailbox() {
        let mut store = InMemoryMailStore::new();
        let msg = OutgoingMessage {
            mailbox: "Archive",
            raw: RAW,
            flags: &[],
            internal_date: None,
        };
        assert!(matches!(store.write(&msg), Err(StoreError::Storage(_))));

        store.ensure_mailbox("Archive").unwrap();
        store.ensure_mailbox("Archive").unwrap();
        assert!(store.write(&msg).is_ok());
    }

    #[test]
    fn test_search_and_injection() {
        let mut store = InMemoryMailStore::new();
        store.insert("INBOX", RAW, &[]);
        let key = IdentityKey::parse("<m1@host>").unwrap();
        let other = IdentityKey::parse("<m2@host>").unwrap();

        assert!(store.search("INBOX", &key).unwrap());
        assert!(!store.search("INBOX", &other).unwrap());

        store.hide_from_search(key.clone());
        assert!(!store.search("INBOX", &key).unwrap());

        store.set_search_outage(true);
        assert!(store.search("INBOX", &other).is_err());
        assert_eq!(store.search_calls(), 4);
    }

    #[test]
    fn test_mark_deleted_and_expunge() {
        let mut store = InMemoryMailStore::new();
        let a = store.insert("INBOX", RAW, &[]);
        let b = store.insert("INBOX", RAW, &[]);
        store.select_mailbox("INBOX").unwrap();

        store.mark_deleted_and_expunge(&[a]).unwrap();
        assert!(!store.contains_uid("INBOX", a));
        assert!(store.contains_uid("INBOX", b));
        assert_eq!(store.delete_calls(), 1);
    }
}
