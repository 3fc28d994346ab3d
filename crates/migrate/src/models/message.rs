//! Fetched message model

use chrono::{DateTime, Utc};

use crate::identity::{self, IdentityKey};

/// IMAP system flags the engine cares about
pub mod flags {
    pub const SEEN: &str = "\\Seen";
    pub const FLAGGED: &str = "\\Flagged";
    pub const DELETED: &str = "\\Deleted";
    pub const RECENT: &str = "\\Recent";
}

/// A message fetched from the source store
///
/// Immutable once fetched. The handle is only meaningful within the session
/// that produced it.
#[derive(Debug, Clone)]
pub struct MessageRecord<H> {
    /// Backend handle (IMAP UID, Gmail message ID, ...)
    pub handle: H,
    /// Full RFC 5322 content
    pub raw: Vec<u8>,
    /// Flags as reported by the source, e.g. `\Seen`, `$Forwarded`
    pub flags: Vec<String>,
    /// Original storage timestamp (IMAP INTERNALDATE)
    pub internal_date: Option<DateTime<Utc>>,
    /// Identity derived from the `Message-ID` header
    pub identity: Option<IdentityKey>,
}

impl<H> MessageRecord<H> {
    /// Build a record, deriving the identity key from the raw content
    pub fn new(
        handle: H,
        raw: Vec<u8>,
        flags: Vec<String>,
        internal_date: Option<DateTime<Utc>>,
    ) -> Self {
        let identity = identity::extract(&raw);
        Self {
            handle,
            raw,
            flags,
            internal_date,
            identity,
        }
    }
}

/// Remove `\Seen` so the destination copy arrives unread
///
/// All other flags pass through unchanged and in order.
pub fn strip_seen(source_flags: &[String]) -> Vec<String> {
    source_flags
        .iter()
        .filter(|f| !f.eq_ignore_ascii_case(flags::SEEN))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_strip_seen() {
        let flags = strings(&["\\Seen", "\\Flagged", "$Forwarded"]);
        assert_eq!(strip_seen(&flags), strings(&["\\Flagged", "$Forwarded"]));
    }

    #[test]
    fn test_strip_seen_is_case_insensitive() {
        let flags = strings(&["\\SEEN", "\\seen", "\\Answered"]);
        assert_eq!(strip_seen(&flags), strings(&["\\Answered"]));
    }

    #[test]
    fn test_strip_seen_without_seen() {
        let flags = strings(&["\\Draft"]);
        assert_eq!(strip_seen(&flags), flags);
        assert!(strip_seen(&[]).is_empty());
    }

    #[test]
    fn test_record_derives_identity() {
        let raw = b"Message-ID: <r@host>\r\nSubject: s\r\n\r\nbody".to_vec();
        let record = MessageRecord::new(7u32, raw, strings(&["\\Flagged"]), None);
        assert_eq!(record.identity.unwrap().as_str(), "r@host");

        let record = MessageRecord::new(8u32, b"Subject: s\r\n\r\n".to_vec(), vec![], None);
        assert!(record.identity.is_none());
    }
}
