//! IMAP mail store over the blocking `imap` client
//!
//! Supports implicit TLS, STARTTLS and plaintext sessions. All commands use
//! UIDs so handles stay stable while the session is open.

use ::imap::types::Flag;
use chrono::{DateTime, FixedOffset, Utc};
use log::{debug, info, warn};
use native_tls::{TlsConnector, TlsStream};
use std::collections::HashMap;
use std::net::TcpStream;

use super::{MailStoreClient, OutgoingMessage};
use crate::error::StoreError;
use crate::identity::{self, IdentityKey};
use crate::models::{MessageRecord, flags};
use crate::settings::ImapEndpoint;

/// Items requested per source message: one round trip per batch
const FETCH_ITEMS: &str = "(UID FLAGS INTERNALDATE BODY.PEEK[])";

/// Items requested per destination message while indexing or verifying
const HEADER_ITEMS: &str = "(UID BODY.PEEK[HEADER.FIELDS (MESSAGE-ID)])";

enum Connection {
    Tls(::imap::Session<TlsStream<TcpStream>>),
    Plain(::imap::Session<TcpStream>),
}

/// Run `$body` against whichever session type is open
macro_rules! with_session {
    ($conn:expr, $session:ident => $body:expr) => {
        match $conn {
            Connection::Tls($session) => $body,
            Connection::Plain($session) => $body,
        }
    };
}

/// An authenticated IMAP session
pub struct ImapStore {
    connection: Connection,
    host: String,
}

impl ImapStore {
    /// Connect and log in
    ///
    /// # Errors
    /// `Transport` for network and TLS failures (including certificate
    /// verification), `Auth` when the server rejects the credentials.
    pub fn connect(endpoint: &ImapEndpoint) -> Result<Self, StoreError> {
        let port = endpoint.port();
        let addr = (endpoint.host.as_str(), port);
        info!(
            "Connecting to {}:{} (ssl={}, starttls={}, verify={})",
            endpoint.host, port, endpoint.ssl, endpoint.starttls, endpoint.ssl_verify
        );

        let connection = if endpoint.ssl || endpoint.starttls {
            let tls = tls_connector(endpoint.ssl_verify)?;
            let client = if endpoint.ssl {
                ::imap::connect(addr, &endpoint.host, &tls)?
            } else {
                ::imap::connect_starttls(addr, &endpoint.host, &tls)?
            };
            Connection::Tls(
                client
                    .login(&endpoint.username, &endpoint.password)
                    .map_err(|(e, _)| login_error(e))?,
            )
        } else {
            let stream = TcpStream::connect(addr)
                .map_err(|e| StoreError::Transport(format!("{}:{}: {}", endpoint.host, port, e)))?;
            let mut client = ::imap::Client::new(stream);
            client.read_greeting()?;
            Connection::Plain(
                client
                    .login(&endpoint.username, &endpoint.password)
                    .map_err(|(e, _)| login_error(e))?,
            )
        };

        debug!("Logged in to {} as {}", endpoint.host, endpoint.username);
        Ok(Self {
            connection,
            host: endpoint.host.clone(),
        })
    }
}

impl MailStoreClient for ImapStore {
    type Handle = u32;

    fn ensure_mailbox(&mut self, name: &str) -> Result<(), StoreError> {
        let exists = with_session!(&mut self.connection, s => s.select(name).is_ok());
        if exists {
            return Ok(());
        }

        info!("Creating mailbox {} on {}", name, self.host);
        with_session!(&mut self.connection, s => {
            s.create(name)
                .map_err(|e| StoreError::Storage(format!("create {}: {}", name, e)))?;
            s.select(name)
                .map_err(|e| StoreError::Storage(format!("select {}: {}", name, e)))?;
        });
        Ok(())
    }

    fn select_mailbox(&mut self, name: &str) -> Result<(), StoreError> {
        let mailbox = with_session!(&mut self.connection, s => s.select(name))
            .map_err(|e| StoreError::Storage(format!("select {}: {}", name, e)))?;
        debug!("Selected {} on {} ({} messages)", name, self.host, mailbox.exists);
        Ok(())
    }

    fn list_identifiers(&mut self, query: &str) -> Result<Vec<u32>, StoreError> {
        let uids = with_session!(&mut self.connection, s => s.uid_search(query))?;
        let mut uids: Vec<u32> = uids.into_iter().collect();
        uids.sort_unstable();
        Ok(uids)
    }

    fn fetch(&mut self, handles: &[u32]) -> Result<HashMap<u32, MessageRecord<u32>>, StoreError> {
        if handles.is_empty() {
            return Ok(HashMap::new());
        }
        let set = uid_set(handles);
        let fetches = with_session!(&mut self.connection, s => s.uid_fetch(&set, FETCH_ITEMS))?;

        let mut records = HashMap::with_capacity(handles.len());
        for fetch in fetches.iter() {
            let Some(uid) = fetch.uid else {
                continue;
            };
            let Some(body) = fetch.body() else {
                debug!("No body returned for UID {}", uid);
                continue;
            };
            let flags = fetch.flags().iter().map(|f| f.to_string()).collect();
            let internal_date = fetch.internal_date().map(|d| d.with_timezone(&Utc));
            records.insert(uid, MessageRecord::new(uid, body.to_vec(), flags, internal_date));
        }
        Ok(records)
    }

    fn fetch_headers(&mut self, handles: &[u32]) -> Result<HashMap<u32, Vec<u8>>, StoreError> {
        if handles.is_empty() {
            return Ok(HashMap::new());
        }
        let set = uid_set(handles);
        let fetches = with_session!(&mut self.connection, s => s.uid_fetch(&set, HEADER_ITEMS))?;

        Ok(fetches
            .iter()
            .filter_map(|f| Some((f.uid?, f.header()?.to_vec())))
            .collect())
    }

    fn write(&mut self, message: &OutgoingMessage<'_>) -> Result<(), StoreError> {
        // \Recent is server-managed and rejected on APPEND
        let append_flags: Vec<Flag<'_>> = message
            .flags
            .iter()
            .filter(|f| !f.eq_ignore_ascii_case(flags::RECENT))
            .map(|f| Flag::from(f.as_str()))
            .collect();
        let date: Option<DateTime<FixedOffset>> = message.internal_date.map(DateTime::from);

        with_session!(&mut self.connection, s => {
            s.append_with_flags_and_date(message.mailbox, message.raw, &append_flags, date)
        })?;
        Ok(())
    }

    fn search(&mut self, mailbox: &str, key: &IdentityKey) -> Result<bool, StoreError> {
        let query = message_id_query(key);
        let uids = with_session!(&mut self.connection, s => {
            s.examine(mailbox)?;
            s.uid_search(&query)
        })?;
        if uids.is_empty() {
            return Ok(false);
        }

        // SEARCH HEADER is a substring match; confirm the exact value
        let uids: Vec<u32> = uids.into_iter().collect();
        let headers = self.fetch_headers(&uids)?;
        let confirmed = headers.values().any(|h| identity_matches(h, key));
        if !confirmed {
            debug!("{} matched {} message(s) by substring only", key, uids.len());
        }
        Ok(confirmed)
    }

    fn mark_deleted_and_expunge(&mut self, handles: &[u32]) -> Result<(), StoreError> {
        if handles.is_empty() {
            return Ok(());
        }
        let set = uid_set(handles);
        with_session!(&mut self.connection, s => {
            s.uid_store(&set, format!("+FLAGS.SILENT ({})", flags::DELETED))?;
            s.expunge()?;
        });
        Ok(())
    }

    fn logout(&mut self) -> Result<(), StoreError> {
        with_session!(&mut self.connection, s => s.logout())?;
        debug!("Logged out of {}", self.host);
        Ok(())
    }
}

fn tls_connector(verify: bool) -> Result<TlsConnector, StoreError> {
    let mut builder = TlsConnector::builder();
    if !verify {
        warn!("TLS certificate verification is disabled");
        builder
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true);
    }
    builder
        .build()
        .map_err(|e| StoreError::Transport(e.to_string()))
}

fn login_error(e: ::imap::Error) -> StoreError {
    match e {
        ::imap::Error::No(msg) | ::imap::Error::Bad(msg) => StoreError::Auth(msg),
        other => StoreError::from(other),
    }
}

/// Comma-separated UID set, e.g. `4,7,9`
fn uid_set(uids: &[u32]) -> String {
    uids.iter()
        .map(|u| u.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// `SEARCH` criteria for a `Message-ID`, using the bracketed form
fn message_id_query(key: &IdentityKey) -> String {
    format!("HEADER Message-ID {}", quote(&key.to_string()))
}

/// Whether a fetched header block carries exactly `key`
fn identity_matches(header: &[u8], key: &IdentityKey) -> bool {
    identity::extract(header).as_ref() == Some(key)
}

/// Quote a search argument as an IMAP quoted string
fn quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uid_set() {
        assert_eq!(uid_set(&[4, 7, 9]), "4,7,9");
        assert_eq!(uid_set(&[1]), "1");
    }

    #[test]
    fn test_quote() {
        assert_eq!(quote("abc@example.com"), "\"abc@example.com\"");
        assert_eq!(quote("a\"b\\c"), "\"a\\\"b\\\\c\"");
    }

    #[test]
    fn test_message_id_query_uses_bracketed_form() {
        let key = IdentityKey::parse("<1@host>").unwrap();
        assert_eq!(message_id_query(&key), "HEADER Message-ID \"<1@host>\"");

        // A sibling id no longer contains the search string
        assert!(!"<11@host>".contains("<1@host>"));
        assert!(!"<a1@host>".contains("<1@host>"));
    }

    #[test]
    fn test_header_fetch_requests_only_message_id() {
        assert!(HEADER_ITEMS.contains("BODY.PEEK[HEADER.FIELDS (MESSAGE-ID)]"));
        assert!(!HEADER_ITEMS.contains("BODY.PEEK[HEADER]"));
    }

    #[test]
    fn test_identity_matches_rejects_substring_sibling() {
        let key = IdentityKey::parse("<1@host>").unwrap();
        assert!(identity_matches(b"Message-ID: <1@host>\r\n\r\n", &key));
        assert!(identity_matches(b"message-id:  <1@host>\r\n", &key));
        assert!(!identity_matches(b"Message-ID: <11@host>\r\n\r\n", &key));
        assert!(!identity_matches(b"Message-ID: <a1@host>\r\n\r\n", &key));
        assert!(!identity_matches(b"\r\n", &key));
    }

    #[test]
    fn test_login_error_mapping() {
        let err = login_error(::imap::Error::No("[AUTHENTICATIONFAILED] nope".to_string()));
        assert!(matches!(err, StoreError::Auth(_)));
        let err = login_error(::imap::Error::ConnectionLost);
        assert!(matches!(err, StoreError::Transport(_)));
    }

    #[test]
    fn test_tls_connector_builds_both_modes() {
        assert!(tls_connector(true).is_ok());
        assert!(tls_connector(false).is_ok());
    }
}
