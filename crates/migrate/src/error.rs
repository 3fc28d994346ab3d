//! Error types for mail-store operations

use thiserror::Error;

/// Errors raised by a [`MailStoreClient`](crate::store::MailStoreClient)
///
/// Connection-time variants (`Auth`, `Transport`) are fatal to a run. The
/// engine converts every other variant into a per-message outcome.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Credentials were rejected
    #[error("authentication failed: {0}")]
    Auth(String),

    /// TLS or network failure while establishing or using a session
    #[error("transport error: {0}")]
    Transport(String),

    /// The backend could not create or select a mailbox
    #[error("storage error: {0}")]
    Storage(String),

    /// The server answered a command with an error
    #[error("remote error: {0}")]
    Remote(String),

    /// The backend does not offer this operation
    #[error("{0} is not supported by this backend")]
    Unsupported(&'static str),
}

impl StoreError {
    /// Whether this error should abort a run during setup
    pub fn is_setup_fatal(&self) -> bool {
        matches!(self, StoreError::Auth(_) | StoreError::Transport(_))
    }
}

impl From<imap::Error> for StoreError {
    fn from(e: imap::Error) -> Self {
        match e {
            imap::Error::Io(e) => StoreError::Transport(e.to_string()),
            imap::Error::Tls(e) => StoreError::Transport(e.to_string()),
            imap::Error::TlsHandshake(e) => StoreError::Transport(e.to_string()),
            imap::Error::ConnectionLost => StoreError::Transport("connection lost".to_string()),
            other => StoreError::Remote(other.to_string()),
        }
    }
}

impl From<ureq::Error> for StoreError {
    fn from(e: ureq::Error) -> Self {
        match e {
            ureq::Error::StatusCode(401) | ureq::Error::StatusCode(403) => {
                StoreError::Auth(e.to_string())
            }
            ureq::Error::StatusCode(_) => StoreError::Remote(e.to_string()),
            other => StoreError::Transport(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_fatal_classification() {
        assert!(StoreError::Auth("bad password".into()).is_setup_fatal());
        assert!(StoreError::Transport("reset".into()).is_setup_fatal());
        assert!(!StoreError::Remote("NO".into()).is_setup_fatal());
        assert!(!StoreError::Storage("no such mailbox".into()).is_setup_fatal());
        assert!(!StoreError::Unsupported("delete").is_setup_fatal());
    }

    #[test]
    fn test_http_status_mapping() {
        assert!(matches!(
            StoreError::from(ureq::Error::StatusCode(401)),
            StoreError::Auth(_)
        ));
        assert!(matches!(
            StoreError::from(ureq::Error::StatusCode(500)),
            StoreError::Remote(_)
        ));
    }

    #[test]
    fn test_unsupported_message() {
        let e = StoreError::Unsupported("fetch");
        assert_eq!(e.to_string(), "fetch is not supported by this backend");
    }
}
