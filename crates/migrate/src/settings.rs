//! Migration configuration
//!
//! A migration is described by one JSON document:
//!
//! ```json
//! {
//!   "source": { "host": "imap.old.example", "username": "u", "password": "p" },
//!   "dest":   { "host": "imap.new.example", "username": "u", "password": "p" },
//!   "options": { "delete_after_copy": true }
//! }
//! ```
//!
//! `gmail` replaces `dest` for Gmail API imports. Every option has a default.

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::engine::{DedupeBy, RetryPolicy, TransferOptions, VerifyStrategy};

/// Batch size used when nothing is configured
pub const DEFAULT_BATCH_SIZE: usize = 200;

/// Gmail import is slower per message; smaller batches keep progress visible
pub const DEFAULT_GMAIL_BATCH_SIZE: usize = 100;

fn default_true() -> bool {
    true
}

fn default_mailbox() -> String {
    "INBOX".to_string()
}

/// IMAP server and account
#[derive(Clone, Deserialize)]
pub struct ImapEndpoint {
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    pub username: String,
    pub password: String,
    /// Implicit TLS
    #[serde(default = "default_true")]
    pub ssl: bool,
    /// Upgrade a plaintext connection; ignored when `ssl` is set
    #[serde(default)]
    pub starttls: bool,
    #[serde(default = "default_true")]
    pub ssl_verify: bool,
    #[serde(default = "default_mailbox")]
    pub mailbox: String,
}

impl ImapEndpoint {
    /// Configured port, or 993 with implicit TLS and 143 otherwise
    pub fn port(&self) -> u16 {
        self.port.unwrap_or(if self.ssl { 993 } else { 143 })
    }

    fn validate(&self, role: &str) -> Result<()> {
        if self.host.trim().is_empty() {
            bail!("{}.host must not be empty", role);
        }
        if self.username.trim().is_empty() {
            bail!("{}.username must not be empty", role);
        }
        if self.mailbox.trim().is_empty() {
            bail!("{}.mailbox must not be empty", role);
        }
        Ok(())
    }
}

impl fmt::Debug for ImapEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImapEndpoint")
            .field("host", &self.host)
            .field("port", &self.port())
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("ssl", &self.ssl)
            .field("starttls", &self.starttls)
            .field("ssl_verify", &self.ssl_verify)
            .field("mailbox", &self.mailbox)
            .finish()
    }
}

/// Gmail API destination
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GmailSettings {
    /// OAuth client file downloaded from Google Cloud Console
    pub credentials_file: PathBuf,
    /// Token cache, created on first authorization
    pub token_file: PathBuf,
    pub user_id: String,
}

impl Default for GmailSettings {
    fn default() -> Self {
        Self {
            credentials_file: PathBuf::from("credentials.json"),
            token_file: PathBuf::from("token.json"),
            user_id: "me".to_string(),
        }
    }
}

/// Engine options as written in the document
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MigrationOptions {
    /// Unset means 200, or 100 for Gmail
    pub batch_size: Option<usize>,
    pub dedupe_by: DedupeBy,
    pub create_dest_mailbox: bool,
    pub search_query: String,
    pub idle_delay_sec: f64,
    #[serde(alias = "delete_after_import")]
    pub delete_after_copy: bool,
    pub safety_mode: bool,
    pub verify_strategy: VerifyStrategy,
    pub max_retries: u32,
    pub retry_backoff_sec: f64,
    /// Gmail label IDs applied to every import
    pub gmail_labels: Vec<String>,
    pub mark_as_unread: bool,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            batch_size: None,
            dedupe_by: DedupeBy::MessageId,
            create_dest_mailbox: true,
            search_query: "ALL".to_string(),
            idle_delay_sec: 0.0,
            delete_after_copy: false,
            safety_mode: true,
            verify_strategy: VerifyStrategy::MessageId,
            max_retries: 3,
            retry_backoff_sec: 2.0,
            gmail_labels: Vec::new(),
            mark_as_unread: true,
        }
    }
}

/// Where migrated messages go
#[derive(Debug, Clone, Copy)]
pub enum Destination<'a> {
    Imap(&'a ImapEndpoint),
    Gmail(&'a GmailSettings),
}

/// A complete migration document
#[derive(Debug, Clone, Deserialize)]
pub struct MigrationConfig {
    pub source: ImapEndpoint,
    #[serde(default)]
    pub dest: Option<ImapEndpoint>,
    #[serde(default)]
    pub gmail: Option<GmailSettings>,
    #[serde(default)]
    pub options: MigrationOptions,
}

impl MigrationConfig {
    /// Load and validate a document from disk
    ///
    /// Relative Gmail file paths are resolved against the document's
    /// directory.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config: Self = config::load_json_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?;

        if let Some(gmail) = config.gmail.as_mut() {
            gmail.credentials_file = config::resolve_relative(path, &gmail.credentials_file);
            gmail.token_file = config::resolve_relative(path, &gmail.token_file);
        }

        config
            .validate()
            .with_context(|| format!("Invalid config {}", path.display()))?;
        Ok(config)
    }

    /// Parse and validate a document held in memory
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).context("Failed to parse config JSON")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        match (&self.dest, &self.gmail) {
            (Some(_), Some(_)) => bail!("Specify either 'dest' or 'gmail', not both"),
            (None, None) => bail!("Missing destination: specify 'dest' or 'gmail'"),
            _ => {}
        }

        self.source.validate("source")?;
        if let Some(dest) = &self.dest {
            dest.validate("dest")?;
        }

        let opts = &self.options;
        if opts.batch_size == Some(0) {
            bail!("options.batch_size must be at least 1");
        }
        if !opts.idle_delay_sec.is_finite() || opts.idle_delay_sec < 0.0 {
            bail!("options.idle_delay_sec must be a non-negative number");
        }
        if !opts.retry_backoff_sec.is_finite() || opts.retry_backoff_sec < 0.0 {
            bail!("options.retry_backoff_sec must be a non-negative number");
        }
        Ok(())
    }

    pub fn destination(&self) -> Result<Destination<'_>> {
        match (&self.dest, &self.gmail) {
            (Some(dest), None) => Ok(Destination::Imap(dest)),
            (None, Some(gmail)) => Ok(Destination::Gmail(gmail)),
            _ => bail!("Config must name exactly one destination"),
        }
    }

    /// Effective batch size
    pub fn batch_size(&self) -> usize {
        let fallback = if self.gmail.is_some() {
            DEFAULT_GMAIL_BATCH_SIZE
        } else {
            DEFAULT_BATCH_SIZE
        };
        self.options.batch_size.unwrap_or(fallback)
    }

    /// Engine options for this document
    pub fn transfer_options(&self) -> TransferOptions {
        let opts = &self.options;
        let dest_mailbox = self
            .dest
            .as_ref()
            .map_or_else(default_mailbox, |dest| dest.mailbox.clone());

        TransferOptions {
            source_mailbox: self.source.mailbox.clone(),
            dest_mailbox,
            search_query: opts.search_query.clone(),
            batch_size: self.batch_size(),
            dedupe_by: opts.dedupe_by,
            create_dest_mailbox: opts.create_dest_mailbox,
            idle_delay: seconds(opts.idle_delay_sec),
            delete_after_copy: opts.delete_after_copy,
            safety_mode: opts.safety_mode,
            verify_strategy: opts.verify_strategy,
            retry: RetryPolicy::new(opts.max_retries, seconds(opts.retry_backoff_sec)),
        }
    }
}

/// Fractional seconds as a duration; invalid values collapse to zero
fn seconds(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO)
}

/// OAuth client credentials for the Gmail API
#[derive(Debug, Clone)]
pub struct GmailCredentials {
    pub client_id: String,
    pub client_secret: String,
}

/// Google Cloud Console credential file format
#[derive(Deserialize)]
struct GoogleCredentialFile {
    installed: Option<ClientSection>,
    web: Option<ClientSection>,
}

#[derive(Deserialize)]
struct ClientSection {
    client_id: String,
    client_secret: String,
}

impl GmailCredentials {
    /// Load from `path` if it exists, otherwise from the environment
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            return Self::from_file(path);
        }
        Self::from_env().with_context(|| {
            format!(
                "Gmail credentials file {} not found and no environment fallback",
                path.display()
            )
        })
    }

    /// Load credentials from a specific JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let creds: GoogleCredentialFile = config::load_json_file(path)?;
        Self::from_credential_file(creds)
    }

    /// Parse credentials from JSON string (Google Cloud Console format)
    pub fn from_json(json: &str) -> Result<Self> {
        let creds: GoogleCredentialFile =
            serde_json::from_str(json).context("Failed to parse credentials JSON")?;
        Self::from_credential_file(creds)
    }

    fn from_credential_file(creds: GoogleCredentialFile) -> Result<Self> {
        // Desktop clients use "installed", web clients use "web"
        let section = creds
            .installed
            .or(creds.web)
            .context("Credentials file missing 'installed' or 'web' section")?;

        Ok(Self {
            client_id: section.client_id,
            client_secret: section.client_secret,
        })
    }

    /// Load credentials from `GMAIL_CLIENT_ID` and `GMAIL_CLIENT_SECRET`
    pub fn from_env() -> Result<Self> {
        let client_id = std::env::var("GMAIL_CLIENT_ID")
            .context("GMAIL_CLIENT_ID environment variable not set")?;
        let client_secret = std::env::var("GMAIL_CLIENT_SECRET")
            .context("GMAIL_CLIENT_SECRET environment variable not set")?;

        Ok(Self {
            client_id,
            client_secret,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IMAP_TO_IMAP: &str = r#"{
        "source": {"host": "old.example", "username": "u", "password": "p"},
        "dest": {"host": "new.example", "port": 1143, "username": "u", "password": "p",
                 "ssl": false, "starttls": true, "mailbox": "Archive"}
    }"#;

    #[test]
    fn test_defaults() {
        let config = MigrationConfig::from_json(IMAP_TO_IMAP).unwrap();
        assert_eq!(config.source.port(), 993);
        assert_eq!(config.source.mailbox, "INBOX");
        assert!(config.source.ssl_verify);

        let opts = config.transfer_options();
        assert_eq!(opts.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(opts.dest_mailbox, "Archive");
        assert_eq!(opts.search_query, "ALL");
        assert_eq!(opts.dedupe_by, DedupeBy::MessageId);
        assert!(opts.create_dest_mailbox);
        assert!(!opts.delete_after_copy);
        assert!(opts.safety_mode);
        assert_eq!(opts.retry, RetryPolicy::new(3, Duration::from_secs(2)));
        assert_eq!(opts.idle_delay, Duration::ZERO);
    }

    #[test]
    fn test_endpoint_port_fallback() {
        let config = MigrationConfig::from_json(IMAP_TO_IMAP).unwrap();
        let Ok(Destination::Imap(dest)) = config.destination() else {
            panic!("expected IMAP destination");
        };
        assert_eq!(dest.port(), 1143);

        let mut plain = dest.clone();
        plain.port = None;
        assert_eq!(plain.port(), 143);
    }

    #[test]
    fn test_debug_redacts_password() {
        let config = MigrationConfig::from_json(IMAP_TO_IMAP).unwrap();
        let debug = format!("{:?}", config.source);
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("\"p\""));
    }

    #[test]
    fn test_gmail_defaults_and_alias() {
        let json = r#"{
            "source": {"host": "old.example", "username": "u", "password": "p"},
            "gmail": {},
            "options": {"delete_after_import": true, "gmail_labels": ["Label_1"]}
        }"#;
        let config = MigrationConfig::from_json(json).unwrap();
        assert!(matches!(config.destination(), Ok(Destination::Gmail(_))));
        assert_eq!(config.batch_size(), DEFAULT_GMAIL_BATCH_SIZE);
        assert!(config.options.delete_after_copy);
        assert!(config.options.mark_as_unread);

        let gmail = config.gmail.unwrap();
        assert_eq!(gmail.credentials_file, PathBuf::from("credentials.json"));
        assert_eq!(gmail.user_id, "me");
    }

    #[test]
    fn test_rejects_invalid_documents() {
        let both = r#"{
            "source": {"host": "a", "username": "u", "password": "p"},
            "dest": {"host": "b", "username": "u", "password": "p"},
            "gmail": {}
        }"#;
        assert!(MigrationConfig::from_json(both).is_err());

        let neither = r#"{"source": {"host": "a", "username": "u", "password": "p"}}"#;
        assert!(MigrationConfig::from_json(neither).is_err());

        let zero_batch = r#"{
            "source": {"host": "a", "username": "u", "password": "p"},
            "gmail": {},
            "options": {"batch_size": 0}
        }"#;
        assert!(MigrationConfig::from_json(zero_batch).is_err());

        let negative_delay = r#"{
            "source": {"host": "a", "username": "u", "password": "p"},
            "gmail": {},
            "options": {"idle_delay_sec": -1}
        }"#;
        assert!(MigrationConfig::from_json(negative_delay).is_err());

        let bad_enum = r#"{
            "source": {"host": "a", "username": "u", "password": "p"},
            "gmail": {},
            "options": {"dedupe_by": "subject"}
        }"#;
        assert!(MigrationConfig::from_json(bad_enum).is_err());

        let empty_host = r#"{
            "source": {"host": " ", "username": "u", "password": "p"},
            "gmail": {}
        }"#;
        assert!(MigrationConfig::from_json(empty_host).is_err());
    }

    #[test]
    fn test_load_resolves_gmail_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("migration.json");
        std::fs::write(
            &path,
            r#"{
                "source": {"host": "a", "username": "u", "password": "p"},
                "gmail": {"credentials_file": "secrets/client.json", "token_file": "/var/lib/token.json"}
            }"#,
        )
        .unwrap();

        let config = MigrationConfig::load(&path).unwrap();
        let gmail = config.gmail.unwrap();
        assert_eq!(gmail.credentials_file, dir.path().join("secrets/client.json"));
        assert_eq!(gmail.token_file, PathBuf::from("/var/lib/token.json"));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(MigrationConfig::load(&dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_parse_credentials() {
        let installed = r#"{"installed": {"client_id": "id.apps", "client_secret": "s", "token_uri": "x"}}"#;
        let creds = GmailCredentials::from_json(installed).unwrap();
        assert_eq!(creds.client_id, "id.apps");

        let web = r#"{"web": {"client_id": "web-id", "client_secret": "web-s"}}"#;
        assert_eq!(GmailCredentials::from_json(web).unwrap().client_secret, "web-s");

        assert!(GmailCredentials::from_json(r#"{"other": {}}"#).is_err());
    }

    #[test]
    fn test_credentials_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        std::fs::write(&path, r#"{"installed": {"client_id": "f", "client_secret": "g"}}"#).unwrap();

        let creds = GmailCredentials::load(&path).unwrap();
        assert_eq!(creds.client_id, "f");
        assert_eq!(creds.client_secret, "g");
    }
}
