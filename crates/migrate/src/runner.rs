//! Connects real mail stores and runs a configured migration

use anyhow::{Context, Result, bail};
use log::{info, warn};
use std::path::Path;

use crate::engine::{RunReport, TransferEngine};
use crate::error::StoreError;
use crate::gmail::{GmailAuth, GmailClient, GmailStore};
use crate::jobs::Migrator;
use crate::settings::{Destination, GmailCredentials, GmailSettings, ImapEndpoint, MigrationConfig};
use crate::store::{ImapStore, MailStoreClient};

/// Run the migration a config describes, to IMAP or Gmail
///
/// # Errors
/// Connection, authentication and mailbox setup failures. Per-message
/// failures are reported in the returned [`RunReport`] instead.
pub fn run_migration(config: &MigrationConfig) -> Result<RunReport> {
    match config.destination()? {
        Destination::Imap(dest) => run_imap_to_imap(config, dest),
        Destination::Gmail(gmail) => run_imap_to_gmail(config, gmail),
    }
}

fn run_imap_to_imap(config: &MigrationConfig, dest: &ImapEndpoint) -> Result<RunReport> {
    info!(
        "Migrating {}@{}/{} -> {}@{}/{}",
        config.source.username,
        config.source.host,
        config.source.mailbox,
        dest.username,
        dest.host,
        dest.mailbox
    );

    let mut source = ImapStore::connect(&config.source)
        .with_context(|| format!("Failed to connect to source {}", config.source.host))?;
    let mut target = ImapStore::connect(dest)
        .with_context(|| format!("Failed to connect to destination {}", dest.host))?;

    let result = TransferEngine::new(&mut source, &mut target, config.transfer_options()).run();

    logout(&mut source, "source");
    logout(&mut target, "destination");
    result.map_err(setup_error)
}

fn run_imap_to_gmail(config: &MigrationConfig, gmail: &GmailSettings) -> Result<RunReport> {
    info!(
        "Migrating {}@{}/{} -> Gmail ({})",
        config.source.username, config.source.host, config.source.mailbox, gmail.user_id
    );

    // Authorize first: the browser flow can outlast an idle IMAP session
    let credentials = GmailCredentials::load(&gmail.credentials_file)?;
    let auth = GmailAuth::new(credentials, gmail.token_file.clone());
    let client = GmailClient::new(auth, gmail.user_id.clone());
    let mut target = GmailStore::connect(
        client,
        config.options.gmail_labels.clone(),
        config.options.mark_as_unread,
    )
    .context("Failed to authorize Gmail")?;

    let mut source = ImapStore::connect(&config.source)
        .with_context(|| format!("Failed to connect to source {}", config.source.host))?;

    let result = TransferEngine::new(&mut source, &mut target, config.transfer_options()).run();

    logout(&mut source, "source");
    result.map_err(setup_error)
}

/// Describe an error that ended a run before any message was processed
fn setup_error(e: StoreError) -> anyhow::Error {
    let context = if e.is_setup_fatal() {
        "Connection to a mail store failed during setup"
    } else {
        "Could not prepare mailboxes for migration"
    };
    anyhow::Error::new(e).context(context)
}

fn logout<S: MailStoreClient>(store: &mut S, role: &str) {
    if let Err(e) = store.logout() {
        warn!("Logout from {} failed: {}", role, e);
    }
}

/// IMAP to IMAP migrations (`email_move` jobs)
#[derive(Debug, Default, Clone, Copy)]
pub struct ImapMigrator;

impl Migrator for ImapMigrator {
    fn load_config(&self, path: &Path) -> Result<MigrationConfig> {
        let config = MigrationConfig::load(path)?;
        if config.dest.is_none() {
            bail!("{} has no 'dest' section", path.display());
        }
        Ok(config)
    }

    fn run(&self, config: &MigrationConfig) -> Result<RunReport> {
        run_migration(config)
    }
}

/// IMAP to Gmail migrations (`imap_to_gmail` jobs)
#[derive(Debug, Default, Clone, Copy)]
pub struct GmailMigrator;

impl Migrator for GmailMigrator {
    fn load_config(&self, path: &Path) -> Result<MigrationConfig> {
        let config = MigrationConfig::load(path)?;
        if config.gmail.is_none() {
            bail!("{} has no 'gmail' section", path.display());
        }
        Ok(config)
    }

    fn run(&self, config: &MigrationConfig) -> Result<RunReport> {
        run_migration(config)
    }
}
