//! Migration kinds a job can run

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use crate::engine::RunReport;
use crate::runner::{GmailMigrator, ImapMigrator};
use crate::settings::MigrationConfig;

/// Kind of migration a job performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// IMAP to IMAP
    EmailMove,
    /// IMAP to the Gmail API
    ImapToGmail,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::EmailMove => "email_move",
            JobKind::ImapToGmail => "imap_to_gmail",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Loads and runs one kind of migration
pub trait Migrator {
    /// Read and check a migration document for this kind
    fn load_config(&self, path: &Path) -> Result<MigrationConfig>;

    /// Perform one complete run
    fn run(&self, config: &MigrationConfig) -> Result<RunReport>;
}

/// Static mapping from [`JobKind`] to its [`Migrator`]
#[derive(Default)]
pub struct MigratorRegistry {
    migrators: HashMap<JobKind, Box<dyn Migrator>>,
}

impl MigratorRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the IMAP and Gmail migrators
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(JobKind::EmailMove, Box::new(ImapMigrator));
        registry.register(JobKind::ImapToGmail, Box::new(GmailMigrator));
        registry
    }

    /// Register or replace the migrator for `kind`
    pub fn register(&mut self, kind: JobKind, migrator: Box<dyn Migrator>) {
        self.migrators.insert(kind, migrator);
    }

    pub fn get(&self, kind: JobKind) -> Option<&dyn Migrator> {
        self.migrators.get(&kind).map(|m| m.as_ref())
    }

    pub fn contains(&self, kind: JobKind) -> bool {
        self.migrators.contains_key(&kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_covers_every_kind() {
        let registry = MigratorRegistry::builtin();
        assert!(registry.contains(JobKind::EmailMove));
        assert!(registry.contains(JobKind::ImapToGmail));
        assert!(MigratorRegistry::new().get(JobKind::EmailMove).is_none());
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(JobKind::EmailMove.to_string(), "email_move");
        let kind: JobKind = serde_json::from_str("\"imap_to_gmail\"").unwrap();
        assert_eq!(kind, JobKind::ImapToGmail);
        assert!(serde_json::from_str::<JobKind>("\"ftp\"").is_err());
    }

    #[test]
    fn test_builtin_migrators_check_destination_kind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gmail.json");
        std::fs::write(
            &path,
            r#"{"source": {"host": "a", "username": "u", "password": "p"}, "gmail": {}}"#,
        )
        .unwrap();

        let registry = MigratorRegistry::builtin();
        let imap = registry.get(JobKind::EmailMove).unwrap();
        let gmail = registry.get(JobKind::ImapToGmail).unwrap();
        assert!(imap.load_config(&path).is_err());
        assert!(gmail.load_config(&path).is_ok());
    }
}
