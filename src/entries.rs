//! Meter entries: the credentials for each configured smart meter.
//!
//! An entry is identified by its MPRN; registering the same meter twice is refused.

use crate::config::AccountConfig;
use crate::error::ConfigError;
use anyhow::{anyhow, Context, Result};
use serde_derive::Deserialize;
use std::fmt;
use std::path::Path;

/// Credentials for one ESB Networks smart meter.
#[derive(Deserialize, Clone, PartialEq, Eq)]
pub struct MeterEntry {
    pub mprn: String,
    pub email: String,
    pub password: String,
}

impl MeterEntry {
    pub fn new(
        mprn: impl Into<String>,
        email: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            mprn: mprn.into(),
            email: email.into(),
            password: password.into(),
        }
    }

    pub fn unique_id(&self) -> &str {
        &self.mprn
    }

    pub fn title(&self) -> String {
        format!("ESB {}", self.mprn)
    }

    fn normalized(self) -> Result<Self, ConfigError> {
        let mprn = self.mprn.trim().to_string();
        let email = self.email.trim().to_string();
        if mprn.is_empty() {
            return Err(ConfigError::missing("mprn"));
        }
        if email.is_empty() {
            return Err(ConfigError::missing("email"));
        }
        if self.password.is_empty() {
            return Err(ConfigError::missing("password"));
        }
        if !mprn.chars().all(|c| c.is_ascii_digit()) {
            return Err(ConfigError::invalid("mprn", "must contain only digits"));
        }
        Ok(Self {
            mprn,
            email,
            password: self.password,
        })
    }
}

// Keeps the password out of logs.
impl fmt::Debug for MeterEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MeterEntry")
            .field("mprn", &self.mprn)
            .field("email", &self.email)
            .field("password", &"***")
            .finish()
    }
}

/// Ordered set of meter entries, unique by MPRN.
#[derive(Debug, Default)]
pub struct EntryRegistry {
    entries: Vec<MeterEntry>,
}

impl EntryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates and registers an entry.
    ///
    /// Fails with [`ConfigError::AlreadyConfigured`] when a meter with the same MPRN
    /// has been registered before.
    pub fn add(&mut self, entry: MeterEntry) -> Result<&MeterEntry, ConfigError> {
        let entry = entry.normalized()?;
        if self.contains(entry.unique_id()) {
            return Err(ConfigError::already_configured(entry.unique_id()));
        }
        tracing::info!(title = %entry.title(), "Meter configured");
        self.entries.push(entry);
        Ok(&self.entries[self.entries.len() - 1])
    }

    pub fn contains(&self, unique_id: &str) -> bool {
        self.entries.iter().any(|e| e.unique_id() == unique_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MeterEntry> {
        self.entries.iter()
    }

    pub fn into_entries(self) -> Vec<MeterEntry> {
        self.entries
    }

    /// Adds an entry, logging instead of failing on rejection.
    fn add_or_warn(&mut self, entry: MeterEntry) {
        let mprn = entry.mprn.clone();
        if let Err(err) = self.add(entry) {
            tracing::warn!(mprn = %mprn, error = %err, "Skipping meter entry");
        }
    }
}

fn read_accounts_file(path: &Path) -> Result<Vec<MeterEntry>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read accounts file {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse accounts file {}", path.display()))
}

/// Builds the registry from the single-account variables and the accounts file.
///
/// A rejected single account is an error; rejected accounts-file entries are skipped
/// with a warning.
pub fn build_registry(accounts: AccountConfig) -> Result<EntryRegistry> {
    let mut registry = EntryRegistry::new();

    match (accounts.mprn, accounts.email, accounts.password) {
        (Some(mprn), Some(email), Some(password)) => {
            registry
                .add(MeterEntry::new(mprn, email, password))
                .context("Invalid account in ESB_MPRN, ESB_EMAIL and ESB_PASSWORD")?;
        }
        (None, None, None) => {}
        _ => {
            return Err(anyhow!(
                "ESB_MPRN, ESB_EMAIL and ESB_PASSWORD must be set together"
            ))
        }
    }

    if let Some(path) = accounts.accounts_file.as_deref() {
        for entry in read_accounts_file(path)? {
            registry.add_or_warn(entry);
        }
    }

    if registry.is_empty() {
        return Err(ConfigError::missing("ESB_MPRN/ESB_EMAIL/ESB_PASSWORD or ESB_ACCOUNTS_FILE").into());
    }
    Ok(registry)
}
