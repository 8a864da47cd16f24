//! Secure-store and environment seams.
//!
//! Both are traits so credential resolution can run against mocks in
//! tests; the real implementations are the OS keyring and the process
//! environment.

use std::env;

use keyring::Entry;
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

/// Keyring service under which all named secrets are stored.
pub const SERVICE_NAME: &str = "pymol.ai";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Secure store backend unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to read from secure store: {0}")]
    Read(String),

    #[error("Failed to write to secure store: {0}")]
    Write(String),
}

/// Named-secret get/set/delete backed by OS credential storage.
#[cfg_attr(test, automock)]
pub trait SecureStore: Send + Sync {
    /// Returns `Ok(None)` when no secret is stored under `account`.
    fn get_secret(&self, account: &str) -> Result<Option<String>, StoreError>;
    fn set_secret(&self, account: &str, value: &str) -> Result<(), StoreError>;
    fn delete_secret(&self, account: &str) -> Result<(), StoreError>;
}

/// Process environment access.
#[cfg_attr(test, automock)]
pub trait Environment: Send + Sync {
    fn get_var(&self, key: &str) -> Option<String>;
    fn set_var(&self, key: &str, value: &str);
    fn remove_var(&self, key: &str);
}

pub struct RealEnvironment;

impl Environment for RealEnvironment {
    fn get_var(&self, key: &str) -> Option<String> {
        env::var(key).ok().filter(|v| !v.trim().is_empty())
    }

    fn set_var(&self, key: &str, value: &str) {
        env::set_var(key, value)
    }

    fn remove_var(&self, key: &str) {
        env::remove_var(key)
    }
}

/// OS keyring-backed store, keyed by [`SERVICE_NAME`].
pub struct KeyringStore;

impl KeyringStore {
    fn entry(&self, account: &str) -> Result<Entry, StoreError> {
        Entry::new(SERVICE_NAME, account).map_err(|e| StoreError::Unavailable(e.to_string()))
    }
}

impl SecureStore for KeyringStore {
    fn get_secret(&self, account: &str) -> Result<Option<String>, StoreError> {
        match self.entry(account)?.get_password() {
            Ok(value) => {
                let trimmed = value.trim().to_string();
                Ok(if trimmed.is_empty() { None } else { Some(trimmed) })
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(keyring::Error::NoStorageAccess(e)) => Err(StoreError::Unavailable(e.to_string())),
            Err(keyring::Error::PlatformFailure(e)) => Err(StoreError::Unavailable(e.to_string())),
            Err(e) => Err(StoreError::Read(e.to_string())),
        }
    }

    fn set_secret(&self, account: &str, value: &str) -> Result<(), StoreError> {
        self.entry(account)?
            .set_password(value)
            .map_err(|e| StoreError::Write(e.to_string()))
    }

    fn delete_secret(&self, account: &str) -> Result<(), StoreError> {
        match self.entry(account)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(StoreError::Write(e.to_string())),
        }
    }
}

/// Mask a secret for display and logs: keep only the last four chars.
pub fn mask_key(key: &str) -> String {
    let raw = key.trim();
    if raw.is_empty() {
        return String::new();
    }
    let suffix: String = raw
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("****{}", suffix)
}

/// Remove every occurrence of `key` from an error message before it is
/// shown to the user or logged.
pub fn scrub_secret(message: &str, key: &str) -> String {
    let text = message.trim();
    let text = if text.is_empty() { "Unknown error" } else { text };
    if key.is_empty() {
        text.to_string()
    } else {
        text.replace(key, "***")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_keeps_last_four() {
        assert_eq!(mask_key("sk-or-v1-abcdef"), "****cdef");
        assert_eq!(mask_key("abc"), "****abc");
        assert_eq!(mask_key("  "), "");
    }

    #[test]
    fn scrub_replaces_secret_text() {
        let scrubbed = scrub_secret("401 for key sk-secret-123", "sk-secret-123");
        assert_eq!(scrubbed, "401 for key ***");
        assert_eq!(scrub_secret("", "x"), "Unknown error");
    }
}
