//! Secret storage for proxy credentials.
//!
//! # Storage
//!
//! Production: one OS keyring entry per account under service
//! `backend-transport`.
//! Test mode: JSON map at `{config_dir}/secrets.json`.
//!
//! # Graceful Degradation
//!
//! The macOS keychain may block access when the binary signature changes.
//! Reads retry transient failures and distinguish between:
//! - Keyring locked (user can unlock)
//! - Entry missing (normal, reported as absent)
//! - Access denied (signature mismatch)

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use keyring::Entry;

/// Keyring service name.
pub const KEYRING_SERVICE: &str = "backend-transport";

/// Number of attempts for keyring access.
const KEYRING_RETRY_ATTEMPTS: u32 = 2;
/// Delay between attempts in milliseconds.
const KEYRING_RETRY_DELAY_MS: u64 = 500;

/// Key/value secret storage keyed by account name.
pub trait SecretStore: Send + Sync + fmt::Debug {
    /// Store `value` under `account`, replacing any previous value.
    fn store(&self, account: &str, value: &str) -> Result<()>;

    /// Value stored under `account`, or `None` if absent.
    fn fetch(&self, account: &str) -> Result<Option<String>>;

    /// Delete `account`. Removing a missing account is not an error.
    fn remove(&self, account: &str) -> Result<()>;
}

/// Categorized keyring access errors.
#[derive(Debug)]
pub enum KeyringAccessError {
    /// Keyring is locked and requires user interaction to unlock.
    Locked(String),
    /// Entry does not exist.
    NotFound,
    /// Access denied, likely due to binary signature change.
    AccessDenied(String),
    /// Stored value is not valid UTF-8.
    Corrupted(String),
    /// Other/unknown error.
    Other(String),
}

impl fmt::Display for KeyringAccessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Locked(msg) => write!(f, "Keyring locked: {msg}"),
            Self::NotFound => write!(f, "Keyring entry not found"),
            Self::AccessDenied(msg) => write!(f, "Keyring access denied: {msg}"),
            Self::Corrupted(msg) => write!(f, "Keyring data corrupted: {msg}"),
            Self::Other(msg) => write!(f, "Keyring error: {msg}"),
        }
    }
}

impl std::error::Error for KeyringAccessError {}

impl KeyringAccessError {
    /// Whether another attempt could succeed.
    fn is_transient(&self) -> bool {
        matches!(self, Self::Locked(_) | Self::Other(_))
    }
}

/// Categorize a keyring error.
fn categorize_keyring_error(err: &keyring::Error) -> KeyringAccessError {
    match err {
        keyring::Error::NoEntry => return KeyringAccessError::NotFound,
        keyring::Error::BadEncoding(_) => {
            return KeyringAccessError::Corrupted("value is not UTF-8".to_string())
        }
        _ => {}
    }

    let msg = format!("{err:?}");
    let msg_lower = msg.to_lowercase();

    if msg_lower.contains("user interaction") || msg_lower.contains("user canceled") {
        return KeyringAccessError::Locked(msg);
    }

    if msg_lower.contains("denied")
        || msg_lower.contains("codesign")
        || msg_lower.contains("authorization")
        || msg_lower.contains("not allowed")
    {
        return KeyringAccessError::AccessDenied(msg);
    }

    KeyringAccessError::Other(msg)
}

/// Secrets in the OS keyring, one entry per account.
#[derive(Debug, Clone)]
pub struct KeyringSecretStore {
    service: String,
}

impl Default for KeyringSecretStore {
    fn default() -> Self {
        Self::new(KEYRING_SERVICE)
    }
}

impl KeyringSecretStore {
    /// Store under a custom keyring service name.
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, account: &str) -> std::result::Result<Entry, KeyringAccessError> {
        Entry::new(&self.service, account)
            .map_err(|e| KeyringAccessError::Other(format!("Failed to create entry: {e:?}")))
    }

    fn try_fetch(&self, account: &str) -> std::result::Result<String, KeyringAccessError> {
        self.entry(account)?
            .get_password()
            .map_err(|e| categorize_keyring_error(&e))
    }
}

impl SecretStore for KeyringSecretStore {
    fn store(&self, account: &str, value: &str) -> Result<()> {
        let entry = self.entry(account)?;
        entry
            .set_password(value)
            .map_err(|e| categorize_keyring_error(&e))
            .with_context(|| format!("Failed to store {account} in keyring"))?;
        log::debug!("[Secrets] Stored {account} in OS keyring");
        Ok(())
    }

    fn fetch(&self, account: &str) -> Result<Option<String>> {
        let mut last_error = None;

        for attempt in 0..KEYRING_RETRY_ATTEMPTS {
            if attempt > 0 {
                log::debug!(
                    "[Secrets] Retrying keyring access (attempt {}/{})",
                    attempt + 1,
                    KEYRING_RETRY_ATTEMPTS
                );
                thread::sleep(Duration::from_millis(KEYRING_RETRY_DELAY_MS));
            }

            match self.try_fetch(account) {
                Ok(value) => return Ok(Some(value)),
                Err(KeyringAccessError::NotFound) => return Ok(None),
                Err(err) if err.is_transient() => {
                    log::debug!("[Secrets] Keyring access attempt {} failed: {err}", attempt + 1);
                    last_error = Some(err);
                }
                Err(err) => {
                    if matches!(err, KeyringAccessError::AccessDenied(_)) {
                        log::info!(
                            "[Secrets] Hint: binary signature may have changed. \
                             Unlock your keychain or store the credentials again."
                        );
                    }
                    return Err(err).with_context(|| format!("Failed to read {account}"));
                }
            }
        }

        match last_error {
            Some(err) => Err(err).with_context(|| {
                format!("Failed to read {account} after {KEYRING_RETRY_ATTEMPTS} attempts")
            }),
            None => Ok(None),
        }
    }

    fn remove(&self, account: &str) -> Result<()> {
        let entry = self.entry(account)?;
        match entry.delete_credential() {
            Ok(()) => {
                log::debug!("[Secrets] Removed {account} from OS keyring");
                Ok(())
            }
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(categorize_keyring_error(&e))
                .with_context(|| format!("Failed to remove {account} from keyring")),
        }
    }
}

/// Secrets in a JSON file, for tests and machines without a keyring.
#[derive(Debug)]
pub struct FileSecretStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileSecretStore {
    /// Store backed by `path`. The file is created on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Store at `{config_dir}/secrets.json`.
    pub fn in_config_dir() -> Result<Self> {
        Ok(Self::new(crate::config::Config::config_dir()?.join("secrets.json")))
    }

    /// Backing file path.
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    fn read(&self) -> Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", self.path.display()))
    }

    fn write(&self, secrets: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(secrets)?)
            .with_context(|| format!("Failed to write {}", self.path.display()))?;

        #[cfg(unix)]
        fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600))?;

        Ok(())
    }
}

impl SecretStore for FileSecretStore {
    fn store(&self, account: &str, value: &str) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut secrets = self.read()?;
        secrets.insert(account.to_string(), value.to_string());
        self.write(&secrets)?;
        log::debug!("[Secrets] Stored {account} in {}", self.path.display());
        Ok(())
    }

    fn fetch(&self, account: &str) -> Result<Option<String>> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self.read()?.get(account).cloned())
    }

    fn remove(&self, account: &str) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut secrets = self.read()?;
        if secrets.remove(account).is_some() {
            self.write(&secrets)?;
        }
        Ok(())
    }
}

/// The store for the current environment: the secrets file in any test
/// mode, the OS keyring otherwise.
pub fn default_secret_store() -> Result<Arc<dyn SecretStore>> {
    if should_skip_keyring() {
        log::debug!("[Secrets] Using file secret store (test mode)");
        return Ok(Arc::new(FileSecretStore::in_config_dir()?));
    }
    Ok(Arc::new(KeyringSecretStore::default()))
}

/// Keyring is never touched by unit tests or in test environments.
fn should_skip_keyring() -> bool {
    cfg!(test) || crate::env::should_skip_keyring()
}
