//! Credential persistence behind the [`TokenStorage`] trait.
//!
//! The session never touches the filesystem directly: it asks storage for a
//! token by key (one key per channel), writes back whatever the gateway
//! issues, and purges everything on sign-out. [`MemoryTokenStorage`] backs
//! tests, [`FileTokenStorage`] backs real runs with a single JSON file under
//! the user's home directory.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::errors::StorageError;
use crate::types::AccessToken;

/// Bump when the on-disk layout changes shape.
const STORAGE_VERSION: u32 = 1;

/// Where tokens live between runs.
///
/// Implementations must tolerate concurrent access from the session's tasks;
/// all methods take `&self`.
pub trait TokenStorage: Send + Sync {
    /// Returns the stored token for `key`, if any.
    fn get(&self, key: &str) -> Option<AccessToken>;

    /// Stores `token` under `key`, replacing any previous value.
    fn set(&self, key: &str, token: AccessToken) -> Result<(), StorageError>;

    /// Removes every stored token.
    fn purge(&self) -> Result<(), StorageError>;
}

/// Default location of the credential file: `~/.convo/credentials.json`.
#[must_use]
pub fn default_credentials_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".convo").join("credentials.json")
}

// ─────────────────────────────────────────────────────────────────────────────
// In-memory storage
// ─────────────────────────────────────────────────────────────────────────────

/// Process-local storage. Tokens vanish when the process exits.
#[derive(Default)]
pub struct MemoryTokenStorage {
    tokens: RwLock<HashMap<String, AccessToken>>,
}

impl MemoryTokenStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenStorage for MemoryTokenStorage {
    fn get(&self, key: &str) -> Option<AccessToken> {
        self.tokens.read().get(key).cloned()
    }

    fn set(&self, key: &str, token: AccessToken) -> Result<(), StorageError> {
        let _ = self.tokens.write().insert(key.to_string(), token);
        Ok(())
    }

    fn purge(&self) -> Result<(), StorageError> {
        self.tokens.write().clear();
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// File-backed storage
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CredentialFile {
    version: u32,
    #[serde(default)]
    tokens: HashMap<String, AccessToken>,
}

impl Default for CredentialFile {
    fn default() -> Self {
        Self {
            version: STORAGE_VERSION,
            tokens: HashMap::new(),
        }
    }
}

/// Tokens persisted to a single JSON file.
///
/// A missing file reads as empty. A corrupt or version-mismatched file is
/// logged and treated as empty rather than failing the session; the next
/// `set` rewrites it from scratch.
pub struct FileTokenStorage {
    path: PathBuf,
}

impl FileTokenStorage {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Opens storage at [`default_credentials_path`].
    #[must_use]
    pub fn at_default_location() -> Self {
        Self::new(default_credentials_path())
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> CredentialFile {
        let Ok(contents) = fs::read_to_string(&self.path) else {
            return CredentialFile::default();
        };
        match serde_json::from_str::<CredentialFile>(&contents) {
            Ok(file) if file.version == STORAGE_VERSION => file,
            Ok(file) => {
                tracing::warn!(
                    path = %self.path.display(),
                    found = file.version,
                    expected = STORAGE_VERSION,
                    "credential file has an unsupported version, starting empty"
                );
                CredentialFile::default()
            }
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "credential file is corrupt, starting empty"
                );
                CredentialFile::default()
            }
        }
    }

    fn save(&self, file: &CredentialFile) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(file)?;
        fs::write(&self.path, json)?;

        // Tokens are bearer credentials. Keep the file owner-only.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600))?;
        }

        Ok(())
    }
}

impl TokenStorage for FileTokenStorage {
    fn get(&self, key: &str) -> Option<AccessToken> {
        self.load().tokens.remove(key)
    }

    fn set(&self, key: &str, token: AccessToken) -> Result<(), StorageError> {
        let mut file = self.load();
        let _ = file.tokens.insert(key.to_string(), token);
        self.save(&file)
    }

    fn purge(&self) -> Result<(), StorageError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
