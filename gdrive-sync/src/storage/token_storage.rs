use std::io::{self, Write};
use std::path::{Path, PathBuf};

use keyring::Entry;
use thiserror::Error;

use super::OAuthState;
use crate::settings::TokenStoreKind;

const SERVICE_NAME: &str = "gdrive-single-file-sync";
const TOKEN_KEY: &str = "oauth_state";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("keyring error: {0}")]
    KeyringError(#[from] keyring::Error),
    #[error("token file error: {0}")]
    Io(#[from] io::Error),
    #[error("stored token is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("token not found")]
    TokenNotFound,
}

pub struct TokenStorage {
    backend: Backend,
}

enum Backend {
    File(PathBuf),
    Keyring(Entry),
}

impl TokenStorage {
    pub fn new(kind: TokenStoreKind, token_file: &Path) -> Result<Self, StorageError> {
        let backend = match kind {
            TokenStoreKind::File => Backend::File(token_file.to_path_buf()),
            TokenStoreKind::Keyring => Backend::Keyring(Entry::new(SERVICE_NAME, TOKEN_KEY)?),
        };
        Ok(Self { backend })
    }

    pub fn get_oauth_state(&self) -> Result<OAuthState, StorageError> {
        let raw = match &self.backend {
            Backend::File(path) => match std::fs::read_to_string(path) {
                Ok(raw) => raw,
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    return Err(StorageError::TokenNotFound);
                }
                Err(err) => return Err(err.into()),
            },
            Backend::Keyring(entry) => match entry.get_password() {
                Ok(raw) => raw,
                Err(keyring::Error::NoEntry) => return Err(StorageError::TokenNotFound),
                Err(err) => return Err(err.into()),
            },
        };
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn save_oauth_state(&self, state: &OAuthState) -> Result<(), StorageError> {
        let raw = serde_json::to_string(state)?;
        match &self.backend {
            Backend::File(path) => write_private(path, raw.as_bytes())?,
            Backend::Keyring(entry) => entry.set_password(&raw)?,
        }
        Ok(())
    }

    pub fn delete_token(&self) -> Result<(), StorageError> {
        match &self.backend {
            Backend::File(path) => match std::fs::remove_file(path) {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(err) => Err(err.into()),
            },
            Backend::Keyring(entry) => match entry.delete_credential() {
                Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
                Err(err) => Err(StorageError::KeyringError(err)),
            },
        }
    }

    pub fn describe(&self) -> String {
        match &self.backend {
            Backend::File(path) => path.display().to_string(),
            Backend::Keyring(_) => format!("keyring entry {SERVICE_NAME}/{TOKEN_KEY}"),
        }
    }
}

fn write_private(path: &Path, contents: &[u8]) -> io::Result<()> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
        options.mode(0o600);
        let mut file = options.open(path)?;
        // `mode` only applies on creation; tighten files left by older runs too.
        file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
        file.write_all(contents)?;
        file.sync_all()
    }
    #[cfg(not(unix))]
    {
        let mut file = options.open(path)?;
        file.write_all(contents)?;
        file.sync_all()
    }
}
