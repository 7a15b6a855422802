use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::sync::paths::{PathError, RemotePath};

const SETTINGS_FILE_NAME: &str = ".gdrive-single-file-sync.settings";
const TOKEN_FILE_NAME: &str = ".gdrive-single-file-sync.auth";
pub const SETTINGS_ENV: &str = "GDRIVE_SYNC_SETTINGS";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("home directory is not available")]
    MissingHome,
    #[error("failed to read settings from {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("settings file {path} is not valid: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{0} must not be empty")]
    EmptyField(&'static str),
    #[error("remoteFilePath is not usable: {0}")]
    RemotePath(#[from] PathError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenStoreKind {
    #[default]
    File,
    Keyring,
}

/// OAuth client credentials as downloaded from the Google Cloud console.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GoogleCredentials {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
}

impl GoogleCredentials {
    pub fn redirect_uri(&self) -> Option<&str> {
        self.redirect_uris.first().map(String::as_str)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSettings {
    local_file_path: String,
    remote_file_path: String,
    #[serde(default)]
    token_store: TokenStoreKind,
    #[serde(default)]
    token_file: Option<String>,
    google: GoogleCredentials,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub local_file_path: PathBuf,
    pub remote_file_path: RemotePath,
    pub token_store: TokenStoreKind,
    pub token_file: PathBuf,
    pub google: GoogleCredentials,
}

impl Settings {
    /// Loads from `GDRIVE_SYNC_SETTINGS`, or the dotfile in the home directory.
    pub fn load() -> Result<Self, SettingsError> {
        let home = dirs::home_dir().ok_or(SettingsError::MissingHome)?;
        let path = match std::env::var(SETTINGS_ENV) {
            Ok(value) if !value.trim().is_empty() => expand_with_home(value.trim(), &home),
            _ => home.join(SETTINGS_FILE_NAME),
        };
        Self::load_from(&path, &home)
    }

    pub fn load_from(path: &Path, home: &Path) -> Result<Self, SettingsError> {
        let contents = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&contents, home).map_err(|err| match err {
            SettingsError::Parse { source, .. } => SettingsError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    pub fn parse(contents: &str, home: &Path) -> Result<Self, SettingsError> {
        let raw: RawSettings =
            serde_json::from_str(contents).map_err(|source| SettingsError::Parse {
                path: PathBuf::new(),
                source,
            })?;

        if raw.local_file_path.trim().is_empty() {
            return Err(SettingsError::EmptyField("localFilePath"));
        }
        if raw.google.client_id.trim().is_empty() {
            return Err(SettingsError::EmptyField("google.client_id"));
        }
        if raw.google.client_secret.trim().is_empty() {
            return Err(SettingsError::EmptyField("google.client_secret"));
        }

        let token_file = match raw.token_file.as_deref() {
            Some(value) if !value.trim().is_empty() => expand_with_home(value.trim(), home),
            _ => home.join(TOKEN_FILE_NAME),
        };

        Ok(Self {
            local_file_path: expand_with_home(raw.local_file_path.trim(), home),
            remote_file_path: RemotePath::parse(&raw.remote_file_path)?,
            token_store: raw.token_store,
            token_file,
            google: raw.google,
        })
    }
}

pub fn expand_with_home(value: &str, home: &Path) -> PathBuf {
    if value == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = value.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(value)
}

pub fn read_u64_env(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}
