use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use gdrive_core::{DriveClient, DriveError};
use thiserror::Error;

use super::decision::{SyncAction, decide};
use super::directories::{DirectoryError, DirectoryResolver};
use super::paths::{PathError, RemotePath};
use super::probe::{FileDescriptor, ProbeError, probe_local, probe_remote};
use super::transfer::{TransferEngine, TransferError, UploadTarget, remove_stale_staging};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Uploaded,
    Downloaded,
    RemoteCreated,
    NoopIdentical,
    NothingToSync,
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SyncOutcome::Uploaded => "local copy uploaded",
            SyncOutcome::Downloaded => "remote copy downloaded",
            SyncOutcome::RemoteCreated => "remote file created",
            SyncOutcome::NoopIdentical => "files already identical",
            SyncOutcome::NothingToSync => "nothing to sync",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("local I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("api error: {0}")]
    Api(#[from] DriveError),
    #[error("invalid remote path: {0}")]
    Path(#[from] PathError),
    #[error("remote file {name} cannot be synced: it has no {missing}")]
    RemoteFileUnsupported { name: String, missing: &'static str },
    #[error("remote modifiedTime {value:?} is not RFC 3339: {source}")]
    Time {
        value: String,
        #[source]
        source: time::error::Parse,
    },
    #[error("upload failed, remote file may be partially updated: {0}")]
    Upload(#[source] TransferError),
    #[error("download failed, local file left untouched: {0}")]
    Download(#[source] TransferError),
}

impl From<ProbeError> for SyncError {
    fn from(err: ProbeError) -> Self {
        match err {
            ProbeError::Api(err) => SyncError::Api(err),
            ProbeError::Unsupported { name, missing } => {
                SyncError::RemoteFileUnsupported { name, missing }
            }
            ProbeError::Time { value, source } => SyncError::Time { value, source },
        }
    }
}

impl From<DirectoryError> for SyncError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::Path(err) => SyncError::Path(err),
            DirectoryError::Api(err) => SyncError::Api(err),
        }
    }
}

/// Keeps one local file and one Drive file in agreement. Each `sync` call is a
/// full probe, decide, act cycle; running it again right after a successful
/// run is a no-op.
pub struct Reconciler {
    client: DriveClient,
    local_path: PathBuf,
    remote_path: RemotePath,
    directories: DirectoryResolver,
    transfers: TransferEngine,
}

impl Reconciler {
    pub fn new(client: DriveClient, local_path: impl Into<PathBuf>, remote_path: RemotePath) -> Self {
        Self {
            directories: DirectoryResolver::new(client.clone()),
            transfers: TransferEngine::new(client.clone()),
            client,
            local_path: local_path.into(),
            remote_path,
        }
    }

    pub fn local_path(&self) -> &Path {
        &self.local_path
    }

    pub fn remote_path(&self) -> &RemotePath {
        &self.remote_path
    }

    pub async fn sync(&self) -> Result<SyncOutcome, SyncError> {
        match remove_stale_staging(&self.local_path).await {
            Ok(0) => {}
            Ok(removed) => tracing::info!(
                "Removed {removed} stale staging file(s) next to {}",
                self.local_path.display()
            ),
            Err(err) => tracing::warn!("Could not clean stale staging files: {err}"),
        }

        let (local, remote) = tokio::try_join!(
            async { probe_local(&self.local_path).await.map_err(SyncError::from) },
            async {
                probe_remote(&self.client, self.remote_path.file_name())
                    .await
                    .map_err(SyncError::from)
            },
        )?;
        tracing::info!("Local {}: {}", self.local_path.display(), summarize(&local));
        tracing::info!("Remote {}: {}", self.remote_path, summarize(&remote));

        let action = decide(&local, &remote);
        let outcome = self.apply(action).await?;
        tracing::info!("Sync finished: {outcome}");
        Ok(outcome)
    }

    async fn apply(&self, action: SyncAction) -> Result<SyncOutcome, SyncError> {
        match action {
            SyncAction::NothingToSync => {
                tracing::info!("Neither side has the file");
                Ok(SyncOutcome::NothingToSync)
            }
            SyncAction::Identical => {
                tracing::info!("Local and remote content match");
                Ok(SyncOutcome::NoopIdentical)
            }
            SyncAction::CreateRemote => {
                tracing::info!("Remote file missing, uploading local copy");
                let chain = self
                    .directories
                    .resolve_chain(self.remote_path.directories())
                    .await?;
                let target = UploadTarget::New {
                    name: self.remote_path.file_name().to_string(),
                    parent_id: chain.deepest_id().map(str::to_string),
                };
                self.transfers
                    .upload(&self.local_path, &target)
                    .await
                    .map_err(SyncError::Upload)?;
                Ok(SyncOutcome::RemoteCreated)
            }
            SyncAction::UploadLocal { file_id } => {
                tracing::info!("Local copy is newer, uploading");
                self.transfers
                    .upload(&self.local_path, &UploadTarget::Existing { file_id })
                    .await
                    .map_err(SyncError::Upload)?;
                Ok(SyncOutcome::Uploaded)
            }
            SyncAction::DownloadRemote {
                file_id,
                modified_time,
                content_hash,
            } => {
                tracing::info!("Remote copy is newer, downloading");
                self.transfers
                    .download(&file_id, &self.local_path, modified_time, Some(&content_hash))
                    .await
                    .map_err(SyncError::Download)?;
                Ok(SyncOutcome::Downloaded)
            }
        }
    }
}

fn summarize<I>(descriptor: &FileDescriptor<I>) -> String {
    match descriptor.state() {
        Some(state) => format!("md5 {}, modified {}", state.content_hash, state.modified_time),
        None => "absent".to_string(),
    }
}

#[cfg(test)]
#[path = "reconciler_tests.rs"]
mod tests;
