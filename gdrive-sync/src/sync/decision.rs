use time::OffsetDateTime;

use super::probe::{FileDescriptor, LocalDescriptor, RemoteDescriptor};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncAction {
    /// Build the remote folder chain, then upload as a new file.
    CreateRemote,
    UploadLocal {
        file_id: String,
    },
    DownloadRemote {
        file_id: String,
        modified_time: OffsetDateTime,
        content_hash: String,
    },
    Identical,
    NothingToSync,
}

/// Most-recent-wins. Equal content short-circuits the time comparison, and on
/// equal timestamps the remote copy wins.
pub fn decide(local: &LocalDescriptor, remote: &RemoteDescriptor) -> SyncAction {
    match (local, remote) {
        (FileDescriptor::Absent, FileDescriptor::Absent) => SyncAction::NothingToSync,
        (FileDescriptor::Present(_), FileDescriptor::Absent) => SyncAction::CreateRemote,
        (FileDescriptor::Absent, FileDescriptor::Present(remote)) => SyncAction::DownloadRemote {
            file_id: remote.id.clone(),
            modified_time: remote.modified_time,
            content_hash: remote.content_hash.clone(),
        },
        (FileDescriptor::Present(local), FileDescriptor::Present(remote)) => {
            if local.has_same_content(remote) {
                SyncAction::Identical
            } else if local.is_newer_than(remote) {
                SyncAction::UploadLocal {
                    file_id: remote.id.clone(),
                }
            } else {
                SyncAction::DownloadRemote {
                    file_id: remote.id.clone(),
                    modified_time: remote.modified_time,
                    content_hash: remote.content_hash.clone(),
                }
            }
        }
    }
}
