mod client;
mod oauth;

pub use client::{
    About, AboutUser, ApiErrorClass, DriveClient, DriveError, DriveFile, FOLDER_MIME_TYPE,
    FileList, FileMetadata, StorageQuota, UploadSession, escape_query_value,
};
pub use oauth::{DRIVE_FILE_SCOPE, OAuthClient, OAuthError, OAuthToken};
