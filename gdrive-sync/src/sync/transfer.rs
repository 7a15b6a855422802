use std::{
    io,
    path::{Path, PathBuf},
};

use filetime::{FileTime, set_file_mtime};
use futures_util::StreamExt;
use gdrive_core::{DriveClient, DriveError, DriveFile, FileMetadata};
use md5::Context;
use reqwest::Client;
use reqwest::header::CONTENT_LENGTH;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

const STAGING_SUFFIX: &str = ".gdrive-partial";

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("api error: {0}")]
    Api(#[from] DriveError),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("timestamp cannot be represented: {0}")]
    Timestamp(#[from] time::error::ComponentRange),
    #[error("timestamp formatting failed: {0}")]
    Format(#[from] time::error::Format),
    #[error("download integrity check failed: expected {expected_md5}, got {actual_md5}")]
    IntegrityMismatch {
        expected_md5: String,
        actual_md5: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadTarget {
    /// Replace the content of an existing remote file.
    Existing { file_id: String },
    /// Create a new remote file; `None` parent is the drive root.
    New {
        name: String,
        parent_id: Option<String>,
    },
}

#[derive(Clone)]
pub struct TransferEngine {
    client: DriveClient,
    http: Client,
}

impl TransferEngine {
    pub fn new(client: DriveClient) -> Self {
        Self {
            client,
            http: Client::new(),
        }
    }

    /// Streams `source` into a resumable upload session. The local mtime is
    /// sent along so the remote copy carries the same timestamp.
    pub async fn upload(
        &self,
        source: &Path,
        target: &UploadTarget,
    ) -> Result<DriveFile, TransferError> {
        let metadata = tokio::fs::metadata(source).await?;
        let modified_time = drive_timestamp(OffsetDateTime::from(metadata.modified()?))?;

        let session = match target {
            UploadTarget::Existing { file_id } => {
                let update = FileMetadata {
                    modified_time: Some(modified_time),
                    ..FileMetadata::default()
                };
                self.client.start_update(file_id, &update).await?
            }
            UploadTarget::New { name, parent_id } => {
                let create = FileMetadata {
                    name: Some(name.clone()),
                    parents: parent_id.iter().cloned().collect(),
                    modified_time: Some(modified_time),
                    ..FileMetadata::default()
                };
                self.client.start_upload(&create).await?
            }
        };

        let file = tokio::fs::File::open(source).await?;
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
        let response = self
            .http
            .put(session.href)
            .header(CONTENT_LENGTH, metadata.len())
            .body(body)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json::<DriveFile>().await?)
    }

    /// Downloads into a private staging file next to `target` and renames it
    /// into place only once the body is complete, synced, and (if given)
    /// matches `expected_md5`. The timestamp is applied to the staged file, so
    /// the rename places content and mtime together. On any failure the staging
    /// file is removed and `target` is left as it was.
    pub async fn download(
        &self,
        file_id: &str,
        target: &Path,
        modified_time: OffsetDateTime,
        expected_md5: Option<&str>,
    ) -> Result<(), TransferError> {
        let response = self.client.download(file_id).await?;

        let dir = staging_dir(target);
        tokio::fs::create_dir_all(&dir).await?;
        let staging = tempfile::Builder::new()
            .prefix(&staging_prefix(target))
            .suffix(STAGING_SUFFIX)
            .tempfile_in(&dir)?;
        // TempPath deletes the file when dropped, which covers every early return.
        let (std_file, staging_path) = staging.into_parts();
        let mut file = tokio::fs::File::from_std(std_file);
        let mut stream = response.bytes_stream();
        let mut md5 = Context::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            md5.consume(&chunk);
        }

        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        if let Some(expected_md5) = expected_md5 {
            let actual_md5 = format!("{:x}", md5.compute());
            if !actual_md5.eq_ignore_ascii_case(expected_md5) {
                return Err(TransferError::IntegrityMismatch {
                    expected_md5: expected_md5.to_ascii_lowercase(),
                    actual_md5,
                });
            }
        }

        set_file_mtime(
            &staging_path,
            FileTime::from_unix_time(modified_time.unix_timestamp(), modified_time.nanosecond()),
        )?;
        staging_path.persist(target).map_err(|err| err.error)?;
        Ok(())
    }
}

/// Removes staging files a killed run left next to `target`. Returns how many
/// were deleted.
pub async fn remove_stale_staging(target: &Path) -> io::Result<usize> {
    let dir = staging_dir(target);
    let prefix = staging_prefix(target);
    let mut entries = match tokio::fs::read_dir(&dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(err) => return Err(err),
    };

    let mut removed = 0;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with(&prefix) && name.ends_with(STAGING_SUFFIX) {
            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(err),
            }
        }
    }
    Ok(removed)
}

fn staging_dir(target: &Path) -> PathBuf {
    match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn staging_prefix(target: &Path) -> String {
    let name = target
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!(".{name}.")
}

// Drive keeps millisecond precision; sending more only invites rounding.
fn drive_timestamp(time: OffsetDateTime) -> Result<String, TransferError> {
    let truncated = time.replace_millisecond(time.millisecond())?;
    Ok(truncated.format(&Rfc3339)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;
    use time::macros::datetime;
    use wiremock::matchers::{body_bytes, body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const HELLO_MD5: &str = "5d41402abc4b2a76b9719d911017c592";

    fn engine(server: &MockServer) -> TransferEngine {
        TransferEngine::new(DriveClient::with_base_url(&server.uri(), "test-token").unwrap())
    }

    async fn mount_media(server: &MockServer, body: &'static [u8]) {
        Mock::given(method("GET"))
            .and(path("/drive/v3/files/file-1"))
            .and(query_param("alt", "media"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
            .mount(server)
            .await;
    }

    fn staging_leftovers(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(STAGING_SUFFIX))
            .collect()
    }

    #[tokio::test]
    async fn downloads_file_and_applies_remote_mtime() {
        let server = MockServer::start().await;
        mount_media(&server, b"hello").await;

        let dir = tempdir().unwrap();
        let target = dir.path().join("nested/out.txt");
        let remote_time = datetime!(2024-03-01 12:30:45.250 UTC);

        engine(&server)
            .download("file-1", &target, remote_time, Some(HELLO_MD5))
            .await
            .unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), b"hello");
        let mtime = FileTime::from_last_modification_time(&std::fs::metadata(&target).unwrap());
        assert_eq!(mtime.unix_seconds(), remote_time.unix_timestamp());
        assert_eq!(mtime.nanoseconds(), 250_000_000);
        assert!(staging_leftovers(target.parent().unwrap()).is_empty());
    }

    #[tokio::test]
    async fn checksum_mismatch_keeps_existing_file() {
        let server = MockServer::start().await;
        mount_media(&server, b"hello").await;

        let dir = tempdir().unwrap();
        let target = dir.path().join("todo.txt");
        std::fs::write(&target, b"previous").unwrap();

        let err = engine(&server)
            .download(
                "file-1",
                &target,
                datetime!(2024-01-01 00:00:00 UTC),
                Some("deadbeef"),
            )
            .await
            .expect_err("expected md5 mismatch");

        assert!(matches!(err, TransferError::IntegrityMismatch { .. }));
        assert_eq!(std::fs::read(&target).unwrap(), b"previous");
        assert!(staging_leftovers(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn server_error_leaves_target_missing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files/file-1"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let target = dir.path().join("todo.txt");

        let err = engine(&server)
            .download("file-1", &target, datetime!(2024-01-01 00:00:00 UTC), None)
            .await
            .expect_err("expected api error");

        assert!(matches!(err, TransferError::Api(_)));
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn uploads_new_file_under_parent() {
        let server = MockServer::start().await;
        let session = format!("{}/upload-session/new", server.uri());

        let dir = tempdir().unwrap();
        let source = dir.path().join("todo.txt");
        std::fs::write(&source, b"payload").unwrap();
        set_file_mtime(&source, FileTime::from_unix_time(1_704_067_200, 0)).unwrap();

        Mock::given(method("POST"))
            .and(path("/upload/drive/v3/files"))
            .and(body_json(json!({
                "name": "todo.txt",
                "parents": ["folder-1"],
                "modifiedTime": "2024-01-01T00:00:00Z"
            })))
            .respond_with(ResponseTemplate::new(200).insert_header("Location", session.as_str()))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/upload-session/new"))
            .and(body_bytes(b"payload"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "file-9",
                "name": "todo.txt",
                "md5Checksum": "321c3cf486ed509164edec1e1981fec8"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let created = engine(&server)
            .upload(
                &source,
                &UploadTarget::New {
                    name: "todo.txt".into(),
                    parent_id: Some("folder-1".into()),
                },
            )
            .await
            .unwrap();

        assert_eq!(created.id, "file-9");
    }

    #[tokio::test]
    async fn updates_existing_file_in_place() {
        let server = MockServer::start().await;
        let session = format!("{}/upload-session/update", server.uri());

        Mock::given(method("PATCH"))
            .and(path("/upload/drive/v3/files/file-1"))
            .respond_with(ResponseTemplate::new(200).insert_header("Location", session.as_str()))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/upload-session/update"))
            .and(body_bytes(b"changed"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "file-1",
                "name": "todo.txt"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let source = dir.path().join("todo.txt");
        std::fs::write(&source, b"changed").unwrap();

        let updated = engine(&server)
            .upload(
                &source,
                &UploadTarget::Existing {
                    file_id: "file-1".into(),
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.id, "file-1");
    }

    #[tokio::test]
    async fn failed_upload_body_is_reported() {
        let server = MockServer::start().await;
        let session = format!("{}/upload-session/broken", server.uri());

        Mock::given(method("POST"))
            .and(path("/upload/drive/v3/files"))
            .respond_with(ResponseTemplate::new(200).insert_header("Location", session.as_str()))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/upload-session/broken"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let source = dir.path().join("todo.txt");
        std::fs::write(&source, b"payload").unwrap();

        let err = engine(&server)
            .upload(
                &source,
                &UploadTarget::New {
                    name: "todo.txt".into(),
                    parent_id: None,
                },
            )
            .await
            .expect_err("expected upload failure");

        assert!(matches!(err, TransferError::Request(_)));
    }

    #[tokio::test]
    async fn removes_only_matching_stale_staging_files() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("todo.txt");
        std::fs::write(dir.path().join(".todo.txt.abc123.gdrive-partial"), b"x").unwrap();
        std::fs::write(dir.path().join(".other.txt.abc123.gdrive-partial"), b"x").unwrap();
        std::fs::write(&target, b"keep").unwrap();

        assert_eq!(remove_stale_staging(&target).await.unwrap(), 1);
        assert!(target.exists());
        assert!(dir.path().join(".other.txt.abc123.gdrive-partial").exists());
    }

    #[test]
    fn drive_timestamps_are_truncated_to_milliseconds() {
        let value = datetime!(2024-01-01 00:00:00.123456789 UTC);
        assert_eq!(drive_timestamp(value).unwrap(), "2024-01-01T00:00:00.123Z");
    }
}
