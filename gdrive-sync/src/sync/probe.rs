use std::io;
use std::path::Path;

use gdrive_core::{DriveClient, DriveError};
use md5::Context;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::io::AsyncReadExt;

const READ_CHUNK: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("api error: {0}")]
    Api(#[from] DriveError),
    #[error("remote file {name} has no {missing}; only binary files can be synced")]
    Unsupported { name: String, missing: &'static str },
    #[error("remote modifiedTime {value:?} is not RFC 3339: {source}")]
    Time {
        value: String,
        #[source]
        source: time::error::Parse,
    },
}

/// State of one side of the pair. An absent file carries neither hash nor time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileDescriptor<I = ()> {
    Absent,
    Present(FileState<I>),
}

/// `id` is `()` locally and the Drive file id remotely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileState<I = ()> {
    pub id: I,
    /// Lower-case hex MD5 of the full content.
    pub content_hash: String,
    pub modified_time: OffsetDateTime,
}

pub type LocalDescriptor = FileDescriptor<()>;
pub type RemoteDescriptor = FileDescriptor<String>;

impl<I> FileDescriptor<I> {
    pub fn exists(&self) -> bool {
        matches!(self, FileDescriptor::Present(_))
    }

    pub fn state(&self) -> Option<&FileState<I>> {
        match self {
            FileDescriptor::Present(state) => Some(state),
            FileDescriptor::Absent => None,
        }
    }
}

impl<I> FileState<I> {
    pub fn has_same_content<J>(&self, other: &FileState<J>) -> bool {
        self.content_hash.eq_ignore_ascii_case(&other.content_hash)
    }

    /// Strictly newer; equal timestamps are not newer.
    pub fn is_newer_than<J>(&self, other: &FileState<J>) -> bool {
        self.modified_time > other.modified_time
    }
}

pub async fn probe_local(path: &Path) -> io::Result<LocalDescriptor> {
    let metadata = match tokio::fs::metadata(path).await {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(FileDescriptor::Absent),
        Err(err) => return Err(err),
    };
    if !metadata.is_file() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} is not a regular file", path.display()),
        ));
    }

    let content_hash = md5_file(path).await?;
    Ok(FileDescriptor::Present(FileState {
        id: (),
        content_hash,
        modified_time: OffsetDateTime::from(metadata.modified()?),
    }))
}

/// Looks the file up by name alone. When Drive holds several files with that
/// name, the first one listed is used.
pub async fn probe_remote(
    client: &DriveClient,
    file_name: &str,
) -> Result<RemoteDescriptor, ProbeError> {
    let matches = client.find_files_by_name(file_name).await?;
    if matches.len() > 1 {
        tracing::warn!(
            "{} remote files are named {file_name}; using the first one ({})",
            matches.len(),
            matches[0].id
        );
    }
    let Some(file) = matches.into_iter().next() else {
        return Ok(FileDescriptor::Absent);
    };

    let content_hash = file.md5_checksum.ok_or_else(|| ProbeError::Unsupported {
        name: file.name.clone(),
        missing: "md5Checksum",
    })?;
    let raw_time = file.modified_time.ok_or_else(|| ProbeError::Unsupported {
        name: file.name.clone(),
        missing: "modifiedTime",
    })?;
    let modified_time = parse_remote_time(&raw_time)?;

    Ok(FileDescriptor::Present(FileState {
        id: file.id,
        content_hash: content_hash.to_ascii_lowercase(),
        modified_time,
    }))
}

pub(crate) fn parse_remote_time(value: &str) -> Result<OffsetDateTime, ProbeError> {
    OffsetDateTime::parse(value, &Rfc3339).map_err(|source| ProbeError::Time {
        value: value.to_string(),
        source,
    })
}

async fn md5_file(path: &Path) -> io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut ctx = Context::new();
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let read = file.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        ctx.consume(&buf[..read]);
    }
    Ok(format!("{:x}", ctx.compute()))
}
