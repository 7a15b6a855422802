use std::fmt;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("remote path is empty")]
    Empty,
    #[error("remote path contains unsupported component")]
    UnsupportedComponent,
    #[error("remote path does not end in a file name")]
    MissingFileName,
}

/// A remote file location: the folder names leading to the file, outermost
/// first, plus the file's own name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePath {
    directories: Vec<String>,
    file_name: String,
}

impl RemotePath {
    pub fn parse(raw: &str) -> Result<Self, PathError> {
        if raw.ends_with('/') {
            return Err(PathError::MissingFileName);
        }
        let mut directories = split_directory_path(raw)?;
        let file_name = directories.pop().ok_or(PathError::MissingFileName)?;
        Ok(Self {
            directories,
            file_name,
        })
    }

    pub fn directories(&self) -> &[String] {
        &self.directories
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }
}

impl fmt::Display for RemotePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for dir in &self.directories {
            write!(f, "{dir}/")?;
        }
        f.write_str(&self.file_name)
    }
}

/// Splits a slash-separated Drive path into folder names. Drive has no path
/// syntax of its own, so the root, `.` and repeated slashes are dropped.
pub fn split_directory_path(raw: &str) -> Result<Vec<String>, PathError> {
    if raw.trim().is_empty() {
        return Err(PathError::Empty);
    }

    let mut segments = Vec::new();
    for part in raw.split('/') {
        match part {
            "" | "." => continue,
            ".." => return Err(PathError::UnsupportedComponent),
            name => segments.push(name.to_string()),
        }
    }
    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_directories_and_file_name() {
        let path = RemotePath::parse("/backups/notes/todo.txt").unwrap();
        assert_eq!(path.directories(), ["backups", "notes"]);
        assert_eq!(path.file_name(), "todo.txt");
        assert_eq!(path.to_string(), "backups/notes/todo.txt");
    }

    #[test]
    fn file_at_drive_root_has_no_directories() {
        let path = RemotePath::parse("todo.txt").unwrap();
        assert!(path.directories().is_empty());
        assert_eq!(path.file_name(), "todo.txt");
    }

    #[test]
    fn rejects_parent_dir() {
        assert_eq!(
            RemotePath::parse("backups/../secret.txt"),
            Err(PathError::UnsupportedComponent)
        );
    }

    #[test]
    fn rejects_empty_and_directory_only_paths() {
        assert_eq!(RemotePath::parse("  "), Err(PathError::Empty));
        assert_eq!(
            RemotePath::parse("backups/"),
            Err(PathError::MissingFileName)
        );
        assert_eq!(RemotePath::parse("/"), Err(PathError::MissingFileName));
    }

    #[test]
    fn collapses_redundant_separators() {
        assert_eq!(
            split_directory_path("a//./b/c").unwrap(),
            ["a", "b", "c"]
        );
    }
}
