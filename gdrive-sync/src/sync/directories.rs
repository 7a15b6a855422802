use gdrive_core::{DriveClient, DriveError};
use thiserror::Error;

use super::paths::{PathError, split_directory_path};

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("path error: {0}")]
    Path(#[from] PathError),
    #[error("api error: {0}")]
    Api(#[from] DriveError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFolder {
    pub name: String,
    pub id: String,
    pub created: bool,
}

/// Folders from the drive root down to the file's parent, in that order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryChain {
    folders: Vec<ResolvedFolder>,
}

impl DirectoryChain {
    pub fn folders(&self) -> &[ResolvedFolder] {
        &self.folders
    }

    /// `None` means the drive root.
    pub fn deepest_id(&self) -> Option<&str> {
        self.folders.last().map(|folder| folder.id.as_str())
    }

    pub fn created_count(&self) -> usize {
        self.folders.iter().filter(|folder| folder.created).count()
    }
}

pub struct DirectoryResolver {
    client: DriveClient,
}

impl DirectoryResolver {
    pub fn new(client: DriveClient) -> Self {
        Self { client }
    }

    /// Makes sure every folder of `dir_path` exists and returns the id of the
    /// deepest one. Existing folders are reused, so repeated calls with the
    /// same path create nothing new as long as nobody else writes concurrently.
    pub async fn ensure_directory_chain(
        &self,
        dir_path: &str,
    ) -> Result<Option<String>, DirectoryError> {
        let segments = split_directory_path(dir_path)?;
        let chain = self.resolve_chain(&segments).await?;
        Ok(chain.deepest_id().map(str::to_string))
    }

    pub async fn resolve_chain(&self, segments: &[String]) -> Result<DirectoryChain, DriveError> {
        let mut folders = Vec::with_capacity(segments.len());
        // Drive links folders by parent id, so each lookup needs the previous id.
        let mut parent: Option<String> = None;

        for name in segments {
            let (id, created) = match self.client.find_folder(name, parent.as_deref()).await? {
                Some(existing) => (existing.id, false),
                None => {
                    tracing::info!("Create partial directory {name}");
                    let folder = self.client.create_folder(name, parent.as_deref()).await?;
                    (folder.id, true)
                }
            };
            parent = Some(id.clone());
            folders.push(ResolvedFolder {
                name: name.clone(),
                id,
                created,
            });
        }

        Ok(DirectoryChain { folders })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gdrive_core::FOLDER_MIME_TYPE;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn folder_query(name: &str, parent: Option<&str>) -> String {
        let mut query = format!(
            "name = '{name}' and mimeType = '{FOLDER_MIME_TYPE}' and trashed = false"
        );
        if let Some(parent) = parent {
            query.push_str(&format!(" and '{parent}' in parents"));
        }
        query
    }

    async fn mount_missing_once_then_found(
        server: &MockServer,
        name: &str,
        parent: Option<&str>,
        id: &str,
    ) {
        Mock::given(method("GET"))
            .and(path("/drive/v3/files"))
            .and(query_param("q", folder_query(name, parent).as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "files": [] })))
            .up_to_n_times(1)
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files"))
            .and(query_param("q", folder_query(name, parent).as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "files": [{ "id": id, "name": name, "mimeType": FOLDER_MIME_TYPE }]
            })))
            .mount(server)
            .await;

        let mut body = json!({ "name": name, "mimeType": FOLDER_MIME_TYPE });
        if let Some(parent) = parent {
            body["parents"] = json!([parent]);
        }
        Mock::given(method("POST"))
            .and(path("/drive/v3/files"))
            .and(body_json(body))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": id,
                "name": name,
                "mimeType": FOLDER_MIME_TYPE
            })))
            .expect(1)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn creates_missing_chain_once_and_reuses_it() {
        let server = MockServer::start().await;
        mount_missing_once_then_found(&server, "a", None, "id-a").await;
        mount_missing_once_then_found(&server, "b", Some("id-a"), "id-b").await;
        mount_missing_once_then_found(&server, "c", Some("id-b"), "id-c").await;

        let client = DriveClient::with_base_url(&server.uri(), "test-token").unwrap();
        let resolver = DirectoryResolver::new(client);

        let first = resolver.ensure_directory_chain("a/b/c").await.unwrap();
        let second = resolver.ensure_directory_chain("a/b/c").await.unwrap();

        assert_eq!(first.as_deref(), Some("id-c"));
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn reuses_existing_folders_without_creating() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files"))
            .and(query_param("q", folder_query("backups", None).as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "files": [{ "id": "backups-id", "name": "backups" }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files"))
            .and(query_param(
                "q",
                folder_query("notes", Some("backups-id")).as_str(),
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "files": [] })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/drive/v3/files"))
            .and(body_json(json!({
                "name": "notes",
                "mimeType": FOLDER_MIME_TYPE,
                "parents": ["backups-id"]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "notes-id",
                "name": "notes"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = DriveClient::with_base_url(&server.uri(), "test-token").unwrap();
        let chain = DirectoryResolver::new(client)
            .resolve_chain(&["backups".to_string(), "notes".to_string()])
            .await
            .unwrap();

        let ids: Vec<_> = chain.folders().iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, ["backups-id", "notes-id"]);
        assert_eq!(chain.created_count(), 1);
        assert_eq!(chain.deepest_id(), Some("notes-id"));
    }

    #[tokio::test]
    async fn empty_chain_resolves_to_drive_root() {
        let server = MockServer::start().await;
        let client = DriveClient::with_base_url(&server.uri(), "test-token").unwrap();

        let chain = DirectoryResolver::new(client).resolve_chain(&[]).await.unwrap();

        assert_eq!(chain.deepest_id(), None);
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejects_parent_components() {
        let server = MockServer::start().await;
        let client = DriveClient::with_base_url(&server.uri(), "test-token").unwrap();

        let err = DirectoryResolver::new(client)
            .ensure_directory_chain("a/../b")
            .await
            .expect_err("expected path error");

        assert!(matches!(
            err,
            DirectoryError::Path(PathError::UnsupportedComponent)
        ));
    }
}
