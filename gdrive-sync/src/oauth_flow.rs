use std::io::Write;
use std::time::Duration;

use gdrive_core::{DRIVE_FILE_SCOPE, OAuthClient, OAuthError, OAuthToken};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use url::Url;

use crate::settings::{GoogleCredentials, read_u64_env};

const DEFAULT_REDIRECT_URI: &str = "http://127.0.0.1";
const TIMEOUT_ENV: &str = "GDRIVE_SYNC_OAUTH_TIMEOUT_SECS";
const DEFAULT_TIMEOUT_SECS: u64 = 180;

#[derive(Debug, Error)]
pub enum OAuthFlowError {
    #[error("oauth error: {0}")]
    OAuth(#[from] OAuthError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("authorization code missing in redirect")]
    MissingCode,
    #[error("authorization timed out")]
    Timeout,
}

/// Interactive consent for a first run. Loopback redirect URIs are served on
/// a local port; anything else falls back to pasting the code on stdin.
pub struct OAuthFlow {
    client: OAuthClient,
    redirect_uri: String,
    timeout: Duration,
}

impl OAuthFlow {
    pub fn new(credentials: &GoogleCredentials) -> Result<Self, OAuthFlowError> {
        let client = OAuthClient::new(&credentials.client_id, &credentials.client_secret)?;
        let redirect_uri = credentials
            .redirect_uri()
            .unwrap_or(DEFAULT_REDIRECT_URI)
            .to_string();
        Ok(Self::with_client(client, redirect_uri))
    }

    pub fn with_client(client: OAuthClient, redirect_uri: impl Into<String>) -> Self {
        Self {
            client,
            redirect_uri: redirect_uri.into(),
            timeout: Duration::from_secs(read_u64_env(TIMEOUT_ENV, DEFAULT_TIMEOUT_SECS)),
        }
    }

    pub async fn authenticate(&self) -> Result<OAuthToken, OAuthFlowError> {
        if let Some(redirect) = loopback_redirect(&self.redirect_uri) {
            match self.authenticate_via_loopback(redirect).await {
                Ok(token) => return Ok(token),
                Err(err @ OAuthFlowError::OAuth(_)) => return Err(err),
                Err(err) => {
                    tracing::warn!(
                        "OAuth loopback flow unavailable ({err}), falling back to manual code entry"
                    );
                }
            }
        }

        let url = self
            .client
            .authorize_url(&self.redirect_uri, Some(DRIVE_FILE_SCOPE), None);
        let code = read_code_from_stdin(&url)?;
        Ok(self
            .client
            .exchange_code(&code, Some(&self.redirect_uri))
            .await?)
    }

    async fn authenticate_via_loopback(&self, redirect: Url) -> Result<OAuthToken, OAuthFlowError> {
        let port = redirect.port().unwrap_or(0);
        let listener = TcpListener::bind(("127.0.0.1", port)).await?;
        let mut redirect = redirect;
        let _ = redirect.set_port(Some(listener.local_addr()?.port()));
        let redirect_uri = redirect.as_str().trim_end_matches('/').to_string();

        let url = self
            .client
            .authorize_url(&redirect_uri, Some(DRIVE_FILE_SCOPE), None);
        println!("Authorize this app by visiting this url:\n{url}");
        tracing::info!("Waiting for the OAuth redirect on {redirect_uri}");

        let (mut stream, _) = tokio::time::timeout(self.timeout, listener.accept())
            .await
            .map_err(|_| OAuthFlowError::Timeout)??;

        let mut request = vec![0u8; 8192];
        let read = tokio::time::timeout(Duration::from_secs(10), stream.read(&mut request))
            .await
            .map_err(|_| OAuthFlowError::Timeout)??;
        let request_text = String::from_utf8_lossy(&request[..read]);
        let code = extract_code_from_http_request(&request_text);

        let page: &[u8] = if code.is_some() {
            b"HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\nConnection: close\r\n\r\n\
            <html><body><h2>Google Drive connected</h2><p>You can close this tab.</p></body></html>"
        } else {
            b"HTTP/1.1 400 Bad Request\r\nContent-Type: text/html; charset=utf-8\r\nConnection: close\r\n\r\n\
            <html><body><h2>Authorization failed</h2><p>No code was received.</p></body></html>"
        };
        let _ = stream.write_all(page).await;
        let _ = stream.shutdown().await;

        let code = code.ok_or(OAuthFlowError::MissingCode)?;
        Ok(self.client.exchange_code(&code, Some(&redirect_uri)).await?)
    }
}

fn read_code_from_stdin(url: &Url) -> Result<String, OAuthFlowError> {
    println!("Authorize this app by visiting this url:\n{url}");
    print!("Enter the code from that page here: ");
    std::io::stdout().flush()?;
    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    extract_code_from_input(&input).ok_or(OAuthFlowError::MissingCode)
}

/// Returns the redirect as a URL when it points at this machine over plain
/// HTTP, which is the only case a local listener can receive it.
fn loopback_redirect(redirect_uri: &str) -> Option<Url> {
    let url = Url::parse(redirect_uri).ok()?;
    let loopback = url.scheme() == "http"
        && matches!(url.host_str(), Some("127.0.0.1" | "localhost" | "[::1]"));
    loopback.then_some(url)
}

fn extract_code_from_http_request(request: &str) -> Option<String> {
    let request_line = request.lines().next()?;
    let target = request_line.split_whitespace().nth(1)?;
    let request_url = if target.starts_with("http://") || target.starts_with("https://") {
        Url::parse(target).ok()?
    } else {
        Url::parse(&format!("http://127.0.0.1{target}")).ok()?
    };
    code_from_url(&request_url)
}

/// Accepts either the bare code or the whole redirect URL copied from the
/// browser's address bar.
fn extract_code_from_input(input: &str) -> Option<String> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    match Url::parse(input) {
        Ok(url) if url.query().is_some() => code_from_url(&url),
        _ => Some(input.to_string()),
    }
}

fn code_from_url(url: &Url) -> Option<String> {
    url.query_pairs()
        .find_map(|(key, value)| (key == "code" && !value.is_empty()).then(|| value.into_owned()))
}
