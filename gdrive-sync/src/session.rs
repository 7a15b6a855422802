use anyhow::Context;
use gdrive_core::{About, ApiErrorClass, DriveClient, DriveError, OAuthClient};

use crate::oauth_flow::OAuthFlow;
use crate::settings::{GoogleCredentials, Settings};
use crate::storage::{OAuthState, StorageError, TokenStorage};
use crate::token_provider::TokenProvider;

pub const TOKEN_ENV: &str = "GDRIVE_SYNC_TOKEN";

/// Produces an access token that Drive has just accepted. `GDRIVE_SYNC_TOKEN`
/// short-circuits storage and consent entirely.
pub async fn resolve_access_token(settings: &Settings) -> anyhow::Result<String> {
    if let Ok(token) = std::env::var(TOKEN_ENV)
        && !token.trim().is_empty()
    {
        tracing::debug!("Using access token from {TOKEN_ENV}");
        return Ok(token.trim().to_string());
    }

    let storage = TokenStorage::new(settings.token_store, &settings.token_file)
        .context("failed to initialize token storage")?;
    let state = match storage.get_oauth_state() {
        Ok(state) => state,
        Err(StorageError::TokenNotFound) => authenticate_and_store(&storage, &settings.google).await?,
        Err(err) => return Err(err).context("failed to read stored token"),
    };

    let oauth_client = OAuthClient::new(&settings.google.client_id, &settings.google.client_secret)
        .context("invalid oauth config")?;
    let mut provider = TokenProvider::new(state, Some(oauth_client));
    let about = fetch_about_with_retry(&mut provider, None)
        .await
        .context("failed to validate Google Drive credentials")?;
    if let Some(email) = about.user.and_then(|user| user.email_address) {
        tracing::info!("Signed in as {email}");
    }

    storage
        .save_oauth_state(provider.state())
        .context("failed to persist oauth state")?;
    Ok(provider.state().access_token.clone())
}

async fn authenticate_and_store(
    storage: &TokenStorage,
    credentials: &GoogleCredentials,
) -> anyhow::Result<OAuthState> {
    let flow = OAuthFlow::new(credentials).context("invalid oauth config")?;
    let token = flow.authenticate().await?;
    let state = OAuthState::from_oauth_token(&token);
    storage
        .save_oauth_state(&state)
        .context("failed to save token")?;
    tracing::info!("Token stored to {}", storage.describe());
    Ok(state)
}

/// Checks the token against `about.get`. A rejected token gets exactly one
/// refresh and one more attempt.
pub async fn fetch_about_with_retry(
    provider: &mut TokenProvider,
    base_url: Option<&str>,
) -> anyhow::Result<About> {
    let token = provider
        .valid_access_token()
        .await
        .context("failed to resolve valid access token")?;
    let client = build_client(base_url, &token)?;
    match client.get_about().await {
        Ok(about) => Ok(about),
        Err(err) if matches!(err.classification(), Some(ApiErrorClass::Auth)) => {
            tracing::info!("Access token rejected, refreshing");
            let refreshed = provider
                .refresh_now()
                .await
                .context("failed to refresh token after auth error")?;
            let retry_client = build_client(base_url, &refreshed)?;
            Ok(retry_client.get_about().await?)
        }
        Err(err) => Err(err.into()),
    }
}

pub fn build_client(base_url: Option<&str>, token: &str) -> Result<DriveClient, DriveError> {
    match base_url {
        Some(url) => DriveClient::with_base_url(url, token.to_string()),
        None => DriveClient::new(token.to_string()),
    }
}
