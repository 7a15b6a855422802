use std::process::ExitCode;

use anyhow::Context;
use gdrive_core::DriveError;
use gdrive_sync::logging;
use gdrive_sync::session::{build_client, resolve_access_token};
use gdrive_sync::settings::Settings;
use gdrive_sync::storage::TokenStorage;
use gdrive_sync::sync::{Reconciler, SyncError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CliMode {
    Run,
    Logout,
    Help,
}

fn parse_cli_mode<I>(args: I) -> anyhow::Result<CliMode>
where
    I: IntoIterator<Item = String>,
{
    let mut mode = CliMode::Run;
    for arg in args.into_iter().skip(1) {
        match arg.as_str() {
            "--logout" => mode = CliMode::Logout,
            "--help" | "-h" => mode = CliMode::Help,
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(mode)
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    if let Err(err) = logging::init() {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report(&err);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<()> {
    let mode = parse_cli_mode(std::env::args())?;
    if mode == CliMode::Help {
        println!("Usage: gdrive-sync [--logout]");
        println!("  --logout   Remove saved OAuth token and exit");
        return Ok(());
    }

    let settings = Settings::load().context("failed to load settings")?;

    if mode == CliMode::Logout {
        let storage = TokenStorage::new(settings.token_store, &settings.token_file)?;
        storage.delete_token()?;
        tracing::info!("Saved token removed from {}", storage.describe());
        return Ok(());
    }

    let token = resolve_access_token(&settings).await?;
    let client = build_client(None, &token)?;
    let reconciler = Reconciler::new(
        client,
        settings.local_file_path.clone(),
        settings.remote_file_path.clone(),
    );
    tracing::info!(
        "Syncing {} with {}",
        reconciler.local_path().display(),
        reconciler.remote_path()
    );
    reconciler.sync().await?;
    Ok(())
}

fn report(err: &anyhow::Error) {
    match err.downcast_ref::<SyncError>() {
        Some(SyncError::Upload(_)) => {
            tracing::error!("Upload did not complete: {err:#}");
            tracing::warn!("Check the remote file before the next run");
        }
        _ => tracing::error!("{err:#}"),
    }

    let transient = err
        .chain()
        .filter_map(|cause| cause.downcast_ref::<DriveError>())
        .any(DriveError::is_retryable);
    if transient {
        tracing::info!("The failure looks transient; running again later may succeed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_cli_mode_defaults_to_run() {
        let mode = parse_cli_mode(vec!["gdrive-sync".to_string()]).unwrap();
        assert_eq!(mode, CliMode::Run);
    }

    #[test]
    fn parse_cli_mode_supports_logout() {
        let mode =
            parse_cli_mode(vec!["gdrive-sync".to_string(), "--logout".to_string()]).unwrap();
        assert_eq!(mode, CliMode::Logout);
    }

    #[test]
    fn parse_cli_mode_supports_help() {
        let mode = parse_cli_mode(vec!["gdrive-sync".to_string(), "-h".to_string()]).unwrap();
        assert_eq!(mode, CliMode::Help);
    }

    #[test]
    fn parse_cli_mode_rejects_unknown_arguments() {
        let err = parse_cli_mode(vec!["gdrive-sync".to_string(), "--watch".to_string()])
            .unwrap_err();
        assert!(err.to_string().contains("--watch"));
    }
}
