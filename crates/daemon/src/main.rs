use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use lifeboat_core::BackupConfig;
use lifeboat_daemon::config::{self, Config, Resolved};
use lifeboat_daemon::{load_config, BackupManager, TokioTrigger};
use lifeboat_storage::{open_config_store, LocalStore};
use lifeboat_sync::{HttpDriveApi, OAuthClient, OAuthConfig, RemoteSyncClient};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let (cfg, mode) = parse_args()?;
    let settings = cfg.resolve();

    let store = open_config_store(&settings.config_db, settings.database_url.as_deref()).await?;
    let oauth = OAuthClient::new(OAuthConfig {
        client_id: settings.client_id.clone(),
        client_secret: settings.client_secret.clone(),
        token_url: settings.token_url.clone(),
    });

    if let [first, rest @ ..] = mode.as_slice() {
        if first == "authorize" {
            let [code, redirect_uri] = rest else {
                bail!("usage: lifeboat authorize CODE REDIRECT_URI");
            };
            let credential = oauth
                .exchange_code(code, redirect_uri)
                .await
                .context("authorization code exchange")?;
            let mut current = load_config(store.as_ref(), &BackupConfig::default()).await;
            current.remote_credential = Some(credential);
            store.save(&current).await?;
            info!("remote credential stored");
            return Ok(());
        }
    }

    let remote = Arc::new(RemoteSyncClient::new(
        Arc::new(HttpDriveApi::new(&settings.api_base, &settings.upload_base)),
        Arc::new(oauth),
        settings.folder_name.clone(),
    ));
    let backup_config = load_config(store.as_ref(), &BackupConfig::default()).await;
    let manager = BackupManager::builder(
        settings.source_path.clone(),
        LocalStore::new(&settings.backup_dir),
        store,
        Arc::new(TokioTrigger::new()),
    )
    .remote(remote)
    .build(backup_config)
    .await;

    match mode.first().map(String::as_str) {
        Some("run-once") => run_once(&manager).await,
        Some("status") => {
            let status = manager.status().await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
        None | Some("serve") => serve(&manager, &settings).await,
        Some(other) => bail!("unknown mode: {other}"),
    }
}

/// Parse CLI args, returning the loaded config and the mode with its arguments.
fn parse_args() -> Result<(Config, Vec<String>)> {
    let args: Vec<String> = env::args().collect();
    let mut config_path: Option<PathBuf> = None;
    let mut mode = Vec::new();
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
                if i >= args.len() {
                    bail!("--config requires a path argument");
                }
                config_path = Some(PathBuf::from(&args[i]));
            }
            other => mode.push(other.to_owned()),
        }
        i += 1;
    }

    let cfg = match config_path {
        Some(path) => {
            info!(?path, "loading config file");
            config::load_config(&path)?
        }
        None => Config::default(),
    };

    Ok((cfg, mode))
}

async fn run_once(manager: &Arc<BackupManager>) -> Result<()> {
    let report = manager.run_backup().await?;
    info!(
        name = %report.local.name,
        path = %report.local.path.display(),
        remote_id = report.remote.as_ref().map(|r| r.remote_id.as_str()).unwrap_or("-"),
        "backup created"
    );
    if let Some(e) = &report.remote_error {
        info!(error = %e, "remote mirror did not complete");
    }
    Ok(())
}

async fn serve(manager: &Arc<BackupManager>, settings: &Resolved) -> Result<()> {
    let config = manager.config().await;
    if config.enabled {
        manager.start().await?;
    } else {
        info!("scheduled backups disabled; waiting for shutdown");
    }
    info!(
        source = %settings.source_path.display(),
        backup_dir = %settings.backup_dir.display(),
        "lifeboat daemon running"
    );

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutdown requested");
    manager.shutdown().await;
    Ok(())
}
