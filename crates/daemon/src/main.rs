use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Local;
use odoo_backup_daemon::config::{self, Config, Settings};
use odoo_backup_daemon::{authorize, run_backup, RunReport};
use odoo_backup_drive::DriveClient;
use tokio::time::sleep;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let (cfg, mode) = parse_args()?;
    let settings = Settings::resolve(&cfg, |key| env::var(key).ok())?;
    let http = reqwest::Client::builder()
        .user_agent(concat!("odoo-backup/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("build http client")?;

    match mode.as_deref() {
        Some("authorize") => {
            let session = authorize(&http, &settings.auth()).await?;
            info!(path = %session.store.path().display(), "authorization stored");
            Ok(())
        }
        Some("run-once") => run_once(http, &settings).await,
        Some(other) => bail!("unknown command {other:?}; expected run-once or authorize"),
        None => run_service(http, &settings).await,
    }
}

/// Parse CLI args, returning the loaded config and optional subcommand.
fn parse_args() -> Result<(Config, Option<String>)> {
    let args: Vec<String> = env::args().collect();
    let mut config_path: Option<PathBuf> = None;
    let mut mode: Option<String> = None;
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
            other => {
                mode = Some(other.to_owned());
            }
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

async fn drive_client(http: &reqwest::Client, settings: &Settings) -> Result<DriveClient> {
    let session = authorize(http, &settings.auth()).await?;
    Ok(DriveClient::new(http.clone(), Arc::new(session.into_token_source())))
}

fn log_report(report: &RunReport) {
    info!(
        artifact = %report.artifact.display(),
        size_bytes = report.size_bytes,
        export_ms = report.export_ms,
        remote_file_id = %report.remote_file_id,
        remote_deleted = report.remote_sweep.deleted.len(),
        local_deleted = report.local_sweep.deleted.len(),
        stage = %report.stage,
        "backup run finished"
    );
}

async fn run_once(http: reqwest::Client, settings: &Settings) -> Result<()> {
    let drive = drive_client(&http, settings).await?;
    let report = run_backup(&http, &drive, &settings.run_plan()).await?;
    log_report(&report);
    Ok(())
}

async fn run_service(http: reqwest::Client, settings: &Settings) -> Result<()> {
    let drive = drive_client(&http, settings).await?;
    let plan = settings.run_plan();

    loop {
        let delay = settings.schedule.delay_until_next(Local::now());
        info!(next_run_in_secs = delay.as_secs(), "scheduled next backup");
        tokio::select! {
            _ = sleep(delay) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                return Ok(());
            }
        }

        match run_backup(&http, &drive, &plan).await {
            Ok(report) => log_report(&report),
            Err(e) => error!(error = %format!("{e:#}"), "scheduled backup failed"),
        }
    }
}
