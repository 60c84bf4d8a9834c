use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use odoo_backup_core::RetentionPolicy;
use odoo_backup_export::ExportRequest;
use serde::Deserialize;

use crate::authorize::AuthSettings;
use crate::orchestrator::RunPlan;
use crate::schedule::Schedule;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub odoo: OdooConfig,
    pub backup: BackupConfig,
    pub google: GoogleConfig,
    pub auth: AuthConfig,
    pub schedule: ScheduleConfig,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct OdooConfig {
    pub url: Option<String>,
    pub database: Option<String>,
    pub master_password: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct BackupConfig {
    pub dir: Option<String>,
    pub retention_days: Option<i64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct GoogleConfig {
    pub client_secrets: Option<String>,
    pub token_file: Option<String>,
    pub folder_name: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct AuthConfig {
    pub callback_port: Option<u16>,
    /// Seconds to wait for the browser redirect; 0 waits forever.
    pub callback_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct ScheduleConfig {
    pub interval_hours: Option<u64>,
    pub hour: Option<u32>,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("reading config file {path:?}"))?;
    toml::from_str(&contents).with_context(|| format!("parsing config file {path:?}"))
}

/// Fully resolved runtime settings: environment, then config file, then defaults.
#[derive(Debug, Clone)]
pub struct Settings {
    pub export: ExportRequest,
    pub backup_dir: PathBuf,
    pub retention: RetentionPolicy,
    pub client_secrets: PathBuf,
    pub token_file: PathBuf,
    pub folder_name: String,
    pub callback_port: u16,
    pub callback_timeout: Option<Duration>,
    pub schedule: Schedule,
}

impl Settings {
    pub fn resolve(cfg: &Config, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let text = |key: &str, file: &Option<String>, default: &str| -> String {
            env(key)
                .or_else(|| file.clone())
                .unwrap_or_else(|| default.to_owned())
        };

        let retention_days = match env("ODOO_BACKUP_RETENTION_DAYS") {
            Some(v) => v
                .parse::<i64>()
                .with_context(|| format!("invalid ODOO_BACKUP_RETENTION_DAYS: {v}"))?,
            None => cfg.backup.retention_days.unwrap_or(5),
        };
        // Below one day the sweep that follows an upload would remove the
        // artifact that was just uploaded.
        if retention_days < 1 {
            bail!("retention must be at least one day, got {retention_days}");
        }
        let callback_port = match env("ODOO_BACKUP_CALLBACK_PORT") {
            Some(v) => v
                .parse::<u16>()
                .with_context(|| format!("invalid ODOO_BACKUP_CALLBACK_PORT: {v}"))?,
            None => cfg.auth.callback_port.unwrap_or(8080),
        };
        let callback_timeout = match cfg.auth.callback_timeout_secs.unwrap_or(600) {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        Ok(Self {
            export: ExportRequest {
                base_url: text("ODOO_URL", &cfg.odoo.url, "http://localhost:8069"),
                database: text("ODOO_DB", &cfg.odoo.database, "odoo"),
                master_password: text("ODOO_MASTER_PASSWORD", &cfg.odoo.master_password, ""),
            },
            backup_dir: PathBuf::from(text("ODOO_BACKUP_DIR", &cfg.backup.dir, "backups")),
            retention: RetentionPolicy::days(retention_days),
            client_secrets: PathBuf::from(text(
                "GOOGLE_CLIENT_SECRETS",
                &cfg.google.client_secrets,
                "client_secrets.json",
            )),
            token_file: PathBuf::from(text("GOOGLE_TOKEN_FILE", &cfg.google.token_file, "credentials.json")),
            folder_name: text("GOOGLE_FOLDER_NAME", &cfg.google.folder_name, "odoo_backup"),
            callback_port,
            callback_timeout,
            schedule: Schedule::new(
                cfg.schedule.interval_hours.unwrap_or(24),
                cfg.schedule.hour.unwrap_or(2),
            )?,
        })
    }

    pub fn auth(&self) -> AuthSettings {
        AuthSettings {
            client_secrets: self.client_secrets.clone(),
            token_file: self.token_file.clone(),
            callback_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, self.callback_port)),
            callback_timeout: self.callback_timeout,
        }
    }

    pub fn run_plan(&self) -> RunPlan {
        RunPlan {
            export: self.export.clone(),
            backup_dir: self.backup_dir.clone(),
            folder_name: self.folder_name.clone(),
            retention: self.retention,
        }
    }
}
