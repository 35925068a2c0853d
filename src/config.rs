//! Type-safe configuration loader using the `config` crate,
//! with manual environment-variable overrides for core settings.

use std::{
    env, fmt,
    path::{Path, PathBuf},
};

use config::{Config, ConfigError, File};
use serde::Deserialize;
use sqlx::postgres::PgConnectOptions;

use crate::errors::AnalysisError;

/// Top-level application settings loaded from `Config.toml` (optional)
/// and then overridden (where applicable) by environment variables.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    /// Postgres host name
    pub db_host: String,

    /// Postgres port
    pub db_port: u16,

    /// Database the dataset is loaded into
    pub db_name: String,

    /// JSON file holding `user` and `password`
    pub credentials_file: PathBuf,

    /// Directory scanned for `<table>.csv` files
    pub dataset_dir: PathBuf,

    /// Where to write the Prometheus text exposition at exit, if anywhere
    #[serde(default)]
    pub metrics_file: Option<PathBuf>,
}

impl Settings {
    /// Load settings from `Config.toml` (if present),
    /// then apply any overrides from these environment variables:
    ///
    /// - `APP__DB_HOST`
    /// - `APP__DB_PORT`
    /// - `APP__DB_NAME`
    /// - `APP__CREDENTIALS_FILE`
    /// - `APP__DATASET_DIR`
    /// - `APP__METRICS_FILE`
    pub fn new() -> Result<Self, ConfigError> {
        let mut settings = Self::load("Config")?;
        settings.apply_overrides(|key| env::var(key).ok())?;
        Ok(settings)
    }

    /// Built-in defaults layered under the named config file (extension optional).
    pub fn load(config_name: &str) -> Result<Self, ConfigError> {
        let cfg = Config::builder()
            .set_default("db_host", "localhost")?
            .set_default("db_port", 5432)?
            .set_default("db_name", "sqlproject")?
            .set_default("credentials_file", "credentials.json")?
            .set_default("dataset_dir", "dataset")?
            .add_source(File::with_name(config_name).required(false))
            .build()?;

        cfg.try_deserialize()
    }

    /// Apply `APP__*` overrides using `lookup` to read variables.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("APP__DB_HOST") {
            self.db_host = val;
        }
        if let Some(val) = lookup("APP__DB_PORT") {
            self.db_port = val
                .parse()
                .map_err(|e| ConfigError::Foreign(Box::new(e)))?;
        }
        if let Some(val) = lookup("APP__DB_NAME") {
            self.db_name = val;
        }
        if let Some(val) = lookup("APP__CREDENTIALS_FILE") {
            self.credentials_file = PathBuf::from(val);
        }
        if let Some(val) = lookup("APP__DATASET_DIR") {
            self.dataset_dir = PathBuf::from(val);
        }
        if let Some(val) = lookup("APP__METRICS_FILE") {
            self.metrics_file = Some(PathBuf::from(val));
        }
        Ok(())
    }

    /// Connection options for the configured server, authenticated with `credentials`.
    pub fn connect_options(&self, credentials: &Credentials) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.db_host)
            .port(self.db_port)
            .database(&self.db_name)
            .username(&credentials.user)
            .password(&credentials.password)
    }

    /// `host:port/database`, for log lines and error messages.
    pub fn target(&self) -> String {
        format!("{}:{}/{}", self.db_host, self.db_port, self.db_name)
    }
}

/// Database login read from the credentials JSON file.
#[derive(Deserialize, Clone)]
pub struct Credentials {
    pub user: String,
    #[serde(default)]
    pub password: String,
}

impl Credentials {
    pub fn from_file(path: &Path) -> Result<Self, AnalysisError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| AnalysisError::Credentials(path.to_path_buf(), e))?;
        serde_json::from_str(&raw)
            .map_err(|e| AnalysisError::CredentialsFormat(path.to_path_buf(), e))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}
