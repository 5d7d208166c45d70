//! Configuration resolution for `ReadVault`.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Settings file (explicit path, else ~/.config/readvault/settings.json)
//! 3. Environment variables (`READVAULT_*`)
//! 4. CLI arguments (highest priority, applied by the binary)

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Complete `ReadVault` configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

/// SQL backend selected at start-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Driver {
    Sqlite,
    Postgres,
    Mysql,
}

impl Driver {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Postgres => "postgres",
            Self::Mysql => "mysql",
        }
    }
}

impl fmt::Display for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Driver {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(Self::Sqlite),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "mysql" => Ok(Self::Mysql),
            other => Err(Error::Config(format!("unknown database driver '{other}'"))),
        }
    }
}

/// Connection settings for the backend of record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// No driver means no backend has been configured.
    pub driver: Option<Driver>,
    /// `SQLite` database file.
    pub path: Option<PathBuf>,
    /// Full connection URL; takes precedence over the discrete fields.
    pub url: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub name: Option<String>,
    pub max_connections: u32,
    pub query_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            driver: None,
            path: None,
            url: None,
            host: None,
            port: None,
            user: None,
            password: None,
            name: None,
            max_connections: 20,
            query_timeout_secs: 5,
        }
    }
}

impl DatabaseConfig {
    /// The configured driver, or a configuration error when none is set.
    pub fn driver(&self) -> Result<Driver> {
        self.driver
            .ok_or_else(|| Error::Config("no database driver configured".to_string()))
    }

    pub const fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    /// `SQLite` file path, defaulting to `~/.readvault/readvault.db`.
    pub fn sqlite_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.path {
            return Ok(path.clone());
        }
        dirs::home_dir()
            .map(|home| home.join(".readvault").join("readvault.db"))
            .ok_or_else(|| Error::Config("cannot determine home directory".to_string()))
    }
}

/// Credentials for the admin account synthesised on first start.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AdminConfig {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

/// Session token settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub access_ttl_secs: i64,
    pub refresh_ttl_secs: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "dev-secret-change-me".to_string(),
            access_ttl_secs: 3600,
            refresh_ttl_secs: 7 * 24 * 60 * 60, // 7 days
        }
    }
}

/// Shortest session signing secret accepted without a warning.
pub const MIN_JWT_SECRET_LEN: usize = 32;

impl Config {
    /// Validate the resolved configuration. Returns an error on invalid values.
    pub fn validate(&self) -> Result<()> {
        if self.database.query_timeout_secs == 0 {
            return Err(Error::Config(
                "database query timeout must be at least 1 second".to_string(),
            ));
        }
        if self.auth.jwt_secret.len() < MIN_JWT_SECRET_LEN {
            tracing::warn!(
                len = self.auth.jwt_secret.len(),
                min = MIN_JWT_SECRET_LEN,
                "JWT secret is shorter than recommended"
            );
        }
        Ok(())
    }
}

/// Load configuration with hierarchical resolution.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(path) => load_config_file(path)?,
        None => match global_config_path() {
            Some(global) if global.exists() => load_config_file(&global)?,
            _ => Config::default(),
        },
    };

    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
    config.validate()?;

    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("readvault").join("settings.json"))
}

fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

/// Apply `READVAULT_*` overrides read through `lookup`.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(val) = lookup("READVAULT_DB_DRIVER") {
        config.database.driver = Some(val.parse()?);
    }
    if let Some(val) = lookup("READVAULT_DB_PATH") {
        config.database.path = Some(PathBuf::from(val));
    }
    if let Some(val) = lookup("READVAULT_DB_URL") {
        config.database.url = Some(val);
    }
    if let Some(val) = lookup("READVAULT_DB_HOST") {
        config.database.host = Some(val);
    }
    if let Some(val) = lookup("READVAULT_DB_PORT") {
        let port = val
            .parse()
            .map_err(|_| Error::Config(format!("invalid READVAULT_DB_PORT '{val}'")))?;
        config.database.port = Some(port);
    }
    if let Some(val) = lookup("READVAULT_DB_USER") {
        config.database.user = Some(val);
    }
    if let Some(val) = lookup("READVAULT_DB_PASSWORD") {
        config.database.password = Some(val);
    }
    if let Some(val) = lookup("READVAULT_DB_NAME") {
        config.database.name = Some(val);
    }
    if let Some(val) = lookup("READVAULT_ADMIN_NAME") {
        config.admin.name = Some(val);
    }
    if let Some(val) = lookup("READVAULT_ADMIN_EMAIL") {
        config.admin.email = Some(val);
    }
    if let Some(val) = lookup("READVAULT_ADMIN_PASSWORD") {
        config.admin.password = Some(val);
    }
    if let Some(val) = lookup("READVAULT_JWT_SECRET") {
        config.auth.jwt_secret = val;
    }
    Ok(())
}
