use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ftpclaim_core::{FtpEndpoint, spreadsheet_id_from_url};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

const APP_DIR_NAME: &str = "ftpclaim";
const SETTINGS_FILE_NAME: &str = "ftp_config.json";
const CREDENTIALS_FILE_NAME: &str = "credentials.json";
const FTP_SECTION: &str = "ftp";
const DEFAULT_POLL_SECS: u64 = 60;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_CLAIM_JITTER_MS: u64 = 250;
const MASKED_SECRET: &str = "********";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot access settings file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("settings file {path} is not valid JSON: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("settings file {0} must contain a JSON object")]
    NotAnObject(PathBuf),
    #[error("missing required setting ftp.{0}")]
    Missing(&'static str),
    #[error("invalid setting ftp.{field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// The `ftp` section of the settings file. Every field is optional on disk.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct FtpSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub google_sheet_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
struct SettingsDocument {
    #[serde(default)]
    ftp: FtpSettings,
}

/// Settings after validation, ready to drive a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSettings {
    pub endpoint: FtpEndpoint,
    pub base_path: String,
    pub sheet_url: String,
    pub spreadsheet_id: String,
}

impl FtpSettings {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Requires all five fields to be present and non-blank.
    pub fn resolve(&self) -> Result<ResolvedSettings, ConfigError> {
        let host = required("host", &self.host)?;
        let user = required("user", &self.user)?;
        let password = required("password", &self.password)?;
        let base_path = required("base_path", &self.base_path)?;
        let sheet_url = required("google_sheet_url", &self.google_sheet_url)?;

        let endpoint =
            FtpEndpoint::parse(host, user, password).map_err(|err| ConfigError::Invalid {
                field: "host",
                reason: err.to_string(),
            })?;
        let spreadsheet_id =
            spreadsheet_id_from_url(sheet_url).map_err(|err| ConfigError::Invalid {
                field: "google_sheet_url",
                reason: err.to_string(),
            })?;

        Ok(ResolvedSettings {
            endpoint,
            base_path: base_path.to_string(),
            sheet_url: sheet_url.to_string(),
            spreadsheet_id,
        })
    }
}

fn required<'a>(field: &'static str, value: &'a Option<String>) -> Result<&'a str, ConfigError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or(ConfigError::Missing(field))
}

/// Reads and merges the JSON settings file.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn default_path() -> PathBuf {
        config_root().join(SETTINGS_FILE_NAME)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing file yields empty settings.
    pub fn load(&self) -> Result<FtpSettings, ConfigError> {
        let Some(raw) = self.read_raw()? else {
            return Ok(FtpSettings::default());
        };
        let document: SettingsDocument =
            serde_json::from_str(&raw).map_err(|source| self.json_error(source))?;
        Ok(document.ftp)
    }

    /// Writes the present fields of `update` into the `ftp` section, leaving
    /// every other key of the file untouched.
    pub fn save(&self, update: &FtpSettings) -> Result<(), ConfigError> {
        let mut document = self.load_document()?;
        let root = document
            .as_object_mut()
            .ok_or_else(|| ConfigError::NotAnObject(self.path.clone()))?;
        let section = root
            .entry(FTP_SECTION)
            .or_insert_with(|| Value::Object(Map::new()));
        if !section.is_object() {
            *section = Value::Object(Map::new());
        }
        if let (Some(section), Value::Object(fields)) = (
            section.as_object_mut(),
            serde_json::to_value(update).map_err(|source| self.json_error(source))?,
        ) {
            section.extend(fields);
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| self.io_error(source))?;
        }
        let mut rendered =
            serde_json::to_string_pretty(&document).map_err(|source| self.json_error(source))?;
        rendered.push('\n');
        std::fs::write(&self.path, rendered).map_err(|source| self.io_error(source))?;
        tracing::debug!(path = %self.path.display(), "settings saved");
        Ok(())
    }

    /// The whole file with the ftp password masked.
    pub fn masked_document(&self) -> Result<Value, ConfigError> {
        let mut document = self.load_document()?;
        if let Some(password) = document
            .get_mut(FTP_SECTION)
            .and_then(|section| section.get_mut("password"))
            .filter(|password| !password.is_null())
        {
            *password = Value::String(MASKED_SECRET.to_string());
        }
        Ok(document)
    }

    fn load_document(&self) -> Result<Value, ConfigError> {
        let Some(raw) = self.read_raw()? else {
            return Ok(Value::Object(Map::new()));
        };
        let document: Value =
            serde_json::from_str(&raw).map_err(|source| self.json_error(source))?;
        if !document.is_object() {
            return Err(ConfigError::NotAnObject(self.path.clone()));
        }
        Ok(document)
    }

    fn read_raw(&self) -> Result<Option<String>, ConfigError> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => Ok(Some(raw)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(self.io_error(source)),
        }
    }

    fn io_error(&self, source: io::Error) -> ConfigError {
        ConfigError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn json_error(&self, source: serde_json::Error) -> ConfigError {
        ConfigError::Json {
            path: self.path.clone(),
            source,
        }
    }
}

/// Process-level knobs read from the environment.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub settings_path: PathBuf,
    pub credentials_path: PathBuf,
    pub download_root: PathBuf,
    pub poll_interval: Duration,
    pub connect_timeout: Duration,
    pub claim_jitter: Option<Duration>,
    pub static_token: Option<String>,
    pub worksheet: Option<String>,
}

impl RuntimeConfig {
    pub fn from_env(settings_override: Option<PathBuf>) -> Self {
        let home = dirs::home_dir().unwrap_or_else(std::env::temp_dir);
        let settings_path = settings_override
            .or_else(|| env_path("FTPCLAIM_CONFIG", &home))
            .unwrap_or_else(SettingsStore::default_path);
        let credentials_path = env_path("FTPCLAIM_CREDENTIALS", &home)
            .unwrap_or_else(|| config_root().join(CREDENTIALS_FILE_NAME));
        let download_root = env_path("FTPCLAIM_DOWNLOAD_DIR", &home)
            .or_else(dirs::download_dir)
            .unwrap_or_else(|| home.join("Downloads"));
        let poll_interval =
            Duration::from_secs(read_u64_env("FTPCLAIM_POLL_SECS", DEFAULT_POLL_SECS));
        let connect_timeout = Duration::from_secs(read_u64_env(
            "FTPCLAIM_CONNECT_TIMEOUT_SECS",
            DEFAULT_CONNECT_TIMEOUT_SECS,
        ));
        let claim_jitter = claim_jitter_from(std::env::var("FTPCLAIM_CLAIM_JITTER_MS").ok());

        Self {
            settings_path,
            credentials_path,
            download_root,
            poll_interval,
            connect_timeout,
            claim_jitter,
            static_token: non_blank_env("FTPCLAIM_SHEETS_TOKEN"),
            worksheet: non_blank_env("FTPCLAIM_WORKSHEET"),
        }
    }

    pub fn settings_store(&self) -> SettingsStore {
        SettingsStore::new(self.settings_path.clone())
    }
}

fn config_root() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR_NAME)
}

fn env_path(name: &str, home: &Path) -> Option<PathBuf> {
    non_blank_env(name).map(|value| expand_with_home(&value, home))
}

fn non_blank_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn expand_with_home(value: &str, home: &Path) -> PathBuf {
    if value == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = value.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(value)
}

fn read_u64_env(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

// Zero turns the claim re-check off.
fn claim_jitter_from(raw: Option<String>) -> Option<Duration> {
    let millis = raw
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(DEFAULT_CLAIM_JITTER_MS);
    (millis > 0).then(|| Duration::from_millis(millis))
}
