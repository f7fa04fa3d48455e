//! Settings shared by the board and the CLI, read from `taskclock.toml`.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::alerts::DesktopAlerts;
use crate::channel::ChannelConfig;
use crate::service::{HttpTaskService, ServiceError};

pub const CONFIG_FILE: &str = "taskclock.toml";
pub const SERVER_ENV: &str = "TASKCLOCK_SERVER";

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid server URL {url:?}: {source}")]
    ServerUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub timer: TimerSettings,
    pub alerts: AlertSettings,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerSettings {
    pub url: String,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TimerSettings {
    pub connect_timeout_secs: u64,
    /// How long a toast stays on screen.
    pub toast_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AlertSettings {
    pub sound: bool,
    pub desktop: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            url: "http://localhost:6969".to_string(),
            request_timeout_secs: 10,
        }
    }
}

impl Default for TimerSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 5,
            toast_secs: 5,
        }
    }
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            sound: true,
            desktop: true,
        }
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "pabloagn", "Taskclock")
}

/// Platform location of `taskclock.toml`.
pub fn config_path() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().join(CONFIG_FILE))
}

/// Platform data directory (log files live here).
pub fn data_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.data_dir().to_path_buf())
}

/// Reads a TOML file into `T`, or `T::default()` when the file is missing.
pub fn read_toml<T>(path: &Path) -> Result<T, SettingsError>
where
    T: for<'de> Deserialize<'de> + Default,
{
    if !path.exists() {
        return Ok(T::default());
    }
    let text = fs::read_to_string(path).map_err(|source| SettingsError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| SettingsError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

impl Settings {
    /// Loads settings from the platform config file, then applies
    /// `TASKCLOCK_SERVER`.
    pub fn load() -> Result<Self, SettingsError> {
        let mut settings: Settings = match config_path() {
            Some(path) => read_toml(&path)?,
            None => Settings::default(),
        };
        settings.apply_env();
        Ok(settings)
    }

    pub fn apply_env(&mut self) {
        if let Ok(url) = env::var(SERVER_ENV) {
            if !url.trim().is_empty() {
                self.server.url = url;
            }
        }
    }

    pub fn server_url(&self) -> Result<Url, SettingsError> {
        Url::parse(&self.server.url).map_err(|source| SettingsError::ServerUrl {
            url: self.server.url.clone(),
            source,
        })
    }

    pub fn task_service(&self) -> Result<HttpTaskService, ServiceError> {
        let server = Url::parse(&self.server.url)?;
        HttpTaskService::new(&server, Duration::from_secs(self.server.request_timeout_secs))
    }

    pub fn channel_config(&self) -> Result<ChannelConfig, SettingsError> {
        let server = self.server_url()?;
        ChannelConfig::for_server(&server)
            .map(|c| c.with_connect_timeout(Duration::from_secs(self.timer.connect_timeout_secs)))
            .map_err(|source| SettingsError::ServerUrl {
                url: self.server.url.clone(),
                source,
            })
    }

    pub fn toast_ttl(&self) -> Duration {
        Duration::from_secs(self.timer.toast_secs)
    }

    pub fn desktop_alerts(&self) -> DesktopAlerts {
        DesktopAlerts {
            sound: self.alerts.sound,
            desktop: self.alerts.desktop,
        }
    }
}
