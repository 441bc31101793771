use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use url::Url;

pub const DEFAULT_MEASUREMENT_NAME: &str = "midea_dehumidifier";

pub const DEFAULT_CLI_PATH: &str = "midea-beautiful-air-cli";

pub const DEFAULT_MQTT_PORT: u16 = 1883;

const DEFAULT_CONFIG_PATHS: [&str; 2] = ["/config.json", "./config.json"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to open config file '{}'", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file '{}'", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{0} is required")]
    Missing(&'static str),

    #[error("no output configured: set influx_server and/or mqtt_host")]
    NoSinks,

    #[error("failed to parse heartbeat_url")]
    HeartbeatUrl(#[source] url::ParseError),
}

/// On-disk JSON configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(rename = "measurement_name_dehumidifier")]
    pub measurement_name: String,

    pub influx_server: String,
    pub influx_bucket: String,
    pub influx_org: String,
    pub influx_user: String,
    #[serde(rename = "influx_password")]
    pub influx_pass: String,
    pub influx_token: String,
    pub influx_health_check_disabled: bool,

    pub mqtt_host: String,
    pub mqtt_port: Option<u16>,
    pub mqtt_username: String,
    pub mqtt_password: String,
    pub mqtt_topic: String,

    pub heartbeat_url: String,

    #[serde(rename = "midea_beautiful_air_cli_path")]
    pub cli_path: String,
    #[serde(rename = "midea_beautiful_air_cli_discover_args")]
    pub discover_args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfluxSettings {
    pub server: String,
    pub bucket: String,
    pub org: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub token: Option<String>,
    pub health_check_disabled: bool,
}

impl InfluxSettings {
    /// `user:password` when either is set, otherwise the API token.
    pub fn auth_token(&self) -> Option<String> {
        if self.user.is_some() || self.password.is_some() {
            Some(format!(
                "{}:{}",
                self.user.as_deref().unwrap_or_default(),
                self.password.as_deref().unwrap_or_default()
            ))
        } else {
            self.token.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub topic: String,
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&content).map_err(|err| match err {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    /// Parses and validates a configuration, filling in defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let mut config: Config =
            serde_json::from_str(json).map_err(|source| ConfigError::Parse {
                path: PathBuf::new(),
                source,
            })?;

        if config.measurement_name.is_empty() {
            config.measurement_name = DEFAULT_MEASUREMENT_NAME.to_string();
        }
        if config.cli_path.is_empty() {
            config.cli_path = DEFAULT_CLI_PATH.to_string();
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.influx_server.is_empty() && self.influx_bucket.is_empty() {
            return Err(ConfigError::Missing("influx_bucket"));
        }
        if !self.mqtt_host.is_empty() && self.mqtt_topic.is_empty() {
            return Err(ConfigError::Missing("mqtt_topic"));
        }
        if self.influx().is_none() && self.mqtt().is_none() {
            return Err(ConfigError::NoSinks);
        }
        if let Some(url) = self.heartbeat_url() {
            Url::parse(url).map_err(ConfigError::HeartbeatUrl)?;
        }
        if self.discover_args.is_empty() {
            return Err(ConfigError::Missing("midea_beautiful_air_cli_discover_args"));
        }
        Ok(())
    }

    pub fn influx(&self) -> Option<InfluxSettings> {
        if self.influx_server.is_empty() || self.influx_bucket.is_empty() {
            return None;
        }
        Some(InfluxSettings {
            server: self.influx_server.clone(),
            bucket: self.influx_bucket.clone(),
            org: non_empty(&self.influx_org),
            user: non_empty(&self.influx_user),
            password: non_empty(&self.influx_pass),
            token: non_empty(&self.influx_token),
            health_check_disabled: self.influx_health_check_disabled,
        })
    }

    pub fn mqtt(&self) -> Option<MqttSettings> {
        if self.mqtt_host.is_empty() || self.mqtt_topic.is_empty() {
            return None;
        }
        Some(MqttSettings {
            host: self.mqtt_host.clone(),
            port: self.mqtt_port.filter(|p| *p != 0).unwrap_or(DEFAULT_MQTT_PORT),
            username: non_empty(&self.mqtt_username),
            password: non_empty(&self.mqtt_password),
            topic: self.mqtt_topic.trim_end_matches('/').to_string(),
        })
    }

    pub fn heartbeat_url(&self) -> Option<&str> {
        Some(self.heartbeat_url.as_str()).filter(|u| !u.is_empty())
    }
}

/// The first of `/config.json` and `./config.json` that exists.
pub fn default_config_path() -> Option<PathBuf> {
    DEFAULT_CONFIG_PATHS
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
}

fn non_empty(s: &str) -> Option<String> {
    Some(s.to_string()).filter(|s| !s.is_empty())
}
