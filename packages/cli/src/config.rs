use std::env;
use std::num::ParseIntError;
use std::path::PathBuf;
use std::time::Duration;

use previewbox_config::constants;
use previewbox_sandboxes::{parse_command, ProvisionSettings};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid port number: {0}")]
    InvalidPort(#[from] ParseIntError),
    #[error("Port {0} is out of valid range (1-65535)")]
    PortOutOfRange(u16),
    #[error("Invalid value for {name}: {value}")]
    InvalidNumber { name: &'static str, value: String },
    #[error("{name} must be between {min} and {max}, got {value}")]
    OutOfRange {
        name: &'static str,
        value: u64,
        min: u64,
        max: u64,
    },
    #[error("{0} must not be empty")]
    EmptyCommand(&'static str),
    #[error("Invalid CORS origin: {0}")]
    InvalidCorsOrigin(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub cors_origin: String,
    pub sandbox_root: PathBuf,
    pub image: String,
    pub workdir: String,
    pub install_command: Vec<String>,
    pub dev_command: Vec<String>,
    pub probe_host: String,
    pub probe_deadline_secs: u64,
    pub pull_timeout_secs: u64,
    pub install_timeout_secs: u64,
    /// Zero disables expiry
    pub sandbox_ttl_minutes: u64,
    pub reaper_interval_minutes: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        // PORT is honored for older deployments
        let port_str = env::var(constants::PREVIEWBOX_API_PORT)
            .or_else(|_| env::var(constants::PORT))
            .unwrap_or_else(|_| constants::DEFAULT_API_PORT.to_string());

        let port = port_str.parse::<u16>()?;

        // Validate port is in valid range
        if port == 0 {
            return Err(ConfigError::PortOutOfRange(port));
        }

        let host = env::var(constants::PREVIEWBOX_API_HOST)
            .unwrap_or_else(|_| constants::DEFAULT_API_HOST.to_string());

        let cors_origin = env::var(constants::CORS_ORIGIN)
            .unwrap_or_else(|_| constants::DEFAULT_CORS_ORIGIN.to_string());

        let sandbox_root = env::var(constants::PREVIEWBOX_SANDBOX_ROOT)
            .unwrap_or_else(|_| constants::DEFAULT_SANDBOX_ROOT.to_string())
            .into();

        let image = env::var(constants::PREVIEWBOX_IMAGE)
            .unwrap_or_else(|_| constants::DEFAULT_IMAGE.to_string());

        let workdir = env::var(constants::PREVIEWBOX_WORKDIR)
            .unwrap_or_else(|_| constants::DEFAULT_WORKDIR.to_string());

        let install_command = command_var(
            constants::PREVIEWBOX_INSTALL_COMMAND,
            constants::DEFAULT_INSTALL_COMMAND,
        )?;
        let dev_command = command_var(
            constants::PREVIEWBOX_DEV_COMMAND,
            constants::DEFAULT_DEV_COMMAND,
        )?;

        let probe_host = env::var(constants::PREVIEWBOX_PROBE_HOST)
            .unwrap_or_else(|_| constants::DEFAULT_PROBE_HOST.to_string());

        let probe_deadline_secs = number_var(
            constants::PREVIEWBOX_PROBE_DEADLINE_SECS,
            constants::DEFAULT_PROBE_DEADLINE_SECS,
        )?;
        let pull_timeout_secs = number_var(
            constants::PREVIEWBOX_PULL_TIMEOUT_SECS,
            constants::DEFAULT_PULL_TIMEOUT_SECS,
        )?;
        let install_timeout_secs = number_var(
            constants::PREVIEWBOX_INSTALL_TIMEOUT_SECS,
            constants::DEFAULT_INSTALL_TIMEOUT_SECS,
        )?;
        let sandbox_ttl_minutes = number_var(
            constants::PREVIEWBOX_SANDBOX_TTL_MINUTES,
            constants::DEFAULT_SANDBOX_TTL_MINUTES,
        )?;
        if sandbox_ttl_minutes > constants::MAX_SANDBOX_TTL_MINUTES {
            return Err(ConfigError::OutOfRange {
                name: constants::PREVIEWBOX_SANDBOX_TTL_MINUTES,
                value: sandbox_ttl_minutes,
                min: 0,
                max: constants::MAX_SANDBOX_TTL_MINUTES,
            });
        }

        let reaper_interval_minutes = number_var(
            constants::PREVIEWBOX_REAPER_INTERVAL_MINUTES,
            constants::DEFAULT_REAPER_INTERVAL_MINUTES,
        )?;
        if !(1..=60).contains(&reaper_interval_minutes) {
            return Err(ConfigError::OutOfRange {
                name: constants::PREVIEWBOX_REAPER_INTERVAL_MINUTES,
                value: reaper_interval_minutes,
                min: 1,
                max: 60,
            });
        }

        Ok(Config {
            host,
            port,
            cors_origin,
            sandbox_root,
            image,
            workdir,
            install_command,
            dev_command,
            probe_host,
            probe_deadline_secs,
            pull_timeout_secs,
            install_timeout_secs,
            sandbox_ttl_minutes,
            reaper_interval_minutes,
        })
    }

    /// Settings handed to the provisioning pipeline
    pub fn provision_settings(&self) -> ProvisionSettings {
        ProvisionSettings {
            image: self.image.clone(),
            workdir: self.workdir.clone(),
            install_command: self.install_command.clone(),
            dev_command: self.dev_command.clone(),
            probe_host: self.probe_host.clone(),
            probe_deadline: Duration::from_secs(self.probe_deadline_secs),
            pull_timeout: Duration::from_secs(self.pull_timeout_secs),
            install_timeout: Duration::from_secs(self.install_timeout_secs),
            ..Default::default()
        }
    }

    pub fn sandbox_ttl(&self) -> Duration {
        Duration::from_secs(self.sandbox_ttl_minutes.saturating_mul(60))
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_minutes.saturating_mul(60))
    }
}

fn number_var(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<u64>()
            .map_err(|_| ConfigError::InvalidNumber { name, value }),
        Err(_) => Ok(default),
    }
}

fn command_var(name: &'static str, default: &str) -> Result<Vec<String>, ConfigError> {
    let command = parse_command(&env::var(name).unwrap_or_else(|_| default.to_string()));
    if command.is_empty() {
        return Err(ConfigError::EmptyCommand(name));
    }
    Ok(command)
}
