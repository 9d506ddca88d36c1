//! Configuration file management.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use brew_core::DestinationEncoding;
use serde::{Deserialize, Serialize};

use crate::cli::ConfigKey;

/// Configuration file structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Default controller address
    #[serde(default)]
    pub device: Option<String>,

    /// Connection timeout in seconds
    #[serde(default)]
    pub timeout: Option<u64>,

    /// Destination write encoding ("text" or "float")
    #[serde(default)]
    pub encoding: Option<String>,

    /// Reconnect automatically in watch mode
    #[serde(default = "default_true")]
    pub reconnect: bool,

    /// Disable colored output
    #[serde(default)]
    pub no_color: bool,

    /// Last successfully connected controller (auto-updated)
    #[serde(default)]
    pub last_device: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Get the config file path
    pub fn path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("brewctl")
            .join("config.toml")
    }

    /// Load config from file, or return default if not found
    pub fn load() -> Self {
        let path = Self::path();
        if path.exists() {
            match fs::read_to_string(&path) {
                Ok(content) => match toml::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        eprintln!("Warning: Failed to parse config: {}", e);
                    }
                },
                Err(e) => {
                    eprintln!("Warning: Failed to read config: {}", e);
                }
            }
        }
        Self::initial()
    }

    /// Defaults written by `config init`.
    pub fn initial() -> Self {
        Self {
            reconnect: true,
            ..Self::default()
        }
    }

    /// Save config to file
    pub fn save(&self) -> Result<()> {
        let path = Self::path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&path, content)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;
        Ok(())
    }

    /// Configured destination encoding, if any.
    pub fn destination_encoding(&self) -> Result<Option<DestinationEncoding>> {
        self.encoding
            .as_deref()
            .map(|s| {
                s.parse::<DestinationEncoding>()
                    .with_context(|| format!("Invalid encoding in config: {}", s))
            })
            .transpose()
    }

    /// Read a key as display text.
    pub fn get(&self, key: ConfigKey) -> Option<String> {
        match key {
            ConfigKey::Device => self.device.clone(),
            ConfigKey::Timeout => self.timeout.map(|t| t.to_string()),
            ConfigKey::Encoding => self.encoding.clone(),
            ConfigKey::Reconnect => Some(self.reconnect.to_string()),
            ConfigKey::NoColor => Some(self.no_color.to_string()),
        }
    }

    /// Set a key from its text form, validating the value.
    pub fn set(&mut self, key: ConfigKey, value: &str) -> Result<()> {
        match key {
            ConfigKey::Device => {
                brew_core::PeripheralAddress::parse(value)
                    .with_context(|| format!("Invalid controller address: {}", value))?;
                self.device = Some(value.to_string());
            }
            ConfigKey::Timeout => {
                let secs: u64 = value
                    .parse()
                    .with_context(|| format!("Invalid timeout: {}", value))?;
                if secs == 0 {
                    bail!("Timeout must be at least 1 second");
                }
                self.timeout = Some(secs);
            }
            ConfigKey::Encoding => {
                let encoding: DestinationEncoding = value
                    .parse()
                    .with_context(|| format!("Invalid encoding: {}", value))?;
                self.encoding = Some(encoding.to_string());
            }
            ConfigKey::Reconnect => self.reconnect = parse_bool(value)?,
            ConfigKey::NoColor => self.no_color = parse_bool(value)?,
        }
        Ok(())
    }

    /// Reset a key to its default.
    pub fn unset(&mut self, key: ConfigKey) {
        match key {
            ConfigKey::Device => self.device = None,
            ConfigKey::Timeout => self.timeout = None,
            ConfigKey::Encoding => self.encoding = None,
            ConfigKey::Reconnect => self.reconnect = true,
            ConfigKey::NoColor => self.no_color = false,
        }
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.to_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => bail!("Invalid boolean value '{}'. Use true/false", value),
    }
}

/// Resolve device from arg/env var, falling back to config.
pub fn resolve_device(device: Option<String>, config: &Config) -> Option<String> {
    device
        .or_else(|| config.device.clone())
        .or_else(|| config.last_device.clone())
}

/// Resolve timeout: an explicit non-default value wins, then config, then default.
pub fn resolve_timeout(cmd_timeout: u64, config: &Config, default: u64) -> u64 {
    if cmd_timeout != default {
        cmd_timeout
    } else {
        config.timeout.unwrap_or(default)
    }
}

/// Remember the last controller that reached the ready state.
pub fn update_last_device(identifier: &str) -> Result<()> {
    let mut config = Config::load();
    if config.last_device.as_deref() == Some(identifier) {
        return Ok(());
    }
    config.last_device = Some(identifier.to_string());
    config.save()
}
