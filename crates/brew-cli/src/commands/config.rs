//! Config command implementation.
//!
//! Reads and edits the TOML file returned by [`Config::path`].

use anyhow::{Context, Result};

use crate::cli::{ConfigAction, ConfigKey};
use crate::config::Config;
use crate::format::FormatOptions;
use crate::style;

pub fn cmd_config(action: ConfigAction, json: bool, quiet: bool, opts: &FormatOptions) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = Config::load();
            if json {
                print!("{}", opts.as_json(&config)?);
            } else {
                let content =
                    toml::to_string_pretty(&config).context("Failed to serialize config")?;
                if !quiet {
                    println!("# {}", Config::path().display());
                }
                print!("{}", content);
            }
        }
        ConfigAction::Get { key } => {
            let config = Config::load();
            match config.get(key) {
                Some(value) => println!("{}", value),
                None => println!("(not set)"),
            }
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load();
            config.set(key, &value)?;
            config.save()?;
            if !quiet {
                println!(
                    "{}",
                    style::format_success(&format!("Set {} = {}", key_name(key), value), opts.no_color)
                );
            }
        }
        ConfigAction::Unset { key } => {
            let mut config = Config::load();
            config.unset(key);
            config.save()?;
            if !quiet {
                println!(
                    "{}",
                    style::format_success(&format!("Unset {}", key_name(key)), opts.no_color)
                );
            }
        }
        ConfigAction::Path => println!("{}", Config::path().display()),
        ConfigAction::Init => {
            let path = Config::path();
            if path.exists() {
                if !quiet {
                    println!("Config already exists at {}", path.display());
                }
                return Ok(());
            }
            Config::initial().save()?;
            if !quiet {
                println!(
                    "{}",
                    style::format_success(
                        &format!("Created config at {}", path.display()),
                        opts.no_color
                    )
                );
            }
        }
    }
    Ok(())
}

/// Name of a key as written in the config file.
fn key_name(key: ConfigKey) -> &'static str {
    match key {
        ConfigKey::Device => "device",
        ConfigKey::Timeout => "timeout",
        ConfigKey::Encoding => "encoding",
        ConfigKey::Reconnect => "reconnect",
        ConfigKey::NoColor => "no_color",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_names_match_file_fields() {
        let config = Config {
            device: Some("C4:4F:33:53:7A:57".to_string()),
            timeout: Some(20),
            encoding: Some("float".to_string()),
            ..Config::initial()
        };
        let value = toml::Value::try_from(&config).unwrap();
        let table = value.as_table().unwrap();
        for key in [
            ConfigKey::Device,
            ConfigKey::Timeout,
            ConfigKey::Encoding,
            ConfigKey::Reconnect,
            ConfigKey::NoColor,
        ] {
            assert!(table.contains_key(key_name(key)), "missing {}", key_name(key));
        }
    }
}
