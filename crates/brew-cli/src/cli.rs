//! CLI argument definitions using clap.

use std::path::PathBuf;

use brew_core::{CharacteristicRole, DestinationEncoding};
use clap::{Args, Parser, Subcommand, ValueEnum};

/// Output format for commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Csv,
}

/// Which temperature to read
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RoleArg {
    /// Measured temperature
    Realtime,
    /// Setpoint
    Destination,
}

impl From<RoleArg> for CharacteristicRole {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Realtime => CharacteristicRole::RealtimeTemperature,
            RoleArg::Destination => CharacteristicRole::DestinationTemperature,
        }
    }
}

/// Wire encoding for setpoint writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EncodingArg {
    /// Decimal text, e.g. "65.5"
    Text,
    /// 4-byte little-endian float
    Float,
}

impl From<EncodingArg> for DestinationEncoding {
    fn from(encoding: EncodingArg) -> Self {
        match encoding {
            EncodingArg::Text => DestinationEncoding::Text,
            EncodingArg::Float => DestinationEncoding::Float,
        }
    }
}

/// Reusable device connection arguments
#[derive(Debug, Clone, Args)]
pub struct DeviceArgs {
    /// Controller address (MAC address or UUID), or use BREW_DEVICE env var
    #[arg(short, long, env = "BREW_DEVICE")]
    pub device: Option<String>,

    /// Connection timeout in seconds
    #[arg(short = 'T', long, default_value = "15")]
    pub timeout: u64,

    /// Encoding used when writing the destination temperature
    #[arg(long, value_enum)]
    pub encoding: Option<EncodingArg>,
}

#[derive(Parser)]
#[command(name = "brewctl")]
#[command(author, version, about = "CLI for BLE brew temperature controllers", long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output as JSON (shorthand for --format json)
    #[arg(long, global = true)]
    pub json: bool,

    /// Output compact JSON (no pretty-printing)
    #[arg(long, global = true)]
    pub compact: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    pub no_color: bool,

    /// Write output to file instead of stdout
    #[arg(short, long, global = true)]
    pub output: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scan for nearby brew controllers
    Scan {
        /// Scan timeout in seconds
        #[arg(short, long, default_value = "10")]
        timeout: u64,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,

        /// List every BLE peripheral, not just controllers
        #[arg(long)]
        all: bool,
    },

    /// Read the current temperatures from a controller
    Read {
        #[command(flatten)]
        device: DeviceArgs,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Read only one temperature
        #[arg(short, long, value_enum)]
        role: Option<RoleArg>,
    },

    /// Continuously print temperature updates
    Watch {
        #[command(flatten)]
        device: DeviceArgs,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Number of updates to print before exiting (0 for unlimited)
        #[arg(short = 'n', long, default_value = "0")]
        count: u32,

        /// Also subscribe to destination temperature notifications
        #[arg(long)]
        notify_destination: bool,

        /// Do not reconnect when the link drops
        #[arg(long)]
        no_reconnect: bool,
    },

    /// Set the destination temperature
    Set {
        #[command(flatten)]
        device: DeviceArgs,

        /// New destination temperature
        #[arg(value_parser = parse_temperature, allow_negative_numbers = true)]
        value: f32,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// Parse a finite temperature value
fn parse_temperature(s: &str) -> Result<f32, String> {
    let value: f32 = s
        .trim()
        .parse()
        .map_err(|_| format!("'{}' is not a valid temperature", s))?;
    if value.is_finite() {
        Ok(value)
    } else {
        Err(format!("'{}' is not a finite temperature", s))
    }
}

/// Configuration keys
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ConfigKey {
    /// Default controller address
    Device,
    /// Default connection timeout in seconds
    Timeout,
    /// Destination write encoding (text, float)
    Encoding,
    /// Reconnect automatically in watch mode
    Reconnect,
    /// Disable colored output
    NoColor,
}

/// Configuration subcommands
#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Get a configuration value
    Get {
        /// Configuration key
        #[arg(value_enum)]
        key: ConfigKey,
    },

    /// Set a configuration value
    Set {
        /// Configuration key
        #[arg(value_enum)]
        key: ConfigKey,
        /// Configuration value
        value: String,
    },

    /// Unset (remove) a configuration value
    Unset {
        /// Configuration key to remove
        #[arg(value_enum)]
        key: ConfigKey,
    },

    /// Show configuration file path
    Path,

    /// Initialize default configuration
    Init,
}
