//! Scan command implementation.

use std::path::PathBuf;

use anyhow::{Context, Result};
use brew_core::{RetryConfig, ScanOptions, scan_with_retry};

use crate::cli::OutputFormat;
use crate::format::{FormatOptions, format_scan_csv, format_scan_json, format_scan_text};
use crate::style;
use crate::util::write_output;

pub async fn cmd_scan(
    timeout: u64,
    format: OutputFormat,
    all: bool,
    output: Option<&PathBuf>,
    quiet: bool,
    opts: &FormatOptions,
) -> Result<()> {
    let spinner = (!quiet && format == OutputFormat::Text).then(|| style::scanning_spinner(timeout));

    let options = ScanOptions::default()
        .duration_secs(timeout)
        .controllers_only(!all);

    // Failed scans are retried; an empty result is an answer
    let controllers = scan_with_retry(options, &RetryConfig::for_scan(), false)
        .await
        .context("Failed to scan for controllers")?;

    if let Some(sp) = spinner {
        sp.finish_and_clear();
    }

    let content = match format {
        OutputFormat::Json => format_scan_json(&controllers, opts)?,
        OutputFormat::Text => format_scan_text(&controllers, opts),
        OutputFormat::Csv => format_scan_csv(&controllers),
    };
    write_output(output, &content)
}
