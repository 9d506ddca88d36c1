//! Read command implementation.

use std::path::PathBuf;

use anyhow::Result;

use crate::cli::{DeviceArgs, OutputFormat, RoleArg};
use crate::config::Config;
use crate::format::{
    FormatOptions, TemperatureReport, format_report_csv, format_report_json, format_report_text,
};
use crate::util::{connect, require_device, session_config, write_output};

pub async fn cmd_read(
    device: DeviceArgs,
    format: OutputFormat,
    role: Option<RoleArg>,
    output: Option<&PathBuf>,
    quiet: bool,
    opts: &FormatOptions,
    config: &Config,
) -> Result<()> {
    let address = require_device(device.device.clone(), config)?;
    let session = session_config(&device, config)?;

    let connection = connect(&address, session, !quiet).await?;
    let report = select_role(&connection.report, role);
    connection.close().await;

    let content = match format {
        OutputFormat::Json => format_report_json(&report, opts)?,
        OutputFormat::Text => format_report_text(&report, opts),
        OutputFormat::Csv => format_report_csv(&report),
    };
    write_output(output, &content)
}

fn select_role(report: &TemperatureReport, role: Option<RoleArg>) -> TemperatureReport {
    let Some(role) = role else {
        return report.clone();
    };
    let mut selected = TemperatureReport::new(report.device.clone());
    if let Some(value) = report.get(role.into()) {
        selected.record(role.into(), value);
    }
    selected
}
