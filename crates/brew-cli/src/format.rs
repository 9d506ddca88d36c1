//! Output formatting for text, JSON, and CSV output.

use anyhow::Result;
use brew_core::{CharacteristicRole, DiscoveredController, SessionEvent};
use serde::Serialize;

use crate::style;

/// Formatting options for output.
#[derive(Debug, Clone, Copy, Default)]
pub struct FormatOptions {
    /// Disable colored output.
    pub no_color: bool,
    /// Use compact JSON output (no pretty-printing).
    pub compact: bool,
}

impl FormatOptions {
    pub fn new(no_color: bool) -> Self {
        Self {
            no_color,
            compact: false,
        }
    }

    /// Create with compact JSON option.
    #[must_use]
    pub fn with_compact(mut self, compact: bool) -> Self {
        self.compact = compact;
        self
    }

    /// Serialize value to JSON string, respecting compact option.
    pub fn as_json<T: Serialize>(&self, value: &T) -> Result<String> {
        let json = if self.compact {
            serde_json::to_string(value)?
        } else {
            serde_json::to_string_pretty(value)?
        };
        Ok(json + "\n")
    }
}

/// Escape a CSV field.
pub fn csv_escape(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

fn optional_temp(value: Option<f32>) -> String {
    value.map(|v| format!("{:.1}", v)).unwrap_or_default()
}

// ============================================================================
// Scan formatting
// ============================================================================

pub fn format_scan_json(controllers: &[DiscoveredController], opts: &FormatOptions) -> Result<String> {
    #[derive(Serialize)]
    struct ScanResult<'a> {
        count: usize,
        controllers: &'a [DiscoveredController],
    }

    opts.as_json(&ScanResult {
        count: controllers.len(),
        controllers,
    })
}

pub fn format_scan_text(controllers: &[DiscoveredController], opts: &FormatOptions) -> String {
    if controllers.is_empty() {
        return "No brew controllers found.\n".to_string();
    }

    let mut out = format!("Found {} controller(s):\n\n", controllers.len());
    for controller in controllers {
        let name = controller.name.as_deref().unwrap_or("Unknown");
        out.push_str(&format!("  {}\n", name));
        out.push_str(&format!("    Identifier: {}\n", controller.identifier));
        out.push_str(&format!(
            "    Signal:     {}\n",
            style::format_signal_bar(controller.rssi, opts.no_color)
        ));
        if !controller.is_controller {
            out.push_str("    (does not advertise the controller service)\n");
        }
        out.push('\n');
    }
    out
}

pub fn format_scan_csv(controllers: &[DiscoveredController]) -> String {
    let mut out = String::from("name,identifier,rssi,is_controller\n");
    for controller in controllers {
        out.push_str(&format!(
            "{},{},{},{}\n",
            csv_escape(controller.name.as_deref().unwrap_or("")),
            csv_escape(&controller.identifier),
            controller.rssi.map(|r| r.to_string()).unwrap_or_default(),
            controller.is_controller
        ));
    }
    out
}

// ============================================================================
// Temperature reports
// ============================================================================

/// Temperatures read from one controller.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TemperatureReport {
    pub device: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub realtime: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<f32>,
}

impl TemperatureReport {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            ..Self::default()
        }
    }

    /// Store a temperature for its role.
    pub fn record(&mut self, role: CharacteristicRole, value: f32) {
        match role {
            CharacteristicRole::RealtimeTemperature => self.realtime = Some(value),
            CharacteristicRole::DestinationTemperature => self.destination = Some(value),
        }
    }

    pub fn get(&self, role: CharacteristicRole) -> Option<f32> {
        match role {
            CharacteristicRole::RealtimeTemperature => self.realtime,
            CharacteristicRole::DestinationTemperature => self.destination,
        }
    }
}

pub fn format_report_text(report: &TemperatureReport, opts: &FormatOptions) -> String {
    let mut out = format!("{}\n", report.device);
    if let Some(realtime) = report.realtime {
        out.push_str(&format!(
            "  Realtime:    {}\n",
            style::format_temp_colored(realtime, report.destination, opts.no_color)
        ));
    }
    if let Some(destination) = report.destination {
        out.push_str(&format!("  Destination: {:.1}°\n", destination));
    }
    out
}

pub fn format_report_json(report: &TemperatureReport, opts: &FormatOptions) -> Result<String> {
    opts.as_json(report)
}

pub fn format_report_csv(report: &TemperatureReport) -> String {
    format!(
        "device,realtime,destination\n{},{},{}\n",
        csv_escape(&report.device),
        optional_temp(report.realtime),
        optional_temp(report.destination)
    )
}

// ============================================================================
// Watch formatting
// ============================================================================

/// Format one session event as a watch line, or `None` for events that
/// are not shown in text mode.
pub fn format_watch_line(
    event: &SessionEvent,
    current: &TemperatureReport,
    previous: Option<f32>,
    opts: &FormatOptions,
) -> Option<String> {
    let line = match event {
        SessionEvent::TemperatureUpdated { role, value } => {
            let colored = match role {
                CharacteristicRole::RealtimeTemperature => {
                    style::format_temp_colored(*value, current.destination, opts.no_color)
                }
                CharacteristicRole::DestinationTemperature => format!("{:.1}°", value),
            };
            let trend = previous
                .map(|p| style::trend_indicator(*value, p, opts.no_color))
                .unwrap_or(" ");
            format!("{:<12} {} {}", role.label(), colored, trend)
        }
        SessionEvent::DestinationWritten { value } => {
            style::format_success(&format!("destination set to {:.1}°", value), opts.no_color)
        }
        SessionEvent::ServicesReady => style::format_success("ready", opts.no_color),
        SessionEvent::Disconnected { reason, .. } => {
            style::format_warning(&format!("disconnected: {}", reason), opts.no_color)
        }
        SessionEvent::ConnectionFailed { reason, .. } => {
            style::format_warning(&format!("connection failed: {}", reason), opts.no_color)
        }
        SessionEvent::OperationFailed { context, error } => {
            style::format_warning(&format!("{} failed: {}", context, error), opts.no_color)
        }
        SessionEvent::ReconnectScheduled { attempt, delay } => style::format_warning(
            &format!("reconnecting in {:.1}s (attempt {})", delay.as_secs_f32(), attempt),
            opts.no_color,
        ),
        SessionEvent::ReconnectAbandoned { attempts } => style::format_warning(
            &format!("giving up after {} reconnect attempt(s)", attempts),
            opts.no_color,
        ),
        _ => return None,
    };
    Some(line + "\n")
}

/// CSV header for watch output.
pub const WATCH_CSV_HEADER: &str = "event,role,value\n";

/// Format a temperature event as a CSV row.
pub fn format_watch_csv_line(event: &SessionEvent) -> Option<String> {
    match event {
        SessionEvent::TemperatureUpdated { role, value } => {
            Some(format!("temperature,{},{:.2}\n", role.label(), value))
        }
        SessionEvent::DestinationWritten { value } => {
            Some(format!("destination_written,destination,{:.2}\n", value))
        }
        _ => None,
    }
}
