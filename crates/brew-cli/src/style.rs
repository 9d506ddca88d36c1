//! Visual styling for CLI output: spinners, colored temperatures and
//! status prefixes.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;

/// Standard spinner tick characters (Braille dots animation)
const SPINNER_TICK_CHARS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

/// Standard spinner tick interval
const SPINNER_TICK_MS: u64 = 80;

/// Deviation from the setpoint still shown as on target.
pub const ON_TARGET_BAND: f32 = 1.0;

fn spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("{spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_chars(SPINNER_TICK_CHARS)
}

fn spinner(message: String) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(spinner_style());
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(SPINNER_TICK_MS));
    pb
}

/// Create a spinner for scanning operations.
pub fn scanning_spinner(timeout_secs: u64) -> ProgressBar {
    spinner(format!(
        "Scanning for brew controllers... ({}s)",
        timeout_secs
    ))
}

/// Create a spinner for connecting to a controller.
pub fn connecting_spinner(device: &str) -> ProgressBar {
    spinner(format!("Connecting to {}...", device))
}

/// How a measured temperature relates to the setpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deviation {
    Below,
    OnTarget,
    Above,
}

impl Deviation {
    pub fn of(measured: f32, setpoint: f32) -> Self {
        let diff = measured - setpoint;
        if diff.abs() <= ON_TARGET_BAND {
            Deviation::OnTarget
        } else if diff < 0.0 {
            Deviation::Below
        } else {
            Deviation::Above
        }
    }
}

/// Format a temperature, colored against the setpoint when one is known.
pub fn format_temp_colored(value: f32, setpoint: Option<f32>, no_color: bool) -> String {
    let formatted = format!("{:.1}°", value);
    let Some(setpoint) = setpoint else {
        return formatted;
    };
    if no_color {
        return formatted;
    }

    match Deviation::of(value, setpoint) {
        Deviation::Below => format!("{}", formatted.cyan()),
        Deviation::OnTarget => format!("{}", formatted.green()),
        // Orange
        Deviation::Above => format!("{}", formatted.truecolor(255, 165, 0)),
    }
}

/// Format RSSI as a visual signal bar.
/// RSSI typically ranges from -100 dBm (weak) to -30 dBm (strong).
pub fn format_signal_bar(rssi: Option<i16>, no_color: bool) -> String {
    let Some(rssi) = rssi else {
        return "N/A".to_string();
    };

    let filled = (((rssi + 100).clamp(0, 70) as f32 / 7.0).round() as usize).min(10);
    let bar = format!("{}{}", "█".repeat(filled), "░".repeat(10 - filled));

    if no_color {
        format!("{} {:>3}", bar, rssi)
    } else if filled >= 7 {
        format!("{} {:>3}", bar.green(), rssi)
    } else if filled >= 4 {
        format!("{} {:>3}", bar.yellow(), rssi)
    } else {
        format!("{} {:>3}", bar.red(), rssi)
    }
}

/// Trend arrow between two successive readings.
pub fn trend_indicator(current: f32, previous: f32, no_color: bool) -> &'static str {
    let diff = current - previous;
    if diff.abs() < 0.1 {
        "-"
    } else if diff > 0.0 {
        if no_color { "^" } else { "↑" }
    } else if no_color {
        "v"
    } else {
        "↓"
    }
}

/// Format a success message.
pub fn format_success(message: &str, no_color: bool) -> String {
    if no_color {
        format!("[OK] {}", message)
    } else {
        format!("{} {}", "[OK]".green(), message)
    }
}

/// Format a warning message.
pub fn format_warning(message: &str, no_color: bool) -> String {
    if no_color {
        format!("[!!] {}", message)
    } else {
        format!("{} {}", "[!!]".yellow(), message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deviation() {
        assert_eq!(Deviation::of(65.0, 65.5), Deviation::OnTarget);
        assert_eq!(Deviation::of(60.0, 65.5), Deviation::Below);
        assert_eq!(Deviation::of(70.0, 65.5), Deviation::Above);
    }

    #[test]
    fn test_format_temp_without_color() {
        assert_eq!(format_temp_colored(64.96, Some(65.0), true), "65.0°");
        assert_eq!(format_temp_colored(20.0, None, false), "20.0°");
    }

    #[test]
    fn test_signal_bar() {
        assert_eq!(format_signal_bar(None, true), "N/A");
        assert_eq!(format_signal_bar(Some(-30), true), "██████████ -30");
        assert_eq!(format_signal_bar(Some(-100), true), "░░░░░░░░░░ -100");
    }

    #[test]
    fn test_trend_indicator() {
        assert_eq!(trend_indicator(20.0, 20.05, true), "-");
        assert_eq!(trend_indicator(21.0, 20.0, true), "^");
        assert_eq!(trend_indicator(19.0, 20.0, false), "↓");
    }
}
