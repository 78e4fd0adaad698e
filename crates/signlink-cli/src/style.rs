//! Visual styling utilities for the CLI.
//!
//! Spinners for the long-running Bluetooth operations and colored rendering
//! of connection states and accident alerts.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;

use signlink_core::{AlertSummary, ConnectionState};

/// Standard spinner tick characters (Braille dots animation)
const SPINNER_TICK_CHARS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

/// Standard spinner tick interval
const SPINNER_TICK_MS: u64 = 80;

fn spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("{spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_chars(SPINNER_TICK_CHARS)
}

fn spinner(message: String, quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    pb.set_style(spinner_style());
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(SPINNER_TICK_MS));
    pb
}

/// Create a spinner for scanning operations.
pub fn scanning_spinner(timeout_secs: u64, quiet: bool) -> ProgressBar {
    spinner(
        format!("Scanning for traffic signs... ({}s)", timeout_secs),
        quiet,
    )
}

/// Create a spinner for connecting to a device.
pub fn connecting_spinner(device: &str, quiet: bool) -> ProgressBar {
    spinner(format!("Connecting to {}...", device), quiet)
}

/// Output painter that honours `--no-color`.
#[derive(Debug, Clone, Copy)]
pub struct Painter {
    color: bool,
}

impl Painter {
    pub fn new(no_color: bool) -> Self {
        Self { color: !no_color }
    }

    pub fn state(&self, state: ConnectionState) -> String {
        let text = state.to_string();
        if !self.color {
            return text;
        }
        match state {
            ConnectionState::Connected => text.green().to_string(),
            ConnectionState::Connecting => text.yellow().to_string(),
            ConnectionState::Error => text.red().bold().to_string(),
            _ => text.dimmed().to_string(),
        }
    }

    pub fn accident(&self, text: &str) -> String {
        if self.color {
            text.red().bold().to_string()
        } else {
            text.to_string()
        }
    }

    pub fn dim(&self, text: &str) -> String {
        if self.color {
            text.dimmed().to_string()
        } else {
            text.to_string()
        }
    }

    pub fn headline(&self, summary: &AlertSummary) -> String {
        let text = summary.headline();
        if !self.color {
            text
        } else if summary.is_urgent() {
            text.red().bold().to_string()
        } else {
            text.green().to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_painter_leaves_text_alone() {
        let painter = Painter::new(true);
        assert_eq!(
            painter.state(ConnectionState::Connected),
            ConnectionState::Connected.to_string()
        );
        assert_eq!(painter.accident("ACCIDENT"), "ACCIDENT");
        assert_eq!(
            painter.headline(&AlertSummary::default()),
            AlertSummary::default().headline()
        );
    }

    #[test]
    fn test_colored_painter_adds_escapes() {
        let painter = Painter::new(false);
        assert!(painter.accident("ACCIDENT").contains("\u{1b}["));
    }

    #[test]
    fn test_quiet_spinner_is_hidden() {
        assert!(scanning_spinner(5, true).is_hidden());
    }
}
