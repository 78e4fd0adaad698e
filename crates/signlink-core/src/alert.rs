//! Accident detection and the alert summary shown while monitoring.

use serde::{Deserialize, Serialize};

/// Substrings that mark a status message as an accident report.
const ACCIDENT_MARKERS: [&str; 2] = ["accident", "accid"];

/// Whether a status message reports an accident.
///
/// Matching is a case-insensitive substring search.
///
/// ```
/// use signlink_core::alert::is_accident_message;
///
/// assert!(is_accident_message("ACCIDENT at junction 4"));
/// assert!(is_accident_message("accid"));
/// assert!(!is_accident_message("Command sent successfully"));
/// ```
pub fn is_accident_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    ACCIDENT_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Aggregate view over every registered connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertSummary {
    /// Registered connections currently in the `Connected` state.
    pub active_connections: usize,
    /// Whether any registered device has an uncleared accident report.
    pub accident_detected: bool,
}

impl AlertSummary {
    /// One-line text for a persistent notification or status bar.
    ///
    /// ```
    /// use signlink_core::AlertSummary;
    ///
    /// let summary = AlertSummary { active_connections: 2, accident_detected: true };
    /// assert_eq!(summary.headline(), "ACCIDENT DETECTED! - Connected signs: 2");
    /// ```
    pub fn headline(&self) -> String {
        if self.accident_detected {
            format!(
                "ACCIDENT DETECTED! - Connected signs: {}",
                self.active_connections
            )
        } else {
            format!(
                "Monitoring traffic signs - Connected signs: {}",
                self.active_connections
            )
        }
    }

    /// Whether the summary should be presented with high priority.
    pub fn is_urgent(&self) -> bool {
        self.accident_detected
    }
}

impl std::fmt::Display for AlertSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.headline())
    }
}
