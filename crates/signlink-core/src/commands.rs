//! Command payloads understood by traffic-sign firmware.
//!
//! Payloads are opaque to the transports: a bare token such as `STOP`, or a
//! JSON object built with [`json_command`]. Nothing here is parsed on the way
//! out; this module only names the vocabulary the firmware knows.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Commands every sign firmware accepts as bare tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignCommand {
    /// Show the stop sign.
    Stop,
    /// Show the yield sign.
    Yield,
    /// Show a 30 km/h speed limit.
    #[serde(rename = "SPEED_LIMIT_30")]
    SpeedLimit30,
    /// Show a 50 km/h speed limit.
    #[serde(rename = "SPEED_LIMIT_50")]
    SpeedLimit50,
    /// Acknowledge and clear an accident report.
    ResetAccident,
}

impl SignCommand {
    /// Every command, in display order.
    pub const ALL: [SignCommand; 5] = [
        SignCommand::Stop,
        SignCommand::Yield,
        SignCommand::SpeedLimit30,
        SignCommand::SpeedLimit50,
        SignCommand::ResetAccident,
    ];

    /// Wire token sent to the sign.
    pub fn as_str(&self) -> &'static str {
        match self {
            SignCommand::Stop => "STOP",
            SignCommand::Yield => "YIELD",
            SignCommand::SpeedLimit30 => "SPEED_LIMIT_30",
            SignCommand::SpeedLimit50 => "SPEED_LIMIT_50",
            SignCommand::ResetAccident => "RESET_ACCIDENT",
        }
    }

    /// Short label for menus.
    pub fn label(&self) -> &'static str {
        match self {
            SignCommand::Stop => "STOP",
            SignCommand::Yield => "Yield",
            SignCommand::SpeedLimit30 => "Limit 30 km/h",
            SignCommand::SpeedLimit50 => "Limit 50 km/h",
            SignCommand::ResetAccident => "Reset accident",
        }
    }

    /// One-line description.
    pub fn description(&self) -> &'static str {
        match self {
            SignCommand::Stop => "Mandatory stop sign",
            SignCommand::Yield => "Give way to crossing traffic",
            SignCommand::SpeedLimit30 => "Speed limit 30 km/h",
            SignCommand::SpeedLimit50 => "Speed limit 50 km/h",
            SignCommand::ResetAccident => "Clear the accident report on the sign",
        }
    }
}

impl fmt::Display for SignCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let token = s.trim();
        SignCommand::ALL
            .into_iter()
            .find(|command| command.as_str().eq_ignore_ascii_case(token))
            .ok_or_else(|| format!("unknown sign command '{}'", s))
    }
}

/// Whether `payload` is the accident reset command.
pub fn is_reset_accident(payload: &str) -> bool {
    payload.trim() == SignCommand::ResetAccident.as_str()
        || serde_json::from_str::<Value>(payload)
            .ok()
            .and_then(|value| {
                value
                    .get("command")
                    .and_then(Value::as_str)
                    .map(|name| name == SignCommand::ResetAccident.as_str())
            })
            .unwrap_or(false)
}

/// Build a JSON command payload: `{"command": name, "params": {...}}`.
///
/// ```
/// use serde_json::{Map, json};
/// use signlink_core::commands::json_command;
///
/// let mut params = Map::new();
/// params.insert("limit".to_string(), json!(30));
/// assert_eq!(
///     json_command("SET_LIMIT", params),
///     r#"{"command":"SET_LIMIT","params":{"limit":30}}"#
/// );
/// ```
pub fn json_command(name: &str, params: Map<String, Value>) -> String {
    let mut object = Map::new();
    object.insert("command".to_string(), Value::String(name.to_string()));
    object.insert("params".to_string(), Value::Object(params));
    Value::Object(object).to_string()
}
