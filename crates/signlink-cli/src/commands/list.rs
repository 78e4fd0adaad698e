//! `commands` command: print the sign command vocabulary.

use anyhow::{Context, Result};
use serde::Serialize;
use signlink_core::SignCommand;

#[derive(Serialize)]
struct CommandInfo {
    command: SignCommand,
    label: &'static str,
    description: &'static str,
}

pub fn cmd_commands(json: bool) -> Result<()> {
    if json {
        println!("{}", format_commands_json()?);
    } else {
        print!("{}", format_commands_text());
    }
    Ok(())
}

fn format_commands_json() -> Result<String> {
    let commands: Vec<CommandInfo> = SignCommand::ALL
        .into_iter()
        .map(|command| CommandInfo {
            command,
            label: command.label(),
            description: command.description(),
        })
        .collect();
    serde_json::to_string_pretty(&commands).context("Failed to serialize commands")
}

fn format_commands_text() -> String {
    SignCommand::ALL
        .iter()
        .map(|command| format!("{:<16} {}\n", command.as_str(), command.description()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_has_one_line_per_command() {
        let text = format_commands_text();
        assert_eq!(text.lines().count(), SignCommand::ALL.len());
        assert!(text.lines().any(|line| line.starts_with("RESET_ACCIDENT")));
    }

    #[test]
    fn test_json_uses_wire_tokens() {
        let value: serde_json::Value = serde_json::from_str(&format_commands_json().unwrap()).unwrap();
        assert_eq!(value[2]["command"], "SPEED_LIMIT_30");
        assert_eq!(value[0]["label"], "STOP");
    }
}
