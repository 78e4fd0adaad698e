//! Send command implementation.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde_json::{Map, Value};
use signlink_core::{
    ConnectionState, SignCommand, TransportKind, json_command, wait_for_state, wait_until_ready,
};

use crate::config::Config;
use crate::style;

const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Arguments for the send command.
pub struct SendArgs {
    pub device: String,
    pub transport: Option<TransportKind>,
    pub params: Vec<String>,
    pub command: String,
    pub quiet: bool,
}

pub async fn cmd_send(args: SendArgs, config: &Config) -> Result<()> {
    let payload = build_payload(&args.command, &args.params)?;
    let device = config.resolve_device(&args.device, args.transport)?;
    let registry = super::build_registry(config).await?;

    let spinner = style::connecting_spinner(device.display_name(), args.quiet);
    let connection = registry
        .connect(&device)
        .with_context(|| format!("Failed to connect to {}", device.display_name()))?;

    let ready_timeout = {
        let timeouts = &registry.config().connection;
        timeouts.connect_timeout + timeouts.discovery_timeout
    };
    if let Err(e) = wait_until_ready(connection.as_ref(), ready_timeout).await {
        spinner.finish_and_clear();
        registry.close_all();
        return Err(e).with_context(|| format!("{} never became ready", device.display_name()));
    }
    spinner.finish_and_clear();

    tracing::debug!(address = %device.address, payload = %payload, "Sending command");
    let sent = registry.send_command(&device.address, &payload).await;
    let status = connection.status_message();

    registry.disconnect(&device.address);
    if let Err(e) = wait_for_state(
        connection.as_ref(),
        |state| state == ConnectionState::Disconnected,
        DISCONNECT_TIMEOUT,
    )
    .await
    {
        tracing::debug!("Disconnect did not complete: {}", e);
    }

    let status = status.unwrap_or_default();
    if !sent {
        bail!("Command was not delivered to {}: {}", device.display_name(), status);
    }
    println!("{}: {}", device.display_name(), status);
    Ok(())
}

/// Bare token without params; JSON command otherwise.
///
/// Known vocabulary tokens are normalized to their canonical spelling, and
/// anything else is passed through for firmware-specific commands.
fn build_payload(command: &str, params: &[String]) -> Result<String> {
    let name = match command.parse::<SignCommand>() {
        Ok(known) => known.as_str().to_string(),
        Err(_) => {
            let trimmed = command.trim();
            if trimmed.is_empty() {
                bail!("Command must not be empty");
            }
            tracing::warn!("'{}' is not a known sign command; sending it as-is", trimmed);
            trimmed.to_string()
        }
    };

    if params.is_empty() {
        return Ok(name);
    }
    Ok(json_command(&name, parse_params(params)?))
}

/// Parse `key=value` pairs. Values that parse as JSON keep their type;
/// everything else is sent as a string.
fn parse_params(params: &[String]) -> Result<Map<String, Value>> {
    let mut map = Map::new();
    for param in params {
        let Some((key, value)) = param.split_once('=') else {
            bail!("Invalid parameter '{}': expected KEY=VALUE", param);
        };
        let key = key.trim();
        if key.is_empty() {
            bail!("Invalid parameter '{}': empty key", param);
        }
        let value = serde_json::from_str(value.trim())
            .unwrap_or_else(|_| Value::String(value.to_string()));
        map.insert(key.to_string(), value);
    }
    Ok(map)
}
