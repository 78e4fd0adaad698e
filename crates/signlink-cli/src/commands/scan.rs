//! Scan command implementation.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use signlink_core::{DeviceDescriptor, TransportKind};

use crate::config::Config;
use crate::style;

#[derive(Debug, Serialize)]
struct ScanEntry<'a> {
    address: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    transport: TransportKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    alias: Option<&'a str>,
}

pub async fn cmd_scan(timeout: Option<u64>, json: bool, quiet: bool, config: &Config) -> Result<()> {
    let timeout = timeout.unwrap_or_else(|| config.scan_secs());
    let hub = super::build_hub().await?;

    let spinner = style::scanning_spinner(timeout, quiet || json);
    hub.start_scan()
        .await
        .context("Failed to scan for devices")?;
    tokio::time::sleep(Duration::from_secs(timeout)).await;
    if let Err(e) = hub.stop_scan().await {
        tracing::warn!("Failed to stop scanning cleanly: {}", e);
    }
    spinner.finish_and_clear();

    let devices = hub.devices();
    if json {
        println!("{}", format_scan_json(&devices, config)?);
    } else {
        print!("{}", format_scan_text(&devices, config));
    }
    Ok(())
}

fn format_scan_json(devices: &[DeviceDescriptor], config: &Config) -> Result<String> {
    let entries: Vec<ScanEntry<'_>> = devices
        .iter()
        .map(|device| ScanEntry {
            address: &device.address,
            name: device.name.as_deref(),
            transport: device.transport,
            alias: config.alias_for(&device.address),
        })
        .collect();
    serde_json::to_string_pretty(&entries).context("Failed to serialize scan results")
}

fn format_scan_text(devices: &[DeviceDescriptor], config: &Config) -> String {
    if devices.is_empty() {
        return "No traffic signs found.\n".to_string();
    }

    let mut output = format!("Found {} sign(s):\n\n", devices.len());
    output.push_str(&format!(
        "{:<24} {:<20} {:<8} {}\n",
        "NAME", "ADDRESS", "LINK", "ALIAS"
    ));
    for device in devices {
        output.push_str(&format!(
            "{:<24} {:<20} {:<8} {}\n",
            device.display_name(),
            device.address,
            device.transport,
            config.alias_for(&device.address).unwrap_or("-")
        ));
    }
    output
}
