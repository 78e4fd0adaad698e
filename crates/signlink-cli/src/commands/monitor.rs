//! Monitor command implementation.

use anyhow::{Context, Result, bail};
use signlink_core::{AlertSummary, ConnectionEvent, TransportKind};
use tokio::sync::broadcast::error::RecvError;

use crate::config::Config;
use crate::style::Painter;

/// Arguments for the monitor command.
pub struct MonitorArgs {
    pub devices: Vec<String>,
    pub transport: Option<TransportKind>,
    pub json: bool,
    pub quiet: bool,
    pub no_color: bool,
}

pub async fn cmd_monitor(args: MonitorArgs, config: &Config) -> Result<()> {
    let devices = args
        .devices
        .iter()
        .map(|device| config.resolve_device(device, args.transport))
        .collect::<Result<Vec<_>>>()?;
    if devices.is_empty() {
        bail!("No devices to monitor");
    }

    let registry = super::build_registry(config).await?;
    let painter = Painter::new(args.no_color);
    let mut events = registry.events().subscribe();
    let mut alerts = registry.watch_alerts();

    for device in &devices {
        registry
            .connect(device)
            .with_context(|| format!("Failed to connect to {}", device.display_name()))?;
    }
    if !args.quiet && !args.json {
        eprintln!(
            "Monitoring {} sign(s). Press Ctrl-C to stop.",
            devices.len()
        );
    }

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                if !args.quiet && !args.json {
                    eprintln!("\nShutting down...");
                }
                break;
            }
            received = events.recv() => match received {
                Ok(event) => print_event(&event, args.json, &painter)?,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Missed {} events", skipped);
                }
                Err(RecvError::Closed) => break,
            },
            changed = alerts.changed() => {
                if changed.is_err() {
                    break;
                }
                let summary = *alerts.borrow_and_update();
                print_summary(&summary, args.json, &painter)?;
            }
        }
    }

    registry.close_all();
    Ok(())
}

fn print_event(event: &ConnectionEvent, json: bool, painter: &Painter) -> Result<()> {
    if json {
        println!(
            "{}",
            serde_json::to_string(event).context("Failed to serialize event")?
        );
        return Ok(());
    }
    if let Some(line) = format_event(event, painter) {
        println!("{}", line);
    }
    Ok(())
}

fn print_summary(summary: &AlertSummary, json: bool, painter: &Painter) -> Result<()> {
    if json {
        let line = serde_json::json!({ "alert_summary": summary });
        println!("{}", line);
    } else {
        println!("{}", painter.headline(summary));
    }
    Ok(())
}

/// One text line per event; removals are implied by shutdown and skipped.
fn format_event(event: &ConnectionEvent, painter: &Painter) -> Option<String> {
    match event {
        ConnectionEvent::StateChanged { address, state } => {
            Some(format!("{} {}", painter.dim(address), painter.state(*state)))
        }
        ConnectionEvent::StatusMessage { address, message } => {
            Some(format!("{} {}", painter.dim(address), message))
        }
        ConnectionEvent::AccidentDetected { address, message } => Some(format!(
            "{} {}",
            painter.dim(address),
            painter.accident(&format!("ACCIDENT: {}", message))
        )),
        ConnectionEvent::AccidentCleared { address } => {
            Some(format!("{} accident cleared", painter.dim(address)))
        }
        _ => None,
    }
}
