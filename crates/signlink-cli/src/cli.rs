//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};

use signlink_types::TransportKind;

/// Transport override for `--transport`
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TransportArg {
    Ble,
    Classic,
    Dual,
}

impl From<TransportArg> for TransportKind {
    fn from(arg: TransportArg) -> Self {
        match arg {
            TransportArg::Ble => TransportKind::Ble,
            TransportArg::Classic => TransportKind::Classic,
            TransportArg::Dual => TransportKind::Dual,
        }
    }
}

#[derive(Parser)]
#[command(name = "signlink")]
#[command(author, version, about = "CLI for Bluetooth traffic-sign controllers", long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scan for nearby traffic signs over BLE and classic Bluetooth
    Scan {
        /// Scan timeout in seconds (defaults to the config file's scan_secs)
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Send one command to a sign and print the resulting status
    Send {
        /// Device alias or address, or use SIGNLINK_DEVICE env var
        #[arg(short, long, env = "SIGNLINK_DEVICE")]
        device: String,

        /// Transport to use (defaults to the alias entry, then BLE)
        #[arg(short, long, value_enum)]
        transport: Option<TransportArg>,

        /// Command parameter as key=value; sends a JSON command when present
        #[arg(short, long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,

        /// Command to send (e.g. STOP, YIELD, SPEED_LIMIT_30)
        command: String,
    },

    /// Connect to signs and print their status until Ctrl-C
    Monitor {
        /// Device aliases or addresses - can be repeated, or comma-separated
        #[arg(
            short,
            long,
            value_delimiter = ',',
            env = "SIGNLINK_DEVICE",
            required = true
        )]
        device: Vec<String>,

        /// Transport to use for every device
        #[arg(short, long, value_enum)]
        transport: Option<TransportArg>,

        /// Print events as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// List the sign command vocabulary
    #[command(name = "commands")]
    ListCommands {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}
