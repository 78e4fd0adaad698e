//! Hardware integration tests for signlink-core
//!
//! These tests require a Bluetooth adapter and a powered traffic sign, and
//! should be run with:
//! ```
//! cargo test --package signlink-core --test hardware_tests -- --ignored --nocapture
//! ```
//!
//! Configure the sign via environment variables:
//! - `SIGNLINK_DEVICE`: address of a BLE sign
//! - `SIGNLINK_CLASSIC_DEVICE`: address of a classic (SPP) sign, used with the
//!   `classic` feature on Linux
//!
//! Example:
//! ```
//! SIGNLINK_DEVICE="AA:BB:CC:DD:EE:FF" cargo test --package signlink-core --test hardware_tests -- --ignored --nocapture
//! ```

use std::env;
use std::sync::Arc;
use std::time::Duration;

use signlink_core::ble::{BleScanBackend, BtleConnector};
use signlink_core::gatt::STATUS_COMMAND_SENT;
use signlink_core::{
    Connection, ConnectionConfig, ConnectionState, DeviceDescriptor, DeviceScanner,
    GattConnection, TransportKind, wait_for_state, wait_until_ready,
};

/// Default timeout for BLE operations
const BLE_TIMEOUT: Duration = Duration::from_secs(30);

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("signlink_core=debug")),
        )
        .with_test_writer()
        .try_init();
}

fn get_device(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

#[tokio::test]
#[ignore = "requires Bluetooth hardware"]
async fn test_ble_scan_discovers_devices() {
    init_logging();
    let backend = BleScanBackend::default_adapter()
        .await
        .expect("no Bluetooth adapter");
    let scanner = DeviceScanner::new(Arc::new(backend));

    scanner.start_scan().await.expect("scan failed to start");
    tokio::time::sleep(Duration::from_secs(10)).await;
    scanner.stop_scan().await.expect("scan failed to stop");

    let devices = scanner.devices();
    println!("Scan discovered {} devices:", devices.len());
    for device in &devices {
        println!("  - {} ({})", device.display_name(), device.address);
    }
}

#[tokio::test]
#[ignore = "requires Bluetooth hardware"]
async fn test_ble_sign_accepts_commands() {
    init_logging();
    let Some(address) = get_device("SIGNLINK_DEVICE") else {
        println!("SIGNLINK_DEVICE not set, skipping");
        return;
    };

    let connector = BtleConnector::default_adapter()
        .await
        .expect("no Bluetooth adapter");
    let connection = GattConnection::new(
        DeviceDescriptor::new(&address, TransportKind::Ble),
        Arc::new(connector),
        ConnectionConfig::challenging_environment(),
    );

    connection.connect();
    wait_until_ready(&connection, BLE_TIMEOUT)
        .await
        .expect("sign never became ready");

    assert!(connection.send_command("STOP").await);
    assert_eq!(
        connection.status_message().as_deref(),
        Some(STATUS_COMMAND_SENT)
    );

    connection.disconnect();
    wait_for_state(
        &connection,
        |state| state == ConnectionState::Disconnected,
        BLE_TIMEOUT,
    )
    .await
    .expect("disconnect did not complete");
}

#[cfg(all(target_os = "linux", feature = "classic"))]
#[tokio::test]
#[ignore = "requires Bluetooth hardware"]
async fn test_classic_sign_accepts_commands() {
    init_logging();
    use signlink_core::SerialConnection;
    use signlink_core::rfcomm::RfcommConnector;

    let Some(address) = get_device("SIGNLINK_CLASSIC_DEVICE") else {
        println!("SIGNLINK_CLASSIC_DEVICE not set, skipping");
        return;
    };

    let connection = SerialConnection::new(
        DeviceDescriptor::new(&address, TransportKind::Classic),
        Arc::new(RfcommConnector::default()),
        ConnectionConfig::default(),
    );

    connection.connect();
    wait_for_state(
        &connection,
        |state| state == ConnectionState::Connected,
        BLE_TIMEOUT,
    )
    .await
    .expect("socket never opened");

    assert!(connection.send_command("YIELD").await);
    connection.close();
    assert_eq!(connection.state(), ConnectionState::Disconnected);
}
