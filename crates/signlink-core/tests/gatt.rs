//! GATT connection lifecycle against the mock peripheral.

use std::sync::Arc;
use std::time::Duration;

use signlink_core::gatt::{
    GattService, STATUS_COMMAND_MISSING, STATUS_COMMAND_SENT, STATUS_DISCOVERY_FAILED,
    STATUS_NO_CONNECTION, STATUS_READY, STATUS_SERVICE_MISSING, STATUS_WRITE_FAILED,
};
use signlink_core::uuids::{COMMAND_CHARACTERISTIC, SIGN_SERVICE, STATUS_CHARACTERISTIC};
use signlink_core::{
    Connection, ConnectionConfig, ConnectionState, DeviceDescriptor, GattConnection,
    MockGattConnector, MockPeripheral, TransportKind, wait_for_state, wait_until_ready,
};

const ADDRESS: &str = "AA:BB:CC:DD:EE:FF";
const WAIT: Duration = Duration::from_secs(2);

fn test_config() -> ConnectionConfig {
    ConnectionConfig::new()
        .connect_timeout(Duration::from_millis(300))
        .discovery_timeout(Duration::from_millis(300))
        .write_timeout(Duration::from_millis(300))
}

fn setup() -> (Arc<MockPeripheral>, Arc<MockGattConnector>, GattConnection) {
    let sign = Arc::new(MockPeripheral::new(ADDRESS));
    let connector = Arc::new(MockGattConnector::new());
    connector.add(Arc::clone(&sign));
    let device = DeviceDescriptor::named(ADDRESS, "Main St", TransportKind::Ble);
    let connection = GattConnection::new(device, connector.clone(), test_config());
    (sign, connector, connection)
}

async fn wait_for_status(connection: &dyn Connection, expected: &str) {
    let mut rx = connection.watch_status();
    tokio::time::timeout(WAIT, rx.wait_for(|status| status.as_deref() == Some(expected)))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for status {:?}", expected))
        .expect("connection dropped");
}

async fn wait_for(connection: &dyn Connection, expected: ConnectionState) {
    wait_for_state(connection, |state| state == expected, WAIT)
        .await
        .unwrap_or_else(|e| panic!("waiting for {}: {}", expected, e));
}

#[tokio::test]
async fn test_send_stop_reports_success() {
    let (sign, _connector, connection) = setup();

    connection.connect();
    assert_eq!(connection.state(), ConnectionState::Connecting);
    wait_until_ready(&connection, WAIT).await.unwrap();
    assert_eq!(connection.status_message().as_deref(), Some(STATUS_READY));
    assert_eq!(sign.subscriptions(), vec![STATUS_CHARACTERISTIC]);

    assert!(connection.send_command("STOP").await);
    assert_eq!(
        connection.status_message().as_deref(),
        Some(STATUS_COMMAND_SENT)
    );
    assert_eq!(
        sign.writes(),
        vec![(COMMAND_CHARACTERISTIC, b"STOP".to_vec())]
    );
}

#[tokio::test]
async fn test_send_before_ready_never_touches_transport() {
    let (sign, connector, connection) = setup();

    assert!(!connection.send_command("STOP").await);
    assert_eq!(
        connection.status_message().as_deref(),
        Some(STATUS_NO_CONNECTION)
    );
    assert_eq!(connection.state(), ConnectionState::Disconnected);
    assert_eq!(connector.open_calls(), 0);
    assert_eq!(sign.write_calls(), 0);
}

#[tokio::test]
async fn test_notifications_become_status() {
    let (sign, _connector, connection) = setup();
    connection.connect();
    wait_until_ready(&connection, WAIT).await.unwrap();

    assert!(sign.notify("Speed limit 30 active"));
    wait_for_status(&connection, "Speed limit 30 active").await;

    assert!(sign.notify("ACCIDENT AHEAD"));
    wait_for_status(&connection, "ACCIDENT AHEAD").await;
    assert!(connection.is_ready());
}

#[tokio::test]
async fn test_back_to_back_notifications_are_each_delivered() {
    let (sign, _connector, connection) = setup();
    let mut messages = connection.subscribe_messages();
    connection.connect();
    wait_until_ready(&connection, WAIT).await.unwrap();

    assert!(sign.notify("ACCIDENT on lane 2"));
    assert!(sign.notify("OK"));

    let mut received = Vec::new();
    while received.len() < 3 {
        let message = tokio::time::timeout(WAIT, messages.recv())
            .await
            .expect("timed out waiting for notification")
            .unwrap();
        received.push(message);
    }
    assert_eq!(received, vec![STATUS_READY, "ACCIDENT on lane 2", "OK"]);
    assert_eq!(connection.status_message().as_deref(), Some("OK"));
}

#[tokio::test]
async fn test_connect_failure_enters_error() {
    let (sign, _connector, connection) = setup();
    sign.set_fail_connect(true);

    connection.connect();
    wait_for(&connection, ConnectionState::Error).await;
    let status = connection.status_message().unwrap();
    assert!(status.starts_with("Error:"), "status was {:?}", status);
    assert!(wait_until_ready(&connection, WAIT).await.is_err());

    connection.close();
    assert_eq!(connection.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_connect_timeout_enters_error() {
    let (sign, _connector, connection) = setup();
    sign.set_hang_connect(true);

    connection.connect();
    wait_for(&connection, ConnectionState::Error).await;
    assert_eq!(
        connection.status_message().as_deref(),
        Some("Error: Connection failed: connection timed out")
    );
}

#[tokio::test]
async fn test_retry_after_error() {
    let (sign, _connector, connection) = setup();
    sign.set_fail_connect(true);
    connection.connect();
    wait_for(&connection, ConnectionState::Error).await;

    sign.set_fail_connect(false);
    connection.connect();
    wait_until_ready(&connection, WAIT).await.unwrap();
    assert_eq!(sign.connect_calls(), 2);
}

#[tokio::test]
async fn test_unknown_device_enters_error() {
    let connector = Arc::new(MockGattConnector::new());
    let device = DeviceDescriptor::new("11:22:33:44:55:66", TransportKind::Ble);
    let connection = GattConnection::new(device, connector, test_config());

    connection.connect();
    wait_for(&connection, ConnectionState::Error).await;
    assert!(
        connection
            .status_message()
            .unwrap()
            .contains("11:22:33:44:55:66")
    );
}

#[tokio::test]
async fn test_missing_service_stays_connected_but_not_ready() {
    let (sign, _connector, connection) = setup();
    sign.set_services(Vec::new());

    connection.connect();
    wait_for_status(&connection, STATUS_SERVICE_MISSING).await;
    assert_eq!(connection.state(), ConnectionState::Connected);
    assert!(!connection.is_ready());

    assert!(!connection.send_command("STOP").await);
    assert_eq!(sign.write_calls(), 0);
}

#[tokio::test]
async fn test_missing_command_characteristic() {
    let (sign, _connector, connection) = setup();
    sign.set_services(vec![GattService {
        uuid: SIGN_SERVICE,
        characteristics: vec![STATUS_CHARACTERISTIC],
    }]);

    connection.connect();
    wait_for_status(&connection, STATUS_COMMAND_MISSING).await;
    assert_eq!(connection.state(), ConnectionState::Connected);
    assert!(!connection.is_ready());
}

#[tokio::test]
async fn test_discovery_failure_and_timeout() {
    let (sign, _connector, connection) = setup();
    sign.set_fail_discovery(true);
    connection.connect();
    wait_for_status(&connection, STATUS_DISCOVERY_FAILED).await;
    assert_eq!(connection.state(), ConnectionState::Connected);
    connection.close();

    let (sign, _connector, connection) = setup();
    sign.set_discovery_latency(Duration::from_secs(5));
    connection.connect();
    wait_for_status(&connection, STATUS_DISCOVERY_FAILED).await;
    assert!(!connection.is_ready());
}

#[tokio::test]
async fn test_link_loss_mid_discovery() {
    let (sign, _connector, connection) = setup();
    sign.set_discovery_latency(Duration::from_millis(200));

    connection.connect();
    wait_for(&connection, ConnectionState::Connected).await;
    assert!(sign.drop_link());
    wait_for(&connection, ConnectionState::Disconnected).await;

    // Discovery would have finished by now; it must not revive the session.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(connection.state(), ConnectionState::Disconnected);
    assert!(!connection.is_ready());
    assert_ne!(connection.status_message().as_deref(), Some(STATUS_READY));
}

#[tokio::test]
async fn test_link_loss_when_ready() {
    let (sign, _connector, connection) = setup();
    connection.connect();
    wait_until_ready(&connection, WAIT).await.unwrap();

    sign.drop_link();
    wait_for(&connection, ConnectionState::Disconnected).await;
    assert!(!connection.is_ready());
    assert!(!connection.send_command("YIELD").await);
    assert_eq!(sign.write_calls(), 0);
}

#[tokio::test]
async fn test_repeated_connect_disconnect() {
    let (sign, _connector, connection) = setup();

    for round in 1..=3 {
        connection.connect();
        wait_until_ready(&connection, WAIT).await.unwrap();

        connection.disconnect();
        wait_for(&connection, ConnectionState::Disconnected).await;
        assert!(!connection.is_ready());
        assert_eq!(sign.disconnect_calls(), round);
        assert!(!sign.is_connected());
    }
}

#[tokio::test]
async fn test_disconnect_from_error_goes_straight_to_disconnected() {
    let (sign, _connector, connection) = setup();
    sign.set_fail_connect(true);
    connection.connect();
    wait_for(&connection, ConnectionState::Error).await;

    connection.disconnect();
    assert_eq!(connection.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_writes_are_serialized() {
    let (sign, _connector, connection) = setup();
    sign.set_write_latency(Duration::from_millis(20));
    let connection = Arc::new(connection);
    connection.connect();
    wait_until_ready(connection.as_ref(), WAIT).await.unwrap();

    let sends = (0..5).map(|i| {
        let connection = Arc::clone(&connection);
        tokio::spawn(async move { connection.send_command(&format!("CMD{}", i)).await })
    });
    for sent in futures::future::join_all(sends).await {
        assert!(sent.unwrap());
    }
    assert_eq!(sign.writes().len(), 5);
    assert_eq!(sign.max_in_flight(), 1);
}

#[tokio::test]
async fn test_write_failure_keeps_connection() {
    let (sign, _connector, connection) = setup();
    connection.connect();
    wait_until_ready(&connection, WAIT).await.unwrap();

    sign.set_fail_writes(true);
    assert!(!connection.send_command("STOP").await);
    assert_eq!(
        connection.status_message().as_deref(),
        Some(STATUS_WRITE_FAILED)
    );
    assert_eq!(connection.state(), ConnectionState::Connected);

    sign.set_fail_writes(false);
    sign.set_write_latency(Duration::from_secs(2));
    assert!(!connection.send_command("STOP").await);
    assert_eq!(
        connection.status_message().as_deref(),
        Some(STATUS_WRITE_FAILED)
    );
    assert!(connection.is_ready());
}

#[tokio::test]
async fn test_close_interrupts_connect() {
    let (sign, _connector, connection) = setup();
    sign.set_hang_connect(true);

    connection.connect();
    tokio::time::sleep(Duration::from_millis(50)).await;
    connection.close();
    assert_eq!(connection.state(), ConnectionState::Disconnected);

    // The timed-out attempt must not flip the state to Error afterwards.
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(connection.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_connect_is_ignored_while_active() {
    let (sign, connector, connection) = setup();
    connection.connect();
    connection.connect();
    wait_until_ready(&connection, WAIT).await.unwrap();
    connection.connect();

    assert_eq!(connector.open_calls(), 1);
    assert_eq!(sign.connect_calls(), 1);
}
