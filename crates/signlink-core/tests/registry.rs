//! Multi-sign registry behavior with mock transports.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;

use signlink_core::gatt::STATUS_COMMAND_SENT;
use signlink_core::{
    AlertSummary, Connection, ConnectionEvent, ConnectionRegistry, ConnectionState,
    DeviceDescriptor, Error, EventReceiver, MockGattConnector, MockPeripheral,
    MockSerialConnector, TransportFactory, TransportKind, wait_for_state, wait_until_ready,
};

const SIGN_A: &str = "AA:BB:CC:DD:EE:FF";
const SIGN_B: &str = "AA:BB:CC:DD:EE:01";
const SIGN_SPP: &str = "00:11:22:33:44:55";
const WAIT: Duration = Duration::from_secs(2);

struct Harness {
    registry: ConnectionRegistry,
    gatt: Arc<MockGattConnector>,
    serial: Arc<MockSerialConnector>,
    signs: Vec<Arc<MockPeripheral>>,
}

fn harness() -> Harness {
    let gatt = Arc::new(MockGattConnector::new());
    let signs: Vec<_> = [SIGN_A, SIGN_B]
        .into_iter()
        .map(|address| {
            let sign = Arc::new(MockPeripheral::new(address));
            gatt.add(Arc::clone(&sign));
            sign
        })
        .collect();
    let serial = Arc::new(MockSerialConnector::new());
    let factory = TransportFactory::new(gatt.clone(), serial.clone());
    Harness {
        registry: ConnectionRegistry::new(Arc::new(factory)),
        gatt,
        serial,
        signs,
    }
}

fn ble(address: &str) -> DeviceDescriptor {
    DeviceDescriptor::new(address, TransportKind::Ble)
}

async fn wait_alerts(registry: &ConnectionRegistry, predicate: impl Fn(&AlertSummary) -> bool) {
    let mut rx = registry.watch_alerts();
    tokio::time::timeout(WAIT, rx.wait_for(|summary| predicate(summary)))
        .await
        .expect("timed out waiting for alert summary")
        .expect("registry dropped");
}

async fn next_matching(
    events: &mut EventReceiver,
    predicate: impl Fn(&ConnectionEvent) -> bool,
) -> ConnectionEvent {
    tokio::time::timeout(WAIT, async {
        loop {
            let event = events.recv().await.expect("event channel closed");
            if predicate(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

#[tokio::test]
async fn test_concurrent_connects_share_one_instance() {
    let h = harness();
    let device = ble(SIGN_A);

    let attempts = (0..8).map(|_| {
        let registry = h.registry.clone();
        let device = device.clone();
        tokio::spawn(async move { registry.connect(&device).unwrap() })
    });
    let connections: Vec<_> = futures::future::join_all(attempts)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    for connection in &connections[1..] {
        assert!(Arc::ptr_eq(&connections[0], connection));
    }
    assert_eq!(h.registry.len(), 1);
    wait_until_ready(connections[0].as_ref(), WAIT).await.unwrap();
    assert_eq!(h.gatt.open_calls(), 1);
    assert_eq!(h.signs[0].connect_calls(), 1);
}

#[tokio::test]
async fn test_send_stop_through_registry() {
    let h = harness();
    let connection = h.registry.connect(&ble(SIGN_A)).unwrap();
    wait_until_ready(connection.as_ref(), WAIT).await.unwrap();

    assert!(h.registry.send_command(SIGN_A, "STOP").await);
    assert_eq!(
        connection.status_message().as_deref(),
        Some(STATUS_COMMAND_SENT)
    );
    assert_eq!(h.signs[0].written_commands(), vec!["STOP".to_string()]);

    assert!(!h.registry.send_command("11:11:11:11:11:11", "STOP").await);
}

#[tokio::test]
async fn test_accident_flag_persists_until_reset() {
    let h = harness();
    let mut events = h.registry.events().subscribe();
    let connection = h.registry.connect(&ble(SIGN_A)).unwrap();
    wait_until_ready(connection.as_ref(), WAIT).await.unwrap();

    h.signs[0].notify("Accident reported at km 12");
    wait_alerts(&h.registry, |s| s.accident_detected).await;
    let event = next_matching(&mut events, |e| {
        matches!(e, ConnectionEvent::AccidentDetected { .. })
    })
    .await;
    assert_eq!(event.address(), SIGN_A);
    assert_eq!(h.registry.accident_addresses(), vec![SIGN_A.to_string()]);
    assert!(
        h.registry
            .alert_summary()
            .headline()
            .starts_with("ACCIDENT DETECTED!")
    );

    // A later, unrelated status does not clear the mark.
    h.signs[0].notify("Traffic flowing");
    next_matching(&mut events, |e| {
        matches!(e, ConnectionEvent::StatusMessage { message, .. } if message == "Traffic flowing")
    })
    .await;
    assert!(h.registry.alert_summary().accident_detected);

    assert!(h.registry.send_command(SIGN_A, "RESET_ACCIDENT").await);
    assert!(!h.registry.alert_summary().accident_detected);
    assert!(h.registry.accident_addresses().is_empty());
    next_matching(&mut events, |e| {
        matches!(e, ConnectionEvent::AccidentCleared { .. })
    })
    .await;
}

#[tokio::test]
async fn test_accident_matching_is_case_insensitive() {
    let h = harness();
    let connection = h.registry.connect(&ble(SIGN_A)).unwrap();
    wait_until_ready(connection.as_ref(), WAIT).await.unwrap();

    h.signs[0].notify("ACCID");
    wait_alerts(&h.registry, |s| s.accident_detected).await;
}

#[tokio::test]
async fn test_clear_and_unregister_drop_accident_marks() {
    let h = harness();
    let mut events = h.registry.events().subscribe();
    for address in [SIGN_A, SIGN_B] {
        let connection = h.registry.connect(&ble(address)).unwrap();
        wait_until_ready(connection.as_ref(), WAIT).await.unwrap();
    }

    h.signs[0].notify("accident");
    h.signs[1].notify("Accident");
    for _ in 0..2 {
        next_matching(&mut events, |e| {
            matches!(e, ConnectionEvent::AccidentDetected { .. })
        })
        .await;
    }
    assert_eq!(
        h.registry.accident_addresses(),
        vec![SIGN_B.to_string(), SIGN_A.to_string()]
    );

    assert!(h.registry.clear_accident(SIGN_A));
    assert!(!h.registry.clear_accident(SIGN_A));
    assert!(h.registry.alert_summary().accident_detected);

    assert!(h.registry.disconnect(SIGN_B));
    assert!(!h.registry.alert_summary().accident_detected);

    h.signs[0].notify("accident again");
    wait_alerts(&h.registry, |s| s.accident_detected).await;
    h.registry.clear_all_accidents();
    assert!(!h.registry.alert_summary().accident_detected);
}

#[tokio::test]
async fn test_active_connections_counts_connected_signs() {
    let h = harness();
    for address in [SIGN_A, SIGN_B] {
        h.registry.connect(&ble(address)).unwrap();
    }
    wait_alerts(&h.registry, |s| s.active_connections == 2).await;
    assert_eq!(
        h.registry.alert_summary().headline(),
        "Monitoring traffic signs - Connected signs: 2"
    );

    h.signs[1].drop_link();
    wait_alerts(&h.registry, |s| s.active_connections == 1).await;
    assert_eq!(h.registry.len(), 2);
}

#[tokio::test]
async fn test_one_failure_does_not_affect_others() {
    let h = harness();
    h.signs[1].set_fail_connect(true);

    let good = h.registry.connect(&ble(SIGN_A)).unwrap();
    let bad = h.registry.connect(&ble(SIGN_B)).unwrap();
    wait_until_ready(good.as_ref(), WAIT).await.unwrap();
    wait_for_state(bad.as_ref(), |s| s == ConnectionState::Error, WAIT)
        .await
        .unwrap();

    assert!(h.registry.send_command(SIGN_A, "YIELD").await);
    assert!(!h.registry.send_command(SIGN_B, "YIELD").await);
    assert_eq!(good.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_reconnect_retries_failed_connection() {
    let h = harness();
    h.signs[0].set_fail_connect(true);
    let connection = h.registry.connect(&ble(SIGN_A)).unwrap();
    wait_for_state(connection.as_ref(), |s| s == ConnectionState::Error, WAIT)
        .await
        .unwrap();

    // Asking again returns the same failed connection without retrying.
    let again = h.registry.connect(&ble(SIGN_A)).unwrap();
    assert!(Arc::ptr_eq(&connection, &again));
    assert_eq!(connection.state(), ConnectionState::Error);

    h.signs[0].set_fail_connect(false);
    assert!(h.registry.reconnect(SIGN_A));
    wait_until_ready(connection.as_ref(), WAIT).await.unwrap();
    assert!(!h.registry.reconnect("11:11:11:11:11:11"));
}

#[tokio::test]
async fn test_disconnect_unregisters() {
    let h = harness();
    let mut events = h.registry.events().subscribe();
    let connection = h.registry.connect(&ble(SIGN_A)).unwrap();
    wait_until_ready(connection.as_ref(), WAIT).await.unwrap();

    assert!(h.registry.disconnect(SIGN_A));
    assert!(!h.registry.contains(SIGN_A));
    assert!(h.registry.is_empty());
    assert!(!h.registry.disconnect(SIGN_A));
    next_matching(&mut events, |e| matches!(e, ConnectionEvent::Removed { .. })).await;

    wait_for_state(
        connection.as_ref(),
        |s| s == ConnectionState::Disconnected,
        WAIT,
    )
    .await
    .unwrap();

    // Connecting again creates a fresh connection.
    let fresh = h.registry.connect(&ble(SIGN_A)).unwrap();
    assert!(!Arc::ptr_eq(&connection, &fresh));
}

#[tokio::test]
async fn test_classic_devices_use_serial_transport() {
    let h = harness();
    let device = DeviceDescriptor::named(SIGN_SPP, "Crosswalk", TransportKind::Dual);
    let connection = h.registry.connect(&device).unwrap();
    assert_eq!(connection.transport(), TransportKind::Dual);
    wait_for_state(
        connection.as_ref(),
        |s| s == ConnectionState::Connected,
        WAIT,
    )
    .await
    .unwrap();

    let mut peer = h.serial.take_peer(SIGN_SPP).unwrap();
    peer.write_all(b"ACCIDENT\n").await.unwrap();
    wait_alerts(&h.registry, |s| s.accident_detected).await;
    assert_eq!(h.registry.accident_addresses(), vec![SIGN_SPP.to_string()]);
}

async fn expect_status(events: &mut EventReceiver, address: &str, expected: &str) {
    next_matching(events, |e| {
        matches!(
            e,
            ConnectionEvent::StatusMessage { address: a, message } if a == address && message == expected
        )
    })
    .await;
}

#[tokio::test]
async fn test_serial_burst_reports_every_line() {
    let h = harness();
    let mut events = h.registry.events().subscribe();
    let device = DeviceDescriptor::new(SIGN_SPP, TransportKind::Classic);
    let connection = h.registry.connect(&device).unwrap();
    wait_for_state(
        connection.as_ref(),
        |s| s == ConnectionState::Connected,
        WAIT,
    )
    .await
    .unwrap();

    let mut peer = h.serial.take_peer(SIGN_SPP).unwrap();
    peer.write_all(b"ACCIDENT on lane 2\nOK\n").await.unwrap();

    expect_status(&mut events, SIGN_SPP, "ACCIDENT on lane 2").await;
    expect_status(&mut events, SIGN_SPP, "OK").await;
    assert!(h.registry.alert_summary().accident_detected);
    assert_eq!(h.registry.accident_addresses(), vec![SIGN_SPP.to_string()]);
}

#[tokio::test]
async fn test_gatt_burst_reports_every_notification() {
    let h = harness();
    let mut events = h.registry.events().subscribe();
    let connection = h.registry.connect(&ble(SIGN_A)).unwrap();
    wait_until_ready(connection.as_ref(), WAIT).await.unwrap();

    h.signs[0].notify("Speed limit 30");
    h.signs[0].notify("ACCIDENT on lane 2");
    h.signs[0].notify("OK");

    expect_status(&mut events, SIGN_A, "Speed limit 30").await;
    let event = next_matching(&mut events, |e| {
        matches!(e, ConnectionEvent::AccidentDetected { .. })
    })
    .await;
    assert_eq!(event.address(), SIGN_A);
    expect_status(&mut events, SIGN_A, "OK").await;
    assert!(h.registry.alert_summary().accident_detected);
    assert_eq!(connection.status_message().as_deref(), Some("OK"));
}

#[tokio::test]
async fn test_ble_only_factory_rejects_classic_devices() {
    let gatt = Arc::new(MockGattConnector::new());
    let registry = ConnectionRegistry::new(Arc::new(TransportFactory::ble_only(gatt)));
    let device = DeviceDescriptor::new(SIGN_SPP, TransportKind::Classic);

    let err = registry.connect(&device).err().unwrap();
    assert!(matches!(err, Error::Unsupported(_)));
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_close_all_tears_everything_down() {
    let h = harness();
    let connections: Vec<_> = [SIGN_A, SIGN_B]
        .into_iter()
        .map(|address| h.registry.connect(&ble(address)).unwrap())
        .collect();
    wait_alerts(&h.registry, |s| s.active_connections == 2).await;

    h.registry.close_all();
    assert!(h.registry.is_empty());
    assert_eq!(h.registry.alert_summary(), AlertSummary::default());
    for connection in &connections {
        assert_eq!(connection.state(), ConnectionState::Disconnected);
    }
}

#[tokio::test]
async fn test_state_changes_are_published() {
    let h = harness();
    let mut events = h.registry.events().subscribe();
    h.registry.connect(&ble(SIGN_A)).unwrap();

    let event = next_matching(&mut events, |e| {
        matches!(
            e,
            ConnectionEvent::StateChanged {
                state: ConnectionState::Connected,
                ..
            }
        )
    })
    .await;
    assert_eq!(event.address(), SIGN_A);
    assert_eq!(h.registry.addresses(), vec![SIGN_A.to_string()]);
}

#[test]
fn test_connect_outside_runtime_fails() {
    let h = harness();
    let err = h.registry.connect(&ble(SIGN_A)).err().unwrap();
    assert!(matches!(err, Error::Unsupported(_)));
}
