//! Supervisor behaviour against simulated readers.

use scanrelay_core::{MrzRecord, RecordSink};
use scanrelay_hardware::mock::{MockSerialConnector, MockVendorSdk};
use scanrelay_hardware::{
    BackendKind, ReaderDrivers, ReaderSettings, ReaderSupervisor, SupervisorState,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

const TD3: &str = "P<UTOERIKSSON<<ANNA<MARIA<<<<<<<<<<<<<<<<<<<\r\n\
                   L898902C36UTO7408122F1204159ZE184226B<<<<<10";

/// Sink that takes a while to accept each record.
struct SlowSink {
    delay: Duration,
    tx: mpsc::UnboundedSender<MrzRecord>,
}

impl RecordSink for SlowSink {
    async fn submit(&self, record: MrzRecord) -> bool {
        tokio::time::sleep(self.delay).await;
        self.tx.send(record).is_ok()
    }
}

fn settings() -> ReaderSettings {
    ReaderSettings {
        reconnect_interval: Duration::from_millis(50),
        ..ReaderSettings::default()
    }
}

#[tokio::test]
async fn back_to_back_scans_yield_one_record() {
    let (sdk, hid) = MockVendorSdk::new();
    hid.attach_device("IDBox");
    let (serial, _) = MockSerialConnector::new();
    let drivers = ReaderDrivers::new(Arc::new(sdk), Arc::new(serial));

    let (tx, mut rx) = mpsc::unbounded_channel();
    let sink = SlowSink {
        delay: Duration::from_millis(200),
        tx,
    };
    let supervisor = ReaderSupervisor::from_settings(&settings(), &drivers, sink).unwrap();
    assert_eq!(supervisor.backend(), BackendKind::Hid);

    let mut handle = supervisor.start();
    assert!(
        handle
            .wait_for_state(SupervisorState::Connected, Duration::from_secs(1))
            .await
    );

    hid.scan(TD3);
    hid.scan(TD3);
    tokio::time::sleep(Duration::from_millis(400)).await;

    let first = rx.try_recv().expect("one record");
    assert_eq!(first.last_name, "ERIKSSON");
    assert!(rx.try_recv().is_err(), "duplicate scan was not suppressed");

    // Once the first hand-off completes, new scans are processed again.
    hid.scan(TD3);
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(rx.try_recv().is_ok());

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn serial_push_reader_end_to_end() {
    let (sdk, _) = MockVendorSdk::new();
    let (serial, port) = MockSerialConnector::new();
    port.add_port("COM4");
    let drivers = ReaderDrivers::new(Arc::new(sdk), Arc::new(serial));

    let settings = ReaderSettings {
        serial_port: "COM4".to_string(),
        ..settings()
    };
    let (tx, mut rx) = mpsc::channel(4);
    let mut handle = ReaderSupervisor::from_settings(&settings, &drivers, tx)
        .unwrap()
        .start();
    assert_eq!(handle.backend(), BackendKind::Serial);
    assert!(
        handle
            .wait_for_state(SupervisorState::Connected, Duration::from_secs(1))
            .await
    );
    assert!(port.continuous_enabled());

    port.push_mrz(
        "P<UTOERIKSSON<<ANNA<MARIA<<<<<<<<<<<<<<<<<<<\r\
         L898902C36UTO7408122F1204159ZE184226B<<<<<10\r\r",
    );
    let record = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("record in time")
        .expect("sink open");
    assert_eq!(record.first_name, "ANNA MARIA");
    assert_eq!(record.raw_mrz_data, TD3);

    let info = handle.info().await.unwrap();
    assert_eq!(info.firmware_version.as_deref(), Some("MOCK-1.0"));

    handle.shutdown().await.unwrap();
    assert_eq!(handle.state(), SupervisorState::Disposed);
    assert!(!port.continuous_enabled());
}

#[tokio::test]
async fn shutdown_with_scan_in_flight_is_prompt() {
    let (sdk, _) = MockVendorSdk::new();
    let (serial, port) = MockSerialConnector::new();
    port.add_port("COM4");
    let drivers = ReaderDrivers::new(Arc::new(sdk), Arc::new(serial));

    let settings = ReaderSettings {
        serial_port: "COM4".to_string(),
        ..settings()
    };
    let (tx, _rx) = mpsc::unbounded_channel();
    let sink = SlowSink {
        delay: Duration::from_secs(10),
        tx,
    };
    let mut handle = ReaderSupervisor::from_settings(&settings, &drivers, sink)
        .unwrap()
        .start();
    assert!(
        handle
            .wait_for_state(SupervisorState::Connected, Duration::from_secs(1))
            .await
    );

    // The sink holds this record well past shutdown.
    port.push_mrz(
        "P<UTOERIKSSON<<ANNA<MARIA<<<<<<<<<<<<<<<<<<<\r\
         L898902C36UTO7408122F1204159ZE184226B<<<<<10\r\r",
    );
    tokio::time::sleep(Duration::from_millis(200)).await;

    let started = Instant::now();
    handle.shutdown().await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(handle.state(), SupervisorState::Disposed);
    assert!(!port.continuous_enabled());
}

#[tokio::test]
async fn serial_port_unplugged_moves_to_disconnected() {
    let (sdk, _) = MockVendorSdk::new();
    let (serial, port) = MockSerialConnector::new();
    port.add_port("COM4");
    let drivers = ReaderDrivers::new(Arc::new(sdk), Arc::new(serial));

    let settings = ReaderSettings {
        serial_port: "COM4".to_string(),
        backend: scanrelay_hardware::BackendPreference::Serial,
        ..settings()
    };
    let (tx, _rx) = mpsc::channel(4);
    let mut handle = ReaderSupervisor::from_settings(&settings, &drivers, tx)
        .unwrap()
        .start();
    assert!(
        handle
            .wait_for_state(SupervisorState::Connected, Duration::from_secs(1))
            .await
    );

    // Enough failed reads to trip the loop, and no port to come back to.
    port.remove_port("COM4");
    port.inject_read_errors(50);
    assert!(
        handle
            .wait_for_state(SupervisorState::Disconnected, Duration::from_secs(10))
            .await
    );

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn invalid_settings_fail_loudly() {
    let drivers = ReaderDrivers::new(
        Arc::new(MockVendorSdk::new().0),
        Arc::new(MockSerialConnector::new().0),
    );
    let settings = ReaderSettings {
        backend: scanrelay_hardware::BackendPreference::Serial,
        ..ReaderSettings::default()
    };
    let (tx, _rx) = mpsc::channel::<MrzRecord>(1);
    assert!(ReaderSupervisor::from_settings(&settings, &drivers, tx).is_err());
}
