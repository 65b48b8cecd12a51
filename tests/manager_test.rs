//! Integration tests for the session manager.
//!
//! Covers the session lifecycle invariants:
//! - open idempotence and retain/release balance
//! - polling loop active iff any session is open
//! - error surfacing for enumeration, missing devices and closed sessions
//! - full capture → event → download → notification round trip
//!
//! All tests run against the in-memory mock SDK; one `pump_events` call on
//! the mock is one deterministic poll tick.

#![cfg(feature = "mock")]

use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;
use tethercap::sdk::mock::{MockCall, MockSdk};
use tethercap::sdk::CameraSdk;
use tethercap::{CameraIdentity, SessionManager, TetherConfig, TetherError};

fn test_config(download_dir: &std::path::Path) -> TetherConfig {
    TetherConfig {
        poll_interval: Duration::from_millis(1),
        shutter_settle: Duration::ZERO,
        download_dir: download_dir.to_path_buf(),
    }
}

fn manager_with(sdk: &Arc<MockSdk>, download_dir: &std::path::Path) -> SessionManager {
    SessionManager::new(
        Arc::clone(sdk) as Arc<dyn CameraSdk>,
        test_config(download_dir),
    )
    .unwrap()
}

fn identity(port: &str) -> CameraIdentity {
    CameraIdentity {
        port_name: port.into(),
        description: String::new(),
        sub_type: 0,
    }
}

#[tokio::test]
async fn list_devices_snapshots_identities_and_releases_the_list() {
    let sdk = Arc::new(MockSdk::new());
    let dev_a = sdk.add_device("usb:001,004", "Body A", 1);
    sdk.add_device("usb:001,007", "Body B", 2);
    let tmp = tempfile::tempdir().unwrap();
    let manager = manager_with(&sdk, tmp.path());

    let devices = manager.list_devices().unwrap();
    assert_eq!(devices.len(), 2);
    assert_eq!(devices[0].port_name, "usb:001,004");
    assert_eq!(devices[0].description, "Body A");
    assert_eq!(devices[1].sub_type, 2);

    // List resource released, per-device references not retained.
    assert_eq!(sdk.live_lists(), 0);
    assert_eq!(sdk.retain_count(dev_a), 0);
}

#[tokio::test]
async fn enumeration_failure_surfaces_and_still_releases_the_list() {
    let sdk = Arc::new(MockSdk::new());
    sdk.add_device("usb:1", "Body", 0);
    let tmp = tempfile::tempdir().unwrap();
    let manager = manager_with(&sdk, tmp.path());
    sdk.fail_next("child_count", 0xC0);

    let err = manager.list_devices().unwrap_err();
    assert!(matches!(err, TetherError::Enumeration(_)));
    assert_eq!(sdk.live_lists(), 0);
}

#[tokio::test]
async fn open_is_idempotent() {
    let sdk = Arc::new(MockSdk::new());
    let device = sdk.add_device("usb:1", "Body", 0);
    let tmp = tempfile::tempdir().unwrap();
    let manager = manager_with(&sdk, tmp.path());
    let id = identity("usb:1");

    manager.open(&id).await.unwrap();
    manager.open(&id).await.unwrap();

    // Exactly one retain and one set of registrations.
    assert_eq!(sdk.retain_count(device), 1);
    let registrations = sdk
        .calls()
        .iter()
        .filter(|c| matches!(c, MockCall::SetEventHandler { registered: true, .. }))
        .count();
    assert_eq!(registrations, 3);
    let opens = sdk
        .calls()
        .iter()
        .filter(|c| matches!(c, MockCall::OpenSession(_)))
        .count();
    assert_eq!(opens, 1);
    assert_eq!(manager.session_count().await, 1);

    manager.terminate().await;
}

#[tokio::test]
async fn close_on_never_opened_identity_makes_no_binding_calls() {
    let sdk = Arc::new(MockSdk::new());
    sdk.add_device("usb:1", "Body", 0);
    let tmp = tempfile::tempdir().unwrap();
    let manager = manager_with(&sdk, tmp.path());
    sdk.take_calls();

    assert!(!manager.close(&identity("usb:1")).await);
    assert!(sdk.calls().is_empty());
}

#[tokio::test]
async fn open_then_close_balances_retain_and_release() {
    let sdk = Arc::new(MockSdk::new());
    let device = sdk.add_device("usb:1", "Body", 0);
    let tmp = tempfile::tempdir().unwrap();
    let manager = manager_with(&sdk, tmp.path());
    let id = identity("usb:1");

    manager.open(&id).await.unwrap();
    assert!(manager.close(&id).await);

    assert_eq!(sdk.retain_count(device), sdk.release_count(device));
    assert_eq!(sdk.retain_count(device), 1);
}

#[tokio::test]
async fn poll_loop_runs_iff_any_session_is_open() {
    let sdk = Arc::new(MockSdk::new());
    sdk.add_device("usb:a", "Body A", 0);
    sdk.add_device("usb:b", "Body B", 0);
    let tmp = tempfile::tempdir().unwrap();
    let manager = manager_with(&sdk, tmp.path());
    let (a, b) = (identity("usb:a"), identity("usb:b"));

    assert!(!manager.is_polling());

    manager.open(&a).await.unwrap();
    assert!(manager.is_polling());

    // close(B) before it was ever opened: no-op, loop untouched.
    assert!(!manager.close(&b).await);
    assert!(manager.is_polling());

    // A second open does not start a second loop; the flag stays set.
    manager.open(&b).await.unwrap();
    assert!(manager.is_polling());

    assert!(manager.close(&a).await);
    assert!(manager.is_polling(), "loop keeps running while B is open");

    assert!(manager.close(&b).await);
    assert!(!manager.is_polling(), "loop stops with the last session");
}

#[tokio::test]
async fn reopening_after_last_close_restarts_polling() {
    let sdk = Arc::new(MockSdk::new());
    sdk.add_device("usb:1", "Body", 0);
    let tmp = tempfile::tempdir().unwrap();
    let manager = manager_with(&sdk, tmp.path());
    let id = identity("usb:1");

    manager.open(&id).await.unwrap();
    assert!(manager.close(&id).await);
    assert!(!manager.is_polling());

    // Immediate re-open, well inside the old worker's last tick window.
    manager.open(&id).await.unwrap();
    assert!(manager.is_polling());
    assert_eq!(manager.session_count().await, 1);

    manager.terminate().await;
    assert!(!manager.is_polling());
}

#[tokio::test(flavor = "multi_thread")]
async fn capture_settle_does_not_stall_other_sessions() {
    let sdk = Arc::new(MockSdk::new());
    sdk.add_device("usb:a", "Body A", 0);
    sdk.add_device("usb:b", "Body B", 0);
    let tmp = tempfile::tempdir().unwrap();
    let mut config = test_config(tmp.path());
    config.shutter_settle = Duration::from_millis(250);
    let manager = Arc::new(
        SessionManager::new(Arc::clone(&sdk) as Arc<dyn CameraSdk>, config).unwrap(),
    );
    let (a, b) = (identity("usb:a"), identity("usb:b"));

    manager.open(&a).await.unwrap();
    manager.open(&b).await.unwrap();

    let capture = {
        let manager = Arc::clone(&manager);
        let a = a.clone();
        tokio::spawn(async move { manager.trigger_capture(&a).await })
    };
    // Let the capture reach its settle wait.
    tokio::time::sleep(Duration::from_millis(20)).await;

    let begin = std::time::Instant::now();
    let subscription = manager
        .subscribe_to_images(&b, Arc::new(|_: &tethercap::DownloadedImage| {}))
        .await
        .unwrap();
    subscription.unsubscribe();
    assert!(manager.close(&b).await);
    assert!(
        begin.elapsed() < Duration::from_millis(150),
        "registry operations stalled behind another session's settle wait"
    );

    capture.await.unwrap().unwrap();
    manager.terminate().await;
}

#[tokio::test]
async fn subscribe_requires_an_open_session() {
    let sdk = Arc::new(MockSdk::new());
    sdk.add_device("usb:1", "Body", 0);
    let tmp = tempfile::tempdir().unwrap();
    let manager = manager_with(&sdk, tmp.path());

    let err = manager
        .subscribe_to_images(
            &identity("usb:1"),
            Arc::new(|_: &tethercap::DownloadedImage| {}),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, TetherError::NotOpen { .. }));
}

#[tokio::test]
async fn capture_requires_an_open_session() {
    let sdk = Arc::new(MockSdk::new());
    sdk.add_device("usb:1", "Body", 0);
    let tmp = tempfile::tempdir().unwrap();
    let manager = manager_with(&sdk, tmp.path());
    let id = identity("usb:1");

    assert!(matches!(
        manager.trigger_capture(&id).await.unwrap_err(),
        TetherError::NotOpen { .. }
    ));

    manager.open(&id).await.unwrap();
    manager.trigger_capture(&id).await.unwrap();
    manager.close(&id).await;

    assert!(matches!(
        manager.trigger_capture(&id).await.unwrap_err(),
        TetherError::NotOpen { .. }
    ));
}

#[tokio::test]
async fn open_unknown_port_is_device_not_found() {
    let sdk = Arc::new(MockSdk::new());
    sdk.add_device("usb:1", "Body", 0);
    let tmp = tempfile::tempdir().unwrap();
    let manager = manager_with(&sdk, tmp.path());

    let err = manager.open(&identity("usb:unplugged")).await.unwrap_err();
    assert!(matches!(err, TetherError::DeviceNotFound { port } if port == "usb:unplugged"));
    assert!(!manager.is_polling());
}

#[tokio::test]
async fn failed_open_is_not_tracked_and_does_not_start_polling() {
    let sdk = Arc::new(MockSdk::new());
    let device = sdk.add_device("usb:1", "Body", 0);
    let tmp = tempfile::tempdir().unwrap();
    let manager = manager_with(&sdk, tmp.path());
    let id = identity("usb:1");
    sdk.fail_next("open_session", 0x8D);

    let err = manager.open(&id).await.unwrap_err();
    assert!(matches!(err, TetherError::Session { .. }));

    assert_eq!(manager.session_count().await, 0);
    assert!(!manager.is_polling());
    assert!(!manager.close(&id).await);
    // Observed non-rollback behavior: the handle stays retained.
    assert_eq!(sdk.retain_count(device), 1);
    assert_eq!(sdk.release_count(device), 0);
}

#[tokio::test]
async fn terminate_closes_everything_and_tears_down_the_sdk() {
    let sdk = Arc::new(MockSdk::new());
    let dev_a = sdk.add_device("usb:a", "Body A", 0);
    let dev_b = sdk.add_device("usb:b", "Body B", 0);
    let tmp = tempfile::tempdir().unwrap();
    let manager = manager_with(&sdk, tmp.path());

    manager.open(&identity("usb:a")).await.unwrap();
    manager.open(&identity("usb:b")).await.unwrap();

    manager.terminate().await;

    assert_eq!(manager.session_count().await, 0);
    assert!(!manager.is_polling());
    assert_eq!(sdk.release_count(dev_a), 1);
    assert_eq!(sdk.release_count(dev_b), 1);
    assert!(sdk.calls().contains(&MockCall::Terminate));
}

#[tokio::test]
async fn terminate_keeps_going_when_one_close_fails() {
    let sdk = Arc::new(MockSdk::new());
    sdk.add_device("usb:a", "Body A", 0);
    sdk.add_device("usb:b", "Body B", 0);
    let tmp = tempfile::tempdir().unwrap();
    let manager = manager_with(&sdk, tmp.path());

    manager.open(&identity("usb:a")).await.unwrap();
    manager.open(&identity("usb:b")).await.unwrap();

    sdk.fail_next("close_session", 0x2C);
    manager.terminate().await;

    assert_eq!(manager.session_count().await, 0);
    assert!(sdk.calls().contains(&MockCall::Terminate));
}

#[tokio::test(flavor = "multi_thread")]
async fn capture_round_trip_delivers_a_downloaded_image() {
    let sdk = Arc::new(MockSdk::new());
    sdk.add_device("usb:1", "Body", 0);
    sdk.set_capture_simulation(true);
    let tmp = tempfile::tempdir().unwrap();
    let manager = manager_with(&sdk, tmp.path());
    let id = identity("usb:1");

    manager.open(&id).await.unwrap();

    let (tx, rx) = mpsc::channel();
    let subscription = manager
        .subscribe_to_images(
            &id,
            Arc::new(move |image: &tethercap::DownloadedImage| {
                let _ = tx.send(image.clone());
            }),
        )
        .await
        .unwrap();

    manager.trigger_capture(&id).await.unwrap();

    // The poll loop picks up the simulated transfer event on its own.
    let image = rx
        .recv_timeout(Duration::from_secs(5))
        .expect("downloaded image should be delivered");
    assert_eq!(image.file_name, "IMG_0001.JPG");
    assert!(image.path.starts_with(tmp.path()));
    let on_disk = std::fs::metadata(&image.path).unwrap();
    assert_eq!(on_disk.len(), image.size);

    subscription.unsubscribe();
    manager.close(&id).await;
    manager.terminate().await;
}
