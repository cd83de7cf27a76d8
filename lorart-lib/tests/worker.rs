//! The worker thread runs its own runtime on the real clock, so every fake reply here
//! is queued before the request that reads it.

mod common;

use common::*;
use lorart_lib::{DeviceFilter, Downlink, JoinOutcome, LinkConfig, LoraWorker};

fn spawn_modem() -> (LoraWorker, FakeHost, Wire) {
    init_tracing();
    let device = FakeDevice::cdc(VID, PID, 4);
    let wire = device.wire.clone();
    let host = FakeHost::with_devices(vec![device]);
    let worker = LoraWorker::spawn(host.clone(), LinkConfig::default()).unwrap();
    (worker, host, wire)
}

#[tokio::test]
async fn test_join_then_fetch() {
    let (worker, _host, wire) = spawn_modem();
    wire.script_join_success();
    wire.reply_to("AT+SENDB=010500", &["+RECVB=A100"]);

    assert_eq!(worker.join(DeviceFilter::new(Some(VID), Some(PID))).await, JoinOutcome::Joined);
    assert_eq!(
        worker.fetch(5, None).await,
        Some(Downlink {
            w: 2,
            u: 2,
            c: 0,
            h: Some(0)
        })
    );

    worker.shutdown().await;
}

#[tokio::test]
async fn test_requests_run_in_submission_order() {
    let (worker, _host, wire) = spawn_modem();
    wire.script_join_success();
    wire.reply_to("AT+SENDB=010700", &["+RECVB=4E2A"]);

    let (joined, downlink) = tokio::join!(worker.join(DeviceFilter::ANY), worker.fetch(7, None));

    assert!(joined.is_joined());
    assert!(downlink.is_some());
    assert_eq!(wire.written(), vec!["AT", "ATE0", "AT+JOIN", "AT+SENDB=010700"]);

    worker.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_closes_link() {
    let (worker, host, wire) = spawn_modem();
    wire.script_join_success();
    assert!(worker.join(DeviceFilter::ANY).await.is_joined());

    worker.shutdown().await;

    let state = host.state();
    assert_eq!(state.releases, 1);
    assert_eq!(state.closes, 1);
}

#[tokio::test]
async fn test_missing_device_through_worker() {
    let host = FakeHost::with_devices(vec![]);
    let worker = LoraWorker::spawn(host, LinkConfig::default()).unwrap();

    assert_eq!(worker.join(DeviceFilter::ANY).await, JoinOutcome::NoDevice);
    assert_eq!(worker.fetch(5, None).await, None);

    worker.shutdown().await;
}
