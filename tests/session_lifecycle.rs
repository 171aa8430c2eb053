//! Integration tests for the measurement session
//!
//! These tests drive a session against the simulated instrument with a real
//! UI thread pumping the marshal:
//! - Discovery, connect, measure and disconnect
//! - Abort, including an instrument that never confirms
//! - Connection loss in the middle of a measurement
//! - Device claims shared between sessions
//! - Teardown after the UI context is gone, including mid-measurement
//! - A link pulled while idle

#![cfg(feature = "simulator")]

mod common;

use common::builders::{fast_session_config, SimulatorBuilder};
use common::mock_helpers::{Recorder, UiThread};
use common::{test_timeout, wait_for_state};
use echem_session::config::{MethodConfig, SessionConfig};
use echem_session::instrument::SimulatorFaults;
use echem_session::session::{ConnectionState, DeviceClaims, MeasurementOutcome, SessionEvent};
use echem_session::{InlineMarshal, MeasurementSession, SessionError};
use serial_test::serial;
use std::sync::Arc;
use std::time::Duration;

use ConnectionState::*;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn test_full_measurement_lifecycle() {
    let ui = UiThread::spawn();
    let sim = Arc::new(SimulatorBuilder::new().build());
    let session = MeasurementSession::new(sim.clone(), ui.marshal(), fast_session_config());
    let recorder = Recorder::attach(&session);

    let devices = session.discover(Duration::from_millis(500)).await.unwrap();
    assert_eq!(devices.len(), 2);

    session.connect(&devices[0]).await.unwrap();
    assert_eq!(session.connection_state(), Idle);
    assert_eq!(session.active_device(), Some(devices[0].clone()));
    assert!(sim.is_connected(&devices[0]));

    let id = session
        .start_measurement(&MethodConfig::default())
        .await
        .unwrap();
    wait_for_state(session.watch_state(), Idle).await;

    let measurement = session.active_measurement().unwrap();
    assert_eq!(measurement.id(), id);
    assert_eq!(measurement.outcome(), Some(&MeasurementOutcome::Completed));
    assert_eq!(measurement.sample_count(), 101);
    assert!(measurement.instrument_started_at().is_some());
    assert!(measurement.curves().iter().all(|c| c.is_finished()));

    session.disconnect().await.unwrap();
    assert_eq!(session.connection_state(), Disconnected);
    assert!(!sim.is_connected(&devices[0]));
    assert_eq!(sim.subscriber_count(), 0);

    // disconnect returns only after the UI thread has seen everything
    assert_eq!(
        recorder.transitions(),
        vec![Connecting, Idle, Pretreatment, Measuring, Idle, Disconnecting, Disconnected]
    );
    assert!(recorder.threads().iter().all(|t| *t == ui.thread_id()));

    let delivered: usize = recorder
        .events()
        .iter()
        .map(|e| match e {
            SessionEvent::SamplesAdded { samples, .. } => samples.len(),
            _ => 0,
        })
        .sum();
    assert_eq!(delivered, 101);
    assert_eq!(
        recorder.count(|e| matches!(e, SessionEvent::ProtocolViolation(_))),
        0
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn test_sample_batches_arrive_in_order() {
    let ui = UiThread::spawn();
    let sim = Arc::new(SimulatorBuilder::new().build());
    let session = MeasurementSession::new(sim.clone(), ui.marshal(), fast_session_config());
    let recorder = Recorder::attach(&session);

    session.connect(&sim.devices()[0]).await.unwrap();
    session
        .start_measurement(&MethodConfig::default())
        .await
        .unwrap();
    wait_for_state(session.watch_state(), Idle).await;
    session.disconnect().await.unwrap();

    let mut next = 0;
    for event in recorder.events() {
        if let SessionEvent::SamplesAdded {
            start_index,
            samples,
            ..
        } = event
        {
            assert_eq!(start_index, next);
            next += samples.len();
        }
    }
    assert_eq!(next, 101);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn test_abort_running_measurement() {
    let ui = UiThread::spawn();
    let sim = Arc::new(SimulatorBuilder::new().slow().build());
    let session = MeasurementSession::new(sim.clone(), ui.marshal(), fast_session_config());
    let recorder = Recorder::attach(&session);

    session.connect(&sim.devices()[0]).await.unwrap();
    session
        .start_measurement(&MethodConfig::default())
        .await
        .unwrap();
    wait_for_state(session.watch_state(), Measuring).await;

    assert!(session.abort_measurement().await.unwrap());
    assert_eq!(session.connection_state(), Idle);

    let measurement = session.active_measurement().unwrap();
    assert_eq!(measurement.outcome(), Some(&MeasurementOutcome::Aborted));
    assert!(measurement.sample_count() < 101);
    assert!(!measurement.abort_requested());

    // Nothing left to abort
    assert!(!session.abort_measurement().await.unwrap());

    session.disconnect().await.unwrap();
    assert_eq!(
        recorder.count(|e| matches!(e, SessionEvent::AbortRequested { .. })),
        1
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn test_unconfirmed_abort_times_out_and_disconnect_forces_close() {
    let ui = UiThread::spawn();
    let sim = Arc::new(
        SimulatorBuilder::new()
            .slow()
            .faults(SimulatorFaults {
                ignore_abort: true,
                ..Default::default()
            })
            .build(),
    );
    let config = SessionConfig {
        abort_timeout_ms: 100,
        ..fast_session_config()
    };
    let session = MeasurementSession::new(sim.clone(), ui.marshal(), config);
    let device = sim.devices()[0].clone();

    session.connect(&device).await.unwrap();
    session
        .start_measurement(&MethodConfig::default())
        .await
        .unwrap();
    wait_for_state(session.watch_state(), Measuring).await;

    let result = session.abort_measurement().await;
    assert!(matches!(result, Err(SessionError::Timeout(_))), "{:?}", result);
    assert!(session.connection_state().is_measuring());
    assert!(!session.active_measurement().unwrap().abort_requested());

    session.disconnect().await.unwrap();
    assert_eq!(session.connection_state(), Disconnected);
    assert!(!sim.is_connected(&device));
    assert_eq!(
        session.active_measurement().unwrap().outcome(),
        Some(&MeasurementOutcome::Aborted)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn test_connection_lost_during_measurement() {
    let ui = UiThread::spawn();
    let sim = Arc::new(
        SimulatorBuilder::new()
            .faults(SimulatorFaults {
                lose_connection_after: Some(16),
                ..Default::default()
            })
            .build(),
    );
    let session = MeasurementSession::new(sim.clone(), ui.marshal(), fast_session_config());
    let recorder = Recorder::attach(&session);
    let device = sim.devices()[0].clone();

    session.connect(&device).await.unwrap();
    session
        .start_measurement(&MethodConfig::default())
        .await
        .unwrap();
    wait_for_state(session.watch_state(), Disconnected).await;

    let measurement = session.active_measurement().unwrap();
    match measurement.outcome() {
        Some(MeasurementOutcome::Failed(reason)) => {
            assert!(reason.contains("connection lost"), "{}", reason)
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(session.active_device(), None);

    // The claim went with the connection
    session.connect(&device).await.unwrap();
    session.disconnect().await.unwrap();

    assert!(recorder.events().iter().any(|e| matches!(
        e,
        SessionEvent::Disconnected { error: Some(_), .. }
    )));
    let transitions = recorder.transitions();
    let lost = transitions
        .windows(2)
        .position(|w| w == [Disconnecting, Disconnected])
        .unwrap();
    assert!(transitions[..lost].contains(&Measuring));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_discovery_timeout_yields_empty_list() {
    let ui = UiThread::spawn();
    let sim = Arc::new(SimulatorBuilder::new().discovery_latency_ms(500).build());
    let session = MeasurementSession::new(sim, ui.marshal(), fast_session_config());

    let found = session.discover(Duration::from_millis(20)).await.unwrap();
    assert!(found.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_discovery_failure_is_returned() {
    let ui = UiThread::spawn();
    let sim = Arc::new(
        SimulatorBuilder::new()
            .faults(SimulatorFaults {
                fail_discovery: true,
                ..Default::default()
            })
            .build(),
    );
    let session = MeasurementSession::new(sim, ui.marshal(), fast_session_config());

    let result = session.discover(Duration::from_millis(200)).await;
    assert!(matches!(result, Err(SessionError::Transport(_))));
    assert_eq!(session.connection_state(), Disconnected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sessions_sharing_claims_cannot_share_a_device() {
    let ui = UiThread::spawn();
    let sim = Arc::new(SimulatorBuilder::new().build());
    let claims = DeviceClaims::new();
    let first = MeasurementSession::builder(sim.clone(), ui.marshal())
        .name("channel-1")
        .config(fast_session_config())
        .claims(claims.clone())
        .build();
    let second = MeasurementSession::builder(sim.clone(), ui.marshal())
        .name("channel-2")
        .config(fast_session_config())
        .claims(claims.clone())
        .build();
    let devices = sim.devices().to_vec();

    first.connect(&devices[0]).await.unwrap();
    assert!(matches!(
        second.connect(&devices[0]).await,
        Err(SessionError::DeviceBusy(_))
    ));
    assert_eq!(second.connection_state(), Disconnected);
    assert_eq!(claims.owner(&devices[0].id).as_deref(), Some("channel-1"));

    second.connect(&devices[1]).await.unwrap();

    first.disconnect().await.unwrap();
    assert!(!claims.is_claimed(&devices[0].id));

    second.disconnect().await.unwrap();
    second.connect(&devices[0]).await.unwrap();
    second.disconnect().await.unwrap();
    assert!(!claims.is_claimed(&devices[0].id));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_refused_measurement_returns_to_idle() {
    let ui = UiThread::spawn();
    let sim = Arc::new(
        SimulatorBuilder::new()
            .faults(SimulatorFaults {
                reject_measurement: true,
                ..Default::default()
            })
            .build(),
    );
    let session = MeasurementSession::new(sim.clone(), ui.marshal(), fast_session_config());

    session.connect(&sim.devices()[0]).await.unwrap();
    let result = session.start_measurement(&MethodConfig::default()).await;
    assert!(matches!(result, Err(SessionError::Transport(_))));
    assert_eq!(session.connection_state(), Idle);
    assert!(matches!(
        session.active_measurement().unwrap().outcome(),
        Some(MeasurementOutcome::Failed(_))
    ));

    session.disconnect().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_status_readings_reach_listeners() {
    let ui = UiThread::spawn();
    let sim = Arc::new(SimulatorBuilder::new().status_interval_ms(5).build());
    let session = MeasurementSession::new(sim.clone(), ui.marshal(), fast_session_config());
    let recorder = Recorder::attach(&session);

    session.connect(&sim.devices()[0]).await.unwrap();
    let received = tokio::time::timeout(test_timeout(), async {
        while recorder.count(|e| matches!(e, SessionEvent::Status(_))) < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(received.is_ok(), "no status readings delivered");
    assert!(recorder.threads().iter().all(|t| *t == ui.thread_id()));

    session.disconnect().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_disconnect_after_ui_is_gone() {
    let ui = UiThread::spawn();
    let sim = Arc::new(SimulatorBuilder::new().build());
    let session = MeasurementSession::new(sim.clone(), ui.marshal(), fast_session_config());
    let device = sim.devices()[0].clone();

    session.connect(&device).await.unwrap();
    drop(ui);

    session.disconnect().await.unwrap();
    assert_eq!(session.connection_state(), Disconnected);
    assert!(!sim.is_connected(&device));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn test_disconnect_while_measuring_after_ui_is_gone() {
    let ui = UiThread::spawn();
    let sim = Arc::new(SimulatorBuilder::new().slow().build());
    let config = SessionConfig {
        abort_timeout_ms: 3_000,
        ..fast_session_config()
    };
    let session = MeasurementSession::new(sim.clone(), ui.marshal(), config);
    let device = sim.devices()[0].clone();

    session.connect(&device).await.unwrap();
    session
        .start_measurement(&MethodConfig::default())
        .await
        .unwrap();
    wait_for_state(session.watch_state(), Measuring).await;
    drop(ui);

    let started = std::time::Instant::now();
    session.disconnect().await.unwrap();
    assert!(
        started.elapsed() < Duration::from_secs(1),
        "teardown waited {:?} for an abort nobody can confirm",
        started.elapsed()
    );
    assert_eq!(session.connection_state(), Disconnected);
    assert!(!sim.is_connected(&device));
    assert_eq!(
        session.active_measurement().unwrap().outcome(),
        Some(&MeasurementOutcome::Aborted)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_link_pulled_while_idle() {
    let ui = UiThread::spawn();
    let sim = Arc::new(SimulatorBuilder::new().build());
    let session = MeasurementSession::new(sim.clone(), ui.marshal(), fast_session_config());
    let recorder = Recorder::attach(&session);
    let device = sim.devices()[0].clone();

    assert!(!sim.drop_connection(&device, "cable pulled"));

    session.connect(&device).await.unwrap();
    assert!(sim.drop_connection(&device, "cable pulled"));
    wait_for_state(session.watch_state(), Disconnected).await;

    assert_eq!(session.active_device(), None);
    assert!(!sim.is_connected(&device));
    assert_eq!(sim.subscriber_count(), 0);

    // Claim released, so the same device connects again
    session.connect(&device).await.unwrap();
    session.disconnect().await.unwrap();

    assert!(recorder.events().iter().any(|e| matches!(
        e,
        SessionEvent::Disconnected { error: Some(reason), .. } if reason.contains("cable pulled")
    )));
    assert_eq!(
        &recorder.transitions()[..4],
        &[Connecting, Idle, Disconnecting, Disconnected]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_headless_session_with_inline_marshal() {
    let sim = Arc::new(SimulatorBuilder::new().build());
    let session = MeasurementSession::new(
        sim.clone(),
        Arc::new(InlineMarshal::new()),
        fast_session_config(),
    );
    let recorder = Recorder::attach(&session);

    session.connect(&sim.devices()[0]).await.unwrap();
    session
        .start_measurement(&MethodConfig::default())
        .await
        .unwrap();
    wait_for_state(session.watch_state(), Idle).await;
    session.disconnect().await.unwrap();

    assert_eq!(
        session.active_measurement().unwrap().outcome(),
        Some(&MeasurementOutcome::Completed)
    );
    assert_eq!(recorder.transitions().last(), Some(&Disconnected));
}
