//! Simulated instrument
//!
//! An in-process [`InstrumentClient`] for running the application and the
//! integration tests without hardware. Measurements are produced by a tokio
//! task that walks the method's excitation waveform and emits events with the
//! same shape and order a real instrument produces:
//!
//! ```text
//! StateChanged(Pretreatment) -> MeasurementStarted -> StateChanged(Measurement)
//!   -> CurveStartReceiving -> CurveDataAdded* -> CurveFinished
//!   -> MeasurementEnded -> StateChanged(Idle)
//! ```
//!
//! Events are raised from runtime worker threads, never from the caller's
//! thread, so consumers exercise their marshaling path.
//!
//! # Fault injection
//!
//! [`SimulatorFaults`] makes individual operations fail, lets the instrument
//! ignore abort requests or drops the link in the middle of a measurement.

use super::{ClientEvent, ClientHandle, EventHandler, InstrumentClient, MeasurementTicket, Subscription};
use crate::config::{MethodDescriptor, SimulatorConfig, Technique};
use crate::error::{Result, SessionError};
use crate::types::{CurveId, CurveInfo, Device, DeviceState, Reading, Sample};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Failures the simulator should produce
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimulatorFaults {
    /// Discovery fails with a transport error
    pub fail_discovery: bool,
    /// Connecting fails with a transport error
    pub fail_connect: bool,
    /// Disconnect reports a transport error (the link is still closed)
    pub fail_disconnect: bool,
    /// The instrument refuses to start measurements
    pub reject_measurement: bool,
    /// Abort requests are acknowledged but never acted upon
    pub ignore_abort: bool,
    /// Drop the connection once this many points have been sent
    pub lose_connection_after: Option<usize>,
}

struct Connection {
    device: Device,
    handlers: Vec<(u64, EventHandler)>,
    run: Option<Arc<AtomicBool>>,
    status_task: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct SimState {
    next_handle: u64,
    next_subscription: u64,
    next_curve: u64,
    connections: HashMap<u64, Connection>,
    faults: SimulatorFaults,
}

/// In-process instrument
#[derive(Clone)]
pub struct SimulatedInstrument {
    config: SimulatorConfig,
    state: Arc<Mutex<SimState>>,
}

impl SimulatedInstrument {
    /// Create a simulator exposing the devices of `config`
    pub fn new(config: SimulatorConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(SimState::default())),
        }
    }

    /// Builder-style fault configuration
    pub fn with_faults(self, faults: SimulatorFaults) -> Self {
        self.set_faults(faults);
        self
    }

    /// Replace the active faults
    pub fn set_faults(&self, faults: SimulatorFaults) {
        self.lock().faults = faults;
    }

    /// Devices the simulator exposes
    pub fn devices(&self) -> &[Device] {
        &self.config.devices
    }

    /// Whether a device currently has an open connection
    pub fn is_connected(&self, device: &Device) -> bool {
        self.lock()
            .connections
            .values()
            .any(|c| c.device.id == device.id)
    }

    /// Number of handlers subscribed across all connections
    pub fn subscriber_count(&self) -> usize {
        self.lock()
            .connections
            .values()
            .map(|c| c.handlers.len())
            .sum()
    }

    /// Drop a device's link as if the cable was pulled
    ///
    /// Returns `false` if the device was not connected.
    pub fn drop_connection(&self, device: &Device, reason: &str) -> bool {
        let id = self
            .lock()
            .connections
            .iter()
            .find(|(_, c)| c.device.id == device.id)
            .map(|(id, _)| *id);
        match id {
            Some(id) => {
                lose_connection(&self.state, id, reason);
                true
            }
            None => false,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        lock(&self.state)
    }

    fn spawn_status(&self, connection: u64) -> JoinHandle<()> {
        let state = Arc::downgrade(&self.state);
        let interval = Duration::from_millis(self.config.status_interval_ms);
        let noise = self.config.noise;
        tokio::spawn(async move {
            let mut rng = XorShift::new(connection);
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(state) = state.upgrade() else { break };
                let idle = match lock(&state).connections.get(&connection) {
                    Some(c) => c.run.is_none(),
                    None => break,
                };
                if idle {
                    let reading = Reading {
                        potential: rng.noise(noise),
                        current: rng.noise(noise),
                        current_range: 4,
                        overload: false,
                    };
                    emit(&state, connection, ClientEvent::Status(reading));
                }
            }
        })
    }
}

impl std::fmt::Debug for SimulatedInstrument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedInstrument")
            .field("devices", &self.config.devices.len())
            .finish()
    }
}

#[async_trait]
impl InstrumentClient for SimulatedInstrument {
    async fn discover_devices(&self, timeout: Duration) -> Result<Vec<Device>> {
        let latency = Duration::from_millis(self.config.discovery_latency_ms);
        tokio::time::sleep(latency.min(timeout)).await;
        if latency > timeout {
            return Ok(Vec::new());
        }
        if self.lock().faults.fail_discovery {
            return Err(SessionError::Transport("USB enumeration failed".to_string()));
        }
        tracing::debug!("Simulator discovered {} device(s)", self.config.devices.len());
        Ok(self.config.devices.clone())
    }

    async fn connect(&self, device: &Device) -> Result<ClientHandle> {
        tokio::time::sleep(Duration::from_millis(self.config.connect_latency_ms)).await;

        let id = {
            let mut state = self.lock();
            if state.faults.fail_connect {
                return Err(SessionError::Transport(format!(
                    "{} did not respond",
                    device.name
                )));
            }
            if !self.config.devices.iter().any(|d| d.id == device.id) {
                return Err(SessionError::Transport(format!("{} not found", device.id)));
            }
            if state.connections.values().any(|c| c.device.id == device.id) {
                return Err(SessionError::DeviceBusy(device.id.to_string()));
            }
            state.next_handle += 1;
            let id = state.next_handle;
            state.connections.insert(
                id,
                Connection {
                    device: device.clone(),
                    handlers: Vec::new(),
                    run: None,
                    status_task: None,
                },
            );
            id
        };

        let status = (self.config.status_interval_ms > 0).then(|| self.spawn_status(id));
        if let Some(connection) = self.lock().connections.get_mut(&id) {
            connection.status_task = status;
        }
        tracing::info!("Simulator connected {} as #{}", device.id, id);
        Ok(ClientHandle {
            id,
            device: device.clone(),
        })
    }

    async fn disconnect(&self, handle: ClientHandle) -> Result<()> {
        let (removed, fail) = {
            let mut state = self.lock();
            (state.connections.remove(&handle.id), state.faults.fail_disconnect)
        };
        let Some(connection) = removed else {
            return Err(SessionError::Transport(format!(
                "connection #{} is not open",
                handle.id
            )));
        };
        if let Some(run) = &connection.run {
            run.store(true, Ordering::SeqCst);
        }
        if let Some(task) = &connection.status_task {
            task.abort();
        }
        tracing::info!("Simulator disconnected #{}", handle.id);

        if fail {
            return Err(SessionError::Transport("link closed with pending data".to_string()));
        }
        Ok(())
    }

    async fn start_measurement(
        &self,
        handle: &ClientHandle,
        method: &MethodDescriptor,
    ) -> Result<MeasurementTicket> {
        let (abort, curve, faults) = {
            let mut state = self.lock();
            if state.faults.reject_measurement {
                return Err(SessionError::Transport("method rejected by firmware".to_string()));
            }
            state.next_curve += 1;
            let curve = CurveId(state.next_curve);
            let faults = state.faults.clone();
            let connection = state.connections.get_mut(&handle.id).ok_or_else(|| {
                SessionError::Transport(format!("connection #{} is not open", handle.id))
            })?;
            if connection.run.is_some() {
                return Err(SessionError::Transport("instrument busy".to_string()));
            }
            let abort = Arc::new(AtomicBool::new(false));
            connection.run = Some(abort.clone());
            (abort, curve, faults)
        };

        let title = method.technique().kind().to_string();
        let run = MeasurementRun {
            state: Arc::downgrade(&self.state),
            connection: handle.id,
            curve,
            title: title.clone(),
            method: method.clone(),
            abort,
            faults,
            sample_interval: Duration::from_millis(self.config.sample_interval_ms),
            batch_size: self.config.batch_size.max(1),
            noise: self.config.noise,
        };
        tokio::spawn(run.execute());

        Ok(MeasurementTicket {
            title,
            expected_points: method.expected_points(),
        })
    }

    async fn abort(&self, handle: &ClientHandle) -> Result<()> {
        let state = self.lock();
        let connection = state.connections.get(&handle.id).ok_or_else(|| {
            SessionError::Transport(format!("connection #{} is not open", handle.id))
        })?;
        match &connection.run {
            Some(_) if state.faults.ignore_abort => {
                tracing::debug!("Simulator ignoring abort on #{}", handle.id);
            }
            Some(run) => run.store(true, Ordering::SeqCst),
            None => tracing::debug!("Simulator abort with nothing running on #{}", handle.id),
        }
        Ok(())
    }

    fn subscribe(&self, handle: &ClientHandle, handler: EventHandler) -> Subscription {
        let id = {
            let mut state = self.lock();
            state.next_subscription += 1;
            let id = state.next_subscription;
            match state.connections.get_mut(&handle.id) {
                Some(connection) => connection.handlers.push((id, handler)),
                None => {
                    tracing::warn!("Subscribe on closed connection #{}", handle.id);
                    return Subscription::noop();
                }
            }
            id
        };

        let state = Arc::downgrade(&self.state);
        let connection = handle.id;
        Subscription::new(move || {
            if let Some(state) = state.upgrade() {
                if let Some(c) = lock(&state).connections.get_mut(&connection) {
                    c.handlers.retain(|(h, _)| *h != id);
                }
            }
        })
    }
}

/// One measurement being produced
struct MeasurementRun {
    state: Weak<Mutex<SimState>>,
    connection: u64,
    curve: CurveId,
    title: String,
    method: MethodDescriptor,
    abort: Arc<AtomicBool>,
    faults: SimulatorFaults,
    sample_interval: Duration,
    batch_size: usize,
    noise: f64,
}

impl MeasurementRun {
    async fn execute(self) {
        let mut rng = XorShift::new(self.curve.0);
        let excitation = self.method.excitation();

        if !self.send(ClientEvent::StateChanged(DeviceState::Pretreatment)) {
            return;
        }
        self.send(ClientEvent::MeasurementStarted);
        if self.method.pretreatment_duration() > 0.0 {
            tokio::time::sleep(self.sample_interval * 5).await;
        }

        let mut sent = 0;
        if !self.aborted() {
            self.send(ClientEvent::StateChanged(DeviceState::Measurement));
            self.send(ClientEvent::CurveStartReceiving(CurveInfo {
                id: self.curve,
                title: self.title.clone(),
                x_unit: self.method.technique().x_unit().to_string(),
                y_unit: "Current (µA)".to_string(),
                expected_points: Some(excitation.len()),
            }));

            for chunk in excitation.chunks(self.batch_size) {
                if self.aborted() {
                    break;
                }
                tokio::time::sleep(self.sample_interval * chunk.len() as u32).await;

                let samples: Vec<Sample> = chunk
                    .iter()
                    .enumerate()
                    .map(|(offset, point)| {
                        let current = cell_current(self.method.technique(), point.potential, point.time)
                            + rng.noise(self.noise);
                        let x = match self.method.technique() {
                            Technique::Chronoamperometry { .. } => point.time,
                            _ => point.potential,
                        };
                        Sample::new(sent + offset, x, current, point.potential)
                    })
                    .collect();
                let start_index = sent;
                sent += samples.len();
                if !self.send(ClientEvent::CurveDataAdded {
                    curve: self.curve,
                    start_index,
                    samples,
                }) {
                    return;
                }

                if let Some(limit) = self.faults.lose_connection_after {
                    if sent >= limit {
                        if let Some(state) = self.state.upgrade() {
                            lose_connection(&state, self.connection, "link lost during measurement");
                        }
                        return;
                    }
                }
            }
            self.send(ClientEvent::CurveFinished { curve: self.curve });
        }

        let aborted = self.aborted();
        if let Some(state) = self.state.upgrade() {
            if let Some(c) = lock(&state).connections.get_mut(&self.connection) {
                c.run = None;
            }
        }
        tracing::debug!(
            "Simulated run on #{} ended after {} point(s){}",
            self.connection,
            sent,
            if aborted { " (aborted)" } else { "" }
        );
        self.send(ClientEvent::MeasurementEnded {
            error: aborted.then(|| "aborted".to_string()),
        });
        self.send(ClientEvent::StateChanged(DeviceState::Idle));
    }

    fn aborted(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }

    /// Emit to the connection's handlers; `false` once the connection is gone
    fn send(&self, event: ClientEvent) -> bool {
        match self.state.upgrade() {
            Some(state) => emit(&state, self.connection, event),
            None => false,
        }
    }
}

/// Current response of a simple redox couple, in µA
fn cell_current(technique: &Technique, potential: f64, time: f64) -> f64 {
    const E0: f64 = 0.1;
    const I_LIMIT: f64 = 12.0;
    match technique {
        Technique::Chronoamperometry { .. } => I_LIMIT / (1.0 + time.max(0.01)).sqrt(),
        _ => {
            let faradaic = I_LIMIT / (1.0 + (-(potential - E0) * 38.9).exp());
            faradaic + 0.5 * potential
        }
    }
}

/// Deliver an event to every handler of a connection, outside the lock
fn emit(state: &Mutex<SimState>, connection: u64, event: ClientEvent) -> bool {
    let handlers: Vec<EventHandler> = match lock(state).connections.get(&connection) {
        Some(c) => c.handlers.iter().map(|(_, h)| h.clone()).collect(),
        None => return false,
    };
    for handler in handlers {
        handler(event.clone());
    }
    true
}

fn lose_connection(state: &Mutex<SimState>, connection: u64, reason: &str) {
    tracing::warn!("Simulator dropping #{}: {}", connection, reason);
    emit(
        state,
        connection,
        ClientEvent::Disconnected {
            error: Some(reason.to_string()),
        },
    );
    if let Some(removed) = lock(state).connections.remove(&connection) {
        if let Some(run) = &removed.run {
            run.store(true, Ordering::SeqCst);
        }
        if let Some(task) = &removed.status_task {
            task.abort();
        }
    }
}

fn lock(state: &Mutex<SimState>) -> MutexGuard<'_, SimState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Small xorshift generator for measurement noise
struct XorShift(u64);

impl XorShift {
    fn new(seed: u64) -> Self {
        Self(0x9E37_79B9_7F4A_7C15 ^ seed.wrapping_mul(0x2545_F491_4F6C_DD1D) | 1)
    }

    fn next_f64(&mut self) -> f64 {
        let mut s = self.0;
        s ^= s << 13;
        s ^= s >> 7;
        s ^= s << 17;
        self.0 = s;
        (s as f64) / (u64::MAX as f64)
    }

    /// Uniform noise in `[-amplitude, amplitude]`
    fn noise(&mut self, amplitude: f64) -> f64 {
        (self.next_f64() * 2.0 - 1.0) * amplitude
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MethodConfig;
    use crate::types::Transport;

    fn config() -> SimulatorConfig {
        SimulatorConfig {
            devices: vec![Device::new("SIM-1", "Simulated EmStat", Transport::Usb)],
            discovery_latency_ms: 5,
            connect_latency_ms: 1,
            sample_interval_ms: 1,
            batch_size: 8,
            status_interval_ms: 10,
            noise: 0.0,
        }
    }

    fn collect(sim: &SimulatedInstrument, handle: &ClientHandle) -> (Subscription, Arc<Mutex<Vec<ClientEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let sub = sim.subscribe(
            handle,
            Arc::new(move |event| {
                if !matches!(event, ClientEvent::Status(_)) {
                    sink.lock().unwrap().push(event);
                }
            }),
        );
        (sub, events)
    }

    async fn wait_for_end(events: &Arc<Mutex<Vec<ClientEvent>>>) {
        for _ in 0..500 {
            if events
                .lock()
                .unwrap()
                .iter()
                .any(|e| matches!(e, ClientEvent::StateChanged(DeviceState::Idle)))
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("measurement did not end");
    }

    #[tokio::test]
    async fn test_discovery_respects_timeout() {
        let sim = SimulatedInstrument::new(SimulatorConfig {
            discovery_latency_ms: 200,
            ..config()
        });
        let found = sim.discover_devices(Duration::from_millis(10)).await.unwrap();
        assert!(found.is_empty());

        let sim = SimulatedInstrument::new(config());
        let found = sim.discover_devices(Duration::from_secs(1)).await.unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn test_device_cannot_be_connected_twice() {
        let sim = SimulatedInstrument::new(config());
        let device = config().devices[0].clone();
        let handle = sim.connect(&device).await.unwrap();
        assert!(matches!(
            sim.connect(&device).await,
            Err(SessionError::DeviceBusy(_))
        ));

        sim.disconnect(handle).await.unwrap();
        assert!(!sim.is_connected(&device));
    }

    #[tokio::test]
    async fn test_measurement_event_sequence() {
        let sim = SimulatedInstrument::new(config());
        let device = config().devices[0].clone();
        let handle = sim.connect(&device).await.unwrap();
        let (_sub, events) = collect(&sim, &handle);

        let method = MethodConfig::default().validate().unwrap();
        let ticket = sim.start_measurement(&handle, &method).await.unwrap();
        assert_eq!(ticket.expected_points, 101);
        wait_for_end(&events).await;

        let events = events.lock().unwrap();
        assert_eq!(events[0], ClientEvent::StateChanged(DeviceState::Pretreatment));
        assert_eq!(events[1], ClientEvent::MeasurementStarted);
        assert!(matches!(events[3], ClientEvent::CurveStartReceiving(_)));

        let mut next = 0;
        for event in events.iter() {
            if let ClientEvent::CurveDataAdded { start_index, samples, .. } = event {
                assert_eq!(*start_index, next);
                next += samples.len();
            }
        }
        assert_eq!(next, 101);

        let tail: Vec<&str> = events.iter().rev().take(3).map(ClientEvent::name).collect();
        assert_eq!(tail, vec!["StateChanged", "MeasurementEnded", "CurveFinished"]);
        assert!(events.contains(&ClientEvent::MeasurementEnded { error: None }));
    }

    #[tokio::test]
    async fn test_abort_ends_measurement_early() {
        let sim = SimulatedInstrument::new(SimulatorConfig {
            sample_interval_ms: 5,
            batch_size: 2,
            ..config()
        });
        let device = config().devices[0].clone();
        let handle = sim.connect(&device).await.unwrap();
        let (_sub, events) = collect(&sim, &handle);

        let method = MethodConfig::default().validate().unwrap();
        sim.start_measurement(&handle, &method).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        sim.abort(&handle).await.unwrap();
        wait_for_end(&events).await;

        let events = events.lock().unwrap();
        assert!(events.contains(&ClientEvent::MeasurementEnded {
            error: Some("aborted".to_string())
        }));
        let received: usize = events
            .iter()
            .filter_map(|e| match e {
                ClientEvent::CurveDataAdded { samples, .. } => Some(samples.len()),
                _ => None,
            })
            .sum();
        assert!(received < 101);
    }

    #[tokio::test]
    async fn test_subscription_release_removes_handler() {
        let sim = SimulatedInstrument::new(config());
        let device = config().devices[0].clone();
        let handle = sim.connect(&device).await.unwrap();
        let (sub, _events) = collect(&sim, &handle);
        assert_eq!(sim.subscriber_count(), 1);
        drop(sub);
        assert_eq!(sim.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_injected_connect_failure() {
        let sim = SimulatedInstrument::new(config()).with_faults(SimulatorFaults {
            fail_connect: true,
            ..Default::default()
        });
        let device = config().devices[0].clone();
        assert!(matches!(
            sim.connect(&device).await,
            Err(SessionError::Transport(_))
        ));
        assert!(!sim.is_connected(&device));
    }

    #[test]
    fn test_noise_is_bounded() {
        let mut rng = XorShift::new(7);
        for _ in 0..1000 {
            let n = rng.noise(0.5);
            assert!((-0.5..=0.5).contains(&n));
        }
    }
}
