//! Measurement session
//!
//! A [`MeasurementSession`] drives one instrument connection through the
//! [`ConnectionState`] machine: discovery, connect, measure, abort and
//! disconnect. Operations are async and may be awaited from any thread;
//! instrument events arrive on arbitrary transport threads and are redirected
//! onto the UI thread through the session's [`ThreadMarshal`] before they touch
//! session state.
//!
//! Every state change is recorded as a [`SessionEvent`] while the state lock is
//! held, then handed to listeners on the UI thread in that same order. No lock
//! is held while listeners run, so they may call back into the session.
//!
//! # Components
//!
//! - [`state`] - connection state machine
//! - [`curve`] - append-only curve storage and protocol checks
//! - [`measurement`] - lifecycle record of one run
//! - [`claims`] - device ownership across sessions
//! - [`events`] - notifications published to listeners
//! - [`model`] - UI-side mirror fed by events

pub mod claims;
pub mod curve;
pub mod events;
mod handlers;
pub mod measurement;
pub mod model;
pub mod state;

pub use claims::{DeviceClaim, DeviceClaims};
pub use curve::{CurveStream, ProtocolViolation};
pub use events::{SessionEvent, SessionListener};
pub use measurement::{Measurement, MeasurementOutcome};
pub use model::{PlotCurve, SessionModel};
pub use state::{ConnectionState, InvalidTransition};

use crate::config::{MethodConfig, SessionConfig};
use crate::error::{Result, SessionError};
use crate::instrument::{ClientHandle, EventHandler, InstrumentClient, Subscription};
use crate::marshal::{ThreadMarshal, ThreadMarshalExt};
use crate::types::{Device, LogEntry, LogLevel, MeasurementId};
use crossbeam_channel::{Receiver, Sender};
use handlers::Hop;
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::time::Duration;
use tokio::sync::watch;

/// The device a session is attached to
struct ActiveDevice {
    device: Device,
    /// `None` while connecting
    handle: Option<ClientHandle>,
    subscription: Option<Subscription>,
    _claim: DeviceClaim,
}

#[derive(Default)]
struct SessionCore {
    state: ConnectionState,
    device: Option<ActiveDevice>,
    measurement: Option<Measurement>,
    measurement_seq: u64,
}

impl SessionCore {
    fn connection_id(&self) -> Option<u64> {
        self.device
            .as_ref()
            .and_then(|d| d.handle.as_ref())
            .map(|h| h.id)
    }

    fn handle(&self) -> Option<ClientHandle> {
        self.device.as_ref().and_then(|d| d.handle.clone())
    }

    fn running_measurement(&mut self) -> Option<&mut Measurement> {
        self.measurement.as_mut().filter(|m| m.is_running())
    }
}

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: Vec<(u64, SessionListener)>,
}

/// Builder for [`MeasurementSession`]
pub struct SessionBuilder {
    name: String,
    client: Arc<dyn InstrumentClient>,
    marshal: Arc<dyn ThreadMarshal>,
    config: SessionConfig,
    claims: DeviceClaims,
}

impl SessionBuilder {
    /// Session name used in logs and device claims
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Timeouts and log sizing
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Registry shared with the other sessions of the same client
    pub fn claims(mut self, claims: DeviceClaims) -> Self {
        self.claims = claims;
        self
    }

    /// Build the session
    pub fn build(self) -> Arc<MeasurementSession> {
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Arc::new(MeasurementSession {
            name: self.name,
            client: self.client,
            marshal: self.marshal,
            config: self.config,
            claims: self.claims,
            core: Mutex::new(SessionCore::default()),
            state_tx,
            events_tx,
            events_rx,
            draining: Mutex::new(()),
            listeners: Arc::new(Mutex::new(Listeners::default())),
        })
    }
}

/// One instrument connection and its measurements
pub struct MeasurementSession {
    name: String,
    client: Arc<dyn InstrumentClient>,
    marshal: Arc<dyn ThreadMarshal>,
    config: SessionConfig,
    claims: DeviceClaims,
    core: Mutex<SessionCore>,
    state_tx: watch::Sender<ConnectionState>,
    events_tx: Sender<SessionEvent>,
    events_rx: Receiver<SessionEvent>,
    draining: Mutex<()>,
    listeners: Arc<Mutex<Listeners>>,
}

impl MeasurementSession {
    /// Start building a session around a client and a UI marshal
    pub fn builder(
        client: Arc<dyn InstrumentClient>,
        marshal: Arc<dyn ThreadMarshal>,
    ) -> SessionBuilder {
        SessionBuilder {
            name: "session".to_string(),
            client,
            marshal,
            config: SessionConfig::default(),
            claims: DeviceClaims::new(),
        }
    }

    /// Create a session with its own device claims
    pub fn new(
        client: Arc<dyn InstrumentClient>,
        marshal: Arc<dyn ThreadMarshal>,
        config: SessionConfig,
    ) -> Arc<Self> {
        Self::builder(client, marshal).config(config).build()
    }

    /// Session name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Session configuration
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Current connection state
    pub fn connection_state(&self) -> ConnectionState {
        self.core().state
    }

    /// Device the session is attached to, if any
    pub fn active_device(&self) -> Option<Device> {
        self.core().device.as_ref().map(|d| d.device.clone())
    }

    /// Snapshot of the current or last measurement
    pub fn active_measurement(&self) -> Option<Measurement> {
        self.core().measurement.clone()
    }

    /// Receiver following the connection state
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Register a listener for session events
    ///
    /// Listeners run on the UI thread, in event order, with no session lock
    /// held. The listener is removed when the returned subscription ends.
    pub fn subscribe(
        &self,
        listener: impl Fn(&SessionEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = {
            let mut listeners = lock(&self.listeners);
            listeners.next_id += 1;
            let id = listeners.next_id;
            listeners.entries.push((id, Arc::new(listener)));
            id
        };

        let registry = Arc::downgrade(&self.listeners);
        Subscription::new(move || {
            if let Some(registry) = registry.upgrade() {
                lock(&registry).entries.retain(|(entry, _)| *entry != id);
            }
        })
    }

    /// Scan for devices
    ///
    /// A scan that times out or finds nothing yields an empty list. Transport
    /// failures are logged and returned.
    pub async fn discover(self: &Arc<Self>, timeout: Duration) -> Result<Vec<Device>> {
        tracing::debug!(session = %self.name, "Discovering devices ({:?})", timeout);
        let result =
            match tokio::time::timeout(timeout, self.client.discover_devices(timeout)).await {
                Ok(result) => result,
                Err(_) => {
                    self.log(LogEntry::warning(format!(
                        "Discovery timed out after {} ms",
                        timeout.as_millis()
                    )));
                    Ok(Vec::new())
                }
            };

        match &result {
            Ok(devices) => {
                self.log(LogEntry::info(format!("Found {} device(s)", devices.len())));
                self.queue(SessionEvent::DevicesDiscovered(devices.clone()));
            }
            Err(e) => self.log(LogEntry::error(format!("Discovery failed: {}", e))),
        }
        self.deliver();
        result
    }

    /// Connect to a device
    ///
    /// Only valid while disconnected. The device is claimed for this session
    /// until the connection ends. On failure the session returns to
    /// `Disconnected` and the claim is released.
    pub async fn connect(self: &Arc<Self>, device: &Device) -> Result<()> {
        let admitted = {
            let mut core = self.core();
            if core.state != ConnectionState::Disconnected {
                Err(SessionError::InvalidState {
                    op: "connect",
                    state: core.state,
                })
            } else {
                self.claims.claim(device, &self.name).map(|claim| {
                    core.device = Some(ActiveDevice {
                        device: device.clone(),
                        handle: None,
                        subscription: None,
                        _claim: claim,
                    });
                    self.transition(&mut core, ConnectionState::Connecting);
                })
            }
        };
        if let Err(e) = admitted {
            return Err(self.reject(e));
        }
        self.log(LogEntry::info(format!("Connecting to {}", device.name)));
        self.deliver();

        let timeout = self.config.connect_timeout();
        let connected = match tokio::time::timeout(timeout, self.client.connect(device)).await {
            Ok(result) => result,
            Err(_) => Err(SessionError::Timeout(format!(
                "connecting to {} took longer than {} ms",
                device.name,
                timeout.as_millis()
            ))),
        };

        let handle = match connected {
            Ok(handle) => handle,
            Err(e) => {
                let released = {
                    let mut core = self.core();
                    self.transition(&mut core, ConnectionState::Disconnected);
                    core.device.take()
                };
                drop(released);
                self.log(LogEntry::error(format!(
                    "Failed to connect to {}: {}",
                    device.name, e
                )));
                self.deliver();
                return Err(e);
            }
        };

        let connection = handle.id;
        if let Some(active) = self.core().device.as_mut() {
            active.handle = Some(handle.clone());
        }
        let subscription = self.client.subscribe(&handle, self.event_handler(connection));
        let attached = {
            let mut core = self.core();
            // A lost link may have let another connect take over the session
            if core.state == ConnectionState::Connecting
                && core.connection_id() == Some(connection)
            {
                if let Some(active) = core.device.as_mut() {
                    active.subscription = Some(subscription);
                }
                self.transition(&mut core, ConnectionState::Idle);
                self.queue(SessionEvent::Connected(device.clone()));
                true
            } else {
                false
            }
        };
        if !attached {
            // The instrument dropped the link before the session went idle
            self.deliver();
            return Err(SessionError::Transport(format!(
                "connection to {} lost while connecting",
                device.name
            )));
        }
        self.log(LogEntry::info(format!("Connected to {}", device.display_name())));
        self.deliver();
        Ok(())
    }

    /// Close the connection
    ///
    /// A running measurement is aborted first; if the instrument does not
    /// confirm within the abort timeout the connection is closed anyway. Once
    /// the UI context is gone the confirmation cannot arrive, so the abort is
    /// sent without waiting for it. The
    /// call returns once the UI thread has observed `Disconnected`.
    /// Disconnecting an already disconnected session does nothing.
    pub async fn disconnect(self: &Arc<Self>) -> Result<()> {
        let state = self.connection_state();
        match state {
            ConnectionState::Disconnected => return Ok(()),
            ConnectionState::Connecting | ConnectionState::Disconnecting => {
                return Err(self.reject(SessionError::InvalidState {
                    op: "disconnect",
                    state,
                }));
            }
            ConnectionState::Pretreatment | ConnectionState::Measuring if self.marshal.is_closed() => {
                // Confirmation would be routed through the torn-down UI context
                let handle = self.core().handle();
                if let Some(handle) = handle {
                    if let Err(e) = self.client.abort(&handle).await {
                        tracing::warn!(session = %self.name, "Abort during teardown failed: {}", e);
                    }
                }
                self.log(LogEntry::warning(
                    "UI context closed, closing connection without waiting for abort",
                ));
            }
            ConnectionState::Pretreatment | ConnectionState::Measuring => {
                let confirmed = match self.abort_measurement().await {
                    Ok(true) => true,
                    Ok(false) => self.await_measurement_end().await.is_ok(),
                    Err(_) => false,
                };
                if !confirmed {
                    self.log(LogEntry::warning(
                        "Abort not confirmed by instrument, closing connection anyway",
                    ));
                }
            }
            ConnectionState::Idle => {}
        }

        let teardown = {
            let mut core = self.core();
            match core.state {
                ConnectionState::Disconnected => None,
                ConnectionState::Connecting | ConnectionState::Disconnecting => {
                    Some(Err(SessionError::InvalidState {
                        op: "disconnect",
                        state: core.state,
                    }))
                }
                _ => {
                    self.finish_measurement(&mut core, MeasurementOutcome::Aborted);
                    self.transition(&mut core, ConnectionState::Disconnecting);
                    let subscription = core.device.as_mut().and_then(|d| d.subscription.take());
                    Some(Ok((core.handle(), subscription)))
                }
            }
        };
        let (handle, subscription) = match teardown {
            None => return Ok(()),
            Some(Err(e)) => return Err(self.reject(e)),
            Some(Ok(parts)) => parts,
        };
        drop(subscription);
        self.deliver();

        let result = match handle {
            Some(handle) => self.client.disconnect(handle).await,
            None => Ok(()),
        };

        let released = {
            let mut core = self.core();
            self.transition(&mut core, ConnectionState::Disconnected);
            core.device.take()
        };
        if let Some(active) = &released {
            match &result {
                Ok(()) => self.log(LogEntry::info(format!("Disconnected from {}", active.device.name))),
                Err(e) => self.log(LogEntry::error(format!(
                    "Disconnect from {} failed: {}",
                    active.device.name, e
                ))),
            }
            self.queue(SessionEvent::Disconnected {
                device: active.device.clone(),
                error: result.as_ref().err().map(ToString::to_string),
            });
        }
        drop(released);

        let this = Arc::clone(self);
        if let Err(e) = self.marshal.invoke_awaitable(move || this.drain_events()).await {
            tracing::warn!(session = %self.name, "UI did not observe disconnect: {}", e);
        }
        result
    }

    /// Validate a method and start measuring it
    ///
    /// Only valid while `Idle`. The session enters `Pretreatment` before the
    /// instrument is asked to start; if the instrument refuses, the
    /// measurement is finalized as failed and the session returns to `Idle`.
    pub async fn start_measurement(self: &Arc<Self>, method: &MethodConfig) -> Result<MeasurementId> {
        let descriptor = match method.validate() {
            Ok(descriptor) => descriptor,
            Err(e) => return Err(self.reject(e)),
        };

        let admitted = {
            let mut core = self.core();
            match (core.state, core.handle()) {
                (ConnectionState::Idle, Some(handle)) => {
                    core.measurement_seq += 1;
                    let id = MeasurementId(core.measurement_seq);
                    core.measurement = Some(Measurement::new(
                        id,
                        method.clone(),
                        descriptor.expected_points(),
                    ));
                    self.transition(&mut core, ConnectionState::Pretreatment);
                    self.queue(SessionEvent::MeasurementStarted {
                        id,
                        technique: method.technique.kind(),
                        expected_points: descriptor.expected_points(),
                    });
                    Ok((id, handle))
                }
                (state, _) => Err(SessionError::InvalidState {
                    op: "start a measurement",
                    state,
                }),
            }
        };
        let (id, handle) = match admitted {
            Ok(admitted) => admitted,
            Err(e) => return Err(self.reject(e)),
        };
        self.log(LogEntry::info(format!(
            "Starting {} ({} points)",
            method.technique.kind(),
            descriptor.expected_points()
        )));
        self.deliver();

        match self.client.start_measurement(&handle, &descriptor).await {
            Ok(ticket) => {
                tracing::debug!(session = %self.name, "{} accepted as '{}'", id, ticket.title);
                Ok(id)
            }
            Err(e) => {
                {
                    let mut core = self.core();
                    let current = core.measurement.as_ref().map(Measurement::id) == Some(id);
                    if current {
                        self.finish_measurement(&mut core, MeasurementOutcome::Failed(e.to_string()));
                        if core.state.is_measuring() {
                            self.transition(&mut core, ConnectionState::Idle);
                        }
                    }
                }
                self.log(LogEntry::error(format!("Failed to start measurement: {}", e)));
                self.deliver();
                Err(e)
            }
        }
    }

    /// Request the running measurement to stop
    ///
    /// Returns `Ok(false)` when there is nothing to abort or an abort is
    /// already pending. Otherwise waits until the instrument confirms the
    /// measurement ended and returns `Ok(true)`; the session stays in its
    /// measuring state until then. If no confirmation arrives within the abort
    /// timeout, [`SessionError::Timeout`] is returned and the abort may be
    /// requested again.
    pub async fn abort_measurement(self: &Arc<Self>) -> Result<bool> {
        let requested = {
            let mut core = self.core();
            let handle = core.handle();
            match (core.state.is_measuring(), handle) {
                (true, Some(handle)) => match core.running_measurement() {
                    Some(m) if !m.abort_requested() => {
                        m.set_abort_requested(true);
                        let id = m.id();
                        self.queue(SessionEvent::AbortRequested { id });
                        Some((id, handle))
                    }
                    _ => None,
                },
                _ => None,
            }
        };
        let Some((id, handle)) = requested else {
            tracing::debug!(session = %self.name, "Nothing to abort");
            return Ok(false);
        };
        self.log(LogEntry::info(format!("Abort requested for {}", id)));
        self.deliver();

        if let Err(e) = self.client.abort(&handle).await {
            self.clear_abort_request(id);
            self.log(LogEntry::error(format!("Abort failed: {}", e)));
            self.deliver();
            return Err(e);
        }

        if let Err(e) = self.await_measurement_end().await {
            self.clear_abort_request(id);
            self.log(LogEntry::warning(format!("Abort not confirmed: {}", e)));
            self.deliver();
            return Err(e);
        }
        Ok(true)
    }

    async fn await_measurement_end(&self) -> Result<()> {
        let timeout = self.config.abort_timeout();
        let mut rx = self.state_tx.subscribe();
        let ended = tokio::time::timeout(timeout, rx.wait_for(|s| !s.is_measuring()))
            .await
            .map(|r| r.is_ok());
        match ended {
            Ok(true) => Ok(()),
            Ok(false) => Err(SessionError::Transport("session closed".to_string())),
            Err(_) => Err(SessionError::Timeout(format!(
                "measurement did not end within {} ms",
                timeout.as_millis()
            ))),
        }
    }

    fn clear_abort_request(&self, id: MeasurementId) {
        let mut core = self.core();
        if let Some(m) = core.running_measurement().filter(|m| m.id() == id) {
            m.set_abort_requested(false);
        }
    }

    fn event_handler(self: &Arc<Self>, connection: u64) -> EventHandler {
        let session = Arc::downgrade(self);
        Arc::new(move |event| {
            if let Some(session) = session.upgrade() {
                session.on_client_event(connection, event, Hop::Origin);
            }
        })
    }

    fn core(&self) -> MutexGuard<'_, SessionCore> {
        lock(&self.core)
    }

    /// Move along the state machine, refusing transitions it does not allow
    fn transition(&self, core: &mut SessionCore, to: ConnectionState) -> bool {
        let from = core.state;
        if !from.can_transition_to(to) {
            let refused = InvalidTransition { from, to };
            tracing::error!(session = %self.name, "{}", refused);
            self.queue(SessionEvent::Log(LogEntry::error(refused.to_string())));
            return false;
        }
        core.state = to;
        self.state_tx.send_replace(to);
        tracing::debug!(session = %self.name, "{} -> {}", from, to);
        self.queue(SessionEvent::StateChanged { from, to });
        true
    }

    /// Finalize the running measurement, publishing closed curves and the outcome
    fn finish_measurement(&self, core: &mut SessionCore, outcome: MeasurementOutcome) -> bool {
        let Some(measurement) = core.measurement.as_mut() else {
            return false;
        };
        let id = measurement.id();
        let Some(closed) = measurement.finish(outcome.clone()) else {
            return false;
        };
        for (curve, len) in closed {
            self.queue(SessionEvent::CurveFinished { curve, len });
        }

        let entry = match &outcome {
            MeasurementOutcome::Completed => {
                LogEntry::info(format!("{} completed ({} points)", id, measurement.sample_count()))
            }
            MeasurementOutcome::Aborted => LogEntry::warning(format!("{} aborted", id)),
            MeasurementOutcome::Failed(reason) => {
                LogEntry::error(format!("{} failed: {}", id, reason))
            }
        };
        self.queue(SessionEvent::MeasurementEnded { id, outcome });
        self.log(entry);
        true
    }

    fn queue(&self, event: SessionEvent) {
        // The session owns the receiver, so the channel never disconnects
        let _ = self.events_tx.send(event);
    }

    /// Queue a log line and mirror it to tracing
    fn log(&self, entry: LogEntry) {
        match entry.level {
            LogLevel::Info => tracing::info!(session = %self.name, "{}", entry.message),
            LogLevel::Warning => tracing::warn!(session = %self.name, "{}", entry.message),
            LogLevel::Error => tracing::error!(session = %self.name, "{}", entry.message),
        }
        self.queue(SessionEvent::Log(entry));
    }

    /// Log a refused call and hand the error back
    fn reject(self: &Arc<Self>, error: SessionError) -> SessionError {
        self.log(LogEntry::warning(error.to_string()));
        self.deliver();
        error
    }

    /// Hand queued events to listeners on the UI thread
    fn deliver(self: &Arc<Self>) {
        let this = Arc::clone(self);
        if !self.marshal.invoke_if_required(move || this.drain_events()) {
            self.drain_events();
        }
    }

    fn drain_events(&self) {
        if !self.marshal.is_ui_thread() {
            tracing::error!(
                session = %self.name,
                "Event delivery resumed off the UI thread, {} event(s) left queued",
                self.events_rx.len()
            );
            return;
        }

        loop {
            // A drain already in progress (possibly further up this stack)
            // delivers whatever is queued now
            let guard = match self.draining.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                Err(TryLockError::WouldBlock) => return,
            };
            while let Ok(event) = self.events_rx.try_recv() {
                let listeners: Vec<SessionListener> = lock(&self.listeners)
                    .entries
                    .iter()
                    .map(|(_, l)| Arc::clone(l))
                    .collect();
                for listener in listeners {
                    listener(&event);
                }
            }
            drop(guard);
            if self.events_rx.is_empty() {
                break;
            }
        }
    }
}

impl std::fmt::Debug for MeasurementSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeasurementSession")
            .field("name", &self.name)
            .field("state", &self.connection_state())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
