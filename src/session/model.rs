//! UI-side mirror of a session
//!
//! [`SessionModel`] is what the frontend renders. It is fed exclusively by
//! [`SessionEvent`]s delivered on the UI thread, so it needs no locking and is
//! always consistent with the order in which the session changed.

use crate::config::DEFAULT_LOG_CAPACITY;
use crate::session::events::SessionEvent;
use crate::session::measurement::MeasurementOutcome;
use crate::session::state::ConnectionState;
use crate::types::{CurveId, CurveInfo, Device, DeviceState, LogEntry, MeasurementId, Reading};
use std::collections::VecDeque;

/// Curve as plotted
#[derive(Debug, Clone)]
pub struct PlotCurve {
    /// Curve metadata
    pub info: CurveInfo,
    /// `[x, y]` points in sample order
    pub points: Vec<[f64; 2]>,
    /// Whether the curve has been closed
    pub finished: bool,
}

/// Renderable state of one session
#[derive(Debug, Clone)]
pub struct SessionModel {
    state: ConnectionState,
    devices: Vec<Device>,
    connected: Option<Device>,
    device_state: Option<DeviceState>,
    status: Option<Reading>,
    measurement: Option<MeasurementId>,
    abort_pending: bool,
    last_outcome: Option<MeasurementOutcome>,
    curves: Vec<PlotCurve>,
    violations: usize,
    log: VecDeque<LogEntry>,
    log_capacity: usize,
}

impl Default for SessionModel {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

impl SessionModel {
    /// Create an empty model keeping at most `log_capacity` log lines
    pub fn new(log_capacity: usize) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            devices: Vec::new(),
            connected: None,
            device_state: None,
            status: None,
            measurement: None,
            abort_pending: false,
            last_outcome: None,
            curves: Vec::new(),
            violations: 0,
            log: VecDeque::with_capacity(log_capacity.min(1024)),
            log_capacity: log_capacity.max(1),
        }
    }

    /// Fold one event into the model
    pub fn apply(&mut self, event: &SessionEvent) {
        match event {
            SessionEvent::StateChanged { to, .. } => {
                self.state = *to;
                if *to == ConnectionState::Disconnected {
                    self.connected = None;
                    self.device_state = None;
                    self.status = None;
                }
            }
            SessionEvent::DevicesDiscovered(devices) => {
                self.devices = devices.clone();
            }
            SessionEvent::Connected(device) => {
                self.connected = Some(device.clone());
            }
            SessionEvent::Disconnected { .. } => {
                self.connected = None;
                self.abort_pending = false;
            }
            SessionEvent::DeviceStateChanged(state) => {
                self.device_state = Some(*state);
            }
            SessionEvent::Status(reading) => {
                self.status = Some(*reading);
            }
            SessionEvent::MeasurementStarted { id, .. } => {
                self.measurement = Some(*id);
                self.abort_pending = false;
                self.last_outcome = None;
                self.curves.clear();
            }
            SessionEvent::AbortRequested { id } => {
                if self.measurement == Some(*id) {
                    self.abort_pending = true;
                }
            }
            SessionEvent::MeasurementEnded { id, outcome } => {
                if self.measurement == Some(*id) {
                    self.abort_pending = false;
                    self.last_outcome = Some(outcome.clone());
                }
            }
            SessionEvent::CurveStarted(info) => {
                self.curves.push(PlotCurve {
                    info: info.clone(),
                    points: Vec::with_capacity(info.expected_points.unwrap_or(0)),
                    finished: false,
                });
            }
            SessionEvent::SamplesAdded { curve, samples, .. } => {
                if let Some(plot) = self.curve_mut(*curve) {
                    plot.points.extend(samples.iter().map(|s| s.as_point()));
                }
            }
            SessionEvent::CurveFinished { curve, .. } => {
                if let Some(plot) = self.curve_mut(*curve) {
                    plot.finished = true;
                }
            }
            SessionEvent::ProtocolViolation(_) => {
                self.violations += 1;
            }
            SessionEvent::Log(entry) => self.push_log(entry.clone()),
        }
    }

    /// Append a log line, evicting the oldest beyond capacity
    pub fn push_log(&mut self, entry: LogEntry) {
        while self.log.len() >= self.log_capacity {
            self.log.pop_front();
        }
        self.log.push_back(entry);
    }

    /// Drop all log lines
    pub fn clear_log(&mut self) {
        self.log.clear();
    }

    fn curve_mut(&mut self, id: CurveId) -> Option<&mut PlotCurve> {
        self.curves.iter_mut().rev().find(|c| c.info.id == id)
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Devices found by the last discovery
    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    /// Device currently attached
    pub fn connected_device(&self) -> Option<&Device> {
        self.connected.as_ref()
    }

    /// Last instrument-side state report
    pub fn device_state(&self) -> Option<DeviceState> {
        self.device_state
    }

    /// Last idle status reading
    pub fn status(&self) -> Option<&Reading> {
        self.status.as_ref()
    }

    /// Outcome of the last finished measurement
    pub fn last_outcome(&self) -> Option<&MeasurementOutcome> {
        self.last_outcome.as_ref()
    }

    /// Curves of the current or last measurement
    pub fn curves(&self) -> &[PlotCurve] {
        &self.curves
    }

    /// Number of protocol violations reported
    pub fn violations(&self) -> usize {
        self.violations
    }

    /// Log lines, oldest first
    pub fn log(&self) -> impl DoubleEndedIterator<Item = &LogEntry> + ExactSizeIterator {
        self.log.iter()
    }

    /// Whether a discovery scan may be started
    pub fn can_discover(&self) -> bool {
        self.state == ConnectionState::Disconnected
    }

    /// Whether a connect may be started
    pub fn can_connect(&self) -> bool {
        self.state == ConnectionState::Disconnected && !self.devices.is_empty()
    }

    /// Whether the session can be disconnected
    pub fn can_disconnect(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::Idle | ConnectionState::Pretreatment | ConnectionState::Measuring
        )
    }

    /// Whether a measurement may be started
    pub fn can_measure(&self) -> bool {
        self.state == ConnectionState::Idle
    }

    /// Whether an abort may be requested
    pub fn can_abort(&self) -> bool {
        self.state.is_measuring() && !self.abort_pending
    }

    /// Whether an abort was requested and is not yet confirmed
    pub fn abort_pending(&self) -> bool {
        self.abort_pending
    }
}
