//! Notifications published by a measurement session
//!
//! Events are queued while the session holds its state lock, in the order the
//! changes happened, and handed to listeners on the UI thread only.

use crate::config::TechniqueKind;
use crate::session::curve::ProtocolViolation;
use crate::session::measurement::MeasurementOutcome;
use crate::session::state::ConnectionState;
use crate::types::{CurveId, CurveInfo, Device, DeviceState, LogEntry, MeasurementId, Reading, Sample};
use std::sync::Arc;

/// Something observable changed in a session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Connection state moved along the state machine
    StateChanged {
        /// Previous state
        from: ConnectionState,
        /// New state
        to: ConnectionState,
    },
    /// Result of a discovery scan
    DevicesDiscovered(Vec<Device>),
    /// A device is connected and idle
    Connected(Device),
    /// The device is gone (`error` is set for unexpected losses and failed teardowns)
    Disconnected {
        /// Device that was attached
        device: Device,
        /// Failure that accompanied the disconnect
        error: Option<String>,
    },
    /// Instrument-side state report
    DeviceStateChanged(DeviceState),
    /// Idle status reading
    Status(Reading),
    /// A measurement was started by this session
    MeasurementStarted {
        /// Measurement identifier
        id: MeasurementId,
        /// Technique being run
        technique: TechniqueKind,
        /// Points the method is expected to produce
        expected_points: usize,
    },
    /// An abort was requested and awaits confirmation
    AbortRequested {
        /// Measurement being aborted
        id: MeasurementId,
    },
    /// A measurement was finalized
    MeasurementEnded {
        /// Measurement identifier
        id: MeasurementId,
        /// How it ended
        outcome: MeasurementOutcome,
    },
    /// A curve started receiving data
    CurveStarted(CurveInfo),
    /// Samples appended to a curve
    SamplesAdded {
        /// Curve the samples belong to
        curve: CurveId,
        /// Index of the first sample
        start_index: usize,
        /// The samples
        samples: Vec<Sample>,
    },
    /// A curve was closed
    CurveFinished {
        /// Curve that finished
        curve: CurveId,
        /// Final number of samples
        len: usize,
    },
    /// The instrument client broke the event contract
    ProtocolViolation(ProtocolViolation),
    /// User-visible log line
    Log(LogEntry),
}

/// Callback receiving session events on the UI thread
pub type SessionListener = Arc<dyn Fn(&SessionEvent) + Send + Sync>;
