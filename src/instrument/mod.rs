//! Instrument client boundary
//!
//! The session consumes the instrument SDK only through the
//! [`InstrumentClient`] trait: discovery, connection, measurement start/abort
//! and an event stream. Events may be raised on any thread; the session is
//! responsible for marshaling them onto the UI thread.
//!
//! # Components
//!
//! - [`InstrumentClient`] - async contract implemented by SDK adapters
//! - [`ClientEvent`] - notifications raised by a connected instrument
//! - [`Subscription`] - scoped event subscription, released on drop
//! - [`SimulatedInstrument`] - in-process instrument for running without
//!   hardware (feature `simulator`)

#[cfg(feature = "simulator")]
pub mod simulated;

#[cfg(feature = "simulator")]
pub use simulated::{SimulatedInstrument, SimulatorFaults};

use crate::config::MethodDescriptor;
use crate::error::Result;
use crate::types::{CurveId, CurveInfo, Device, DeviceState, Reading, Sample};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Handle to an open instrument connection
///
/// Issued by [`InstrumentClient::connect`] and consumed by
/// [`InstrumentClient::disconnect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHandle {
    /// Client-assigned connection number
    pub id: u64,
    /// Device this connection belongs to
    pub device: Device,
}

/// Acknowledgement that the instrument accepted a method
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementTicket {
    /// Title the instrument assigned to the run
    pub title: String,
    /// Number of points the instrument expects to produce
    pub expected_points: usize,
}

/// Notifications raised by a connected instrument
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Instrument-side state changed
    StateChanged(DeviceState),
    /// Idle status reading
    Status(Reading),
    /// A measurement has begun on the instrument
    MeasurementStarted,
    /// A measurement has ended (`error` is set for aborts and failures)
    MeasurementEnded {
        /// Reason the measurement did not complete normally
        error: Option<String>,
    },
    /// A curve is about to stream data
    CurveStartReceiving(CurveInfo),
    /// New samples for a curve
    CurveDataAdded {
        /// Curve the samples belong to
        curve: CurveId,
        /// Index of the first sample in this batch
        start_index: usize,
        /// The samples; `samples.len()` is the notification's count
        samples: Vec<Sample>,
    },
    /// A curve will receive no more data
    CurveFinished {
        /// Curve that finished
        curve: CurveId,
    },
    /// The connection was lost or closed by the instrument
    Disconnected {
        /// Transport error, if the loss was unexpected
        error: Option<String>,
    },
}

impl ClientEvent {
    /// Short name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::StateChanged(_) => "StateChanged",
            ClientEvent::Status(_) => "Status",
            ClientEvent::MeasurementStarted => "MeasurementStarted",
            ClientEvent::MeasurementEnded { .. } => "MeasurementEnded",
            ClientEvent::CurveStartReceiving(_) => "CurveStartReceiving",
            ClientEvent::CurveDataAdded { .. } => "CurveDataAdded",
            ClientEvent::CurveFinished { .. } => "CurveFinished",
            ClientEvent::Disconnected { .. } => "Disconnected",
        }
    }
}

/// Callback receiving instrument events, invoked on arbitrary threads
pub type EventHandler = Arc<dyn Fn(ClientEvent) + Send + Sync>;

/// Scoped subscription
///
/// The release action runs exactly once: on [`Subscription::cancel`] or when
/// the subscription is dropped, whichever comes first.
#[must_use = "dropping a Subscription releases it immediately"]
pub struct Subscription {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Create a subscription that runs `release` when it ends
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// A subscription with nothing to release
    pub fn noop() -> Self {
        Self { release: None }
    }

    /// Release now instead of on drop
    pub fn cancel(mut self) {
        self.release_once();
    }

    /// Whether the release action has not run yet
    pub fn is_active(&self) -> bool {
        self.release.is_some()
    }

    fn release_once(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release_once();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

/// Contract of the external instrument SDK
///
/// Implementations own transports, protocol framing and firmware concerns.
/// All methods may be called from any thread; events are delivered through
/// the handler registered with [`InstrumentClient::subscribe`].
#[async_trait]
pub trait InstrumentClient: Send + Sync {
    /// Scan all transports for instruments
    ///
    /// Returning an empty list is not an error.
    async fn discover_devices(&self, timeout: Duration) -> Result<Vec<Device>>;

    /// Open a connection to a device
    async fn connect(&self, device: &Device) -> Result<ClientHandle>;

    /// Close a connection
    async fn disconnect(&self, handle: ClientHandle) -> Result<()>;

    /// Start running a method
    async fn start_measurement(
        &self,
        handle: &ClientHandle,
        method: &MethodDescriptor,
    ) -> Result<MeasurementTicket>;

    /// Request cancellation of the running measurement
    ///
    /// Completion is signalled separately by [`ClientEvent::MeasurementEnded`].
    async fn abort(&self, handle: &ClientHandle) -> Result<()>;

    /// Register the handler for a connection's events
    fn subscribe(&self, handle: &ClientHandle, handler: EventHandler) -> Subscription;
}
