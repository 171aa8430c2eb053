//! # echem-session: measurement sessions for electrochemical instruments
//!
//! Drives a potentiostat through connect, measure and abort while keeping every
//! observable state change on the UI thread. Instrument SDKs raise events on
//! their own threads; the session redirects them through a [`ThreadMarshal`]
//! before they touch session state or reach listeners.
//!
//! ## Architecture
//!
//! - **Marshal**: [`ThreadMarshal`] abstracts "run this on the UI thread";
//!   [`marshal::channel`] provides a crossbeam-backed implementation pumped by
//!   the UI loop, [`InlineMarshal`] one for headless use
//! - **Session**: [`MeasurementSession`] owns the connection state machine and
//!   the running measurement; operations are async and run on tokio
//! - **Instrument**: [`InstrumentClient`] is the only contact with the SDK;
//!   a [`SimulatedInstrument`](instrument::SimulatedInstrument) stands in for
//!   hardware
//! - **Frontend**: eframe/egui with egui_plot for the live curves
//!
//! ## Configuration
//!
//! Application state (last device, last method, preferences) is stored in the
//! platform-appropriate data directory under `dev.echem.session`.
//!
//! ## Example
//!
//! ```ignore
//! use echem_session::{marshal, InstrumentClient, MeasurementSession, SessionConfig};
//! use std::sync::Arc;
//!
//! let (ui, pump) = marshal::channel();
//! let session = MeasurementSession::new(client, Arc::new(ui), SessionConfig::default());
//! let _sub = session.subscribe(|event| println!("{:?}", event));
//!
//! runtime.spawn({
//!     let session = session.clone();
//!     async move { session.discover(std::time::Duration::from_secs(3)).await }
//! });
//! pump.run_for(std::time::Duration::from_secs(4));
//! ```

pub mod app;
pub mod config;
pub mod error;
pub mod frontend;
pub mod instrument;
pub mod marshal;
pub mod session;
pub mod types;

// Re-export commonly used types
pub use app::EchemApp;
pub use config::{AppConfig, AppState, MethodConfig, SessionConfig};
pub use error::{Result, SessionError};
pub use instrument::{ClientEvent, InstrumentClient, Subscription};
pub use marshal::{InlineMarshal, ThreadMarshal, ThreadMarshalExt};
pub use session::{ConnectionState, MeasurementSession, SessionEvent, SessionModel};
pub use types::{Device, LogEntry, Sample};
