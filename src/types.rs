//! Core data types shared between the session, the instrument boundary and the UI
//!
//! # Main Types
//!
//! - [`Device`] - A discovered instrument (identity + transport descriptor)
//! - [`DeviceState`] - Instrument-side state as reported by the client
//! - [`Reading`] - Idle status reading (potential, current, range)
//! - [`Sample`] - One point of a measured curve
//! - [`CurveInfo`] - Metadata announced when a curve starts streaming
//! - [`LogEntry`] - A user-visible log line

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier for a discovered device
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(pub String);

impl DeviceId {
    /// Create a new device ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the ID as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a device is reached
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transport {
    /// USB (FTDI or native)
    Usb,
    /// Bluetooth Low Energy
    Bluetooth,
    /// Serial port
    Serial {
        /// Port name (e.g., "/dev/ttyUSB0", "COM3")
        port: String,
    },
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Usb => write!(f, "USB"),
            Transport::Bluetooth => write!(f, "BLE"),
            Transport::Serial { port } => write!(f, "Serial ({})", port),
        }
    }
}

/// A discovered instrument
///
/// Immutable once discovered; sessions clone it freely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Unique identifier (serial number or transport address)
    pub id: DeviceId,
    /// Human-readable name
    pub name: String,
    /// Transport descriptor
    pub transport: Transport,
}

impl Device {
    /// Create a new device descriptor
    pub fn new(id: impl Into<String>, name: impl Into<String>, transport: Transport) -> Self {
        Self {
            id: DeviceId::new(id),
            name: name.into(),
            transport,
        }
    }

    /// Get a display-friendly name for this device
    pub fn display_name(&self) -> String {
        format!("{} [{}] ({})", self.name, self.id, self.transport)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Instrument-side state, as raised by the client's state-changed event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DeviceState {
    /// Ready for a new measurement
    #[default]
    Idle,
    /// Running conditioning / deposition / equilibration
    Pretreatment,
    /// Acquiring curve data
    Measurement,
    /// Busy with something the session did not start
    Busy,
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceState::Idle => write!(f, "Idle"),
            DeviceState::Pretreatment => write!(f, "Pretreatment"),
            DeviceState::Measurement => write!(f, "Measurement"),
            DeviceState::Busy => write!(f, "Busy"),
        }
    }
}

/// Idle status reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Cell potential in volts
    pub potential: f64,
    /// Cell current in microamperes
    pub current: f64,
    /// Active current range label index
    pub current_range: u8,
    /// Whether the current is overloaded for the active range
    pub overload: bool,
}

/// One sampled point of a curve
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Position of the sample within its curve
    pub index: usize,
    /// Independent variable (potential in V, or time in s)
    pub x: f64,
    /// Dependent variable (current in µA)
    pub y: f64,
    /// Auxiliary channel (e.g., applied potential during amperometry)
    pub aux: f64,
}

impl Sample {
    /// Create a new sample
    pub fn new(index: usize, x: f64, y: f64, aux: f64) -> Self {
        Self { index, x, y, aux }
    }

    /// Convert to a plot point `[x, y]`
    pub fn as_point(&self) -> [f64; 2] {
        [self.x, self.y]
    }
}

/// Identifier of one curve within an instrument connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CurveId(pub u64);

impl fmt::Display for CurveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "curve#{}", self.0)
    }
}

/// Metadata announced when a curve starts receiving data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurveInfo {
    /// Curve identifier
    pub id: CurveId,
    /// Curve title
    pub title: String,
    /// X axis label with unit
    pub x_unit: String,
    /// Y axis label with unit
    pub y_unit: String,
    /// Number of points the instrument expects to send, if known
    pub expected_points: Option<usize>,
}

/// Identifier of one measurement run within a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MeasurementId(pub u64);

impl fmt::Display for MeasurementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "measurement#{}", self.0)
    }
}

/// Severity of a user-visible log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LogLevel {
    /// Informational
    Info,
    /// Something was rejected or degraded
    Warning,
    /// An operation failed
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warning => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// A user-visible log line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// When the entry was created
    pub timestamp: DateTime<Utc>,
    /// Severity
    pub level: LogLevel,
    /// Message text
    pub message: String,
}

impl LogEntry {
    /// Create an entry stamped with the current time
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
        }
    }

    /// Create an info entry
    pub fn info(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Info, message)
    }

    /// Create a warning entry
    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Warning, message)
    }

    /// Create an error entry
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Error, message)
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] {}",
            self.timestamp.format("%H:%M:%S%.3f"),
            self.level,
            self.message
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_display() {
        let device = Device::new("ES4-1234", "EmStat4", Transport::Serial {
            port: "COM3".to_string(),
        });
        assert_eq!(device.display_name(), "EmStat4 [ES4-1234] (Serial (COM3))");
    }

    #[test]
    fn test_log_entry_display() {
        let entry = LogEntry::warning("Abort already requested");
        let text = entry.to_string();
        assert!(text.contains("[WARN]"));
        assert!(text.ends_with("Abort already requested"));
    }

    #[test]
    fn test_sample_point() {
        let sample = Sample::new(3, -0.2, 1.5, 0.0);
        assert_eq!(sample.as_point(), [-0.2, 1.5]);
    }
}
