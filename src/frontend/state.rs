//! Action types for the frontend
//!
//! Panels return `AppAction`s instead of touching the session directly; the
//! app applies them in one place after the frame's widgets have been laid out.

use crate::types::Device;

/// Actions that any panel can emit
#[derive(Debug, Clone, PartialEq)]
pub enum AppAction {
    /// Scan for instruments
    Discover,
    /// Pick an entry of the device list
    SelectDevice(usize),
    /// Connect to a device
    Connect(Device),
    /// Close the connection
    Disconnect,
    /// Parse the method form and start measuring
    StartMeasurement,
    /// Abort the running measurement
    Abort,
    /// Drop all log lines
    ClearLog,
    /// Switch between dark and light visuals
    SetDarkMode(bool),
}
