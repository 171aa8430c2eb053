//! Connection state machine
//!
//! ```text
//! Disconnected ──► Connecting ──► Idle ──► Pretreatment ──► Measuring
//!      ▲               │           ▲ ▲          │               │
//!      │               └───────────┼─┼──────────┘ (ended early) │
//!      │                           │ └──────────────────────────┘
//!      │                           ▼
//!      └──────────────────── Disconnecting ◄── (any connected state)
//! ```
//!
//! A failed connect returns straight to `Disconnected`. Every other
//! transition not listed in [`ConnectionState::can_transition_to`] is refused.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Connection state of a measurement session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ConnectionState {
    /// No device connected
    #[default]
    Disconnected,
    /// Connection in progress
    Connecting,
    /// Connected, no measurement running
    Idle,
    /// Measurement started, pretreatment running
    Pretreatment,
    /// Measurement acquiring data
    Measuring,
    /// Teardown in progress
    Disconnecting,
}

impl ConnectionState {
    /// Whether a device is attached in this state
    pub fn is_connected(&self) -> bool {
        !matches!(self, ConnectionState::Disconnected)
    }

    /// Whether a measurement is in flight in this state
    pub fn is_measuring(&self) -> bool {
        matches!(self, ConnectionState::Pretreatment | ConnectionState::Measuring)
    }

    /// Whether the transition `self -> next` is part of the state machine
    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (*self, next),
            (Disconnected, Connecting)
                | (Connecting, Idle)
                | (Connecting, Disconnected)
                | (Idle, Pretreatment)
                | (Idle, Disconnecting)
                | (Pretreatment, Measuring)
                | (Pretreatment, Idle)
                | (Pretreatment, Disconnecting)
                | (Measuring, Idle)
                | (Measuring, Disconnecting)
                | (Disconnecting, Disconnected)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Idle => write!(f, "Idle"),
            ConnectionState::Pretreatment => write!(f, "Pretreatment"),
            ConnectionState::Measuring => write!(f, "Measuring"),
            ConnectionState::Disconnecting => write!(f, "Disconnecting"),
        }
    }
}

/// A refused state transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    /// State the session was in
    pub from: ConnectionState,
    /// State that was requested
    pub to: ConnectionState,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid state transition {} -> {}", self.from, self.to)
    }
}
