//! Instrument event handling
//!
//! Client events are raised on transport threads. Each one is routed through
//! the marshal exactly once: the first call ([`Hop::Origin`]) either proceeds
//! inline because it is already on the UI thread, or reschedules itself there
//! as [`Hop::Redirected`]. A redirected call never redirects again, so a
//! marshal that resumes on the wrong thread cannot cause an endless loop.

use super::{ConnectionState, MeasurementOutcome, MeasurementSession, ProtocolViolation, SessionEvent};
use crate::instrument::ClientEvent;
use crate::marshal::ThreadMarshalExt;
use crate::types::{DeviceState, LogEntry};
use std::sync::Arc;

/// Where a client event is being handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Hop {
    /// Called directly by the instrument client
    Origin,
    /// Resumed by the marshal
    Redirected,
}

impl MeasurementSession {
    pub(super) fn on_client_event(self: &Arc<Self>, connection: u64, event: ClientEvent, hop: Hop) {
        let event = match hop {
            Hop::Origin => {
                let this = Arc::clone(self);
                let routed = self.marshal.route(event, move |event| {
                    this.on_client_event(connection, event, Hop::Redirected)
                });
                match routed {
                    Some(event) => event,
                    None => return,
                }
            }
            Hop::Redirected => {
                if !self.marshal.is_ui_thread() {
                    tracing::error!(
                        session = %self.name,
                        event = event.name(),
                        "Marshal resumed off the UI thread, handling in place"
                    );
                }
                event
            }
        };

        self.apply_client_event(connection, event);
        self.deliver();
    }

    fn apply_client_event(&self, connection: u64, event: ClientEvent) {
        let released = {
            let mut core = self.core();
            if core.connection_id() != Some(connection) {
                tracing::debug!(
                    session = %self.name,
                    "Ignoring {} from stale connection {}",
                    event.name(),
                    connection
                );
                return;
            }

            match event {
                ClientEvent::StateChanged(device_state) => {
                    if device_state == DeviceState::Measurement
                        && core.state == ConnectionState::Pretreatment
                    {
                        self.transition(&mut core, ConnectionState::Measuring);
                    }
                    self.queue(SessionEvent::DeviceStateChanged(device_state));
                    None
                }
                ClientEvent::Status(reading) => {
                    self.queue(SessionEvent::Status(reading));
                    None
                }
                ClientEvent::MeasurementStarted => {
                    match core.running_measurement() {
                        Some(m) => m.mark_instrument_started(),
                        None => self.violation(ProtocolViolation::NoActiveMeasurement {
                            event: "MeasurementStarted",
                        }),
                    }
                    None
                }
                ClientEvent::CurveStartReceiving(info) => {
                    match core.running_measurement() {
                        Some(m) => {
                            for (curve, len) in m.open_curve(info.clone()) {
                                tracing::warn!(session = %self.name, "{} closed by next curve", curve);
                                self.queue(SessionEvent::CurveFinished { curve, len });
                            }
                            self.queue(SessionEvent::CurveStarted(info));
                            if core.state == ConnectionState::Pretreatment {
                                self.transition(&mut core, ConnectionState::Measuring);
                            }
                        }
                        None => self.violation(ProtocolViolation::NoActiveMeasurement {
                            event: "CurveStartReceiving",
                        }),
                    }
                    None
                }
                ClientEvent::CurveDataAdded {
                    curve,
                    start_index,
                    samples,
                } => {
                    let ingested = match core.running_measurement() {
                        None => Err(ProtocolViolation::NoActiveMeasurement {
                            event: "CurveDataAdded",
                        }),
                        Some(m) => match m.curve_mut(curve) {
                            None => Err(ProtocolViolation::UnknownCurve { curve }),
                            Some(stream) => stream.ingest(start_index, &samples),
                        },
                    };
                    match ingested {
                        Ok(()) => self.queue(SessionEvent::SamplesAdded {
                            curve,
                            start_index,
                            samples,
                        }),
                        Err(violation) => self.violation(violation),
                    }
                    None
                }
                ClientEvent::CurveFinished { curve } => {
                    let finished = match core.running_measurement() {
                        None => Err(ProtocolViolation::NoActiveMeasurement {
                            event: "CurveFinished",
                        }),
                        Some(m) => match m.curve_mut(curve) {
                            None => Err(ProtocolViolation::UnknownCurve { curve }),
                            Some(stream) => {
                                if stream.finalize() {
                                    Ok(stream.len())
                                } else {
                                    Err(ProtocolViolation::DuplicateFinish { curve })
                                }
                            }
                        },
                    };
                    match finished {
                        Ok(len) => self.queue(SessionEvent::CurveFinished { curve, len }),
                        Err(violation) => self.violation(violation),
                    }
                    None
                }
                ClientEvent::MeasurementEnded { error } => {
                    let outcome = match core.running_measurement() {
                        Some(m) if m.abort_requested() => Some(MeasurementOutcome::Aborted),
                        Some(_) => Some(match error {
                            None => MeasurementOutcome::Completed,
                            Some(reason) => MeasurementOutcome::Failed(reason),
                        }),
                        None => None,
                    };
                    match outcome {
                        Some(outcome) => {
                            self.finish_measurement(&mut core, outcome);
                            if core.state.is_measuring() {
                                self.transition(&mut core, ConnectionState::Idle);
                            }
                        }
                        None => self.violation(ProtocolViolation::NoActiveMeasurement {
                            event: "MeasurementEnded",
                        }),
                    }
                    None
                }
                ClientEvent::Disconnected { error } => {
                    if core.state == ConnectionState::Disconnecting {
                        tracing::debug!(session = %self.name, "Instrument confirmed disconnect");
                        None
                    } else {
                        let reason = error.unwrap_or_else(|| "closed by instrument".to_string());
                        self.finish_measurement(
                            &mut core,
                            MeasurementOutcome::Failed(format!("connection lost: {}", reason)),
                        );
                        if core.state != ConnectionState::Connecting {
                            self.transition(&mut core, ConnectionState::Disconnecting);
                        }
                        self.transition(&mut core, ConnectionState::Disconnected);
                        let released = core.device.take();
                        if let Some(active) = &released {
                            self.log(LogEntry::error(format!(
                                "Lost connection to {}: {}",
                                active.device.name, reason
                            )));
                            self.queue(SessionEvent::Disconnected {
                                device: active.device.clone(),
                                error: Some(reason),
                            });
                        }
                        released
                    }
                }
            }
        };
        // Subscription and claim are released outside the state lock
        drop(released);
    }

    fn violation(&self, violation: ProtocolViolation) {
        self.log(LogEntry::warning(format!("Protocol violation: {}", violation)));
        self.queue(SessionEvent::ProtocolViolation(violation));
    }
}
