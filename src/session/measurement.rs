//! Measurement lifecycle record
//!
//! A [`Measurement`] is created when the session starts a run and finalized
//! exactly once, when the instrument reports the end (or the connection
//! goes away). After that it is kept read-only until the next run replaces
//! it, so the UI can keep showing the last curve.

use crate::config::{MethodConfig, TechniqueKind};
use crate::session::curve::CurveStream;
use crate::types::{CurveId, CurveInfo, MeasurementId};
use chrono::{DateTime, Utc};
use std::fmt;

/// How a measurement ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MeasurementOutcome {
    /// Ran to completion
    Completed,
    /// Stopped on request
    Aborted,
    /// Stopped by an instrument or transport error
    Failed(String),
}

impl fmt::Display for MeasurementOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeasurementOutcome::Completed => write!(f, "completed"),
            MeasurementOutcome::Aborted => write!(f, "aborted"),
            MeasurementOutcome::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// One measurement run and the curves it produced
#[derive(Debug, Clone)]
pub struct Measurement {
    id: MeasurementId,
    method: MethodConfig,
    expected_points: usize,
    started_at: DateTime<Utc>,
    instrument_started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    outcome: Option<MeasurementOutcome>,
    abort_requested: bool,
    curves: Vec<CurveStream>,
}

impl Measurement {
    pub(crate) fn new(id: MeasurementId, method: MethodConfig, expected_points: usize) -> Self {
        Self {
            id,
            method,
            expected_points,
            started_at: Utc::now(),
            instrument_started_at: None,
            ended_at: None,
            outcome: None,
            abort_requested: false,
            curves: Vec::new(),
        }
    }

    /// Measurement identifier
    pub fn id(&self) -> MeasurementId {
        self.id
    }

    /// Method the measurement runs
    pub fn method(&self) -> &MethodConfig {
        &self.method
    }

    /// Technique the measurement runs
    pub fn technique(&self) -> TechniqueKind {
        self.method.technique.kind()
    }

    /// Points the method is expected to produce
    pub fn expected_points(&self) -> usize {
        self.expected_points
    }

    /// When the session started the measurement
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// When the instrument reported the measurement as started
    pub fn instrument_started_at(&self) -> Option<DateTime<Utc>> {
        self.instrument_started_at
    }

    /// When the measurement was finalized
    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    /// Final outcome, once ended
    pub fn outcome(&self) -> Option<&MeasurementOutcome> {
        self.outcome.as_ref()
    }

    /// Whether the measurement is still in flight
    pub fn is_running(&self) -> bool {
        self.outcome.is_none()
    }

    /// Whether an abort has been requested and not yet confirmed
    pub fn abort_requested(&self) -> bool {
        self.abort_requested
    }

    /// Curves received so far, in start order
    pub fn curves(&self) -> &[CurveStream] {
        &self.curves
    }

    /// Total samples over all curves
    pub fn sample_count(&self) -> usize {
        self.curves.iter().map(CurveStream::len).sum()
    }

    pub(crate) fn mark_instrument_started(&mut self) {
        if self.instrument_started_at.is_none() {
            self.instrument_started_at = Some(Utc::now());
        }
    }

    pub(crate) fn set_abort_requested(&mut self, requested: bool) {
        self.abort_requested = requested;
    }

    /// Open a new curve, closing any curve still receiving
    ///
    /// Returns the curves that had to be closed with their lengths.
    pub(crate) fn open_curve(&mut self, info: CurveInfo) -> Vec<(CurveId, usize)> {
        let closed = self.close_open_curves();
        self.curves.push(CurveStream::new(info));
        closed
    }

    pub(crate) fn curve_mut(&mut self, id: CurveId) -> Option<&mut CurveStream> {
        self.curves.iter_mut().find(|c| c.id() == id)
    }

    /// Finalize the measurement
    ///
    /// Returns the curves that were still open, or `None` if the measurement
    /// had already ended.
    pub(crate) fn finish(&mut self, outcome: MeasurementOutcome) -> Option<Vec<(CurveId, usize)>> {
        if !self.is_running() {
            return None;
        }
        let closed = self.close_open_curves();
        self.outcome = Some(outcome);
        self.ended_at = Some(Utc::now());
        self.abort_requested = false;
        Some(closed)
    }

    fn close_open_curves(&mut self) -> Vec<(CurveId, usize)> {
        self.curves
            .iter_mut()
            .filter_map(|c| c.finalize().then(|| (c.id(), c.len())))
            .collect()
    }
}
