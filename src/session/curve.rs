//! Append-only curve storage
//!
//! A [`CurveStream`] collects the samples of one curve in arrival order.
//! Every data notification must start exactly where the stream currently
//! ends; gaps, overlaps and data after the curve finished are reported as
//! [`ProtocolViolation`]s and leave the stream untouched.

use crate::types::{CurveId, CurveInfo, Sample};
use std::fmt;

/// The instrument client broke the curve streaming contract
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolViolation {
    /// A batch did not start at the current end of the stream
    NonContiguous {
        /// Curve concerned
        curve: CurveId,
        /// Index the stream expected next
        expected: usize,
        /// Index the notification started at
        got: usize,
    },
    /// Data arrived after the curve was finalized
    DataAfterFinish {
        /// Curve concerned
        curve: CurveId,
    },
    /// A second finish notification for the same curve
    DuplicateFinish {
        /// Curve concerned
        curve: CurveId,
    },
    /// A notification referenced a curve the session is not receiving
    UnknownCurve {
        /// Curve referenced by the notification
        curve: CurveId,
    },
    /// Curve data or events arrived without a measurement in flight
    NoActiveMeasurement {
        /// Event that arrived
        event: &'static str,
    },
}

impl fmt::Display for ProtocolViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolViolation::NonContiguous {
                curve,
                expected,
                got,
            } => write!(
                f,
                "{}: data starts at index {} but stream length is {}",
                curve, got, expected
            ),
            ProtocolViolation::DataAfterFinish { curve } => {
                write!(f, "{}: data received after curve finished", curve)
            }
            ProtocolViolation::DuplicateFinish { curve } => {
                write!(f, "{}: finished more than once", curve)
            }
            ProtocolViolation::UnknownCurve { curve } => {
                write!(f, "{}: not the curve being received", curve)
            }
            ProtocolViolation::NoActiveMeasurement { event } => {
                write!(f, "{} received with no measurement in flight", event)
            }
        }
    }
}

/// Ordered, growth-only sequence of curve samples
#[derive(Debug, Clone)]
pub struct CurveStream {
    info: CurveInfo,
    samples: Vec<Sample>,
    finished: bool,
}

impl CurveStream {
    /// Start a new, empty stream for a curve
    pub fn new(info: CurveInfo) -> Self {
        let capacity = info.expected_points.unwrap_or(0);
        Self {
            info,
            samples: Vec::with_capacity(capacity),
            finished: false,
        }
    }

    /// Curve metadata
    pub fn info(&self) -> &CurveInfo {
        &self.info
    }

    /// Curve identifier
    pub fn id(&self) -> CurveId {
        self.info.id
    }

    /// Number of samples received
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether no samples have been received
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Whether the stream has been finalized
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// All samples in order
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Append a batch that starts at `start_index`
    ///
    /// `start_index` must equal [`len`](Self::len). The samples are
    /// re-indexed to their position in the stream.
    pub fn ingest(&mut self, start_index: usize, batch: &[Sample]) -> Result<(), ProtocolViolation> {
        if self.finished {
            return Err(ProtocolViolation::DataAfterFinish { curve: self.id() });
        }
        if start_index != self.samples.len() {
            return Err(ProtocolViolation::NonContiguous {
                curve: self.id(),
                expected: self.samples.len(),
                got: start_index,
            });
        }

        self.samples.extend(batch.iter().enumerate().map(|(offset, s)| Sample {
            index: start_index + offset,
            ..*s
        }));
        Ok(())
    }

    /// Mark the stream complete
    ///
    /// Returns `true` the first time only; later calls change nothing.
    pub fn finalize(&mut self) -> bool {
        if self.finished {
            return false;
        }
        self.finished = true;
        true
    }
}
