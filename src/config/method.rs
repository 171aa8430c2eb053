//! Measurement method configuration
//!
//! A method describes one electrochemical technique run: the potential
//! waveform, pretreatment steps and the current-range bounds the instrument
//! may autorange between. The session never interprets a method; it
//! validates the user's input, turns it into a [`MethodDescriptor`] and hands
//! that to the instrument client.
//!
//! # Main Types
//!
//! - [`MethodConfig`] - Serializable technique + pretreatment + current ranges
//! - [`MethodForm`] - The same parameters as raw text, as typed into the UI
//! - [`MethodDescriptor`] - A validated method, ready for the instrument
//!
//! # Validation
//!
//! Validation happens in two stages, both before any transport call:
//!
//! 1. [`MethodForm::parse`] rejects text that is not a number
//!    ([`SessionError::InvalidParameter`]).
//! 2. [`MethodConfig::validate`] rejects numbers that do not describe a
//!    runnable method ([`SessionError::InvalidMethod`]).

use crate::error::{Result, SessionError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Largest absolute potential the instrument can apply, in volts
pub const MAX_POTENTIAL: f64 = 10.0;

/// Upper bound on the number of points a single method may produce
pub const MAX_POINTS: usize = 100_000;

// ==================== Technique ====================

/// Technique selector without parameters (for combo boxes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TechniqueKind {
    /// Linear sweep voltammetry
    #[default]
    LinearSweep,
    /// Cyclic voltammetry
    CyclicVoltammetry,
    /// Chronoamperometry
    Chronoamperometry,
}

impl TechniqueKind {
    /// All selectable techniques
    pub const ALL: [TechniqueKind; 3] = [
        TechniqueKind::LinearSweep,
        TechniqueKind::CyclicVoltammetry,
        TechniqueKind::Chronoamperometry,
    ];
}

impl fmt::Display for TechniqueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TechniqueKind::LinearSweep => write!(f, "Linear Sweep Voltammetry"),
            TechniqueKind::CyclicVoltammetry => write!(f, "Cyclic Voltammetry"),
            TechniqueKind::Chronoamperometry => write!(f, "Chronoamperometry"),
        }
    }
}

/// Technique with its waveform parameters
///
/// Potentials in volts, scan rates in V/s, times in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Technique {
    /// Single sweep from `e_begin` to `e_end`
    LinearSweep {
        e_begin: f64,
        e_end: f64,
        e_step: f64,
        scan_rate: f64,
    },
    /// Sweep begin → vertex1 → vertex2 → begin, repeated `n_scans` times
    CyclicVoltammetry {
        e_begin: f64,
        e_vertex1: f64,
        e_vertex2: f64,
        e_step: f64,
        scan_rate: f64,
        n_scans: u32,
    },
    /// Constant potential, current sampled every `interval_time`
    Chronoamperometry {
        e_dc: f64,
        interval_time: f64,
        run_time: f64,
    },
}

impl Default for Technique {
    fn default() -> Self {
        Technique::LinearSweep {
            e_begin: -0.5,
            e_end: 0.5,
            e_step: 0.01,
            scan_rate: 0.1,
        }
    }
}

impl Technique {
    /// The parameterless selector for this technique
    pub fn kind(&self) -> TechniqueKind {
        match self {
            Technique::LinearSweep { .. } => TechniqueKind::LinearSweep,
            Technique::CyclicVoltammetry { .. } => TechniqueKind::CyclicVoltammetry,
            Technique::Chronoamperometry { .. } => TechniqueKind::Chronoamperometry,
        }
    }

    /// Label of the curve's x axis
    pub fn x_unit(&self) -> &'static str {
        match self {
            Technique::Chronoamperometry { .. } => "Time (s)",
            _ => "Potential (V)",
        }
    }
}

// ==================== Current Range ====================

/// Instrument current ranges
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CurrentRange {
    Na1,
    Na10,
    Na100,
    Ua1,
    Ua10,
    Ua100,
    Ma1,
    Ma10,
}

impl CurrentRange {
    /// All ranges, smallest first
    pub const ALL: [CurrentRange; 8] = [
        CurrentRange::Na1,
        CurrentRange::Na10,
        CurrentRange::Na100,
        CurrentRange::Ua1,
        CurrentRange::Ua10,
        CurrentRange::Ua100,
        CurrentRange::Ma1,
        CurrentRange::Ma10,
    ];

    /// Full-scale current in microamperes
    pub fn full_scale_ua(&self) -> f64 {
        match self {
            CurrentRange::Na1 => 0.001,
            CurrentRange::Na10 => 0.01,
            CurrentRange::Na100 => 0.1,
            CurrentRange::Ua1 => 1.0,
            CurrentRange::Ua10 => 10.0,
            CurrentRange::Ua100 => 100.0,
            CurrentRange::Ma1 => 1_000.0,
            CurrentRange::Ma10 => 10_000.0,
        }
    }

    /// Position in [`CurrentRange::ALL`]
    pub fn index(&self) -> u8 {
        *self as u8
    }
}

impl fmt::Display for CurrentRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CurrentRange::Na1 => "1 nA",
            CurrentRange::Na10 => "10 nA",
            CurrentRange::Na100 => "100 nA",
            CurrentRange::Ua1 => "1 µA",
            CurrentRange::Ua10 => "10 µA",
            CurrentRange::Ua100 => "100 µA",
            CurrentRange::Ma1 => "1 mA",
            CurrentRange::Ma10 => "10 mA",
        };
        write!(f, "{}", label)
    }
}

/// Autoranging bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentRangeBounds {
    /// Smallest range the instrument may switch to
    pub min: CurrentRange,
    /// Largest range the instrument may switch to
    pub max: CurrentRange,
    /// Range at measurement start
    pub start: CurrentRange,
}

impl Default for CurrentRangeBounds {
    fn default() -> Self {
        Self {
            min: CurrentRange::Na100,
            max: CurrentRange::Ma1,
            start: CurrentRange::Ua100,
        }
    }
}

// ==================== Pretreatment ====================

/// Steps run before the technique starts
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pretreatment {
    /// Conditioning potential (V)
    pub conditioning_potential: f64,
    /// Conditioning time (s)
    pub conditioning_time: f64,
    /// Deposition potential (V)
    pub deposition_potential: f64,
    /// Deposition time (s)
    pub deposition_time: f64,
    /// Equilibration time (s)
    pub equilibration_time: f64,
}

impl Default for Pretreatment {
    fn default() -> Self {
        Self {
            conditioning_potential: 0.0,
            conditioning_time: 0.0,
            deposition_potential: 0.0,
            deposition_time: 0.0,
            equilibration_time: 0.0,
        }
    }
}

impl Pretreatment {
    /// Total pretreatment duration in seconds
    pub fn duration(&self) -> f64 {
        self.conditioning_time + self.deposition_time + self.equilibration_time
    }
}

// ==================== Method Config ====================

/// Full method configuration as stored in config files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MethodConfig {
    /// Technique and waveform
    #[serde(default)]
    pub technique: Technique,
    /// Pretreatment steps
    #[serde(default)]
    pub pretreatment: Pretreatment,
    /// Current range bounds
    #[serde(default)]
    pub current_range: CurrentRangeBounds,
}

impl MethodConfig {
    /// Create a method for the given technique with default pretreatment
    pub fn new(technique: Technique) -> Self {
        Self {
            technique,
            ..Default::default()
        }
    }

    /// Check that the method is runnable and build its descriptor
    pub fn validate(&self) -> Result<MethodDescriptor> {
        match self.technique {
            Technique::LinearSweep {
                e_begin,
                e_end,
                e_step,
                scan_rate,
            } => {
                check_potential("e_begin", e_begin)?;
                check_potential("e_end", e_end)?;
                check_positive("e_step", e_step)?;
                check_positive("scan_rate", scan_rate)?;
                if (e_end - e_begin).abs() < e_step {
                    return Err(SessionError::InvalidMethod(
                        "sweep range is smaller than one potential step".to_string(),
                    ));
                }
            }
            Technique::CyclicVoltammetry {
                e_begin,
                e_vertex1,
                e_vertex2,
                e_step,
                scan_rate,
                n_scans,
            } => {
                check_potential("e_begin", e_begin)?;
                check_potential("e_vertex1", e_vertex1)?;
                check_potential("e_vertex2", e_vertex2)?;
                check_positive("e_step", e_step)?;
                check_positive("scan_rate", scan_rate)?;
                if n_scans == 0 {
                    return Err(SessionError::InvalidMethod(
                        "n_scans must be at least 1".to_string(),
                    ));
                }
                if (e_vertex1 - e_vertex2).abs() < e_step {
                    return Err(SessionError::InvalidMethod(
                        "vertex potentials must differ by at least one step".to_string(),
                    ));
                }
            }
            Technique::Chronoamperometry {
                e_dc,
                interval_time,
                run_time,
            } => {
                check_potential("e_dc", e_dc)?;
                check_positive("interval_time", interval_time)?;
                check_positive("run_time", run_time)?;
                if run_time < interval_time {
                    return Err(SessionError::InvalidMethod(
                        "run_time must be at least one interval".to_string(),
                    ));
                }
            }
        }

        let p = &self.pretreatment;
        check_potential("conditioning_potential", p.conditioning_potential)?;
        check_potential("deposition_potential", p.deposition_potential)?;
        check_non_negative("conditioning_time", p.conditioning_time)?;
        check_non_negative("deposition_time", p.deposition_time)?;
        check_non_negative("equilibration_time", p.equilibration_time)?;

        let ranges = &self.current_range;
        if ranges.min > ranges.max {
            return Err(SessionError::InvalidMethod(format!(
                "minimum current range {} exceeds maximum {}",
                ranges.min, ranges.max
            )));
        }
        if ranges.start < ranges.min || ranges.start > ranges.max {
            return Err(SessionError::InvalidMethod(format!(
                "start current range {} is outside {}..{}",
                ranges.start, ranges.min, ranges.max
            )));
        }

        let excitation = build_excitation(&self.technique);
        if excitation.len() > MAX_POINTS {
            return Err(SessionError::InvalidMethod(format!(
                "method would produce {} points (limit {})",
                excitation.len(),
                MAX_POINTS
            )));
        }

        Ok(MethodDescriptor {
            config: self.clone(),
            excitation,
        })
    }
}

fn check_finite(field: &'static str, value: f64) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(SessionError::InvalidMethod(format!("{} must be finite", field)))
    }
}

fn check_potential(field: &'static str, value: f64) -> Result<()> {
    check_finite(field, value)?;
    if value.abs() > MAX_POTENTIAL {
        return Err(SessionError::InvalidMethod(format!(
            "{} = {} V is outside ±{} V",
            field, value, MAX_POTENTIAL
        )));
    }
    Ok(())
}

fn check_positive(field: &'static str, value: f64) -> Result<()> {
    check_finite(field, value)?;
    if value <= 0.0 {
        return Err(SessionError::InvalidMethod(format!("{} must be positive", field)));
    }
    Ok(())
}

fn check_non_negative(field: &'static str, value: f64) -> Result<()> {
    check_finite(field, value)?;
    if value < 0.0 {
        return Err(SessionError::InvalidMethod(format!("{} must not be negative", field)));
    }
    Ok(())
}

// ==================== Method Descriptor ====================

/// One point of the applied waveform
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExcitationPoint {
    /// Seconds since the technique started
    pub time: f64,
    /// Applied potential (V)
    pub potential: f64,
}

/// A validated method, passed through to the instrument client
#[derive(Debug, Clone, PartialEq)]
pub struct MethodDescriptor {
    config: MethodConfig,
    excitation: Vec<ExcitationPoint>,
}

impl MethodDescriptor {
    /// The configuration this descriptor was built from
    pub fn config(&self) -> &MethodConfig {
        &self.config
    }

    /// The technique being run
    pub fn technique(&self) -> &Technique {
        &self.config.technique
    }

    /// Applied waveform, one entry per expected sample
    pub fn excitation(&self) -> &[ExcitationPoint] {
        &self.excitation
    }

    /// Number of samples the technique produces
    pub fn expected_points(&self) -> usize {
        self.excitation.len()
    }

    /// Total pretreatment duration in seconds
    pub fn pretreatment_duration(&self) -> f64 {
        self.config.pretreatment.duration()
    }
}

fn ramp(from: f64, to: f64, step: f64, time: &mut f64, dt: f64, out: &mut Vec<ExcitationPoint>) {
    let n = ((to - from).abs() / step).round() as usize;
    for i in 1..=n {
        *time += dt;
        out.push(ExcitationPoint {
            time: *time,
            potential: from + (to - from) * i as f64 / n as f64,
        });
        if out.len() > MAX_POINTS {
            return;
        }
    }
}

fn build_excitation(technique: &Technique) -> Vec<ExcitationPoint> {
    let mut points = Vec::new();
    match *technique {
        Technique::LinearSweep {
            e_begin,
            e_end,
            e_step,
            scan_rate,
        } => {
            let dt = e_step / scan_rate;
            let mut time = 0.0;
            points.push(ExcitationPoint {
                time,
                potential: e_begin,
            });
            ramp(e_begin, e_end, e_step, &mut time, dt, &mut points);
        }
        Technique::CyclicVoltammetry {
            e_begin,
            e_vertex1,
            e_vertex2,
            e_step,
            scan_rate,
            n_scans,
        } => {
            let dt = e_step / scan_rate;
            let mut time = 0.0;
            points.push(ExcitationPoint {
                time,
                potential: e_begin,
            });
            for _ in 0..n_scans {
                ramp(e_begin, e_vertex1, e_step, &mut time, dt, &mut points);
                ramp(e_vertex1, e_vertex2, e_step, &mut time, dt, &mut points);
                ramp(e_vertex2, e_begin, e_step, &mut time, dt, &mut points);
                if points.len() > MAX_POINTS {
                    break;
                }
            }
        }
        Technique::Chronoamperometry {
            e_dc,
            interval_time,
            run_time,
        } => {
            let n = (run_time / interval_time).floor() as usize;
            for i in 1..=n.min(MAX_POINTS + 1) {
                points.push(ExcitationPoint {
                    time: interval_time * i as f64,
                    potential: e_dc,
                });
            }
        }
    }
    points
}

// ==================== Method Form ====================

/// Method parameters as raw text from UI input fields
///
/// Only the fields used by the selected technique are parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodForm {
    pub technique: TechniqueKind,
    pub e_begin: String,
    pub e_end: String,
    pub e_vertex1: String,
    pub e_vertex2: String,
    pub e_step: String,
    pub scan_rate: String,
    pub n_scans: String,
    pub e_dc: String,
    pub interval_time: String,
    pub run_time: String,
    pub conditioning_potential: String,
    pub conditioning_time: String,
    pub deposition_potential: String,
    pub deposition_time: String,
    pub equilibration_time: String,
    pub current_range: CurrentRangeBounds,
}

impl Default for MethodForm {
    fn default() -> Self {
        Self::from_config(&MethodConfig::default())
    }
}

impl MethodForm {
    /// Prefill the form from an existing configuration
    pub fn from_config(config: &MethodConfig) -> Self {
        let mut form = Self {
            technique: config.technique.kind(),
            e_begin: "-0.5".to_string(),
            e_end: "0.5".to_string(),
            e_vertex1: "0.5".to_string(),
            e_vertex2: "-0.5".to_string(),
            e_step: "0.01".to_string(),
            scan_rate: "0.1".to_string(),
            n_scans: "1".to_string(),
            e_dc: "0.0".to_string(),
            interval_time: "0.1".to_string(),
            run_time: "10".to_string(),
            conditioning_potential: config.pretreatment.conditioning_potential.to_string(),
            conditioning_time: config.pretreatment.conditioning_time.to_string(),
            deposition_potential: config.pretreatment.deposition_potential.to_string(),
            deposition_time: config.pretreatment.deposition_time.to_string(),
            equilibration_time: config.pretreatment.equilibration_time.to_string(),
            current_range: config.current_range,
        };

        match config.technique {
            Technique::LinearSweep {
                e_begin,
                e_end,
                e_step,
                scan_rate,
            } => {
                form.e_begin = e_begin.to_string();
                form.e_end = e_end.to_string();
                form.e_step = e_step.to_string();
                form.scan_rate = scan_rate.to_string();
            }
            Technique::CyclicVoltammetry {
                e_begin,
                e_vertex1,
                e_vertex2,
                e_step,
                scan_rate,
                n_scans,
            } => {
                form.e_begin = e_begin.to_string();
                form.e_vertex1 = e_vertex1.to_string();
                form.e_vertex2 = e_vertex2.to_string();
                form.e_step = e_step.to_string();
                form.scan_rate = scan_rate.to_string();
                form.n_scans = n_scans.to_string();
            }
            Technique::Chronoamperometry {
                e_dc,
                interval_time,
                run_time,
            } => {
                form.e_dc = e_dc.to_string();
                form.interval_time = interval_time.to_string();
                form.run_time = run_time.to_string();
            }
        }
        form
    }

    /// Parse the text fields into a method configuration
    ///
    /// Fails with [`SessionError::InvalidParameter`] naming the first field
    /// that is not a number. Range checks are left to
    /// [`MethodConfig::validate`].
    pub fn parse(&self) -> Result<MethodConfig> {
        let technique = match self.technique {
            TechniqueKind::LinearSweep => Technique::LinearSweep {
                e_begin: parse_f64("e_begin", &self.e_begin)?,
                e_end: parse_f64("e_end", &self.e_end)?,
                e_step: parse_f64("e_step", &self.e_step)?,
                scan_rate: parse_f64("scan_rate", &self.scan_rate)?,
            },
            TechniqueKind::CyclicVoltammetry => Technique::CyclicVoltammetry {
                e_begin: parse_f64("e_begin", &self.e_begin)?,
                e_vertex1: parse_f64("e_vertex1", &self.e_vertex1)?,
                e_vertex2: parse_f64("e_vertex2", &self.e_vertex2)?,
                e_step: parse_f64("e_step", &self.e_step)?,
                scan_rate: parse_f64("scan_rate", &self.scan_rate)?,
                n_scans: parse_u32("n_scans", &self.n_scans)?,
            },
            TechniqueKind::Chronoamperometry => Technique::Chronoamperometry {
                e_dc: parse_f64("e_dc", &self.e_dc)?,
                interval_time: parse_f64("interval_time", &self.interval_time)?,
                run_time: parse_f64("run_time", &self.run_time)?,
            },
        };

        let pretreatment = Pretreatment {
            conditioning_potential: parse_f64(
                "conditioning_potential",
                &self.conditioning_potential,
            )?,
            conditioning_time: parse_f64("conditioning_time", &self.conditioning_time)?,
            deposition_potential: parse_f64("deposition_potential", &self.deposition_potential)?,
            deposition_time: parse_f64("deposition_time", &self.deposition_time)?,
            equilibration_time: parse_f64("equilibration_time", &self.equilibration_time)?,
        };

        Ok(MethodConfig {
            technique,
            pretreatment,
            current_range: self.current_range,
        })
    }
}

/// Parse a decimal number, accepting a comma as decimal separator
fn parse_f64(field: &'static str, text: &str) -> Result<f64> {
    let trimmed = text.trim();
    let normalized = trimmed.replace(',', ".");
    match normalized.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(SessionError::InvalidParameter {
            field,
            value: trimmed.to_string(),
        }),
    }
}

fn parse_u32(field: &'static str, text: &str) -> Result<u32> {
    let trimmed = text.trim();
    trimmed.parse::<u32>().map_err(|_| SessionError::InvalidParameter {
        field,
        value: trimmed.to_string(),
    })
}
