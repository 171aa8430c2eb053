//! Test data builders for simulator and session setups

use echem_session::config::{SessionConfig, SimulatorConfig};
use echem_session::instrument::{SimulatedInstrument, SimulatorFaults};
use echem_session::types::{Device, Transport};

/// Builder for a fast, deterministic simulator
pub struct SimulatorBuilder {
    config: SimulatorConfig,
    faults: SimulatorFaults,
}

impl SimulatorBuilder {
    pub fn new() -> Self {
        Self {
            config: SimulatorConfig {
                devices: vec![
                    Device::new("SIM-A", "Simulated EmStat", Transport::Usb),
                    Device::new("SIM-B", "Simulated Sensit", Transport::Bluetooth),
                ],
                discovery_latency_ms: 5,
                connect_latency_ms: 2,
                sample_interval_ms: 1,
                batch_size: 8,
                status_interval_ms: 0,
                noise: 0.0,
            },
            faults: SimulatorFaults::default(),
        }
    }

    /// Slow the run down so it can be interrupted (~5 ms per point)
    pub fn slow(mut self) -> Self {
        self.config.sample_interval_ms = 5;
        self.config.batch_size = 2;
        self
    }

    pub fn discovery_latency_ms(mut self, ms: u64) -> Self {
        self.config.discovery_latency_ms = ms;
        self
    }

    pub fn status_interval_ms(mut self, ms: u64) -> Self {
        self.config.status_interval_ms = ms;
        self
    }

    pub fn faults(mut self, faults: SimulatorFaults) -> Self {
        self.faults = faults;
        self
    }

    pub fn build(self) -> SimulatedInstrument {
        SimulatedInstrument::new(self.config).with_faults(self.faults)
    }
}

impl Default for SimulatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Session config with short timeouts
pub fn fast_session_config() -> SessionConfig {
    SessionConfig {
        discover_timeout_ms: 500,
        connect_timeout_ms: 500,
        abort_timeout_ms: 1_000,
        ..SessionConfig::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulator_builder() {
        let sim = SimulatorBuilder::new().build();
        assert_eq!(sim.devices().len(), 2);
        assert_eq!(sim.subscriber_count(), 0);
    }
}
