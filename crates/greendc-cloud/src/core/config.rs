//! Simulation configuration.

use serde::{Deserialize, Serialize};

#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct SimulationConfigRaw {
    /// interval between periodic datacenter processing ticks
    pub scheduling_interval: Option<f64>,
    /// minimum delay enforced for all scheduled events, must be strictly positive
    pub min_event_gap: Option<f64>,
    /// allow the requested MIPS total to exceed the physical MIPS total
    pub oversubscribe: Option<bool>,
    /// hard termination time, zero means unlimited
    pub simulation_limit: Option<f64>,
    /// suppress calls to the placement policy consolidation step
    pub disable_migrations: Option<bool>,
}

/// Represents simulation configuration.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct SimulationConfig {
    /// interval between periodic datacenter processing ticks
    pub scheduling_interval: f64,
    /// minimum delay enforced for all scheduled events, must be strictly positive
    pub min_event_gap: f64,
    /// allow the requested MIPS total to exceed the physical MIPS total
    pub oversubscribe: bool,
    /// hard termination time, zero means unlimited
    pub simulation_limit: f64,
    /// suppress calls to the placement policy consolidation step
    pub disable_migrations: bool,
}

impl SimulationConfig {
    /// Creates simulation config with default parameter values.
    pub fn new() -> Self {
        Self {
            scheduling_interval: 300.,
            min_event_gap: 0.01,
            oversubscribe: true,
            simulation_limit: 0.,
            disable_migrations: false,
        }
    }

    /// Creates simulation config by reading parameter values from .yaml file
    /// (uses default values if some parameters are absent).
    pub fn from_file(file_name: &str) -> Self {
        let data: SimulationConfigRaw = serde_yaml::from_str(
            &std::fs::read_to_string(file_name).unwrap_or_else(|_| panic!("Can't read file {}", file_name)),
        )
        .unwrap_or_else(|_| panic!("Can't parse YAML from file {}", file_name));
        let default = SimulationConfig::new();
        let config = Self {
            scheduling_interval: data.scheduling_interval.unwrap_or(default.scheduling_interval),
            min_event_gap: data.min_event_gap.unwrap_or(default.min_event_gap),
            oversubscribe: data.oversubscribe.unwrap_or(default.oversubscribe),
            simulation_limit: data.simulation_limit.unwrap_or(default.simulation_limit),
            disable_migrations: data.disable_migrations.unwrap_or(default.disable_migrations),
        };
        assert!(config.min_event_gap > 0., "Minimum event gap must be strictly positive");
        assert!(config.scheduling_interval > 0., "Scheduling interval must be strictly positive");
        config
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self::new()
    }
}
