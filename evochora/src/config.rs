// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

//! Simulation-level settings. Changing any of these mid-run is not
//! supported; the engine copies the config at construction.

use anyhow::anyhow;
use serde::Deserialize;

use evochora_shared::coord::Topology;

use crate::thermo::universal::UniversalPolicyConfig;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub environment: EnvironmentConfig,
    pub organism: OrganismConfig,
    pub thermodynamics: UniversalPolicyConfig,
    pub engine: EngineConfig,

    /// Maximum Hamming distance accepted when matching fuzzy-jump hashes.
    pub fuzzy_jump_tolerance: u32,

    /// Seed for any randomized tie-breaks. None exist on the hot path; the
    /// seeded stream is carried through snapshots so that replays agree.
    pub seed: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    pub shape: Vec<i32>,
    pub topology: Topology,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrganismConfig {
    pub max_energy: u64,
    pub max_entropy: u64,
    /// Flat energy price of a failed instruction, capped at the current ER.
    pub error_penalty_cost: u64,
    /// Share of the parent's ER handed to a forked child, in per-mille.
    pub fork_energy_split_permille: u64,

    pub data_registers: usize,
    pub procedure_registers: usize,
    pub formal_registers: usize,
    pub location_registers: usize,
    pub data_pointers: usize,

    pub data_stack_limit: usize,
    pub call_stack_limit: usize,
    pub location_stack_limit: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Size of the tick worker pool, including the dispatching thread.
    pub parallelism: usize,
    /// Emit a snapshot every N-th tick.
    pub sampling_interval: u64,
    /// Every N-th emitted snapshot carries a full cell image; the others
    /// carry only the cells changed since the previous emission.
    pub accumulated_delta_interval: u64,
    /// Dispatch granularity: each worker receives its share of the live
    /// organisms split into this many chunks.
    pub chunk_interval: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            environment: EnvironmentConfig::default(),
            organism: OrganismConfig::default(),
            thermodynamics: UniversalPolicyConfig::default(),
            engine: EngineConfig::default(),
            fuzzy_jump_tolerance: 2,
            seed: 0,
        }
    }
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        EnvironmentConfig {
            shape: vec![100, 100],
            topology: Topology::Torus,
        }
    }
}

impl Default for OrganismConfig {
    fn default() -> Self {
        OrganismConfig {
            max_energy: 100_000,
            max_entropy: 100_000,
            error_penalty_cost: 5,
            fork_energy_split_permille: 500,
            data_registers: 8,
            procedure_registers: 4,
            formal_registers: 4,
            location_registers: 4,
            data_pointers: 2,
            data_stack_limit: 64,
            call_stack_limit: 256,
            location_stack_limit: 32,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            parallelism: 4,
            sampling_interval: 1,
            accumulated_delta_interval: 1,
            chunk_interval: 1,
        }
    }
}

impl SimulationConfig {
    /// Checks the hard bounds of every section before the engine starts.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.environment.shape.is_empty() {
            return Err(anyhow!("environment.shape must have at least one dimension"));
        }
        if self.environment.shape.iter().any(|d| *d < 1) {
            return Err(anyhow!(
                "environment.shape dimensions must be positive, got {:?}",
                self.environment.shape
            ));
        }
        if self.engine.parallelism < 2 {
            return Err(anyhow!(
                "engine.parallelism must be at least 2, got {}",
                self.engine.parallelism
            ));
        }
        if self.engine.sampling_interval < 1 || self.engine.accumulated_delta_interval < 1 {
            return Err(anyhow!("engine intervals must be at least 1"));
        }
        if self.engine.chunk_interval < 1 {
            return Err(anyhow!("engine.chunk_interval must be at least 1"));
        }
        if self.organism.fork_energy_split_permille > 1000 {
            return Err(anyhow!(
                "organism.fork_energy_split_permille must be at most 1000"
            ));
        }
        if self.organism.data_pointers < 1 {
            return Err(anyhow!("organism.data_pointers must be at least 1"));
        }
        Ok(())
    }

    // Builder-style setters for the knobs tests and embedders touch most.

    pub fn shape(&mut self, shape: Vec<i32>) -> &mut Self {
        self.environment.shape = shape;
        self
    }

    pub fn topology(&mut self, topology: Topology) -> &mut Self {
        self.environment.topology = topology;
        self
    }

    pub fn parallelism(&mut self, parallelism: usize) -> &mut Self {
        self.engine.parallelism = parallelism;
        self
    }

    pub fn seed(&mut self, seed: u64) -> &mut Self {
        self.seed = seed;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        SimulationConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_bad_bounds() {
        let mut c = SimulationConfig::default();
        c.parallelism(1);
        assert!(c.validate().is_err());

        let mut c = SimulationConfig::default();
        c.shape(vec![10, 0]);
        assert!(c.validate().is_err());

        let mut c = SimulationConfig::default();
        c.organism.fork_energy_split_permille = 1500;
        assert!(c.validate().is_err());
    }

    #[test]
    fn deserializes_partial_json() {
        let c: SimulationConfig = serde_json::from_str(
            r#"{
                "environment": { "shape": [16, 16], "topology": "BOUNDED" },
                "engine": { "parallelism": 2 }
            }"#,
        )
        .unwrap();
        assert_eq!(c.environment.shape, vec![16, 16]);
        assert_eq!(c.environment.topology, Topology::Bounded);
        assert_eq!(c.engine.parallelism, 2);
        // Untouched sections keep their defaults.
        assert_eq!(c.organism.data_registers, 8);
    }
}
