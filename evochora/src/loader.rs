// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

//! The artifact loader.
//!
//! Consumes a compiler artifact, validates it against the configured
//! world, places its molecules, and builds the two frozen lookup tables
//! the runtime consults on the hot path: the call-binding registry and
//! the label index. Bindings are never re-derived at execution time; a
//! missing entry is an instruction failure, not a reason to re-read the
//! artifact.

use std::collections::BTreeMap;

use ahash::AHashMap;
use derive_more::Deref;
use itertools::Itertools;
use log::debug;
use thiserror::Error;

use evochora_shared::artifact::{Artifact, ARTIFACT_VERSION};
use evochora_shared::coord::{Coord, Topology};
use evochora_shared::label::LabelHash;
use evochora_shared::molecule::{self, Molecule};
use evochora_shared::opcode::OpcodeId;
use evochora_shared::register::RegisterId;
use evochora_shared::{OrganismId, UNOWNED};

use crate::config::SimulationConfig;
use crate::isa::InstructionRegistry;
use crate::organism::Organism;
use crate::world::World;

/// Artifact validation failure. The simulation does not start.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ArtifactError {
    #[error("artifact version {0} is not supported (expected {ARTIFACT_VERSION})")]
    UnsupportedVersion(u32),

    #[error("artifact world (shape {shape:?}, {topology:?}) does not match the configured environment")]
    MetaMismatch { shape: Vec<i32>, topology: Topology },

    #[error("invalid placement at {coord}: {reason}")]
    InvalidPlacement { coord: Coord, reason: String },

    #[error("invalid molecule at {coord}: {source}")]
    InvalidMolecule {
        coord: Coord,
        #[source]
        source: molecule::InvalidMolecule,
    },

    #[error("call binding at {0} does not refer to a CALL instruction")]
    BindingRefersToNonCall(Coord),
}

/// Binding tables keyed by the absolute coordinate of the CALL site.
/// Built once at load, read-only afterwards.
#[derive(Debug, Default, Deref)]
pub struct BindingRegistry(AHashMap<Coord, Vec<RegisterId>>);

/// The label index: every placed label hash mapped to its coordinates,
/// ready for Hamming-nearest lookup by fuzzy jumps.
///
/// The index is frozen after load except for one maintenance path: when
/// the tick engine commits a write over a label coordinate, the entry is
/// evicted (single-writer, end of the commit phase).
#[derive(Debug, Default)]
pub struct LabelIndex {
    by_hash: BTreeMap<LabelHash, Vec<Coord>>,
    by_coord: AHashMap<Coord, LabelHash>,
}

impl LabelIndex {
    fn insert(&mut self, hash: LabelHash, coord: Coord) {
        self.by_hash.entry(hash).or_default().push(coord.clone());
        self.by_coord.insert(coord, hash);
    }

    /// Sorts the per-hash coordinate lists; ties between equidistant
    /// labels break by lexicographic coordinate order.
    fn freeze(&mut self) {
        for coords in self.by_hash.values_mut() {
            coords.sort();
        }
    }

    /// The nearest label coordinate by Hamming distance of the hash,
    /// within `tolerance` bits. Distance ties break by lexicographic
    /// coordinate order.
    pub fn nearest(&self, hash: LabelHash, tolerance: u32) -> Option<&Coord> {
        let mut best: Option<(u32, &Coord)> = None;
        for (candidate, coords) in &self.by_hash {
            let distance = candidate.hamming(hash);
            if distance > tolerance {
                continue;
            }
            // Lists are sorted, so the head is the tie-break winner
            // within one hash.
            let coord = &coords[0];
            let better = match best {
                None => true,
                Some((bd, bc)) => (distance, coord) < (bd, bc),
            };
            if better {
                best = Some((distance, coord));
            }
        }
        best.map(|(_, coord)| coord)
    }

    /// Removes the label at `coord`, if any. Called by the engine when a
    /// committed write covers a label cell.
    pub fn evict(&mut self, coord: &Coord) {
        if let Some(hash) = self.by_coord.remove(coord) {
            if let Some(coords) = self.by_hash.get_mut(&hash) {
                coords.retain(|c| c != coord);
                if coords.is_empty() {
                    self.by_hash.remove(&hash);
                }
            }
        }
    }

    pub fn contains_coord(&self, coord: &Coord) -> bool {
        self.by_coord.contains_key(coord)
    }

    pub fn len(&self) -> usize {
        self.by_coord.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_coord.is_empty()
    }
}

/// Everything the engine needs to start ticking.
#[derive(Debug)]
pub struct LoadedSimulation {
    pub world: World,
    pub bindings: BindingRegistry,
    pub labels: LabelIndex,
    pub organisms: Vec<Organism>,
    pub next_id: OrganismId,
}

pub fn load(
    config: &SimulationConfig,
    registry: &InstructionRegistry,
    artifact: &Artifact,
) -> Result<LoadedSimulation, ArtifactError> {
    if artifact.version != ARTIFACT_VERSION {
        return Err(ArtifactError::UnsupportedVersion(artifact.version));
    }
    if artifact.meta.shape != config.environment.shape
        || artifact.meta.topology != config.environment.topology
    {
        return Err(ArtifactError::MetaMismatch {
            shape: artifact.meta.shape.clone(),
            topology: artifact.meta.topology,
        });
    }

    let mut world = World::new(
        config.environment.shape.clone(),
        config.environment.topology,
    );

    if let Some(coord) = artifact
        .placements
        .iter()
        .map(|p| &p.coord)
        .duplicates()
        .next()
    {
        return Err(ArtifactError::InvalidPlacement {
            coord: coord.clone(),
            reason: "placed more than once".into(),
        });
    }

    for placement in &artifact.placements {
        if !world.contains(&placement.coord) {
            return Err(ArtifactError::InvalidPlacement {
                coord: placement.coord.clone(),
                reason: "outside the world".into(),
            });
        }
        let molecule =
            Molecule::try_from_raw(placement.molecule).map_err(|source| {
                ArtifactError::InvalidMolecule {
                    coord: placement.coord.clone(),
                    source,
                }
            })?;
        world.set(&placement.coord, molecule, UNOWNED);
    }

    let mut labels = LabelIndex::default();
    for (name, entry) in &artifact.labels {
        if !world.contains(&entry.coord) {
            return Err(ArtifactError::InvalidPlacement {
                coord: entry.coord.clone(),
                reason: format!("label {:?} is outside the world", name),
            });
        }
        labels.insert(entry.hash, entry.coord.clone());
    }
    labels.freeze();

    let mut bindings = BindingRegistry::default();
    for binding in &artifact.call_bindings {
        if !world.contains(&binding.coord) {
            return Err(ArtifactError::InvalidPlacement {
                coord: binding.coord.clone(),
                reason: "call binding is outside the world".into(),
            });
        }
        let molecule = world.get(&binding.coord).molecule;
        let is_call_site = molecule.is_code()
            && OpcodeId::from_value(molecule.value())
                .and_then(|id| registry.get(id))
                .map_or(false, |spec| spec.binds);
        if !is_call_site {
            return Err(ArtifactError::BindingRefersToNonCall(binding.coord.clone()));
        }
        bindings.0.insert(binding.coord.clone(), binding.registers.clone());
    }

    let mut organisms = Vec::with_capacity(artifact.initial_organisms.len());
    for (index, seed) in artifact.initial_organisms.iter().enumerate() {
        if !world.contains(&seed.coord) {
            return Err(ArtifactError::InvalidPlacement {
                coord: seed.coord.clone(),
                reason: "initial organism is outside the world".into(),
            });
        }
        if seed.dv.dims() != world.dims() || !seed.dv.is_axis_unit() {
            return Err(ArtifactError::InvalidPlacement {
                coord: seed.coord.clone(),
                reason: format!("{} is not a unit direction vector", seed.dv),
            });
        }
        organisms.push(Organism::new(
            index as OrganismId + 1,
            None,
            0,
            seed.program_id.clone(),
            seed.coord.clone(),
            seed.dv.clone(),
            seed.energy,
            &config.organism,
        ));
    }

    debug!(
        "loaded artifact: {} placements, {} labels, {} bindings, {} organisms",
        artifact.placements.len(),
        labels.len(),
        bindings.len(),
        organisms.len()
    );

    let next_id = organisms.len() as OrganismId + 1;
    Ok(LoadedSimulation {
        world,
        bindings,
        labels,
        organisms,
        next_id,
    })
}
