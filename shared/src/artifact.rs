// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

//! The compiler artifact.
//!
//! The artifact is the only thing the runtime consumes from a compiler: a
//! frozen, versioned record of molecule placements, label locations, call
//! binding tables, and initial organism seeds. The runtime never re-parses
//! source-level metadata at execution time.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::coord::{Coord, Topology};
use crate::label::LabelHash;
use crate::register::RegisterId;

/// Artifact wire format version understood by this runtime.
pub const ARTIFACT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub version: u32,
    pub meta: ArtifactMeta,
    pub placements: Vec<Placement>,
    /// Label name to location and precomputed 19-bit hash.
    pub labels: BTreeMap<String, LabelEntry>,
    /// Binding tables keyed by the absolute coordinate of the CALL site.
    pub call_bindings: Vec<CallBinding>,
    pub initial_organisms: Vec<OrganismSeed>,
}

impl Artifact {
    /// An artifact with no placements, for incremental test construction.
    pub fn empty(shape: Vec<i32>, topology: Topology) -> Artifact {
        Artifact {
            version: ARTIFACT_VERSION,
            meta: ArtifactMeta { shape, topology },
            placements: Vec::new(),
            labels: BTreeMap::new(),
            call_bindings: Vec::new(),
            initial_organisms: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMeta {
    pub shape: Vec<i32>,
    pub topology: Topology,
}

/// One placed molecule, as a raw bit pattern. The loader validates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    pub coord: Coord,
    pub molecule: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelEntry {
    pub coord: Coord,
    pub hash: LabelHash,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallBinding {
    pub coord: Coord,
    pub registers: Vec<RegisterId>,
}

/// An organism to seed when the simulation starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganismSeed {
    pub coord: Coord,
    pub dv: Coord,
    pub energy: u64,
    /// Hash of the program this organism was compiled from.
    pub program_id: String,
}
