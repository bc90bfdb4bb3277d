// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

//! The thermodynamic policy seam.
//!
//! Every instruction is priced before its effect is computed, and never
//! re-priced afterwards. Policies are pluggable; the data-driven
//! [`universal::UniversalPolicy`] is the concrete one simulations run
//! with, so experiments can change write and read costs per molecule
//! value without recompilation.

use serde::{Deserialize, Serialize};

use evochora_shared::coord::Coord;
use evochora_shared::molecule::Molecule;
use evochora_shared::{OrganismId, UNOWNED};

use crate::exec::Operand;
use crate::isa::OpcodeSpec;

pub mod universal;

/// The price of one instruction: energy drawn from ER, entropy added to
/// SR. Both are integers; fractional rule results truncate toward zero.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct CostDelta {
    pub energy: u64,
    pub entropy: u64,
}

/// How the acting organism relates to the owner of the target cell.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum OwnerRelation {
    Own,
    Foreign,
    Unowned,
}

/// The target cell of an environment access, as seen by the policy.
pub struct TargetCell<'a> {
    pub coord: &'a Coord,
    pub molecule: Molecule,
    pub owner: OrganismId,
}

/// Everything a policy may price by.
pub struct CostContext<'a> {
    pub spec: &'a OpcodeSpec,
    pub organism_id: OrganismId,
    pub organism_energy: u64,
    pub target: Option<TargetCell<'a>>,
    pub operands: &'a [Operand],
}

impl CostContext<'_> {
    /// The owner relation of the target cell, if the instruction has one.
    pub fn relation(&self) -> Option<OwnerRelation> {
        self.target.as_ref().map(|t| {
            if t.owner == UNOWNED {
                OwnerRelation::Unowned
            } else if t.owner == self.organism_id {
                OwnerRelation::Own
            } else {
                OwnerRelation::Foreign
            }
        })
    }
}

pub trait ThermodynamicPolicy: Send + Sync {
    fn cost(&self, ctx: &CostContext<'_>) -> CostDelta;
}

/// A constant-cost policy. Useful as a baseline and in tests.
#[derive(Copy, Clone, Debug, Default)]
pub struct FlatPolicy {
    pub energy: u64,
    pub entropy: u64,
}

impl ThermodynamicPolicy for FlatPolicy {
    fn cost(&self, _ctx: &CostContext<'_>) -> CostDelta {
        CostDelta {
            energy: self.energy,
            entropy: self.entropy,
        }
    }
}
