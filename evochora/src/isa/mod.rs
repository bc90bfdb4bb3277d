// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

//! The instruction-set registry.
//!
//! The registry is a plain table from structured opcode ids to metadata and
//! handler functions. The engine accepts whatever is registered; the
//! default set lives in [`standard`].

use std::fmt;

use ahash::AHashMap;
use evochora_shared::opcode::OpcodeId;

use crate::exec::{ExecCtx, Handler};
use crate::FaultResult;

pub mod standard;

pub use standard::standard_registry;

/// The shape of one in-world operand.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OperandKind {
    /// One cell holding a register id.
    Register,
    /// One cell holding a typed molecule taken verbatim.
    Immediate,
    /// N cells (the world dimensionality) holding vector components.
    VectorLiteral,
    /// Two cells holding a 19-bit label hash: low 16 bits, then high 3.
    LabelHash,
}

impl OperandKind {
    /// Cells this operand occupies in a world of the given dimensionality.
    pub fn cells(self, dims: usize) -> i32 {
        match self {
            OperandKind::Register | OperandKind::Immediate => 1,
            OperandKind::VectorLiteral => dims as i32,
            OperandKind::LabelHash => 2,
        }
    }
}

/// Tells the tick engine whether an instruction's effect writes shared
/// world state, and with it how write conflicts are attributed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConflictClass {
    /// Touches only the acting organism; never enters conflict resolution.
    SelfOnly,
    /// Writes world cells; losing a conflict fails the instruction.
    WorldWrite,
    /// Writes world cells as a side effect (e.g. audit markers); losing a
    /// conflict drops the write without failing the instruction.
    NotApplicable,
}

/// How the instruction addresses its target cell, if it has one. The
/// pipeline resolves the target before the cost query so the policy can
/// price reads and writes by what they touch.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TargetMode {
    None,
    /// Active data pointer plus the vector in the given operand slot; with
    /// no slot, the active data pointer itself.
    DpRelative(Option<usize>),
    /// Instruction pointer plus the vector in the given operand slot.
    IpRelative(usize),
}

/// Static metadata and semantics of one opcode.
pub struct OpcodeSpec {
    pub id: OpcodeId,
    pub name: &'static str,
    pub operands: &'static [OperandKind],
    pub conflict: ConflictClass,
    pub target: TargetMode,
    /// True for call-site opcodes that consume a binding table.
    pub binds: bool,
    pub handler: Handler,
}

impl OpcodeSpec {
    /// Total cells the instruction occupies, opcode cell included. The IP
    /// advances by this many steps along the DV.
    pub fn cells(&self, dims: usize) -> i32 {
        1 + self.operands.iter().map(|op| op.cells(dims)).sum::<i32>()
    }

    /// The family name used by thermodynamic rule patterns like
    /// `"environment.*"`.
    pub fn family_name(&self) -> &'static str {
        family_name(self.id.family())
    }
}

impl fmt::Debug for OpcodeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpcodeSpec")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("operands", &self.operands)
            .field("conflict", &self.conflict)
            .finish()
    }
}

pub fn family_name(family: u16) -> &'static str {
    match family {
        0 => "core",
        1 => "arithmetic",
        2 => "bitwise",
        3 => "conditional",
        4 => "stack",
        5 => "control",
        6 => "environment",
        7 => "organism",
        8 => "location",
        _ => "unassigned",
    }
}

/// The dispatch table. Built once, then read-only; handlers are plain
/// function pointers so the table is `Sync` without locking.
#[derive(Default)]
pub struct InstructionRegistry {
    by_id: AHashMap<OpcodeId, OpcodeSpec>,
}

impl InstructionRegistry {
    pub fn new() -> InstructionRegistry {
        InstructionRegistry::default()
    }

    /// A freshly built copy of the default instruction set, for engines
    /// that own their registry.
    pub fn standard() -> InstructionRegistry {
        standard::build()
    }

    /// Registers an opcode. Ids and names must be unique; registration
    /// happens at startup, so collisions abort.
    pub fn register(&mut self, spec: OpcodeSpec) -> &mut Self {
        assert!(
            !self.by_id.contains_key(&spec.id),
            "duplicate opcode id {:?} ({})",
            spec.id,
            spec.name
        );
        self.by_id.insert(spec.id, spec);
        self
    }

    pub fn get(&self, id: OpcodeId) -> Option<&OpcodeSpec> {
        self.by_id.get(&id)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &OpcodeSpec> {
        self.by_id.values()
    }
}

/// A no-op handler for opcodes whose whole effect is the default IP
/// advance.
pub(crate) fn nop_handler(_ctx: &mut ExecCtx<'_>) -> FaultResult<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instruction_length_depends_on_dimensionality() {
        let registry = standard_registry();
        let fork = registry
            .iter()
            .find(|spec| spec.name == "FORK")
            .expect("FORK registered");
        // Opcode cell + two vector literals.
        assert_eq!(fork.cells(2), 5);
        assert_eq!(fork.cells(3), 7);

        let nop = registry.get(OpcodeId::NOP).unwrap();
        assert_eq!(nop.cells(2), 1);
    }

    #[test]
    fn registry_rejects_duplicate_ids() {
        let result = std::panic::catch_unwind(|| {
            let mut registry = InstructionRegistry::new();
            for _ in 0..2 {
                registry.register(OpcodeSpec {
                    id: OpcodeId::NOP,
                    name: "NOP",
                    operands: &[],
                    conflict: ConflictClass::SelfOnly,
                    target: TargetMode::None,
                    binds: false,
                    handler: nop_handler,
                });
            }
        });
        assert!(result.is_err());
    }
}
