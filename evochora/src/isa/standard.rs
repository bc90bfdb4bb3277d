// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

//! The default instruction set.
//!
//! Structured ids follow the family/operation/variant schema; within an
//! operation, variant 0 takes register operands, variant 1 immediates or
//! literals, variant 2 the data stack. Mutating the low bits of an opcode
//! therefore lands on a semantically adjacent instruction.

use evochora_shared::opcode::OpcodeId;
use lazy_static::lazy_static;

use super::{nop_handler, ConflictClass, InstructionRegistry, OpcodeSpec, OperandKind, TargetMode};
use crate::exec::{arith, bitwise, cond, control, environment, location, organism, stack, Handler};

use self::ConflictClass::{NotApplicable, SelfOnly, WorldWrite};
use self::OperandKind::{Immediate, LabelHash, Register, VectorLiteral};
use self::TargetMode::{DpRelative, IpRelative};

const NONE: &[OperandKind] = &[];
const R: &[OperandKind] = &[Register];
const RR: &[OperandKind] = &[Register, Register];
const RI: &[OperandKind] = &[Register, Immediate];
const RV: &[OperandKind] = &[Register, VectorLiteral];
const I: &[OperandKind] = &[Immediate];
const V: &[OperandKind] = &[VectorLiteral];
const VV: &[OperandKind] = &[VectorLiteral, VectorLiteral];
const L: &[OperandKind] = &[LabelHash];

// Families.
const CORE: u16 = 0;
const ARITH: u16 = 1;
const BITWISE: u16 = 2;
const COND: u16 = 3;
const STACK: u16 = 4;
const CONTROL: u16 = 5;
const ENVIRONMENT: u16 = 6;
const ORGANISM: u16 = 7;
const LOCATION: u16 = 8;

struct Def {
    family: u16,
    operation: u16,
    variant: u16,
    name: &'static str,
    operands: &'static [OperandKind],
    conflict: ConflictClass,
    target: TargetMode,
    binds: bool,
    handler: Handler,
}

fn op(
    family: u16,
    operation: u16,
    variant: u16,
    name: &'static str,
    operands: &'static [OperandKind],
    handler: Handler,
) -> Def {
    Def {
        family,
        operation,
        variant,
        name,
        operands,
        conflict: SelfOnly,
        target: TargetMode::None,
        binds: false,
        handler,
    }
}

impl Def {
    fn conflict(mut self, conflict: ConflictClass) -> Def {
        self.conflict = conflict;
        self
    }

    fn target(mut self, target: TargetMode) -> Def {
        self.target = target;
        self
    }

    fn binds(mut self) -> Def {
        self.binds = true;
        self
    }
}

pub(crate) fn build() -> InstructionRegistry {
    let defs = vec![
        op(CORE, 0, 0, "NOP", NONE, nop_handler),
        // Arithmetic: R/I/S variants per operation.
        op(ARITH, 0, 0, "ADDR", RR, arith::addr),
        op(ARITH, 0, 1, "ADDI", RI, arith::addi),
        op(ARITH, 0, 2, "ADDS", NONE, arith::adds),
        op(ARITH, 1, 0, "SUBR", RR, arith::subr),
        op(ARITH, 1, 1, "SUBI", RI, arith::subi),
        op(ARITH, 1, 2, "SUBS", NONE, arith::subs),
        op(ARITH, 2, 0, "MULR", RR, arith::mulr),
        op(ARITH, 2, 1, "MULI", RI, arith::muli),
        op(ARITH, 2, 2, "MULS", NONE, arith::muls),
        op(ARITH, 3, 0, "DIVR", RR, arith::divr),
        op(ARITH, 3, 1, "DIVI", RI, arith::divi),
        op(ARITH, 3, 2, "DIVS", NONE, arith::divs),
        op(ARITH, 4, 0, "MODR", RR, arith::modr),
        op(ARITH, 4, 1, "MODI", RI, arith::modi),
        op(ARITH, 4, 2, "MODS", NONE, arith::mods),
        // Bitwise.
        op(BITWISE, 0, 0, "ANDR", RR, bitwise::andr),
        op(BITWISE, 0, 1, "ANDI", RI, bitwise::andi),
        op(BITWISE, 0, 2, "ANDS", NONE, bitwise::ands),
        op(BITWISE, 1, 0, "ORR", RR, bitwise::orr),
        op(BITWISE, 1, 1, "ORI", RI, bitwise::ori),
        op(BITWISE, 1, 2, "ORS", NONE, bitwise::ors),
        op(BITWISE, 2, 0, "XORR", RR, bitwise::xorr),
        op(BITWISE, 2, 1, "XORI", RI, bitwise::xori),
        op(BITWISE, 2, 2, "XORS", NONE, bitwise::xors),
        op(BITWISE, 3, 0, "NOTR", R, bitwise::notr),
        op(BITWISE, 3, 2, "NOTS", NONE, bitwise::nots),
        op(BITWISE, 4, 0, "SHLR", RR, bitwise::shlr),
        op(BITWISE, 4, 1, "SHLI", RI, bitwise::shli),
        op(BITWISE, 5, 0, "SHRR", RR, bitwise::shrr),
        op(BITWISE, 5, 1, "SHRI", RI, bitwise::shri),
        // Conditionals: skip the next instruction when false.
        op(COND, 0, 0, "IFEQR", RR, cond::ifeqr),
        op(COND, 0, 1, "IFEQI", RI, cond::ifeqi),
        op(COND, 0, 2, "IFEQS", NONE, cond::ifeqs),
        op(COND, 1, 0, "IFNER", RR, cond::ifner),
        op(COND, 1, 1, "IFNEI", RI, cond::ifnei),
        op(COND, 2, 0, "IFLTR", RR, cond::ifltr),
        op(COND, 2, 1, "IFLTI", RI, cond::iflti),
        op(COND, 3, 0, "IFGTR", RR, cond::ifgtr),
        op(COND, 3, 1, "IFGTI", RI, cond::ifgti),
        op(COND, 4, 1, "IFTYI", RI, cond::iftyi),
        op(COND, 5, 0, "IFMRR", R, cond::ifmrr),
        // Data stack.
        op(STACK, 0, 0, "PUSH", R, stack::push),
        op(STACK, 0, 1, "PUSHI", I, stack::pushi),
        op(STACK, 1, 0, "POP", R, stack::pop),
        op(STACK, 2, 0, "DUP", NONE, stack::dup),
        op(STACK, 3, 0, "SWAP", NONE, stack::swap),
        op(STACK, 4, 0, "DROP", NONE, stack::drop),
        op(STACK, 5, 0, "ROT", NONE, stack::rot),
        // Control.
        op(CONTROL, 0, 0, "JMPR", R, control::jmpr),
        op(CONTROL, 0, 1, "JMPI", L, control::jmpi),
        op(CONTROL, 1, 1, "CALL", L, control::call).binds(),
        op(CONTROL, 2, 0, "RET", NONE, control::ret),
        // Environment.
        op(ENVIRONMENT, 0, 0, "PEEK", RR, environment::read_cell).target(DpRelative(Some(1))),
        op(ENVIRONMENT, 0, 1, "PEEKI", RV, environment::read_cell).target(DpRelative(Some(1))),
        op(ENVIRONMENT, 1, 0, "POKE", RR, environment::poke)
            .conflict(WorldWrite)
            .target(DpRelative(Some(1))),
        op(ENVIRONMENT, 1, 1, "POKEI", RV, environment::poke)
            .conflict(WorldWrite)
            .target(DpRelative(Some(1))),
        op(ENVIRONMENT, 2, 1, "SCAN", RV, environment::read_cell).target(IpRelative(1)),
        op(ENVIRONMENT, 3, 0, "HARVEST", NONE, environment::harvest)
            .conflict(WorldWrite)
            .target(DpRelative(None)),
        op(ENVIRONMENT, 4, 0, "SEEK", R, environment::seek),
        op(ENVIRONMENT, 4, 1, "SEEKI", V, environment::seek),
        op(ENVIRONMENT, 5, 1, "DPSW", I, environment::dpsw),
        op(ENVIRONMENT, 6, 0, "DPLD", R, environment::dpld),
        // Organism.
        op(ORGANISM, 0, 1, "FORK", VV, organism::fork).conflict(NotApplicable),
        op(ORGANISM, 1, 0, "SETDVR", R, organism::setdv),
        op(ORGANISM, 1, 1, "SETDVI", V, organism::setdv),
        op(ORGANISM, 2, 1, "SETMR", I, organism::setmr),
        op(ORGANISM, 3, 0, "GETMR", R, organism::getmr),
        op(ORGANISM, 4, 0, "NRGR", R, organism::nrgr),
        op(ORGANISM, 5, 0, "POSR", R, organism::posr),
        // Location registers and stack.
        op(LOCATION, 0, 1, "LRLD", I, location::lrld),
        op(LOCATION, 1, 1, "LRST", I, location::lrst),
        op(LOCATION, 2, 1, "LPSH", I, location::lpsh),
        op(LOCATION, 3, 1, "LPOP", I, location::lpop),
    ];

    let mut registry = InstructionRegistry::new();
    for def in defs {
        registry.register(OpcodeSpec {
            id: OpcodeId::new(def.family, def.operation, def.variant),
            name: def.name,
            operands: def.operands,
            conflict: def.conflict,
            target: def.target,
            binds: def.binds,
            handler: def.handler,
        });
    }
    registry
}

lazy_static! {
    static ref STANDARD: InstructionRegistry = build();
}

/// The default instruction set. Custom registries are accepted everywhere
/// a registry is; this one is what compiled artifacts target.
pub fn standard_registry() -> &'static InstructionRegistry {
    &STANDARD
}

/// Looks up a standard opcode id by name. Intended for tests and artifact
/// builders; execution dispatch goes by id.
pub fn opcode_by_name(name: &str) -> Option<OpcodeId> {
    STANDARD
        .iter()
        .find(|spec| spec.name == name)
        .map(|spec| spec.id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nop_is_id_zero() {
        assert_eq!(opcode_by_name("NOP"), Some(OpcodeId::NOP));
    }

    #[test]
    fn variants_are_id_neighbors() {
        let addr = opcode_by_name("ADDR").unwrap();
        let addi = opcode_by_name("ADDI").unwrap();
        let adds = opcode_by_name("ADDS").unwrap();
        assert_eq!(addr.raw() + 1, addi.raw());
        assert_eq!(addr.raw() + 2, adds.raw());

        let subr = opcode_by_name("SUBR").unwrap();
        assert_eq!(addr.raw() + evochora_shared::opcode::OPERATION_STRIDE, subr.raw());
    }

    #[test]
    fn names_are_unique() {
        let mut names: Vec<&str> = standard_registry().iter().map(|s| s.name).collect();
        let before = names.len();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), before);
    }
}
