// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

//! Organism runtime state: registers, stacks, pointers, and the
//! thermodynamic accumulators.
//!
//! All accessors enforce the declared arities and stack bounds, so a
//! handler can only fail with the taxonomy faults, never corrupt state.

use serde::{Deserialize, Serialize};

use evochora_shared::coord::Coord;
use evochora_shared::error::FailKind;
use evochora_shared::fault;
use evochora_shared::molecule::Molecule;
use evochora_shared::register::{RegisterBank, RegisterId};
use evochora_shared::OrganismId;

use crate::config::OrganismConfig;
use crate::FaultResult;

/// A register or data-stack slot: either a typed molecule or a coordinate
/// vector.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    Mol(Molecule),
    Vec(Coord),
}

impl Value {
    pub fn as_mol(&self) -> FaultResult<Molecule> {
        match self {
            Value::Mol(m) => Ok(*m),
            Value::Vec(v) => Err(fault!(TypeMismatch; "expected a molecule, found vector {}", v)),
        }
    }

    pub fn as_vec(&self) -> FaultResult<&Coord> {
        match self {
            Value::Vec(v) => Ok(v),
            Value::Mol(m) => Err(fault!(TypeMismatch; "expected a vector, found {:?}", m)),
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Mol(Molecule::DATA_ZERO)
    }
}

/// One call-stack entry, pushed by CALL and consumed by RET.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub return_ip: Coord,
    pub return_dv: Coord,
    /// Absolute coordinate of the CALL site, for failure diagnostics.
    pub call_site: Coord,
    pub saved_fprs: Vec<Value>,
    pub saved_prs: Vec<Value>,
    /// Formal-to-actual register map resolved at call time.
    pub bindings: Vec<RegisterId>,
}

#[derive(Debug)]
pub struct Organism {
    pub id: OrganismId,
    pub parent_id: Option<OrganismId>,
    pub birth_tick: u64,
    pub program_id: String,

    pub ip: Coord,
    pub dv: Coord,
    /// IP and DV captured immediately before operand fetch. These are the
    /// stable identity of "the current instruction" for cost accounting
    /// and binding lookup.
    pub ip_before_fetch: Coord,
    pub dv_before_fetch: Coord,

    pub data_pointers: Vec<Coord>,
    pub active_dp: usize,

    pub drs: Vec<Value>,
    pub prs: Vec<Value>,
    pub fprs: Vec<Value>,
    pub lrs: Vec<Coord>,

    pub data_stack: Vec<Value>,
    pub call_stack: Vec<Frame>,
    pub location_stack: Vec<Coord>,

    /// Energy register. The organism dies when this reaches 0.
    pub er: u64,
    /// Entropy register, saturating at the configured maximum.
    pub sr: u64,
    /// Molecule-marker register, stamped onto cells handed over by FORK.
    pub mr: u32,

    pub instruction_failed: bool,
    pub failure_reason: Option<FailKind>,
    pub failure_detail: Option<String>,
    pub failure_call_stack: Option<Vec<Frame>>,

    layout: OrganismConfig,
}

impl Organism {
    pub fn new(
        id: OrganismId,
        parent_id: Option<OrganismId>,
        birth_tick: u64,
        program_id: String,
        ip: Coord,
        dv: Coord,
        energy: u64,
        layout: &OrganismConfig,
    ) -> Organism {
        let dims = ip.dims();
        Organism {
            id,
            parent_id,
            birth_tick,
            program_id,
            ip_before_fetch: ip.clone(),
            dv_before_fetch: dv.clone(),
            data_pointers: vec![ip.clone(); layout.data_pointers],
            active_dp: 0,
            ip,
            dv,
            drs: vec![Value::default(); layout.data_registers],
            prs: vec![Value::default(); layout.procedure_registers],
            fprs: vec![Value::default(); layout.formal_registers],
            lrs: vec![Coord::origin(dims); layout.location_registers],
            data_stack: Vec::new(),
            call_stack: Vec::new(),
            location_stack: Vec::new(),
            er: energy.min(layout.max_energy),
            sr: 0,
            mr: 0,
            instruction_failed: false,
            failure_reason: None,
            failure_detail: None,
            failure_call_stack: None,
            layout: layout.clone(),
        }
    }

    // ---- registers ----

    pub fn get_register(&self, id: RegisterId) -> FaultResult<Value> {
        let index = id.index as usize;
        match id.bank {
            RegisterBank::Data => self.drs.get(index).cloned(),
            RegisterBank::Procedure => self.prs.get(index).cloned(),
            RegisterBank::Formal => self.fprs.get(index).cloned(),
            RegisterBank::Location => self.lrs.get(index).cloned().map(Value::Vec),
        }
        .ok_or_else(|| fault!(BadRegister; "{:?} is past the declared arity", id))
    }

    pub fn set_register(&mut self, id: RegisterId, value: Value) -> FaultResult<()> {
        let index = id.index as usize;
        let slot = match id.bank {
            RegisterBank::Data => self.drs.get_mut(index),
            RegisterBank::Procedure => self.prs.get_mut(index),
            RegisterBank::Formal => self.fprs.get_mut(index),
            RegisterBank::Location => {
                let coord = value.as_vec()?.clone();
                return match self.lrs.get_mut(index) {
                    Some(slot) => {
                        *slot = coord;
                        Ok(())
                    }
                    None => Err(fault!(BadRegister; "{:?} is past the declared arity", id)),
                };
            }
        };
        match slot {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(fault!(BadRegister; "{:?} is past the declared arity", id)),
        }
    }

    pub fn location_register(&self, index: usize) -> FaultResult<&Coord> {
        self.lrs
            .get(index)
            .ok_or_else(|| fault!(BadRegister; "%LR{} is past the declared arity", index))
    }

    pub fn set_location_register(&mut self, index: usize, coord: Coord) -> FaultResult<()> {
        match self.lrs.get_mut(index) {
            Some(slot) => {
                *slot = coord;
                Ok(())
            }
            None => Err(fault!(BadRegister; "%LR{} is past the declared arity", index)),
        }
    }

    // ---- data pointers ----

    pub fn dp(&self) -> &Coord {
        &self.data_pointers[self.active_dp]
    }

    pub fn set_dp(&mut self, coord: Coord) {
        let index = self.active_dp;
        self.data_pointers[index] = coord;
    }

    pub fn select_dp(&mut self, index: usize) -> FaultResult<()> {
        if index < self.data_pointers.len() {
            self.active_dp = index;
            Ok(())
        } else {
            Err(fault!(BadRegister; "data pointer {} is past the declared arity", index))
        }
    }

    // ---- stacks ----

    pub fn push_data(&mut self, value: Value) -> FaultResult<()> {
        if self.data_stack.len() >= self.layout.data_stack_limit {
            return Err(fault!(StackOverflow; "data stack is at its limit of {}",
                self.layout.data_stack_limit));
        }
        self.data_stack.push(value);
        Ok(())
    }

    pub fn pop_data(&mut self) -> FaultResult<Value> {
        self.data_stack
            .pop()
            .ok_or_else(|| fault!(StackUnderflow; "data stack is empty"))
    }

    pub fn push_frame(&mut self, frame: Frame) -> FaultResult<()> {
        if self.call_stack.len() >= self.layout.call_stack_limit {
            return Err(fault!(StackOverflow; "call stack is at its limit of {}",
                self.layout.call_stack_limit));
        }
        self.call_stack.push(frame);
        Ok(())
    }

    pub fn pop_frame(&mut self) -> FaultResult<Frame> {
        self.call_stack
            .pop()
            .ok_or_else(|| fault!(StackUnderflow; "call stack is empty"))
    }

    pub fn push_location(&mut self, coord: Coord) -> FaultResult<()> {
        if self.location_stack.len() >= self.layout.location_stack_limit {
            return Err(fault!(StackOverflow; "location stack is at its limit of {}",
                self.layout.location_stack_limit));
        }
        self.location_stack.push(coord);
        Ok(())
    }

    pub fn pop_location(&mut self) -> FaultResult<Coord> {
        self.location_stack
            .pop()
            .ok_or_else(|| fault!(StackUnderflow; "location stack is empty"))
    }

    // ---- thermodynamics ----

    /// Deducts a charged cost. Affordability was checked by the pipeline,
    /// so energy cannot underflow; entropy saturates at its maximum.
    pub fn charge(&mut self, energy: u64, entropy: u64) {
        debug_assert!(self.er >= energy);
        self.er -= energy;
        self.sr = (self.sr + entropy).min(self.layout.max_entropy);
    }

    /// Reverts a charge after a write conflict. Energy saturates at the
    /// maximum, entropy at zero.
    pub fn refund(&mut self, energy: u64, entropy: u64) {
        self.er = (self.er + energy).min(self.layout.max_energy);
        self.sr = self.sr.saturating_sub(entropy);
    }

    /// Absorbs harvested energy, saturating at the maximum.
    pub fn absorb(&mut self, energy: u64) {
        self.er = (self.er + energy).min(self.layout.max_energy);
    }

    // ---- failure bookkeeping ----

    /// Clears the failure fields; called when an instruction completes.
    pub fn note_success(&mut self) {
        self.instruction_failed = false;
        self.failure_reason = None;
        self.failure_detail = None;
        self.failure_call_stack = None;
    }

    /// Records a failure without charging a penalty. Used by the tick
    /// engine for write-conflict losers, whose cost is refunded instead.
    pub fn note_failure(&mut self, kind: FailKind, detail: String) {
        self.instruction_failed = true;
        self.failure_reason = Some(kind);
        self.failure_detail = Some(detail);
        self.failure_call_stack = Some(self.call_stack.clone());
    }

    /// Records a failure and deducts the error penalty, capped at the
    /// current ER.
    pub fn apply_failure(&mut self, kind: FailKind, detail: String) {
        self.note_failure(kind, detail);
        self.er = self.er.saturating_sub(self.layout.error_penalty_cost);
    }

    pub fn is_dead(&self) -> bool {
        self.er == 0
    }

    pub fn layout(&self) -> &OrganismConfig {
        &self.layout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_organism() -> Organism {
        let mut layout = OrganismConfig::default();
        layout.data_stack_limit = 2;
        Organism::new(
            1,
            None,
            0,
            "test".into(),
            Coord(vec![0, 0]),
            Coord(vec![1, 0]),
            100,
            &layout,
        )
    }

    #[test]
    fn registers_enforce_arity() {
        let mut org = test_organism();
        let bad = RegisterId::data(200);
        assert_eq!(org.get_register(bad).unwrap_err().kind(), FailKind::BadRegister);
        assert_eq!(
            org.set_register(bad, Value::default()).unwrap_err().kind(),
            FailKind::BadRegister
        );
    }

    #[test]
    fn location_registers_hold_vectors_only() {
        let mut org = test_organism();
        let lr = RegisterId::location(0);
        let err = org
            .set_register(lr, Value::Mol(Molecule::DATA_ZERO))
            .unwrap_err();
        assert_eq!(err.kind(), FailKind::TypeMismatch);

        org.set_register(lr, Value::Vec(Coord(vec![3, 4]))).unwrap();
        assert_eq!(org.get_register(lr).unwrap(), Value::Vec(Coord(vec![3, 4])));
    }

    #[test]
    fn stacks_enforce_bounds() {
        let mut org = test_organism();
        org.push_data(Value::default()).unwrap();
        org.push_data(Value::default()).unwrap();
        assert_eq!(
            org.push_data(Value::default()).unwrap_err().kind(),
            FailKind::StackOverflow
        );
        org.pop_data().unwrap();
        org.pop_data().unwrap();
        assert_eq!(org.pop_data().unwrap_err().kind(), FailKind::StackUnderflow);
    }

    #[test]
    fn energy_saturates_and_penalty_caps_at_zero() {
        let mut org = test_organism();
        org.charge(40, 0);
        assert_eq!(org.er, 60);
        org.refund(1_000_000, 0);
        assert_eq!(org.er, org.layout().max_energy);

        org.er = 3;
        org.apply_failure(FailKind::NotCode, "x".into());
        assert_eq!(org.er, 0);
        assert!(org.is_dead());
        assert!(org.instruction_failed);
        assert_eq!(org.failure_reason, Some(FailKind::NotCode));
    }

    #[test]
    fn entropy_saturates_at_the_maximum() {
        let mut org = test_organism();
        let max = org.layout().max_entropy;
        org.charge(0, max + 50);
        assert_eq!(org.sr, max);
        org.refund(0, max + 50);
        assert_eq!(org.sr, 0);
    }

    #[test]
    fn success_clears_failure_fields() {
        let mut org = test_organism();
        org.apply_failure(FailKind::TypeMismatch, "bad operand".into());
        assert!(org.instruction_failed);
        org.note_success();
        assert!(!org.instruction_failed);
        assert_eq!(org.failure_reason, None);
        assert_eq!(org.failure_call_stack, None);
    }

    #[test]
    fn seeded_energy_clamps_to_the_maximum() {
        let layout = OrganismConfig::default();
        let org = Organism::new(
            1,
            None,
            0,
            "t".into(),
            Coord(vec![0]),
            Coord(vec![1]),
            u64::MAX,
            &layout,
        );
        assert_eq!(org.er, layout.max_energy);
    }
}
