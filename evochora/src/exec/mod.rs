// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

//! Instruction execution.
//!
//! One call to [`execute_instruction`] runs the full per-instruction
//! pipeline for one organism: fetch, decode, binding resolution, cost
//! query, affordability, effect staging, and IP advance. Organism-local
//! state is mutated directly (each organism is owned by exactly one worker
//! during a tick); world writes are staged into an [`EffectSink`] and
//! committed by the tick engine after conflict resolution.

use evochora_shared::coord::Coord;
use evochora_shared::error::InstructionFault;
use evochora_shared::fault;
use evochora_shared::label::LabelHash;
use evochora_shared::molecule::{Molecule, MoleculeKind};
use evochora_shared::opcode::OpcodeId;
use evochora_shared::register::RegisterId;
use evochora_shared::OrganismId;

use crate::config::SimulationConfig;
use crate::isa::{ConflictClass, InstructionRegistry, OpcodeSpec, OperandKind, TargetMode};
use crate::loader::{BindingRegistry, LabelIndex};
use crate::organism::{Organism, Value};
use crate::thermo::{CostContext, CostDelta, TargetCell, ThermodynamicPolicy};
use crate::world::{Cell, World};
use crate::FaultResult;

pub mod arith;
pub mod bitwise;
pub mod cond;
pub mod control;
pub mod environment;
pub mod location;
pub mod organism;
pub mod stack;

/// The semantic function of one opcode.
pub type Handler = fn(&mut ExecCtx<'_>) -> FaultResult<()>;

/// A decoded in-world operand.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operand {
    Register(RegisterId),
    Immediate(Molecule),
    Vector(Coord),
    Label(LabelHash),
}

/// A world write staged during phase B, resolved and committed by the
/// engine in phases C and D. The charged cost rides along so that a
/// conflict loss can be refunded exactly; any ER credit tied to the write
/// (a harvested quantum) is applied only when the write commits, so a
/// dropped write also drops the gain.
#[derive(Clone, Debug)]
pub struct StagedWrite {
    pub org: OrganismId,
    pub conflict: ConflictClass,
    pub coord: Coord,
    pub molecule: Molecule,
    pub owner: OrganismId,
    pub cost: CostDelta,
    pub energy_gain: u64,
}

/// A FORK staged during phase B. The engine materializes the child in
/// phase D and promotes it to the live set on the next tick.
#[derive(Clone, Debug)]
pub struct ForkRequest {
    pub parent: OrganismId,
    pub ip: Coord,
    pub dv: Coord,
    pub energy: u64,
    pub drs: Vec<Value>,
    pub prs: Vec<Value>,
    pub program_id: String,
}

/// Per-worker buffer of world-visible effects.
#[derive(Default)]
pub struct EffectSink {
    pub writes: Vec<StagedWrite>,
    pub forks: Vec<ForkRequest>,
}

impl EffectSink {
    fn mark(&self) -> (usize, usize) {
        (self.writes.len(), self.forks.len())
    }

    /// Discards everything staged since `mark`; used when an instruction
    /// fails after staging.
    fn rollback(&mut self, mark: (usize, usize)) {
        self.writes.truncate(mark.0);
        self.forks.truncate(mark.1);
    }
}

/// Read-only state shared by every worker during phase B.
pub struct Shared<'a> {
    pub world: &'a World,
    pub registry: &'a InstructionRegistry,
    pub policy: &'a dyn ThermodynamicPolicy,
    pub bindings: &'a BindingRegistry,
    pub labels: &'a LabelIndex,
    pub config: &'a SimulationConfig,
    pub tick: u64,
}

/// The resolved target cell of an environment instruction.
#[derive(Clone, Debug)]
pub struct Target {
    pub coord: Coord,
    pub cell: Cell,
}

/// An IP (and optionally DV) override requested by a control instruction.
#[derive(Clone, Debug)]
pub struct Jump {
    pub ip: Coord,
    pub dv: Option<Coord>,
}

/// Everything a handler sees while computing its effect.
pub struct ExecCtx<'a> {
    pub org: &'a mut Organism,
    pub shared: &'a Shared<'a>,
    pub spec: &'a OpcodeSpec,
    pub operands: &'a [Operand],
    /// Binding table of the CALL site, resolved by the pipeline when the
    /// opcode declares `binds`.
    pub binding: Option<&'a [RegisterId]>,
    pub target: Option<Target>,
    pub cost: CostDelta,
    /// Where the IP lands by default after this instruction.
    pub next_ip: Coord,
    pub jump: Option<Jump>,
    pub effects: &'a mut EffectSink,
}

impl ExecCtx<'_> {
    pub fn world(&self) -> &World {
        self.shared.world
    }

    pub fn config(&self) -> &SimulationConfig {
        self.shared.config
    }

    /// Operand `i` as a register id.
    pub fn reg(&self, i: usize) -> FaultResult<RegisterId> {
        match &self.operands[i] {
            Operand::Register(id) => Ok(*id),
            other => Err(fault!(TypeMismatch; "operand {} is {:?}, not a register", i, other)),
        }
    }

    /// Operand `i` as an immediate molecule.
    pub fn imm(&self, i: usize) -> FaultResult<Molecule> {
        match &self.operands[i] {
            Operand::Immediate(m) => Ok(*m),
            other => Err(fault!(TypeMismatch; "operand {} is {:?}, not an immediate", i, other)),
        }
    }

    /// Operand `i` as a label hash.
    pub fn label(&self, i: usize) -> FaultResult<LabelHash> {
        match &self.operands[i] {
            Operand::Label(h) => Ok(*h),
            other => Err(fault!(TypeMismatch; "operand {} is {:?}, not a label", i, other)),
        }
    }

    /// Operand `i` as a vector: either a literal or a vector held in the
    /// named register.
    pub fn vector(&self, i: usize) -> FaultResult<Coord> {
        operand_vector(self.org, &self.operands[i])
    }

    /// Operand `i` as a value: immediates verbatim, registers by read.
    pub fn value(&self, i: usize) -> FaultResult<Value> {
        match &self.operands[i] {
            Operand::Register(id) => self.org.get_register(*id),
            Operand::Immediate(m) => Ok(Value::Mol(*m)),
            Operand::Vector(v) => Ok(Value::Vec(v.clone())),
            Operand::Label(h) => {
                Err(fault!(TypeMismatch; "label operand {:?} cannot be read as a value", h))
            }
        }
    }

    /// The resolved target cell; present whenever the opcode declares a
    /// target mode.
    pub fn target(&self) -> FaultResult<&Target> {
        self.target
            .as_ref()
            .ok_or_else(|| fault!(TypeMismatch; "{} has no target cell", self.spec.name))
    }

    /// Stages a world write attributed to the acting organism, tagged with
    /// the opcode's conflict class and this instruction's cost.
    pub fn stage_write(&mut self, coord: Coord, molecule: Molecule, owner: OrganismId) {
        self.stage_write_with_gain(coord, molecule, owner, 0);
    }

    /// Like [`ExecCtx::stage_write`], carrying an ER credit that the
    /// engine applies only if the write commits.
    pub fn stage_write_with_gain(
        &mut self,
        coord: Coord,
        molecule: Molecule,
        owner: OrganismId,
        energy_gain: u64,
    ) {
        self.effects.writes.push(StagedWrite {
            org: self.org.id,
            conflict: self.spec.conflict,
            coord,
            molecule,
            owner,
            cost: self.cost,
            energy_gain,
        });
    }

    /// Nearest label coordinate for `hash` by Hamming distance, within the
    /// configured tolerance.
    pub fn fuzzy_target(&self, hash: LabelHash) -> FaultResult<Coord> {
        self.shared
            .labels
            .nearest(hash, self.shared.config.fuzzy_jump_tolerance)
            .cloned()
            .ok_or_else(|| {
                fault!(NoLabelMatch; "no label within distance {} of {:?}",
                    self.shared.config.fuzzy_jump_tolerance, hash)
            })
    }
}

fn operand_vector(org: &Organism, operand: &Operand) -> FaultResult<Coord> {
    match operand {
        Operand::Vector(v) => Ok(v.clone()),
        Operand::Register(id) => Ok(org.get_register(*id)?.as_vec()?.clone()),
        other => Err(fault!(TypeMismatch; "{:?} is not a vector operand", other)),
    }
}

/// Runs one instruction for one organism. Never returns an error: failures
/// are recorded on the organism per the failure contract (penalty, failure
/// fields, staged effects discarded, IP advanced past the instruction).
pub fn execute_instruction(org: &mut Organism, shared: &Shared<'_>, sink: &mut EffectSink) {
    org.ip_before_fetch = org.ip.clone();
    org.dv_before_fetch = org.dv.clone();
    let mark = sink.mark();

    match run_pipeline(org, shared, sink) {
        Ok(()) => org.note_success(),
        Err((advance, fault)) => {
            sink.rollback(mark);
            org.apply_failure(fault.kind(), fault.0);
            // The IP still advances by the instruction's natural size so a
            // stuck organism does not spin on the same bad cell. In a
            // BOUNDED world the advance itself can be impossible; the IP
            // then stays put, keeping the in-world invariant.
            if let Ok(next) = shared
                .world
                .offset(&org.ip_before_fetch, &org.dv_before_fetch, advance)
            {
                org.ip = next;
            }
        }
    }
}

type PipelineError = (i32, InstructionFault);

fn err_at(advance: i32) -> impl Fn(InstructionFault) -> PipelineError {
    move |f| (advance, f)
}

fn run_pipeline(
    org: &mut Organism,
    shared: &Shared<'_>,
    sink: &mut EffectSink,
) -> Result<(), PipelineError> {
    let dims = shared.world.dims();

    // 1. Fetch.
    let molecule = shared.world.get(&org.ip_before_fetch).molecule;
    if !molecule.is_code() {
        return Err((1, fault!(NotCode; "{:?} under the IP at {}", molecule, org.ip_before_fetch)));
    }
    let id = OpcodeId::from_value(molecule.value()).ok_or_else(|| {
        (1, fault!(NotCode; "payload {} is outside the opcode range", molecule.value()))
    })?;
    let spec = shared
        .registry
        .get(id)
        .ok_or_else(|| (1, fault!(NotCode; "no instruction registered for {:?}", id)))?;
    let advance = spec.cells(dims);

    // 2. Decode.
    let operands = decode_operands(org, shared, spec).map_err(err_at(advance))?;

    // 3. Resolve bindings (call sites only). The registry is the only
    // source; the artifact is never re-read here.
    let binding = if spec.binds {
        Some(
            shared
                .bindings
                .get(&org.ip_before_fetch)
                .map(Vec::as_slice)
                .ok_or_else(|| {
                    (advance, fault!(BindingMissing; "no binding table at {}", org.ip_before_fetch))
                })?,
        )
    } else {
        None
    };

    // Default advance target. Computed before effects so that a BOUNDED
    // walk-off fails the instruction without committing anything.
    let next_ip = shared
        .world
        .offset(&org.ip_before_fetch, &org.dv_before_fetch, advance)
        .map_err(err_at(advance))?;

    let target = resolve_target(org, shared, spec, &operands).map_err(err_at(advance))?;

    // 4. Cost query, consulted once and never after the effect.
    let cost = shared.policy.cost(&CostContext {
        spec,
        organism_id: org.id,
        organism_energy: org.er,
        target: target.as_ref().map(|t| TargetCell {
            coord: &t.coord,
            molecule: t.cell.molecule,
            owner: t.cell.owner,
        }),
        operands: &operands,
    });

    // 5. Affordability.
    if org.er < cost.energy {
        return Err((
            advance,
            fault!(InsufficientEnergy; "cost {} exceeds energy {}", cost.energy, org.er),
        ));
    }

    // 6. Effect.
    let mut ctx = ExecCtx {
        org: &mut *org,
        shared,
        spec,
        operands: &operands,
        binding,
        target,
        cost,
        next_ip: next_ip.clone(),
        jump: None,
        effects: sink,
    };
    (spec.handler)(&mut ctx).map_err(err_at(advance))?;
    let jump = ctx.jump.take();

    // 7. Commit the charge and advance.
    org.charge(cost.energy, cost.entropy);
    match jump {
        Some(Jump { ip, dv }) => {
            org.ip = ip;
            if let Some(dv) = dv {
                org.dv = dv;
            }
        }
        None => org.ip = next_ip,
    }
    Ok(())
}

fn operand_cell(org: &Organism, shared: &Shared<'_>, step: i32) -> FaultResult<Molecule> {
    let coord = shared
        .world
        .offset(&org.ip_before_fetch, &org.dv_before_fetch, step)?;
    Ok(shared.world.get(&coord).molecule)
}

fn decode_operands(
    org: &Organism,
    shared: &Shared<'_>,
    spec: &OpcodeSpec,
) -> FaultResult<Vec<Operand>> {
    let dims = shared.world.dims();
    let mut operands = Vec::with_capacity(spec.operands.len());
    let mut step = 1;
    for kind in spec.operands {
        match kind {
            OperandKind::Register => {
                let m = operand_cell(org, shared, step)?;
                let id = RegisterId::from_operand(m.value()).ok_or_else(
                    || fault!(BadRegister; "operand cell {:?} is not a register id", m),
                )?;
                operands.push(Operand::Register(id));
                step += 1;
            }
            OperandKind::Immediate => {
                operands.push(Operand::Immediate(operand_cell(org, shared, step)?));
                step += 1;
            }
            OperandKind::VectorLiteral => {
                let mut components = Vec::with_capacity(dims);
                for axis in 0..dims {
                    components.push(operand_cell(org, shared, step + axis as i32)?.value());
                }
                operands.push(Operand::Vector(Coord(components)));
                step += dims as i32;
            }
            OperandKind::LabelHash => {
                let low = operand_cell(org, shared, step)?.value_bits();
                let high = operand_cell(org, shared, step + 1)?.value_bits();
                operands.push(Operand::Label(LabelHash::from_raw(low | (high << 16))));
                step += 2;
            }
        }
    }
    Ok(operands)
}

fn resolve_target(
    org: &Organism,
    shared: &Shared<'_>,
    spec: &OpcodeSpec,
    operands: &[Operand],
) -> FaultResult<Option<Target>> {
    let (base, slot) = match spec.target {
        TargetMode::None => return Ok(None),
        TargetMode::DpRelative(slot) => (org.dp().clone(), slot),
        TargetMode::IpRelative(slot) => (org.ip_before_fetch.clone(), Some(slot)),
    };
    let coord = match slot {
        Some(i) => {
            let delta = operand_vector(org, &operands[i])?;
            if delta.dims() != shared.world.dims() {
                return Err(fault!(TypeMismatch; "vector {} has the wrong dimensionality", delta));
            }
            shared.world.offset(&base, &delta, 1)?
        }
        None => base,
    };
    let cell = shared.world.get(&coord);
    Ok(Some(Target { coord, cell }))
}

/// Reads a DATA payload out of a value, the operand contract of the
/// arithmetic and bitwise families.
pub(crate) fn data_payload(value: &Value) -> FaultResult<i32> {
    let m = value.as_mol()?;
    if m.kind() != MoleculeKind::Data {
        return Err(fault!(TypeMismatch; "{:?} is not a DATA molecule", m));
    }
    Ok(m.value())
}

/// Wraps an i32 into the signed 16-bit payload domain.
pub(crate) fn wrap16(v: i32) -> i32 {
    (v & 0xffff) as u16 as i16 as i32
}

/// A DATA molecule for a wrapped payload.
pub(crate) fn data_molecule(v: i32) -> Molecule {
    Molecule::new(MoleculeKind::Data, wrap16(v), 0).expect("wrapped payload is always in range")
}

#[cfg(test)]
mod tests {
    use quickcheck_macros::quickcheck;

    use super::*;

    #[quickcheck]
    fn wrap16_is_idempotent_and_in_range(v: i32) -> bool {
        let w = wrap16(v);
        (-32768..=32767).contains(&w) && wrap16(w) == w
    }

    #[test]
    fn wrap16_covers_the_signed_domain() {
        assert_eq!(wrap16(32767), 32767);
        assert_eq!(wrap16(32768), -32768);
        assert_eq!(wrap16(-32769), 32767);
        assert_eq!(wrap16(65536), 0);
        assert_eq!(wrap16(-1), -1);
    }

    #[test]
    fn data_molecule_always_packs() {
        assert_eq!(data_molecule(70000).value(), wrap16(70000));
        assert_eq!(data_molecule(-5).value(), -5);
    }
}
