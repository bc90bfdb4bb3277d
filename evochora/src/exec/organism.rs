// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

//! Organism family: FORK and self-inspection.

use evochora_shared::fault;
use evochora_shared::molecule::VALUE_MAX;

use super::{data_molecule, ExecCtx, ForkRequest};
use crate::organism::Value;
use crate::FaultResult;

/// FORK: spawns a child execution context.
///
/// The child starts at `ip_before_fetch + delta` with the given direction,
/// receives the configured per-mille share of the parent's ER net of the
/// FORK's own charge, and inherits copies of the parent's data and
/// procedure registers. The child's entry cell is stamped with the
/// parent's marker register so the handoff stays auditable; that stamp is
/// a best-effort write (conflict losses drop it without failing the
/// FORK). The engine promotes the child to the live set on the next tick.
pub(crate) fn fork(ctx: &mut ExecCtx<'_>) -> FaultResult<()> {
    let delta = ctx.vector(0)?;
    let dv = ctx.vector(1)?;
    let dims = ctx.world().dims();
    if delta.dims() != dims {
        return Err(fault!(TypeMismatch; "vector {} has the wrong dimensionality", delta));
    }
    if dv.dims() != dims || !dv.is_axis_unit() {
        return Err(fault!(TypeMismatch; "{} is not a unit direction vector", dv));
    }

    let entry = ctx.world().offset(&ctx.org.ip_before_fetch, &delta, 1)?;
    let split = ctx.config().organism.fork_energy_split_permille;
    // The endowment comes out of the balance left after this
    // instruction's charge; affordability guarantees that balance, so the
    // charge committed after the effect cannot underflow.
    let budget = ctx.org.er - ctx.cost.energy;
    let endowment = budget * split / 1000;
    if endowment == 0 {
        return Err(fault!(InsufficientEnergy; "energy split of {}permille of {} leaves the child stillborn",
            split, budget));
    }
    ctx.org.er -= endowment;

    let stamp = ctx
        .world()
        .get(&entry)
        .molecule
        .with_marker(ctx.org.mr)
        .expect("marker register is kept within the field width");
    let owner = ctx.org.id;
    ctx.stage_write(entry.clone(), stamp, owner);

    ctx.effects.forks.push(ForkRequest {
        parent: ctx.org.id,
        ip: entry,
        dv,
        energy: endowment,
        drs: ctx.org.drs.clone(),
        prs: ctx.org.prs.clone(),
        program_id: ctx.org.program_id.clone(),
    });
    Ok(())
}

/// SETDV: replaces the direction vector. Only axis-aligned unit vectors
/// are legal directions.
pub(crate) fn setdv(ctx: &mut ExecCtx<'_>) -> FaultResult<()> {
    let dv = ctx.vector(0)?;
    if dv.dims() != ctx.world().dims() || !dv.is_axis_unit() {
        return Err(fault!(TypeMismatch; "{} is not a unit direction vector", dv));
    }
    ctx.org.dv = dv;
    Ok(())
}

/// SETMR: loads the molecule-marker register from an immediate.
pub(crate) fn setmr(ctx: &mut ExecCtx<'_>) -> FaultResult<()> {
    let value = ctx.imm(0)?.value();
    if !(0..16).contains(&value) {
        return Err(fault!(TypeMismatch; "{} does not fit the marker field", value));
    }
    ctx.org.mr = value as u32;
    Ok(())
}

/// GETMR: reads the marker register as a DATA molecule.
pub(crate) fn getmr(ctx: &mut ExecCtx<'_>) -> FaultResult<()> {
    let dest = ctx.reg(0)?;
    let mr = ctx.org.mr as i32;
    ctx.org.set_register(dest, Value::Mol(data_molecule(mr)))
}

/// NRGR: reads the energy register, clamped to the payload range.
pub(crate) fn nrgr(ctx: &mut ExecCtx<'_>) -> FaultResult<()> {
    let dest = ctx.reg(0)?;
    let er = ctx.org.er.min(VALUE_MAX as u64) as i32;
    ctx.org.set_register(dest, Value::Mol(data_molecule(er)))
}

/// POSR: reads the current instruction's coordinate as a vector.
pub(crate) fn posr(ctx: &mut ExecCtx<'_>) -> FaultResult<()> {
    let dest = ctx.reg(0)?;
    let ip = ctx.org.ip_before_fetch.clone();
    ctx.org.set_register(dest, Value::Vec(ip))
}
