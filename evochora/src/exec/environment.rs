// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

//! Environment family: reads and writes of world cells, energy harvest,
//! and data-pointer movement.
//!
//! PEEK, POKE, HARVEST and SEEK address relative to the active data
//! pointer; SCAN addresses relative to the instruction pointer. The
//! pipeline resolves the target cell before the cost query, so the
//! thermodynamic policy prices each access by what it touches and by the
//! own/foreign/unowned relation.

use evochora_shared::fault;
use evochora_shared::molecule::{Molecule, MoleculeKind};

use super::ExecCtx;
use crate::organism::Value;
use crate::FaultResult;

/// PEEK and SCAN: copies the target molecule into a register.
pub(crate) fn read_cell(ctx: &mut ExecCtx<'_>) -> FaultResult<()> {
    let dest = ctx.reg(0)?;
    let molecule = ctx.target()?.cell.molecule;
    ctx.org.set_register(dest, Value::Mol(molecule))
}

/// POKE: stages a write of a register-held molecule to the target cell.
/// Ownership follows the writer.
pub(crate) fn poke(ctx: &mut ExecCtx<'_>) -> FaultResult<()> {
    let value = ctx.org.get_register(ctx.reg(0)?)?;
    let molecule = value.as_mol()?;
    let target = ctx.target()?.coord.clone();
    let owner = ctx.org.id;
    ctx.stage_write(target, molecule, owner);
    Ok(())
}

/// HARVEST: consumes the ENERGY molecule at the active data pointer,
/// staging the emptied cell (marker preserved) together with the ER
/// credit. The quantum reaches the energy register only when the write
/// commits; losing the cell to another writer drops the gain with it.
pub(crate) fn harvest(ctx: &mut ExecCtx<'_>) -> FaultResult<()> {
    let target = ctx.target()?.clone();
    if target.cell.molecule.kind() != MoleculeKind::Energy {
        return Err(fault!(TypeMismatch; "HARVEST on {:?}, not an ENERGY molecule",
            target.cell.molecule));
    }
    let quantum = target.cell.molecule.value().max(0) as u64;
    let emptied = Molecule::new(MoleculeKind::Energy, 0, target.cell.molecule.marker())
        .expect("zero quantum always packs");
    let owner = ctx.org.id;
    ctx.stage_write_with_gain(target.coord, emptied, owner, quantum);
    Ok(())
}

/// SEEK: moves the active data pointer by a vector.
pub(crate) fn seek(ctx: &mut ExecCtx<'_>) -> FaultResult<()> {
    let delta = ctx.vector(0)?;
    if delta.dims() != ctx.world().dims() {
        return Err(fault!(TypeMismatch; "vector {} has the wrong dimensionality", delta));
    }
    let dp = ctx.world().offset(ctx.org.dp(), &delta, 1)?;
    ctx.org.set_dp(dp);
    Ok(())
}

/// DPSW: selects the active data pointer by index.
pub(crate) fn dpsw(ctx: &mut ExecCtx<'_>) -> FaultResult<()> {
    let index = ctx.imm(0)?.value();
    let index = usize::try_from(index)
        .map_err(|_| fault!(BadRegister; "data pointer index {} is negative", index))?;
    ctx.org.select_dp(index)
}

/// DPLD: copies the active data pointer into a register as a vector.
pub(crate) fn dpld(ctx: &mut ExecCtx<'_>) -> FaultResult<()> {
    let dest = ctx.reg(0)?;
    let dp = ctx.org.dp().clone();
    ctx.org.set_register(dest, Value::Vec(dp))
}
