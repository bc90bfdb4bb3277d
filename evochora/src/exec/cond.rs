// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

//! Conditional family. A false condition skips the next instruction; the
//! skip length is read from the cell the IP would land on, so skipping
//! works across mixed instruction sizes.

use evochora_shared::fault;
use evochora_shared::opcode::OpcodeId;

use super::{data_payload, ExecCtx, Jump};
use crate::organism::Value;
use crate::FaultResult;

/// Jumps past the instruction following this one. If the next cell does
/// not decode to a registered instruction, it is skipped as a single cell.
fn skip_next(ctx: &mut ExecCtx<'_>) -> FaultResult<()> {
    let dims = ctx.world().dims();
    let next = ctx.world().get(&ctx.next_ip).molecule;
    let size = if next.is_code() {
        OpcodeId::from_value(next.value())
            .and_then(|id| ctx.shared.registry.get(id))
            .map_or(1, |spec| spec.cells(dims))
    } else {
        1
    };
    let landing = ctx
        .world()
        .offset(&ctx.next_ip, &ctx.org.dv_before_fetch, size)?;
    ctx.jump = Some(Jump {
        ip: landing,
        dv: None,
    });
    Ok(())
}

/// Structural equality: molecules compare by type and payload (markers are
/// ownership metadata, not value), vectors component-wise. Mixed shapes
/// are unequal, not a fault.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Mol(x), Value::Mol(y)) => x.kind() == y.kind() && x.value() == y.value(),
        (Value::Vec(x), Value::Vec(y)) => x == y,
        _ => false,
    }
}

fn cond(ctx: &mut ExecCtx<'_>, holds: bool) -> FaultResult<()> {
    if holds {
        Ok(())
    } else {
        skip_next(ctx)
    }
}

fn pair_r(ctx: &ExecCtx<'_>) -> FaultResult<(Value, Value)> {
    let a = ctx.org.get_register(ctx.reg(0)?)?;
    let b = ctx.org.get_register(ctx.reg(1)?)?;
    Ok((a, b))
}

fn pair_i(ctx: &ExecCtx<'_>) -> FaultResult<(Value, Value)> {
    let a = ctx.org.get_register(ctx.reg(0)?)?;
    let b = Value::Mol(ctx.imm(1)?);
    Ok((a, b))
}

fn ordered(a: &Value, b: &Value) -> FaultResult<(i32, i32)> {
    Ok((data_payload(a)?, data_payload(b)?))
}

pub(crate) fn ifeqr(ctx: &mut ExecCtx<'_>) -> FaultResult<()> {
    let (a, b) = pair_r(ctx)?;
    cond(ctx, values_equal(&a, &b))
}

pub(crate) fn ifeqi(ctx: &mut ExecCtx<'_>) -> FaultResult<()> {
    let (a, b) = pair_i(ctx)?;
    cond(ctx, values_equal(&a, &b))
}

/// Stack variant: pops and compares the top two values.
pub(crate) fn ifeqs(ctx: &mut ExecCtx<'_>) -> FaultResult<()> {
    if ctx.org.data_stack.len() < 2 {
        return Err(fault!(StackUnderflow; "IFEQS needs two stack operands"));
    }
    let a = ctx.org.pop_data()?;
    let b = ctx.org.pop_data()?;
    cond(ctx, values_equal(&a, &b))
}

pub(crate) fn ifner(ctx: &mut ExecCtx<'_>) -> FaultResult<()> {
    let (a, b) = pair_r(ctx)?;
    cond(ctx, !values_equal(&a, &b))
}

pub(crate) fn ifnei(ctx: &mut ExecCtx<'_>) -> FaultResult<()> {
    let (a, b) = pair_i(ctx)?;
    cond(ctx, !values_equal(&a, &b))
}

pub(crate) fn ifltr(ctx: &mut ExecCtx<'_>) -> FaultResult<()> {
    let (a, b) = pair_r(ctx)?;
    let (a, b) = ordered(&a, &b)?;
    cond(ctx, a < b)
}

pub(crate) fn iflti(ctx: &mut ExecCtx<'_>) -> FaultResult<()> {
    let (a, b) = pair_i(ctx)?;
    let (a, b) = ordered(&a, &b)?;
    cond(ctx, a < b)
}

pub(crate) fn ifgtr(ctx: &mut ExecCtx<'_>) -> FaultResult<()> {
    let (a, b) = pair_r(ctx)?;
    let (a, b) = ordered(&a, &b)?;
    cond(ctx, a > b)
}

pub(crate) fn ifgti(ctx: &mut ExecCtx<'_>) -> FaultResult<()> {
    let (a, b) = pair_i(ctx)?;
    let (a, b) = ordered(&a, &b)?;
    cond(ctx, a > b)
}

/// True when the register holds a molecule of the immediate's type.
/// Vectors have no molecule type and compare false.
pub(crate) fn iftyi(ctx: &mut ExecCtx<'_>) -> FaultResult<()> {
    let a = ctx.org.get_register(ctx.reg(0)?)?;
    let kind = ctx.imm(1)?.kind();
    let holds = matches!(&a, Value::Mol(m) if m.kind() == kind);
    cond(ctx, holds)
}

/// True when the register's molecule carries the organism's marker.
pub(crate) fn ifmrr(ctx: &mut ExecCtx<'_>) -> FaultResult<()> {
    let a = ctx.org.get_register(ctx.reg(0)?)?;
    let marker = ctx.org.mr;
    let holds = matches!(&a, Value::Mol(m) if m.marker() == marker);
    cond(ctx, holds)
}
