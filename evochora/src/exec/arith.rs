// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

//! Arithmetic family. Operates on DATA molecules in the wrapping 16-bit
//! payload domain; results carry a cleared marker.

use evochora_shared::fault;

use super::{data_molecule, data_payload, ExecCtx};
use crate::organism::Value;
use crate::FaultResult;

type BinOp = fn(i32, i32) -> FaultResult<i32>;

/// Register variant: `dest = op(dest, src)`.
fn bin_r(ctx: &mut ExecCtx<'_>, op: BinOp) -> FaultResult<()> {
    let dest = ctx.reg(0)?;
    let src = ctx.reg(1)?;
    let a = data_payload(&ctx.org.get_register(dest)?)?;
    let b = data_payload(&ctx.org.get_register(src)?)?;
    ctx.org.set_register(dest, Value::Mol(data_molecule(op(a, b)?)))
}

/// Immediate variant: `dest = op(dest, imm)`.
fn bin_i(ctx: &mut ExecCtx<'_>, op: BinOp) -> FaultResult<()> {
    let dest = ctx.reg(0)?;
    let a = data_payload(&ctx.org.get_register(dest)?)?;
    let b = data_payload(&Value::Mol(ctx.imm(1)?))?;
    ctx.org.set_register(dest, Value::Mol(data_molecule(op(a, b)?)))
}

/// Stack variant: pops the right operand, then the left, pushes the
/// result. Both pops are validated up front so a failure leaves the stack
/// untouched.
fn bin_s(ctx: &mut ExecCtx<'_>, op: BinOp) -> FaultResult<()> {
    if ctx.org.data_stack.len() < 2 {
        return Err(fault!(StackUnderflow; "{} needs two stack operands", ctx.spec.name));
    }
    let b = data_payload(&ctx.org.data_stack[ctx.org.data_stack.len() - 1])?;
    let a = data_payload(&ctx.org.data_stack[ctx.org.data_stack.len() - 2])?;
    let result = op(a, b)?;
    ctx.org.data_stack.truncate(ctx.org.data_stack.len() - 2);
    ctx.org.data_stack.push(Value::Mol(data_molecule(result)));
    Ok(())
}

fn add(a: i32, b: i32) -> FaultResult<i32> {
    Ok(a + b)
}

fn sub(a: i32, b: i32) -> FaultResult<i32> {
    Ok(a - b)
}

fn mul(a: i32, b: i32) -> FaultResult<i32> {
    Ok(a.wrapping_mul(b))
}

fn div(a: i32, b: i32) -> FaultResult<i32> {
    if b == 0 {
        return Err(fault!(DivideByZero; "{} / 0", a));
    }
    Ok(a / b)
}

fn rem(a: i32, b: i32) -> FaultResult<i32> {
    if b == 0 {
        return Err(fault!(DivideByZero; "{} mod 0", a));
    }
    Ok(a % b)
}

pub(crate) fn addr(ctx: &mut ExecCtx<'_>) -> FaultResult<()> {
    bin_r(ctx, add)
}

pub(crate) fn addi(ctx: &mut ExecCtx<'_>) -> FaultResult<()> {
    bin_i(ctx, add)
}

pub(crate) fn adds(ctx: &mut ExecCtx<'_>) -> FaultResult<()> {
    bin_s(ctx, add)
}

pub(crate) fn subr(ctx: &mut ExecCtx<'_>) -> FaultResult<()> {
    bin_r(ctx, sub)
}

pub(crate) fn subi(ctx: &mut ExecCtx<'_>) -> FaultResult<()> {
    bin_i(ctx, sub)
}

pub(crate) fn subs(ctx: &mut ExecCtx<'_>) -> FaultResult<()> {
    bin_s(ctx, sub)
}

pub(crate) fn mulr(ctx: &mut ExecCtx<'_>) -> FaultResult<()> {
    bin_r(ctx, mul)
}

pub(crate) fn muli(ctx: &mut ExecCtx<'_>) -> FaultResult<()> {
    bin_i(ctx, mul)
}

pub(crate) fn muls(ctx: &mut ExecCtx<'_>) -> FaultResult<()> {
    bin_s(ctx, mul)
}

pub(crate) fn divr(ctx: &mut ExecCtx<'_>) -> FaultResult<()> {
    bin_r(ctx, div)
}

pub(crate) fn divi(ctx: &mut ExecCtx<'_>) -> FaultResult<()> {
    bin_i(ctx, div)
}

pub(crate) fn divs(ctx: &mut ExecCtx<'_>) -> FaultResult<()> {
    bin_s(ctx, div)
}

pub(crate) fn modr(ctx: &mut ExecCtx<'_>) -> FaultResult<()> {
    bin_r(ctx, rem)
}

pub(crate) fn modi(ctx: &mut ExecCtx<'_>) -> FaultResult<()> {
    bin_i(ctx, rem)
}

pub(crate) fn mods(ctx: &mut ExecCtx<'_>) -> FaultResult<()> {
    bin_s(ctx, rem)
}
