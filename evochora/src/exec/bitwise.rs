// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

//! Bitwise family. Works on the 16-bit payload bits of DATA molecules;
//! shifts are masked to the field width, right shifts are arithmetic.

use evochora_shared::fault;

use super::{data_molecule, data_payload, wrap16, ExecCtx};
use crate::organism::Value;
use crate::FaultResult;

fn bin_r(ctx: &mut ExecCtx<'_>, op: fn(i32, i32) -> i32) -> FaultResult<()> {
    let dest = ctx.reg(0)?;
    let src = ctx.reg(1)?;
    let a = data_payload(&ctx.org.get_register(dest)?)?;
    let b = data_payload(&ctx.org.get_register(src)?)?;
    ctx.org.set_register(dest, Value::Mol(data_molecule(op(a, b))))
}

fn bin_i(ctx: &mut ExecCtx<'_>, op: fn(i32, i32) -> i32) -> FaultResult<()> {
    let dest = ctx.reg(0)?;
    let a = data_payload(&ctx.org.get_register(dest)?)?;
    let b = data_payload(&Value::Mol(ctx.imm(1)?))?;
    ctx.org.set_register(dest, Value::Mol(data_molecule(op(a, b))))
}

fn bin_s(ctx: &mut ExecCtx<'_>, op: fn(i32, i32) -> i32) -> FaultResult<()> {
    if ctx.org.data_stack.len() < 2 {
        return Err(fault!(StackUnderflow; "{} needs two stack operands", ctx.spec.name));
    }
    let b = data_payload(&ctx.org.data_stack[ctx.org.data_stack.len() - 1])?;
    let a = data_payload(&ctx.org.data_stack[ctx.org.data_stack.len() - 2])?;
    let result = op(a, b);
    ctx.org.data_stack.truncate(ctx.org.data_stack.len() - 2);
    ctx.org.data_stack.push(Value::Mol(data_molecule(result)));
    Ok(())
}

fn and(a: i32, b: i32) -> i32 {
    a & b
}

fn or(a: i32, b: i32) -> i32 {
    a | b
}

fn xor(a: i32, b: i32) -> i32 {
    a ^ b
}

fn shl(a: i32, b: i32) -> i32 {
    wrap16(a << (b & 0xf))
}

fn shr(a: i32, b: i32) -> i32 {
    a >> (b & 0xf)
}

pub(crate) fn andr(ctx: &mut ExecCtx<'_>) -> FaultResult<()> {
    bin_r(ctx, and)
}

pub(crate) fn andi(ctx: &mut ExecCtx<'_>) -> FaultResult<()> {
    bin_i(ctx, and)
}

pub(crate) fn ands(ctx: &mut ExecCtx<'_>) -> FaultResult<()> {
    bin_s(ctx, and)
}

pub(crate) fn orr(ctx: &mut ExecCtx<'_>) -> FaultResult<()> {
    bin_r(ctx, or)
}

pub(crate) fn ori(ctx: &mut ExecCtx<'_>) -> FaultResult<()> {
    bin_i(ctx, or)
}

pub(crate) fn ors(ctx: &mut ExecCtx<'_>) -> FaultResult<()> {
    bin_s(ctx, or)
}

pub(crate) fn xorr(ctx: &mut ExecCtx<'_>) -> FaultResult<()> {
    bin_r(ctx, xor)
}

pub(crate) fn xori(ctx: &mut ExecCtx<'_>) -> FaultResult<()> {
    bin_i(ctx, xor)
}

pub(crate) fn xors(ctx: &mut ExecCtx<'_>) -> FaultResult<()> {
    bin_s(ctx, xor)
}

pub(crate) fn notr(ctx: &mut ExecCtx<'_>) -> FaultResult<()> {
    let dest = ctx.reg(0)?;
    let a = data_payload(&ctx.org.get_register(dest)?)?;
    ctx.org.set_register(dest, Value::Mol(data_molecule(!a)))
}

pub(crate) fn nots(ctx: &mut ExecCtx<'_>) -> FaultResult<()> {
    let top = ctx.org.pop_data()?;
    let a = match data_payload(&top) {
        Ok(a) => a,
        Err(e) => {
            // Leave the stack as it was.
            ctx.org.data_stack.push(top);
            return Err(e);
        }
    };
    ctx.org.data_stack.push(Value::Mol(data_molecule(!a)));
    Ok(())
}

pub(crate) fn shlr(ctx: &mut ExecCtx<'_>) -> FaultResult<()> {
    bin_r(ctx, shl)
}

pub(crate) fn shli(ctx: &mut ExecCtx<'_>) -> FaultResult<()> {
    bin_i(ctx, shl)
}

pub(crate) fn shrr(ctx: &mut ExecCtx<'_>) -> FaultResult<()> {
    bin_r(ctx, shr)
}

pub(crate) fn shri(ctx: &mut ExecCtx<'_>) -> FaultResult<()> {
    bin_i(ctx, shr)
}
