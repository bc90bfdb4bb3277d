// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

//! Data-stack family. Every operation validates its preconditions before
//! mutating, so a failed instruction leaves the stack untouched.

use evochora_shared::fault;

use super::ExecCtx;
use crate::organism::Value;
use crate::FaultResult;

pub(crate) fn push(ctx: &mut ExecCtx<'_>) -> FaultResult<()> {
    let value = ctx.org.get_register(ctx.reg(0)?)?;
    ctx.org.push_data(value)
}

pub(crate) fn pushi(ctx: &mut ExecCtx<'_>) -> FaultResult<()> {
    let value = Value::Mol(ctx.imm(0)?);
    ctx.org.push_data(value)
}

pub(crate) fn pop(ctx: &mut ExecCtx<'_>) -> FaultResult<()> {
    let dest = ctx.reg(0)?;
    // Write through before shrinking the stack, so a bad destination
    // leaves the stack intact.
    let value = ctx
        .org
        .data_stack
        .last()
        .cloned()
        .ok_or_else(|| fault!(StackUnderflow; "POP on an empty stack"))?;
    ctx.org.set_register(dest, value)?;
    ctx.org.data_stack.pop();
    Ok(())
}

pub(crate) fn dup(ctx: &mut ExecCtx<'_>) -> FaultResult<()> {
    let top = ctx
        .org
        .data_stack
        .last()
        .cloned()
        .ok_or_else(|| fault!(StackUnderflow; "DUP on an empty stack"))?;
    ctx.org.push_data(top)
}

pub(crate) fn swap(ctx: &mut ExecCtx<'_>) -> FaultResult<()> {
    let len = ctx.org.data_stack.len();
    if len < 2 {
        return Err(fault!(StackUnderflow; "SWAP needs two stack entries"));
    }
    ctx.org.data_stack.swap(len - 1, len - 2);
    Ok(())
}

pub(crate) fn drop(ctx: &mut ExecCtx<'_>) -> FaultResult<()> {
    ctx.org.pop_data().map(|_| ())
}

/// Forth ROT: the third entry from the top moves to the top.
pub(crate) fn rot(ctx: &mut ExecCtx<'_>) -> FaultResult<()> {
    let len = ctx.org.data_stack.len();
    if len < 3 {
        return Err(fault!(StackUnderflow; "ROT needs three stack entries"));
    }
    ctx.org.data_stack[len - 3..].rotate_left(1);
    Ok(())
}
