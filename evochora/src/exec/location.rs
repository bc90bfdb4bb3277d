// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

//! Location family: moving coordinates between the active data pointer,
//! the location registers, and the location stack.

use evochora_shared::fault;

use super::ExecCtx;
use crate::FaultResult;

fn lr_index(ctx: &ExecCtx<'_>) -> FaultResult<usize> {
    let value = ctx.imm(0)?.value();
    usize::try_from(value)
        .map_err(|_| fault!(BadRegister; "location register index {} is negative", value))
}

/// LRLD: captures the active data pointer into a location register.
pub(crate) fn lrld(ctx: &mut ExecCtx<'_>) -> FaultResult<()> {
    let index = lr_index(ctx)?;
    let dp = ctx.org.dp().clone();
    ctx.org.set_location_register(index, dp)
}

/// LRST: moves the active data pointer to a stored location.
pub(crate) fn lrst(ctx: &mut ExecCtx<'_>) -> FaultResult<()> {
    let index = lr_index(ctx)?;
    let coord = ctx.org.location_register(index)?.clone();
    ctx.org.set_dp(coord);
    Ok(())
}

/// LPSH: pushes a location register onto the location stack.
pub(crate) fn lpsh(ctx: &mut ExecCtx<'_>) -> FaultResult<()> {
    let index = lr_index(ctx)?;
    let coord = ctx.org.location_register(index)?.clone();
    ctx.org.push_location(coord)
}

/// LPOP: pops the location stack into a location register.
pub(crate) fn lpop(ctx: &mut ExecCtx<'_>) -> FaultResult<()> {
    let index = lr_index(ctx)?;
    // Validate the destination before consuming the stack.
    ctx.org.location_register(index)?;
    let coord = ctx.org.pop_location()?;
    ctx.org.set_location_register(index, coord)
}
