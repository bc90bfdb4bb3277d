// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

//! Control family: relative jumps, fuzzy label jumps, and the procedure
//! call protocol.
//!
//! CALL resolves its binding table through the call-binding registry
//! (keyed by the absolute CALL-site coordinate) and copies the bound
//! actuals into the formal-parameter registers. RET writes the formals
//! back through the same table, restores the saved register banks, and
//! returns to the saved IP/DV.

use evochora_shared::fault;
use evochora_shared::register::RegisterBank;

use super::{ExecCtx, Jump};
use crate::organism::Frame;
use crate::FaultResult;

/// IP-relative jump by a vector held in a register.
pub(crate) fn jmpr(ctx: &mut ExecCtx<'_>) -> FaultResult<()> {
    let delta = ctx.vector(0)?;
    if delta.dims() != ctx.world().dims() {
        return Err(fault!(TypeMismatch; "vector {} has the wrong dimensionality", delta));
    }
    let target = ctx.world().offset(&ctx.org.ip_before_fetch, &delta, 1)?;
    ctx.jump = Some(Jump {
        ip: target,
        dv: None,
    });
    Ok(())
}

/// Fuzzy jump: transfers control to the nearest label by hash distance.
pub(crate) fn jmpi(ctx: &mut ExecCtx<'_>) -> FaultResult<()> {
    let target = ctx.fuzzy_target(ctx.label(0)?)?;
    ctx.jump = Some(Jump {
        ip: target,
        dv: None,
    });
    Ok(())
}

pub(crate) fn call(ctx: &mut ExecCtx<'_>) -> FaultResult<()> {
    let target = ctx.fuzzy_target(ctx.label(0)?)?;
    let binding = ctx
        .binding
        .expect("pipeline resolves bindings for call-site opcodes");

    if binding.len() > ctx.org.fprs.len() {
        return Err(fault!(BadRegister; "binding table of {} entries exceeds the {} formal registers",
            binding.len(), ctx.org.fprs.len()));
    }

    if ctx.org.call_stack.len() >= ctx.org.layout().call_stack_limit {
        return Err(fault!(StackOverflow; "call stack is at its limit of {}",
            ctx.org.layout().call_stack_limit));
    }

    // Read every actual before touching any state, so a bad binding
    // cannot leave a half-built frame.
    let mut formals = ctx.org.fprs.clone();
    for (slot, reg) in binding.iter().enumerate() {
        formals[slot] = ctx.org.get_register(*reg)?;
    }

    let frame = Frame {
        return_ip: ctx.next_ip.clone(),
        return_dv: ctx.org.dv_before_fetch.clone(),
        call_site: ctx.org.ip_before_fetch.clone(),
        saved_fprs: std::mem::replace(&mut ctx.org.fprs, formals),
        saved_prs: ctx.org.prs.clone(),
        bindings: binding.to_vec(),
    };
    ctx.org
        .push_frame(frame)
        .expect("capacity checked above");

    ctx.jump = Some(Jump {
        ip: target,
        dv: None,
    });
    Ok(())
}

pub(crate) fn ret(ctx: &mut ExecCtx<'_>) -> FaultResult<()> {
    let frame = match ctx.org.call_stack.last() {
        Some(frame) => frame.clone(),
        None => return Err(fault!(StackUnderflow; "RET with an empty call stack")),
    };

    // Validate the whole write-back before applying any of it; a formal
    // that no longer fits its bound register fails the RET atomically.
    for (slot, reg) in frame.bindings.iter().enumerate() {
        ctx.org.get_register(*reg)?;
        if reg.bank == RegisterBank::Location {
            ctx.org.fprs[slot].as_vec()?;
        }
    }

    // Reference semantics: formals flow back to the bound actuals.
    for (slot, reg) in frame.bindings.iter().enumerate() {
        let value = ctx.org.fprs[slot].clone();
        ctx.org
            .set_register(*reg, value)
            .expect("write-back validated above");
    }

    ctx.org.call_stack.pop();
    ctx.org.fprs = frame.saved_fprs;
    ctx.org.prs = frame.saved_prs;
    ctx.jump = Some(Jump {
        ip: frame.return_ip,
        dv: Some(frame.return_dv),
    });
    Ok(())
}
