// Copyright 2021-2023 Protocol Labs
// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! The instruction-failure taxonomy.
//!
//! Instruction failures are recovered per organism: they set the organism's
//! failure fields, cost the error penalty, and advance the instruction
//! pointer. They never unwind the engine.

use num_derive::FromPrimitive;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The reason an instruction failed.
#[repr(u32)]
#[derive(
    PartialEq, Eq, Debug, Clone, Copy, Hash, FromPrimitive, Serialize, Deserialize, Error,
)]
pub enum FailKind {
    /// The cell under the instruction pointer is not a CODE molecule.
    #[error("NotCode")]
    NotCode = 1,

    /// An operand or register held a value of the wrong shape or type.
    #[error("TypeMismatch")]
    TypeMismatch = 2,

    /// A coordinate left a BOUNDED world.
    #[error("OutOfBounds")]
    OutOfBounds = 3,

    #[error("StackUnderflow")]
    StackUnderflow = 4,

    #[error("StackOverflow")]
    StackOverflow = 5,

    /// A register index past the declared arity of its bank.
    #[error("BadRegister")]
    BadRegister = 6,

    /// No label hash within the fuzzy-jump tolerance.
    #[error("NoLabelMatch")]
    NoLabelMatch = 7,

    /// The energy register cannot cover the instruction cost.
    #[error("InsufficientEnergy")]
    InsufficientEnergy = 8,

    /// Another organism won the write to the same cell this tick.
    #[error("WriteConflict")]
    WriteConflict = 9,

    /// No binding table registered for this CALL site.
    #[error("BindingMissing")]
    BindingMissing = 10,

    #[error("DivideByZero")]
    DivideByZero = 11,
}

/// A recoverable per-organism failure: a human-readable detail plus the
/// taxonomy kind.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{1} ({0})")]
pub struct InstructionFault(pub String, pub FailKind);

impl InstructionFault {
    pub fn kind(&self) -> FailKind {
        self.1
    }
}

/// Composes an [`InstructionFault`] from a [`FailKind`] variant name and a
/// format string.
#[macro_export]
macro_rules! fault {
    ($kind:ident; $msg:literal $(, $ex:expr)*) => {
        $crate::error::InstructionFault(
            format!($msg $(, $ex)*),
            $crate::error::FailKind::$kind,
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fault_macro_formats_the_detail() {
        let fault = fault!(BadRegister; "index {} past arity {}", 9, 8);
        assert_eq!(fault.kind(), FailKind::BadRegister);
        assert_eq!(fault.to_string(), "BadRegister (index 9 past arity 8)");
    }

    #[test]
    fn kinds_round_trip_through_serde() {
        let json = serde_json::to_string(&FailKind::WriteConflict).unwrap();
        assert_eq!(
            serde_json::from_str::<FailKind>(&json).unwrap(),
            FailKind::WriteConflict
        );
    }
}
