// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

//! Register identifiers.
//!
//! A register id names a slot in one of the four organism register banks.
//! The numeric encoding `bank << 8 | index` is stable: binding tables in
//! artifacts and register operands in code molecules both use it.

use std::fmt;

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};

const BANK_SHIFT: u32 = 8;
const INDEX_MASK: u16 = 0xff;

#[repr(u16)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, FromPrimitive)]
pub enum RegisterBank {
    /// General data registers (`%DR`).
    Data = 0,
    /// Procedure registers (`%PR`), saved across calls.
    Procedure = 1,
    /// Formal parameter registers (`%FPR`), bound at call time.
    Formal = 2,
    /// Location registers (`%LR`), coordinate-valued.
    Location = 3,
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
pub struct RegisterId {
    pub bank: RegisterBank,
    pub index: u8,
}

impl RegisterId {
    pub fn data(index: u8) -> Self {
        RegisterId {
            bank: RegisterBank::Data,
            index,
        }
    }

    pub fn procedure(index: u8) -> Self {
        RegisterId {
            bank: RegisterBank::Procedure,
            index,
        }
    }

    pub fn formal(index: u8) -> Self {
        RegisterId {
            bank: RegisterBank::Formal,
            index,
        }
    }

    pub fn location(index: u8) -> Self {
        RegisterId {
            bank: RegisterBank::Location,
            index,
        }
    }

    /// Decodes a register operand read out of a code molecule payload.
    pub fn from_operand(value: i32) -> Option<RegisterId> {
        u16::try_from(value).ok().and_then(|v| RegisterId::try_from(v).ok())
    }
}

impl From<RegisterId> for u16 {
    fn from(id: RegisterId) -> u16 {
        ((id.bank as u16) << BANK_SHIFT) | id.index as u16
    }
}

impl TryFrom<u16> for RegisterId {
    type Error = String;

    fn try_from(raw: u16) -> Result<Self, String> {
        let bank = RegisterBank::from_u16(raw >> BANK_SHIFT)
            .ok_or_else(|| format!("unknown register bank in id {:#06x}", raw))?;
        Ok(RegisterId {
            bank,
            index: (raw & INDEX_MASK) as u8,
        })
    }
}

impl fmt::Debug for RegisterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.bank {
            RegisterBank::Data => "DR",
            RegisterBank::Procedure => "PR",
            RegisterBank::Formal => "FPR",
            RegisterBank::Location => "LR",
        };
        write!(f, "%{}{}", tag, self.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoding_round_trip() {
        for id in [
            RegisterId::data(0),
            RegisterId::procedure(7),
            RegisterId::formal(255),
            RegisterId::location(3),
        ] {
            assert_eq!(RegisterId::try_from(u16::from(id)), Ok(id));
        }
    }

    #[test]
    fn rejects_unknown_banks() {
        assert!(RegisterId::try_from(4 << 8).is_err());
        assert!(RegisterId::from_operand(-1).is_none());
        assert!(RegisterId::from_operand(0x10000).is_none());
    }
}
