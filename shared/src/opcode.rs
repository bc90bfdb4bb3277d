// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

//! The structured opcode identifier.
//!
//! An opcode id decomposes as `family * 1024 + operation * 16 + variant`.
//! The strides give single-bit mutations proportional semantics: a flip in
//! the low bits lands on a sibling variant of the same operation, a flip in
//! the middle bits on a sibling operation, a flip in the high bits on a
//! different family entirely.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Id distance between adjacent families.
pub const FAMILY_STRIDE: u16 = 1024;
/// Id distance between adjacent operations within a family.
pub const OPERATION_STRIDE: u16 = 16;

/// Exclusive upper bounds of the three fields.
pub const MAX_FAMILY: u16 = 32;
pub const MAX_OPERATION: u16 = FAMILY_STRIDE / OPERATION_STRIDE;
pub const MAX_VARIANT: u16 = OPERATION_STRIDE;

/// A structured opcode id. The full range fits the non-negative half of the
/// 16-bit molecule payload.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OpcodeId(u16);

impl OpcodeId {
    pub const NOP: OpcodeId = OpcodeId(0);

    /// Composes an id from its fields. Out-of-range fields abort at compile
    /// time when used in constants, and panic at runtime otherwise; ids are
    /// only composed by registry definitions.
    pub const fn new(family: u16, operation: u16, variant: u16) -> OpcodeId {
        assert!(family < MAX_FAMILY && operation < MAX_OPERATION && variant < MAX_VARIANT);
        OpcodeId(family * FAMILY_STRIDE + operation * OPERATION_STRIDE + variant)
    }

    /// Reads an id out of a molecule payload. `None` if the payload is
    /// negative or past the family range.
    pub fn from_value(value: i32) -> Option<OpcodeId> {
        if (0..(MAX_FAMILY as i32) * (FAMILY_STRIDE as i32)).contains(&value) {
            Some(OpcodeId(value as u16))
        } else {
            None
        }
    }

    pub const fn family(self) -> u16 {
        self.0 / FAMILY_STRIDE
    }

    pub const fn operation(self) -> u16 {
        self.0 % FAMILY_STRIDE / OPERATION_STRIDE
    }

    pub const fn variant(self) -> u16 {
        self.0 % OPERATION_STRIDE
    }

    pub const fn raw(self) -> u16 {
        self.0
    }
}

impl fmt::Debug for OpcodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "op{}.{}.{}",
            self.family(),
            self.operation(),
            self.variant()
        )
    }
}
