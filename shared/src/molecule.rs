// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

//! The packed cell value. A molecule is a 32-bit record:
//!
//! ```text
//! bit 31            23 22    20 19                 4 3       0
//!     +---------------+--------+--------------------+---------+
//!     |   padding=0   |  type  |  value (signed 16) | marker  |
//!     +---------------+--------+--------------------+---------+
//! ```
//!
//! The layout is stable and platform-independent; compilers in any language
//! must produce identical bit patterns.

use std::fmt;

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};
use static_assertions::const_assert;
use thiserror::Error;

/// Width of the signed payload field.
pub const VALUE_BITS: u32 = 16;
/// Width of the marker field.
pub const MARKER_BITS: u32 = 4;
/// Width of the type tag field.
pub const TYPE_BITS: u32 = 3;

const VALUE_SHIFT: u32 = MARKER_BITS;
const TYPE_SHIFT: u32 = MARKER_BITS + VALUE_BITS;

const MARKER_MASK: u32 = (1 << MARKER_BITS) - 1;
const VALUE_MASK: u32 = (1 << VALUE_BITS) - 1;
const TYPE_MASK: u32 = (1 << TYPE_BITS) - 1;

/// Smallest payload representable in the value field.
pub const VALUE_MIN: i32 = -(1 << (VALUE_BITS - 1));
/// Largest payload representable in the value field.
pub const VALUE_MAX: i32 = (1 << (VALUE_BITS - 1)) - 1;

const_assert!(MARKER_BITS + VALUE_BITS + TYPE_BITS <= 32);

/// The type tag of a molecule.
#[repr(u32)]
#[derive(
    PartialEq, Eq, PartialOrd, Ord, Debug, Clone, Copy, Hash, FromPrimitive, Serialize, Deserialize,
)]
pub enum MoleculeKind {
    Code = 0,
    Data = 1,
    Energy = 2,
    Structure = 3,
}

/// Raised when a bit pattern or field does not form a valid molecule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InvalidMolecule {
    #[error("value {0} does not fit the {VALUE_BITS}-bit payload")]
    ValueRange(i32),
    #[error("marker {0} does not fit the {MARKER_BITS}-bit field")]
    MarkerRange(u32),
    #[error("bit pattern {0:#010x} has non-zero padding or an unknown type tag")]
    RawBits(u32),
}

/// A bit-packed cell value.
///
/// All constructors validate their inputs, so a held `Molecule` always
/// carries a known type tag, an in-range payload, and zero padding.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Molecule(u32);

impl Molecule {
    /// The all-zero CODE molecule; also the NOP instruction.
    pub const NOP: Molecule = Molecule(0);

    /// The zero DATA molecule, the reset state of value registers.
    pub const DATA_ZERO: Molecule = Molecule((MoleculeKind::Data as u32) << TYPE_SHIFT);

    /// Packs `(kind, value, marker)` into a molecule.
    pub fn new(kind: MoleculeKind, value: i32, marker: u32) -> Result<Self, InvalidMolecule> {
        if !(VALUE_MIN..=VALUE_MAX).contains(&value) {
            return Err(InvalidMolecule::ValueRange(value));
        }
        if marker > MARKER_MASK {
            return Err(InvalidMolecule::MarkerRange(marker));
        }
        Ok(Molecule(
            ((kind as u32) << TYPE_SHIFT) | (((value as u32) & VALUE_MASK) << VALUE_SHIFT) | marker,
        ))
    }

    /// Validates an externally supplied bit pattern (e.g. an artifact
    /// placement) and wraps it.
    pub fn try_from_raw(raw: u32) -> Result<Self, InvalidMolecule> {
        if raw >> (TYPE_SHIFT + TYPE_BITS) != 0 {
            return Err(InvalidMolecule::RawBits(raw));
        }
        if MoleculeKind::from_u32((raw >> TYPE_SHIFT) & TYPE_MASK).is_none() {
            return Err(InvalidMolecule::RawBits(raw));
        }
        Ok(Molecule(raw))
    }

    /// The stable 32-bit wire representation.
    pub fn raw(self) -> u32 {
        self.0
    }

    pub fn kind(self) -> MoleculeKind {
        MoleculeKind::from_u32((self.0 >> TYPE_SHIFT) & TYPE_MASK)
            .expect("molecule type tag validated at construction")
    }

    /// The payload, sign-extended from the 16-bit field to a full `i32`.
    pub fn value(self) -> i32 {
        (((self.0 >> VALUE_SHIFT) & VALUE_MASK) as u16) as i16 as i32
    }

    /// The raw (zero-extended) payload bits. Used where the field carries a
    /// bit pattern rather than a signed quantity, e.g. label hash fragments.
    pub fn value_bits(self) -> u32 {
        (self.0 >> VALUE_SHIFT) & VALUE_MASK
    }

    pub fn marker(self) -> u32 {
        self.0 & MARKER_MASK
    }

    /// The same molecule with the marker field replaced.
    pub fn with_marker(self, marker: u32) -> Result<Self, InvalidMolecule> {
        if marker > MARKER_MASK {
            return Err(InvalidMolecule::MarkerRange(marker));
        }
        Ok(Molecule((self.0 & !MARKER_MASK) | marker))
    }

    pub fn is_code(self) -> bool {
        self.kind() == MoleculeKind::Code
    }

    pub fn is_data(self) -> bool {
        self.kind() == MoleculeKind::Data
    }

    pub fn is_energy(self) -> bool {
        self.kind() == MoleculeKind::Energy
    }

    pub fn is_structure(self) -> bool {
        self.kind() == MoleculeKind::Structure
    }
}

impl Default for Molecule {
    fn default() -> Self {
        Molecule::NOP
    }
}

impl fmt::Debug for Molecule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}:{}", self.kind(), self.value())?;
        if self.marker() != 0 {
            write!(f, "#{}", self.marker())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use quickcheck_macros::quickcheck;

    use super::*;

    #[test]
    fn packs_fields_in_documented_positions() {
        let m = Molecule::new(MoleculeKind::Energy, -2, 5).unwrap();
        // type=2 at bit 20, value=0xfffe at bit 4, marker=5 at bit 0.
        assert_eq!(m.raw(), (2 << 20) | (0xfffe << 4) | 5);
    }

    #[test]
    fn rejects_out_of_range_fields() {
        assert_eq!(
            Molecule::new(MoleculeKind::Data, VALUE_MAX + 1, 0),
            Err(InvalidMolecule::ValueRange(VALUE_MAX + 1))
        );
        assert_eq!(
            Molecule::new(MoleculeKind::Data, VALUE_MIN - 1, 0),
            Err(InvalidMolecule::ValueRange(VALUE_MIN - 1))
        );
        assert_eq!(
            Molecule::new(MoleculeKind::Data, 0, 16),
            Err(InvalidMolecule::MarkerRange(16))
        );
    }

    #[test]
    fn rejects_bad_raw_patterns() {
        // Non-zero padding.
        assert!(Molecule::try_from_raw(1 << 23).is_err());
        // Unknown type tag (7).
        assert!(Molecule::try_from_raw(7 << 20).is_err());
        // A valid pattern survives.
        let m = Molecule::new(MoleculeKind::Structure, 12, 3).unwrap();
        assert_eq!(Molecule::try_from_raw(m.raw()), Ok(m));
    }

    #[test]
    fn nop_is_all_zero_code() {
        assert_eq!(Molecule::NOP.raw(), 0);
        assert!(Molecule::NOP.is_code());
        assert_eq!(Molecule::NOP.value(), 0);
    }

    #[quickcheck]
    fn pack_unpack_round_trip(kind: u8, value: i32, marker: u8) -> bool {
        let kind = MoleculeKind::from_u8(kind % 4).unwrap();
        let value = value.rem_euclid(1 << VALUE_BITS) + VALUE_MIN;
        let marker = (marker as u32) & MARKER_MASK;
        let m = Molecule::new(kind, value, marker).unwrap();
        m.kind() == kind && m.value() == value && m.marker() == marker
    }

    #[quickcheck]
    fn sign_extension_reproduces_the_payload(value: i16) -> bool {
        let m = Molecule::new(MoleculeKind::Data, value as i32, 0).unwrap();
        m.value() == value as i32
    }
}
