// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

//! World coordinates and topology.

use std::fmt;
use std::ops::Index;

use serde::{Deserialize, Serialize};

/// How the world behaves at its edges.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Topology {
    Torus,
    Bounded,
}

/// An n-dimensional integer coordinate (or displacement).
///
/// `Ord` is lexicographic; the tick engine relies on this as the
/// deterministic tie-break order for equidistant fuzzy-jump targets.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Coord(pub Vec<i32>);

impl Coord {
    /// The all-zero coordinate of the given dimensionality.
    pub fn origin(dims: usize) -> Self {
        Coord(vec![0; dims])
    }

    /// The unit displacement along `axis`, positive or negative.
    pub fn unit(dims: usize, axis: usize, negative: bool) -> Self {
        let mut v = vec![0; dims];
        v[axis] = if negative { -1 } else { 1 };
        Coord(v)
    }

    pub fn dims(&self) -> usize {
        self.0.len()
    }

    /// True for axis-aligned unit displacements, the only legal DV values.
    pub fn is_axis_unit(&self) -> bool {
        self.0.iter().filter(|c| **c != 0).count() == 1
            && self.0.iter().all(|c| (-1..=1).contains(c))
    }

    /// Component-wise `self + delta * scale`. Panics on dimension mismatch;
    /// callers validate dimensionality at the world boundary.
    pub fn offset(&self, delta: &Coord, scale: i32) -> Coord {
        debug_assert_eq!(self.dims(), delta.dims());
        Coord(
            self.0
                .iter()
                .zip(&delta.0)
                .map(|(a, b)| a + b * scale)
                .collect(),
        )
    }
}

impl Index<usize> for Coord {
    type Output = i32;

    fn index(&self, axis: usize) -> &i32 {
        &self.0[axis]
    }
}

impl From<Vec<i32>> for Coord {
    fn from(v: Vec<i32>) -> Self {
        Coord(v)
    }
}

impl fmt::Debug for Coord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, c) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "|")?;
            }
            write!(f, "{}", c)?;
        }
        write!(f, ")")
    }
}

impl fmt::Display for Coord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
