// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

//! The n-dimensional molecule grid.
//!
//! The world is a flat vector of cells with a row-major (first axis
//! fastest) flatten/unflatten bijection. It owns no references to
//! organisms; organisms hold coordinates, never pointers into the grid.

use evochora_shared::coord::{Coord, Topology};
use evochora_shared::fault;
use evochora_shared::molecule::Molecule;
use evochora_shared::{OrganismId, UNOWNED};

use crate::FaultResult;

/// One grid cell: a molecule plus the id of the organism that last wrote
/// it (0 = unowned).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct Cell {
    pub molecule: Molecule,
    pub owner: OrganismId,
}

#[derive(Debug)]
pub struct World {
    shape: Vec<i32>,
    topology: Topology,
    cells: Vec<Cell>,
}

impl World {
    /// Allocates an empty world. Dimensions must be positive; the config
    /// layer validates this before construction.
    pub fn new(shape: Vec<i32>, topology: Topology) -> World {
        debug_assert!(!shape.is_empty() && shape.iter().all(|d| *d > 0));
        let size = shape.iter().map(|d| *d as usize).product();
        World {
            shape,
            topology,
            cells: vec![Cell::default(); size],
        }
    }

    pub fn shape(&self) -> &[i32] {
        &self.shape
    }

    pub fn topology(&self) -> Topology {
        self.topology
    }

    pub fn dims(&self) -> usize {
        self.shape.len()
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn contains(&self, coord: &Coord) -> bool {
        coord.dims() == self.dims()
            && coord
                .0
                .iter()
                .zip(&self.shape)
                .all(|(c, d)| (0..*d).contains(c))
    }

    /// The flat index of an in-world coordinate.
    pub fn flatten(&self, coord: &Coord) -> usize {
        debug_assert!(self.contains(coord));
        let mut index = 0usize;
        let mut stride = 1usize;
        for (c, d) in coord.0.iter().zip(&self.shape) {
            index += *c as usize * stride;
            stride *= *d as usize;
        }
        index
    }

    /// Inverse of [`World::flatten`].
    pub fn unflatten(&self, mut index: usize) -> Coord {
        debug_assert!(index < self.cells.len());
        let mut out = Vec::with_capacity(self.dims());
        for d in &self.shape {
            out.push((index % *d as usize) as i32);
            index /= *d as usize;
        }
        Coord(out)
    }

    /// Reads a cell. The coordinate must be inside the world; all engine
    /// coordinates are produced by [`World::offset`], which guarantees it.
    pub fn get(&self, coord: &Coord) -> Cell {
        self.cells[self.flatten(coord)]
    }

    /// Unconditional write. The engine only calls this from the tick
    /// commit phase.
    pub fn set(&mut self, coord: &Coord, molecule: Molecule, owner: OrganismId) {
        let index = self.flatten(coord);
        self.cells[index] = Cell { molecule, owner };
    }

    /// `coord + delta * scale` under this world's topology. A TORUS wraps
    /// per dimension; a BOUNDED world yields an out-of-bounds fault, which
    /// callers surface as an instruction failure.
    pub fn offset(&self, coord: &Coord, delta: &Coord, scale: i32) -> FaultResult<Coord> {
        debug_assert_eq!(coord.dims(), delta.dims());
        let mut out = coord.offset(delta, scale);
        match self.topology {
            Topology::Torus => {
                for (c, d) in out.0.iter_mut().zip(&self.shape) {
                    *c = c.rem_euclid(*d);
                }
                Ok(out)
            }
            Topology::Bounded => {
                if self.contains(&out) {
                    Ok(out)
                } else {
                    Err(fault!(OutOfBounds; "{} leaves the bounded world", out))
                }
            }
        }
    }

    /// Axis-aligned unit-step neighbors, respecting topology. In a BOUNDED
    /// world, steps over the edge are omitted.
    pub fn neighbors<'a>(&'a self, coord: &'a Coord) -> impl Iterator<Item = Coord> + 'a {
        use itertools::Itertools;
        (0..self.dims())
            .cartesian_product([false, true])
            .filter_map(move |(axis, negative)| {
                let unit = Coord::unit(self.dims(), axis, negative);
                self.offset(coord, &unit, 1).ok()
            })
    }

    /// Non-empty cells: anything that differs from the all-zero cell.
    /// This is the "full image" a snapshot carries.
    pub fn occupied(&self) -> impl Iterator<Item = (Coord, Cell)> + '_ {
        self.cells.iter().enumerate().filter_map(|(i, cell)| {
            if cell.molecule.raw() != 0 || cell.owner != UNOWNED {
                Some((self.unflatten(i), *cell))
            } else {
                None
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use evochora_shared::error::FailKind;
    use evochora_shared::molecule::MoleculeKind;
    use quickcheck_macros::quickcheck;

    use super::*;

    #[quickcheck]
    fn torus_offsets_always_land_inside(x: i8, y: i8, dx: i8, dy: i8, scale: i8) -> bool {
        let world = World::new(vec![7, 5], Topology::Torus);
        let coord = Coord(vec![(x as i32).rem_euclid(7), (y as i32).rem_euclid(5)]);
        let delta = Coord(vec![dx as i32, dy as i32]);
        let moved = world.offset(&coord, &delta, scale as i32).unwrap();
        world.contains(&moved)
    }

    #[test]
    fn flatten_unflatten_bijection() {
        let world = World::new(vec![4, 3, 2], Topology::Torus);
        for i in 0..world.len() {
            let coord = world.unflatten(i);
            assert!(world.contains(&coord));
            assert_eq!(world.flatten(&coord), i);
        }
    }

    #[test]
    fn torus_wraps_into_range() {
        let world = World::new(vec![5, 3], Topology::Torus);
        let coord = world
            .offset(&Coord(vec![4, 0]), &Coord(vec![3, -4]), 1)
            .unwrap();
        assert_eq!(coord, Coord(vec![2, 2]));
        assert!(world.contains(&coord));
    }

    #[test]
    fn bounded_rejects_walk_off() {
        let world = World::new(vec![5, 3], Topology::Bounded);
        let err = world
            .offset(&Coord(vec![4, 0]), &Coord(vec![1, 0]), 1)
            .unwrap_err();
        assert_eq!(err.kind(), FailKind::OutOfBounds);
    }

    #[test]
    fn neighbors_respect_topology() {
        let torus = World::new(vec![4, 4], Topology::Torus);
        let origin = Coord(vec![0, 0]);
        assert_eq!(torus.neighbors(&origin).count(), 4);

        let bounded = World::new(vec![4, 4], Topology::Bounded);
        let corner: Vec<Coord> = bounded.neighbors(&origin).collect();
        assert_eq!(corner, vec![Coord(vec![1, 0]), Coord(vec![0, 1])]);
    }

    #[test]
    fn writes_record_the_owner() {
        let mut world = World::new(vec![4], Topology::Torus);
        let m = Molecule::new(MoleculeKind::Data, 9, 0).unwrap();
        world.set(&Coord(vec![2]), m, 7);
        let cell = world.get(&Coord(vec![2]));
        assert_eq!(cell.molecule, m);
        assert_eq!(cell.owner, 7);
        assert_eq!(world.occupied().count(), 1);
    }
}
