// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

//! Tick snapshots and the sink seam.
//!
//! A snapshot is an immutable, serializable view of one completed tick:
//! the cell image (full or delta) plus the complete runtime view of every
//! organism. The engine hands snapshots to a [`SnapshotSink`]; the sink
//! must not block the caller, and backpressure is the embedder's concern.

use serde::{Deserialize, Serialize};

use evochora_shared::coord::Coord;
use evochora_shared::error::FailKind;
use evochora_shared::OrganismId;

use crate::organism::{Frame, Organism, Value};
use crate::world::Cell;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickSnapshot {
    pub tick: u64,
    /// Word position of the seeded RNG stream, for bit-exact replays.
    pub rng_state: u128,
    pub cells: CellImage,
    pub organisms: Vec<OrganismSnapshot>,
}

/// Either every occupied cell, or only the cells changed since the
/// previous emission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CellImage {
    Full(Vec<CellSnapshot>),
    Delta(Vec<CellSnapshot>),
}

impl CellImage {
    pub fn cells(&self) -> &[CellSnapshot] {
        match self {
            CellImage::Full(cells) | CellImage::Delta(cells) => cells,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellSnapshot {
    pub coord: Coord,
    /// The packed molecule bits.
    pub molecule: u32,
    pub owner: OrganismId,
}

impl CellSnapshot {
    pub fn capture(coord: Coord, cell: Cell) -> CellSnapshot {
        CellSnapshot {
            coord,
            molecule: cell.molecule.raw(),
            owner: cell.owner,
        }
    }
}

/// The complete runtime view of one organism at a tick boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganismSnapshot {
    pub id: OrganismId,
    pub parent_id: Option<OrganismId>,
    pub birth_tick: u64,
    pub program_id: String,
    pub ip: Coord,
    pub dv: Coord,
    pub data_pointers: Vec<Coord>,
    pub active_dp: usize,
    pub drs: Vec<Value>,
    pub prs: Vec<Value>,
    pub fprs: Vec<Value>,
    pub lrs: Vec<Coord>,
    pub data_stack: Vec<Value>,
    pub call_stack: Vec<Frame>,
    pub location_stack: Vec<Coord>,
    pub er: u64,
    pub sr: u64,
    pub mr: u32,
    pub instruction_failed: bool,
    pub failure_reason: Option<FailKind>,
    pub failure_detail: Option<String>,
    pub failure_call_stack: Option<Vec<Frame>>,
}

impl OrganismSnapshot {
    pub fn capture(org: &Organism) -> OrganismSnapshot {
        OrganismSnapshot {
            id: org.id,
            parent_id: org.parent_id,
            birth_tick: org.birth_tick,
            program_id: org.program_id.clone(),
            ip: org.ip.clone(),
            dv: org.dv.clone(),
            data_pointers: org.data_pointers.clone(),
            active_dp: org.active_dp,
            drs: org.drs.clone(),
            prs: org.prs.clone(),
            fprs: org.fprs.clone(),
            lrs: org.lrs.clone(),
            data_stack: org.data_stack.clone(),
            call_stack: org.call_stack.clone(),
            location_stack: org.location_stack.clone(),
            er: org.er,
            sr: org.sr,
            mr: org.mr,
            instruction_failed: org.instruction_failed,
            failure_reason: org.failure_reason,
            failure_detail: org.failure_detail.clone(),
            failure_call_stack: org.failure_call_stack.clone(),
        }
    }
}

/// The abstract consumer of the snapshot stream.
pub trait SnapshotSink: Send {
    fn emit(&mut self, snapshot: TickSnapshot);
}

/// Discards every snapshot.
#[derive(Debug, Default)]
pub struct NullSink;

impl SnapshotSink for NullSink {
    fn emit(&mut self, _snapshot: TickSnapshot) {}
}

/// Buffers every snapshot in memory. The reference sink for tests and
/// small runs.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub snapshots: Vec<TickSnapshot>,
}

impl SnapshotSink for MemorySink {
    fn emit(&mut self, snapshot: TickSnapshot) {
        self.snapshots.push(snapshot);
    }
}
