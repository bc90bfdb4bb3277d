// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

//! The tick engine: the serialization point of the simulation.
//!
//! One tick executes one instruction per live organism, in five phases:
//!
//! - **A, collect**: children forked on the previous tick join the live
//!   set.
//! - **B, execute** (parallel): contiguous chunks of organisms run the
//!   instruction pipeline on the worker pool; world writes are staged
//!   into per-chunk buffers, organism state is chunk-local.
//! - **C, merge and resolve** (single-threaded): chunk buffers
//!   concatenate in organism-id order; conflicting writes to one cell
//!   commit the lowest organism id, and every other writer is failed and
//!   refunded.
//! - **D, commit**: winning writes land in the world, label-index
//!   entries covered by a write are evicted (the single-writer label
//!   maintenance path), forked children materialize, and organisms whose
//!   ER reached zero retire.
//! - **E, emit**: an immutable snapshot goes to the sink, full or delta
//!   per the configured intervals.
//!
//! Determinism: conflict resolution is defined by organism id, never by
//! worker assignment, so the snapshot sequence is identical for every
//! pool size given the same seed and artifact.

use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ahash::{AHashMap, AHashSet};
use log::debug;
use rand::Rng;
use rand_chacha::rand_core::SeedableRng;
use rand_chacha::ChaCha8Rng;

use evochora_shared::artifact::Artifact;
use evochora_shared::coord::Coord;
use evochora_shared::error::FailKind;
use evochora_shared::OrganismId;

use crate::config::SimulationConfig;
use crate::exec::{execute_instruction, EffectSink, Shared, StagedWrite};
use crate::isa::{ConflictClass, InstructionRegistry};
use crate::loader;
use crate::organism::Organism;
use crate::snapshot::{CellImage, CellSnapshot, OrganismSnapshot, SnapshotSink, TickSnapshot};
use crate::thermo::ThermodynamicPolicy;
use crate::world::World;

mod pool;

use pool::TickPool;

/// A clonable handle that can stop the engine from any thread.
#[derive(Clone)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn shutdown(&self) {
        self.0.store(true, Ordering::Release);
    }
}

pub struct TickEngine<S: SnapshotSink> {
    config: SimulationConfig,
    registry: InstructionRegistry,
    policy: Box<dyn ThermodynamicPolicy>,

    world: World,
    /// Live organisms, kept sorted by id.
    organisms: Vec<Organism>,
    /// Children forked this tick; promoted to live in the next phase A.
    pending: Vec<Organism>,
    bindings: loader::BindingRegistry,
    labels: loader::LabelIndex,
    next_id: OrganismId,

    tick: u64,
    rng: ChaCha8Rng,
    id: String,
    pool: TickPool,
    stopped: Arc<AtomicBool>,
    sink: S,

    /// Cells written since the last emission, for delta images.
    changed: AHashSet<Coord>,
    emit_count: u64,
}

impl<S: SnapshotSink> TickEngine<S> {
    pub fn new(
        config: SimulationConfig,
        registry: InstructionRegistry,
        policy: Box<dyn ThermodynamicPolicy>,
        artifact: &Artifact,
        sink: S,
    ) -> anyhow::Result<TickEngine<S>> {
        config.validate()?;
        let loaded = loader::load(&config, &registry, artifact)?;

        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        let run_tag: u64 = rng.gen();
        let id = format!("{}-{:016x}", config.seed, run_tag);
        debug!(
            "initializing simulation {}: world {:?} ({:?}), {} organisms",
            id,
            loaded.world.shape(),
            loaded.world.topology(),
            loaded.organisms.len()
        );

        let pool = TickPool::new(config.engine.parallelism);
        Ok(TickEngine {
            pool,
            world: loaded.world,
            organisms: loaded.organisms,
            pending: Vec::new(),
            bindings: loaded.bindings,
            labels: loaded.labels,
            next_id: loaded.next_id,
            tick: 0,
            rng,
            id,
            stopped: Arc::new(AtomicBool::new(false)),
            sink,
            changed: AHashSet::new(),
            emit_count: 0,
            config,
            registry,
            policy,
        })
    }

    /// Runs one tick. Returns false without ticking once the engine is
    /// stopped. An in-flight tick always runs to completion; the stop
    /// flag is only consulted at this phase boundary.
    pub fn step(&mut self) -> anyhow::Result<bool> {
        if self.stopped.load(Ordering::Acquire) {
            return Ok(false);
        }

        // Phase A: collect. Promote last tick's children; ids stay
        // monotonic, so the live list stays sorted.
        self.organisms.append(&mut self.pending);

        // Phase B: execute in parallel.
        let mut outs = self.execute_phase();

        // Phase C: merge chunk buffers in organism-id order and resolve
        // write conflicts.
        let mut writes = Vec::new();
        let mut forks = Vec::new();
        for out in &mut outs {
            writes.append(&mut out.writes);
            forks.append(&mut out.forks);
        }
        let committed = self.resolve_conflicts(&writes);

        // Phase D: commit.
        for &index in &committed {
            let write = &writes[index];
            self.world.set(&write.coord, write.molecule, write.owner);
            self.changed.insert(write.coord.clone());
            // ER credits ride on the write: a harvested quantum lands
            // only with the committed cell.
            if write.energy_gain > 0 {
                self.organism_mut(write.org).absorb(write.energy_gain);
            }
            // Single-writer label maintenance: a committed write over a
            // label cell retires the label.
            if self.labels.contains_coord(&write.coord) {
                self.labels.evict(&write.coord);
            }
        }
        for fork in forks {
            let id = self.next_id;
            self.next_id += 1;
            let mut child = Organism::new(
                id,
                Some(fork.parent),
                self.tick + 1,
                fork.program_id,
                fork.ip,
                fork.dv,
                fork.energy,
                &self.config.organism,
            );
            child.drs = fork.drs;
            child.prs = fork.prs;
            self.pending.push(child);
        }
        self.organisms.retain(|org| !org.is_dead());

        // Phase E: emit.
        if self.tick % self.config.engine.sampling_interval == 0 {
            let snapshot = self.build_snapshot();
            self.sink.emit(snapshot);
            self.emit_count += 1;
        }

        self.tick += 1;
        Ok(true)
    }

    /// Runs up to `ticks` ticks; returns how many actually ran.
    pub fn run(&mut self, ticks: u64) -> anyhow::Result<u64> {
        for executed in 0..ticks {
            if !self.step()? {
                return Ok(executed);
            }
        }
        Ok(ticks)
    }

    fn execute_phase(&mut self) -> Vec<EffectSink> {
        struct Lane<'a> {
            organisms: &'a mut [Organism],
            out: EffectSink,
        }

        let live = self.organisms.len();
        if live == 0 {
            return Vec::new();
        }

        let stripes = self.pool.threads() * self.config.engine.chunk_interval;
        let chunk = live.div_ceil(stripes).max(1);

        let shared = Shared {
            world: &self.world,
            registry: &self.registry,
            policy: self.policy.as_ref(),
            bindings: &self.bindings,
            labels: &self.labels,
            config: &self.config,
            tick: self.tick,
        };
        let pool = &self.pool;
        let mut lanes: Vec<Lane<'_>> = self
            .organisms
            .chunks_mut(chunk)
            .map(|organisms| Lane {
                organisms,
                out: EffectSink::default(),
            })
            .collect();

        let barrier = catch_unwind(AssertUnwindSafe(|| {
            pool.execute(&mut lanes, |lane| {
                for org in lane.organisms.iter_mut() {
                    execute_instruction(org, &shared, &mut lane.out);
                }
            });
        }));

        if let Err(payload) = barrier {
            // An engine fault is fatal: stop, then re-raise the first
            // worker panic on this thread. The world stays readable
            // through the accessors.
            self.stopped.store(true, Ordering::Release);
            resume_unwind(payload);
        }
        lanes.into_iter().map(|lane| lane.out).collect()
    }

    /// Returns the indices of the writes that commit. Conflict rule: if
    /// every writer of a cell agrees on `(molecule, owner)`, one copy
    /// commits; otherwise the lowest organism id wins and the rest are
    /// failed with `WriteConflict` and refunded, unless their write was
    /// classed as not applicable to conflicts.
    fn resolve_conflicts(&mut self, writes: &[StagedWrite]) -> Vec<usize> {
        let mut by_coord: AHashMap<&Coord, Vec<usize>> = AHashMap::new();
        for (index, write) in writes.iter().enumerate() {
            by_coord.entry(&write.coord).or_default().push(index);
        }

        let mut committed = Vec::with_capacity(by_coord.len());
        let mut losers: Vec<(usize, OrganismId)> = Vec::new();
        for indices in by_coord.values() {
            // Writes are concatenated in organism-id order, so the first
            // index is the lowest-id writer.
            let winner = indices[0];
            committed.push(winner);
            if indices.len() == 1 {
                continue;
            }
            let unanimous = indices.iter().all(|&i| {
                writes[i].molecule == writes[winner].molecule
                    && writes[i].owner == writes[winner].owner
            });
            if unanimous {
                continue;
            }
            let winner_org = writes[winner].org;
            losers.extend(indices[1..].iter().map(|&i| (i, winner_org)));
        }

        for (index, winner_org) in losers {
            let write = &writes[index];
            if write.conflict == ConflictClass::NotApplicable {
                continue;
            }
            let org = self.organism_mut(write.org);
            org.refund(write.cost.energy, write.cost.entropy);
            org.note_failure(
                FailKind::WriteConflict,
                format!("write to {} lost to organism {}", write.coord, winner_org),
            );
        }
        committed
    }

    fn organism_mut(&mut self, id: OrganismId) -> &mut Organism {
        let position = self
            .organisms
            .binary_search_by_key(&id, |org| org.id)
            .expect("writer is live until end-of-tick retirement");
        &mut self.organisms[position]
    }

    fn build_snapshot(&mut self) -> TickSnapshot {
        let full = self.emit_count % self.config.engine.accumulated_delta_interval == 0;
        let cells = if full {
            self.changed.clear();
            CellImage::Full(
                self.world
                    .occupied()
                    .map(|(coord, cell)| CellSnapshot::capture(coord, cell))
                    .collect(),
            )
        } else {
            let mut coords: Vec<Coord> = self.changed.drain().collect();
            coords.sort();
            CellImage::Delta(
                coords
                    .into_iter()
                    .map(|coord| {
                        let cell = self.world.get(&coord);
                        CellSnapshot::capture(coord, cell)
                    })
                    .collect(),
            )
        };

        // Pending children are part of the population view: a fork is
        // visible in the very snapshot of the tick that staged it.
        let organisms = self
            .organisms
            .iter()
            .chain(self.pending.iter())
            .map(OrganismSnapshot::capture)
            .collect();

        TickSnapshot {
            tick: self.tick,
            rng_state: self.rng.get_word_pos(),
            cells,
            organisms,
        }
    }

    /// Stops the engine. Idempotent and safe from any thread via
    /// [`TickEngine::stop_handle`]; the current tick (if any) completes
    /// first.
    pub fn shutdown(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(self.stopped.clone())
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn simulation_id(&self) -> &str {
        &self.id
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn organisms(&self) -> &[Organism] {
        &self.organisms
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Consumes the engine, releasing the world and the sink.
    pub fn into_parts(self) -> (World, S) {
        (self.world, self.sink)
    }
}
