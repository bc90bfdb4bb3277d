// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

//! End-to-end tick scenarios: small worlds, hand-placed programs, and
//! assertions over the resulting organism state, cells, and snapshots.

use pretty_assertions::assert_eq;

use evochora::config::SimulationConfig;
use evochora::isa::standard::opcode_by_name;
use evochora::isa::InstructionRegistry;
use evochora::snapshot::MemorySink;
use evochora::{TickEngine, UniversalPolicy};
use evochora_shared::artifact::{Artifact, LabelEntry, OrganismSeed, Placement};
use evochora_shared::coord::{Coord, Topology};
use evochora_shared::error::FailKind;
use evochora_shared::label::LabelHash;
use evochora_shared::molecule::{Molecule, MoleculeKind};
use evochora_shared::register::RegisterId;

fn code(name: &str) -> u32 {
    let id = opcode_by_name(name).unwrap_or_else(|| panic!("unknown opcode {}", name));
    Molecule::new(MoleculeKind::Code, id.raw() as i32, 0)
        .unwrap()
        .raw()
}

fn data(value: i32) -> u32 {
    Molecule::new(MoleculeKind::Data, value, 0).unwrap().raw()
}

fn energy(value: i32) -> u32 {
    Molecule::new(MoleculeKind::Energy, value, 0).unwrap().raw()
}

fn reg(id: RegisterId) -> u32 {
    data(u16::from(id) as i32)
}

/// Places a run of molecules along +x starting at `(x, y)`.
fn place_row(artifact: &mut Artifact, x: i32, y: i32, cells: &[u32]) {
    for (i, molecule) in cells.iter().enumerate() {
        artifact.placements.push(Placement {
            coord: Coord(vec![x + i as i32, y]),
            molecule: *molecule,
        });
    }
}

fn seed(artifact: &mut Artifact, x: i32, y: i32, energy: u64) {
    artifact.initial_organisms.push(OrganismSeed {
        coord: Coord(vec![x, y]),
        dv: Coord(vec![1, 0]),
        energy,
        program_id: "scenario".into(),
    });
}

fn config_for(artifact: &Artifact) -> SimulationConfig {
    let mut config = SimulationConfig::default();
    config.shape(artifact.meta.shape.clone());
    config.topology(artifact.meta.topology);
    config
}

fn engine_with(config: SimulationConfig, artifact: &Artifact) -> TickEngine<MemorySink> {
    let policy = UniversalPolicy::new(config.thermodynamics.clone());
    TickEngine::new(
        config,
        InstructionRegistry::standard(),
        Box::new(policy),
        artifact,
        MemorySink::default(),
    )
    .unwrap()
}

#[test]
fn nop_spin_costs_base_energy_per_tick() {
    let mut artifact = Artifact::empty(vec![10, 1], Topology::Torus);
    place_row(&mut artifact, 0, 0, &[code("NOP"); 10]);
    seed(&mut artifact, 0, 0, 100);

    let mut config = config_for(&artifact);
    config.thermodynamics.default_rule.energy = 1;
    config.thermodynamics.default_rule.entropy = 1;

    let mut engine = engine_with(config, &artifact);
    engine.run(10).unwrap();

    let org = &engine.organisms()[0];
    assert_eq!(org.ip, Coord(vec![0, 0]));
    assert_eq!(org.er, 90);
    assert_eq!(org.sr, 10);
    assert!(!org.instruction_failed);
    assert_eq!(engine.sink().snapshots.len(), 10);
}

#[test]
fn harvest_transfers_the_quantum_and_empties_the_cell() {
    let mut artifact = Artifact::empty(vec![6, 2], Topology::Torus);
    // Energy row.
    place_row(&mut artifact, 1, 0, &[energy(10), energy(10), energy(10)]);
    // Program row: move the data pointer onto the first quantum, harvest.
    place_row(
        &mut artifact,
        0,
        1,
        &[code("SEEKI"), data(1), data(-1), code("HARVEST")],
    );
    seed(&mut artifact, 0, 1, 100);

    let mut engine = engine_with(config_for(&artifact), &artifact);
    engine.run(2).unwrap();

    let org = &engine.organisms()[0];
    assert!(!org.instruction_failed);
    // Two base charges, one quantum of 10 absorbed.
    assert_eq!(org.er, 108);

    let cell = engine.world().get(&Coord(vec![1, 0]));
    assert_eq!(cell.molecule.kind(), MoleculeKind::Energy);
    assert_eq!(cell.molecule.value(), 0);
    assert_eq!(cell.owner, 1);
}

#[test]
fn conflicting_writes_commit_the_lowest_id_and_refund_the_loser() {
    let mut artifact = Artifact::empty(vec![12, 12], Topology::Torus);
    let dr0 = RegisterId::data(0);
    // Both organisms load CODE:0 into %DR0 and poke it at (5|5),
    // addressed relative to their own data pointers.
    let program = |delta_x: i32, delta_y: i32| {
        vec![
            code("PUSHI"),
            code("NOP"),
            code("POP"),
            reg(dr0),
            code("POKEI"),
            reg(dr0),
            data(delta_x),
            data(delta_y),
        ]
    };
    place_row(&mut artifact, 0, 0, &program(5, 5));
    place_row(&mut artifact, 0, 9, &program(5, -4));
    seed(&mut artifact, 0, 0, 100);
    seed(&mut artifact, 0, 9, 100);

    let mut engine = engine_with(config_for(&artifact), &artifact);
    engine.run(3).unwrap();

    // The lower id won the cell.
    let cell = engine.world().get(&Coord(vec![5, 5]));
    assert_eq!(cell.owner, 1);
    assert_eq!(cell.molecule, Molecule::NOP);

    let winner = &engine.organisms()[0];
    assert!(!winner.instruction_failed);

    let loser = &engine.organisms()[1];
    assert!(loser.instruction_failed);
    assert_eq!(loser.failure_reason, Some(FailKind::WriteConflict));
    // The poke's cost was refunded: only the two preceding ticks were
    // paid for.
    assert_eq!(loser.er, 98);
}

#[test]
fn fuzzy_jump_selects_the_hamming_nearest_label() {
    let mut artifact = Artifact::empty(vec![16, 1], Topology::Torus);
    // JMPI with hash 0x10001: low cell 0x0001, high cell 0x1.
    place_row(&mut artifact, 0, 0, &[code("JMPI"), data(1), data(1)]);
    artifact.labels.insert(
        "alpha".into(),
        LabelEntry {
            coord: Coord(vec![9, 0]),
            hash: LabelHash::from_raw(0x10000), // distance 1
        },
    );
    artifact.labels.insert(
        "beta".into(),
        LabelEntry {
            coord: Coord(vec![12, 0]),
            hash: LabelHash::from_raw(0x10007), // distance 2
        },
    );
    seed(&mut artifact, 0, 0, 100);

    let mut engine = engine_with(config_for(&artifact), &artifact);
    engine.run(1).unwrap();
    assert_eq!(engine.organisms()[0].ip, Coord(vec![9, 0]));

    // With tolerance 0 the same jump fails and the IP walks past the
    // instruction instead.
    let mut strict = config_for(&artifact);
    strict.fuzzy_jump_tolerance = 0;
    let mut engine = engine_with(strict, &artifact);
    engine.run(1).unwrap();
    let org = &engine.organisms()[0];
    assert!(org.instruction_failed);
    assert_eq!(org.failure_reason, Some(FailKind::NoLabelMatch));
    assert_eq!(org.ip, Coord(vec![3, 0]));
}

#[test]
fn fork_splits_energy_and_stamps_the_entry_cell() {
    let mut artifact = Artifact::empty(vec![8, 8], Topology::Torus);
    place_row(
        &mut artifact,
        0,
        0,
        &[
            code("SETMR"),
            data(3),
            code("FORK"),
            data(-2), // delta: entry at (0|3)
            data(3),
            data(1), // child DV (1|0)
            data(0),
        ],
    );
    place_row(&mut artifact, 0, 3, &[code("NOP")]);
    seed(&mut artifact, 0, 0, 100);

    let mut engine = engine_with(config_for(&artifact), &artifact);
    engine.run(2).unwrap();

    // Parent: 100 - 1 (SETMR) = 99, minus the 49-point endowment, minus
    // the FORK charge.
    let parent = &engine.organisms()[0];
    assert_eq!(parent.er, 49);
    assert_eq!(parent.mr, 3);

    // The child is already visible in the fork tick's snapshot.
    let snapshot = &engine.sink().snapshots[1];
    let ids: Vec<_> = snapshot.organisms.iter().map(|o| o.id).collect();
    assert_eq!(ids, vec![1, 2]);
    let child = &snapshot.organisms[1];
    assert_eq!(child.parent_id, Some(1));
    assert_eq!(child.er, 49);
    assert_eq!(child.ip, Coord(vec![0, 3]));
    assert_eq!(child.dv, Coord(vec![1, 0]));

    // The entry cell carries the parent's marker, owned by the parent.
    let entry = engine.world().get(&Coord(vec![0, 3]));
    assert_eq!(entry.molecule.marker(), 3);
    assert_eq!(entry.owner, 1);

    // Next tick the child executes its NOP and moves on.
    engine.run(1).unwrap();
    let child = engine
        .organisms()
        .iter()
        .find(|o| o.id == 2)
        .expect("child is live");
    assert_eq!(child.ip, Coord(vec![1, 3]));
    assert_eq!(child.er, 48);
}

#[test]
fn losing_a_harvest_conflict_drops_the_quantum_with_the_write() {
    let mut artifact = Artifact::empty(vec![8, 4], Topology::Torus);
    place_row(&mut artifact, 4, 0, &[energy(10)]);
    // Both organisms steer their data pointers onto the same quantum and
    // harvest it in the same tick.
    place_row(
        &mut artifact,
        0,
        1,
        &[code("SEEKI"), data(4), data(-1), code("HARVEST")],
    );
    place_row(
        &mut artifact,
        0,
        2,
        &[code("SEEKI"), data(4), data(-2), code("HARVEST")],
    );
    seed(&mut artifact, 0, 1, 100);
    seed(&mut artifact, 0, 2, 100);

    let mut engine = engine_with(config_for(&artifact), &artifact);
    engine.run(2).unwrap();

    let cell = engine.world().get(&Coord(vec![4, 0]));
    assert_eq!(cell.molecule.kind(), MoleculeKind::Energy);
    assert_eq!(cell.molecule.value(), 0);
    assert_eq!(cell.owner, 1);

    // The winner banked the quantum on top of its two base charges.
    let winner = &engine.organisms()[0];
    assert!(!winner.instruction_failed);
    assert_eq!(winner.er, 108);

    // The loser got its cost back and nothing else: no ghost quantum.
    let loser = &engine.organisms()[1];
    assert!(loser.instruction_failed);
    assert_eq!(loser.failure_reason, Some(FailKind::WriteConflict));
    assert_eq!(loser.er, 99);
}

#[test]
fn full_split_fork_spends_the_parent_without_underflow() {
    let mut artifact = Artifact::empty(vec![8, 4], Topology::Torus);
    place_row(
        &mut artifact,
        0,
        0,
        &[code("FORK"), data(0), data(2), data(1), data(0)],
    );
    place_row(&mut artifact, 0, 2, &[code("NOP")]);
    seed(&mut artifact, 0, 0, 100);

    let mut config = config_for(&artifact);
    config.organism.fork_energy_split_permille = 1000;

    let mut engine = engine_with(config, &artifact);
    engine.run(2).unwrap();

    // The endowment is the whole balance net of the FORK's charge: the
    // parent pays 1, hands over 99, and retires at zero.
    let ids: Vec<_> = engine.organisms().iter().map(|o| o.id).collect();
    assert_eq!(ids, vec![2]);
    let child = &engine.organisms()[0];
    assert_eq!(child.parent_id, Some(1));
    assert_eq!(child.er, 98);
    assert_eq!(child.ip, Coord(vec![1, 2]));
}

#[test]
fn out_of_energy_organisms_retire_at_the_end_of_the_tick() {
    let mut artifact = Artifact::empty(vec![4, 1], Topology::Torus);
    place_row(&mut artifact, 0, 0, &[code("NOP"); 4]);
    seed(&mut artifact, 0, 0, 3);

    let mut config = config_for(&artifact);
    config.thermodynamics = serde_json::from_str(
        r#"{ "overrides": [ { "pattern": "NOP", "base": { "energy": 5 } } ] }"#,
    )
    .unwrap();

    let mut engine = engine_with(config, &artifact);
    engine.run(2).unwrap();

    assert!(engine.organisms().is_empty());
    let first = &engine.sink().snapshots[0];
    assert!(first.organisms.is_empty());
    let second = &engine.sink().snapshots[1];
    assert!(second.organisms.is_empty());
}

#[test]
fn snapshot_sequences_are_identical_across_pool_sizes() {
    let build = || {
        let mut artifact = Artifact::empty(vec![8, 8], Topology::Torus);
        place_row(
            &mut artifact,
            0,
            0,
            &[
                code("SETMR"),
                data(3),
                code("FORK"),
                data(-2),
                data(3),
                data(1),
                data(0),
            ],
        );
        place_row(&mut artifact, 0, 3, &[code("NOP")]);
        place_row(&mut artifact, 0, 5, &[code("NOP"); 8]);
        seed(&mut artifact, 0, 0, 100);
        seed(&mut artifact, 0, 5, 60);
        artifact
    };

    let run = |parallelism: usize, chunk_interval: usize| {
        let artifact = build();
        let mut config = config_for(&artifact);
        config.parallelism(parallelism);
        config.engine.chunk_interval = chunk_interval;
        config.seed(42);
        let mut engine = engine_with(config, &artifact);
        engine.run(6).unwrap();
        let (_, sink) = engine.into_parts();
        serde_json::to_string(&sink.snapshots).unwrap()
    };

    let baseline = run(2, 1);
    assert_eq!(run(4, 1), baseline);
    assert_eq!(run(4, 3), baseline);
    assert_eq!(run(2, 1), baseline);
}

#[test]
fn shutdown_is_idempotent_and_stops_future_ticks() {
    let mut artifact = Artifact::empty(vec![4, 1], Topology::Torus);
    place_row(&mut artifact, 0, 0, &[code("NOP"); 4]);
    seed(&mut artifact, 0, 0, 100);

    let mut engine = engine_with(config_for(&artifact), &artifact);
    engine.run(2).unwrap();

    let handle = engine.stop_handle();
    handle.shutdown();
    handle.shutdown();
    engine.shutdown();

    assert!(engine.is_stopped());
    assert_eq!(engine.run(5).unwrap(), 0);
    assert_eq!(engine.tick(), 2);
    assert_eq!(engine.sink().snapshots.len(), 2);
}
