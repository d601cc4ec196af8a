//! End-to-end scenario tests (S1-S6) and cross-cutting invariants, driven
//! against the public `run`/`RecordingBackend` surface rather than the
//! internal two-pass API each `src/*.rs` module already exercises on its
//! own (`spec.md` §8).

use jit_backend::backend::RecordingBackend;
use jit_backend::block::BasicBlockManager;
use jit_backend::call_descriptor::CallDescriptor;
use jit_backend::ids::{BlockId, NodeId};
use jit_backend::liveness::LivenessAnalysisVisitor;
use jit_backend::schedule::{CallSiteDescriptor, NodeOp, Schedule, ScheduleEmitter, ScheduledBlock, Terminator};
use jit_backend::stackmap::MachineLocation;
use jit_backend::types::{MachineRepresentation, PatchKind, PrologueKind, WriteBarrierKind};
use jit_backend::{run, CodeKind};

fn n(raw: u32) -> NodeId {
    NodeId::from_raw(raw)
}
fn b(raw: u32) -> BlockId {
    BlockId::from_raw(raw)
}

/// Encodes one `.llvm_stackmaps`-format (version 3) section describing a
/// single record, symmetric to `stackmap::parse_stack_map_section`'s
/// decoder. Lets a test hand `RecordingBackend` real wire bytes and drive
/// `run`'s actual parsing/binding path instead of calling the binder
/// directly with a hand-built `StackMapRecord`.
fn encode_stack_map_section(patch_id: u64, locations: &[MachineLocation]) -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.push(3u8); // Version.
    bytes.push(0u8); // Reserved.
    bytes.extend_from_slice(&0u16.to_le_bytes()); // Reserved.
    bytes.extend_from_slice(&0u32.to_le_bytes()); // NumFunctions.
    bytes.extend_from_slice(&0u32.to_le_bytes()); // NumConstants.
    bytes.extend_from_slice(&1u32.to_le_bytes()); // NumRecords.

    bytes.extend_from_slice(&patch_id.to_le_bytes());
    bytes.extend_from_slice(&0u32.to_le_bytes()); // InstructionOffset.
    bytes.extend_from_slice(&0u16.to_le_bytes()); // Reserved.
    bytes.extend_from_slice(&(locations.len() as u16).to_le_bytes());
    for location in locations {
        let (kind, dwarf_reg_num, offset_or_small_constant): (u8, u16, i32) = match *location {
            MachineLocation::Register(reg) => (1, reg, 0),
            MachineLocation::FrameSlot(offset) => (3, 0, offset),
        };
        bytes.push(kind);
        bytes.push(0u8); // Reserved.
        bytes.extend_from_slice(&0u16.to_le_bytes()); // LocationSize.
        bytes.extend_from_slice(&dwarf_reg_num.to_le_bytes());
        bytes.extend_from_slice(&0u16.to_le_bytes()); // Reserved.
        bytes.extend_from_slice(&offset_or_small_constant.to_le_bytes());
    }
    bytes.extend_from_slice(&0u16.to_le_bytes()); // Padding.
    bytes.extend_from_slice(&0u16.to_le_bytes()); // NumLiveOuts.
    bytes
}

/// Surfaces `driver::run`'s `log::trace!`/`debug!` output under
/// `RUST_LOG=trace` for manual debugging; a no-op otherwise. Safe to call
/// from every test since `env_logger::try_init` only installs the global
/// logger once per process.
fn init_logging() {
    let _ = env_logger::try_init();
}

/// S1: one block, param(0), const(1), add(2, 0, 1), return([2]).
#[test]
fn s1_straight_line() {
    init_logging();
    let schedule = Schedule {
        blocks: vec![ScheduledBlock {
            id: b(0),
            is_deferred: false,
            predecessors: vec![],
            nodes: vec![
                (n(0), NodeOp::Parameter(0)),
                (n(1), NodeOp::Int32Constant(1)),
                (n(2), NodeOp::Int32Add(n(0), n(1))),
            ],
            terminator: Terminator::Return {
                pop_count: n(0),
                values: vec![n(2)],
            },
        }],
    };
    let compiled = run(
        RecordingBackend::new(),
        &schedule,
        &CallDescriptor::empty(false),
        "s1",
        CodeKind::Stub,
    )
    .unwrap();
    assert_eq!(compiled.code_sections.len(), 1);
    assert!(compiled.stack_map_info.is_empty());
    assert!(!compiled.needs_frame);
}

/// S2: diamond B0 -> {B1, B2} -> B3, phi(10, [v1, v2]), return([10]).
/// Property 1/2/3: live-in correctness, phi live-out, sorted/deduped.
#[test]
fn s2_diamond_phi_live_in_placement() {
    let v1 = n(1);
    let v2 = n(2);
    let schedule = Schedule {
        blocks: vec![
            ScheduledBlock {
                id: b(0),
                is_deferred: false,
                predecessors: vec![],
                nodes: vec![(n(0), NodeOp::Int32Constant(0))],
                terminator: Terminator::Branch {
                    condition: n(0),
                    if_true: b(1),
                    if_false: b(2),
                },
            },
            ScheduledBlock {
                id: b(1),
                is_deferred: false,
                predecessors: vec![b(0)],
                nodes: vec![(v1, NodeOp::Int32Constant(1))],
                terminator: Terminator::Goto(b(3)),
            },
            ScheduledBlock {
                id: b(2),
                is_deferred: false,
                predecessors: vec![b(0)],
                nodes: vec![(v2, NodeOp::Int32Constant(2))],
                terminator: Terminator::Goto(b(3)),
            },
            ScheduledBlock {
                id: b(3),
                is_deferred: false,
                predecessors: vec![b(1), b(2)],
                nodes: vec![(
                    n(10),
                    NodeOp::Phi {
                        rep: MachineRepresentation::Word32,
                        operands: vec![v1, v2],
                    },
                )],
                terminator: Terminator::Return {
                    pop_count: n(10),
                    values: vec![n(10)],
                },
            },
        ],
    };

    // Exercise pass 1 directly so we can inspect per-block live-in sets
    // (not observable through `run`'s `CompiledFunction` output).
    let mut blocks = BasicBlockManager::new();
    let mut visitor = LivenessAnalysisVisitor::new(&mut blocks);
    ScheduleEmitter::new(&schedule).emit(&mut visitor).unwrap();
    visitor.calculate_live_ins().unwrap();
    assert_eq!(blocks.find_block(b(1)).unwrap().live_ins(), &[v1]);
    assert_eq!(blocks.find_block(b(2)).unwrap().live_ins(), &[v2]);
    assert!(blocks.find_block(b(3)).unwrap().live_ins().is_empty());
    // Property 3: strictly increasing (trivially true for singletons/empty,
    // checked properly by `set_live_ins_sorts_and_dedupes` in `block.rs`).
    for id in [b(0), b(1), b(2), b(3)] {
        let live = blocks.find_block(id).unwrap().live_ins();
        assert!(live.windows(2).all(|w| w[0] < w[1]));
    }

    let compiled = run(
        RecordingBackend::new(),
        &schedule,
        &CallDescriptor::empty(false),
        "s2",
        CodeKind::Stub,
    )
    .unwrap();
    assert_eq!(compiled.code_sections.len(), 1);
}

/// S3: loop B0 -> B1 -> B2 -> B1, phi in B1 from B0 and B2.
/// Property 4: fixed-point idempotence.
#[test]
fn s3_loop_fixed_point_is_idempotent() {
    let init = n(0);
    let carried = n(1);
    let schedule = Schedule {
        blocks: vec![
            ScheduledBlock {
                id: b(0),
                is_deferred: false,
                predecessors: vec![],
                nodes: vec![(init, NodeOp::Int32Constant(0))],
                terminator: Terminator::Goto(b(1)),
            },
            ScheduledBlock {
                id: b(1),
                is_deferred: false,
                predecessors: vec![b(0), b(2)],
                nodes: vec![(
                    n(10),
                    NodeOp::Phi {
                        rep: MachineRepresentation::Word32,
                        operands: vec![init, carried],
                    },
                )],
                terminator: Terminator::Branch {
                    condition: n(10),
                    if_true: b(2),
                    if_false: b(3),
                },
            },
            ScheduledBlock {
                id: b(2),
                is_deferred: false,
                predecessors: vec![b(1)],
                nodes: vec![(carried, NodeOp::Int32Add(n(10), n(10)))],
                terminator: Terminator::Goto(b(1)),
            },
            ScheduledBlock {
                id: b(3),
                is_deferred: false,
                predecessors: vec![b(1)],
                nodes: vec![],
                terminator: Terminator::Return {
                    pop_count: n(10),
                    values: vec![n(10)],
                },
            },
        ],
    };

    let mut blocks = BasicBlockManager::new();
    let mut visitor = LivenessAnalysisVisitor::new(&mut blocks);
    ScheduleEmitter::new(&schedule).emit(&mut visitor).unwrap();
    visitor.calculate_live_ins().unwrap();
    let before: Vec<_> = [b(0), b(1), b(2), b(3)]
        .iter()
        .map(|&id| blocks.find_block(id).unwrap().live_ins().to_vec())
        .collect();

    // Rerunning the fixed point from scratch on the same schedule must
    // converge to the same live-in sets (`spec.md` §8, property 4): the
    // worklist algorithm is a monotone fixed point, so a second run over an
    // identical CFG reaches an identical answer.
    let mut replay_blocks = BasicBlockManager::new();
    {
        let mut replay = LivenessAnalysisVisitor::new(&mut replay_blocks);
        ScheduleEmitter::new(&schedule).emit(&mut replay).unwrap();
        replay.calculate_live_ins().unwrap();
    }
    let after: Vec<_> = [b(0), b(1), b(2), b(3)]
        .iter()
        .map(|&id| replay_blocks.find_block(id).unwrap().live_ins().to_vec())
        .collect();
    pretty_assertions::assert_eq!(before, after);

    let compiled = run(
        RecordingBackend::new(),
        &schedule,
        &CallDescriptor::empty(false),
        "s3",
        CodeKind::Stub,
    )
    .unwrap();
    assert_eq!(compiled.code_sections.len(), 1);
}

/// S4: overflow chain. `Int32AddWithOverflow` then two `Projection`s,
/// branch on the second.
#[test]
fn s4_overflow_chain_compiles() {
    let schedule = Schedule {
        blocks: vec![
            ScheduledBlock {
                id: b(0),
                is_deferred: false,
                predecessors: vec![],
                nodes: vec![
                    (n(0), NodeOp::Parameter(0)),
                    (n(1), NodeOp::Parameter(1)),
                    (n(5), NodeOp::Int32AddWithOverflow(n(0), n(1))),
                    (
                        n(6),
                        NodeOp::Projection {
                            input: n(5),
                            index: 0,
                        },
                    ),
                    (
                        n(7),
                        NodeOp::Projection {
                            input: n(5),
                            index: 1,
                        },
                    ),
                ],
                terminator: Terminator::Branch {
                    condition: n(7),
                    if_true: b(1),
                    if_false: b(2),
                },
            },
            ScheduledBlock {
                id: b(1),
                is_deferred: true,
                predecessors: vec![b(0)],
                nodes: vec![],
                terminator: Terminator::Return {
                    pop_count: n(0),
                    values: vec![],
                },
            },
            ScheduledBlock {
                id: b(2),
                is_deferred: false,
                predecessors: vec![b(0)],
                nodes: vec![],
                terminator: Terminator::Return {
                    pop_count: n(6),
                    values: vec![n(6)],
                },
            },
        ],
    };
    let compiled = run(
        RecordingBackend::new(),
        &schedule,
        &CallDescriptor::empty(false),
        "s4",
        CodeKind::Stub,
    )
    .unwrap();
    assert_eq!(compiled.code_sections.len(), 1);
}

/// S5: tagged store with a full write barrier.
#[test]
fn s5_write_barrier_store_needs_frame_and_records_patch() {
    let schedule = Schedule {
        blocks: vec![ScheduledBlock {
            id: b(0),
            is_deferred: false,
            predecessors: vec![],
            nodes: vec![
                (n(0), NodeOp::Parameter(0)),
                (n(1), NodeOp::Parameter(1)),
                (n(2), NodeOp::Int32Constant(0)),
                (
                    n(3),
                    NodeOp::Store {
                        rep: MachineRepresentation::Tagged,
                        barrier: WriteBarrierKind::Full,
                        base: n(0),
                        offset: n(2),
                        value: n(1),
                    },
                ),
            ],
            terminator: Terminator::Return {
                pop_count: n(0),
                values: vec![],
            },
        }],
    };

    // The write barrier's patch is the only (and therefore first) one built
    // in this schedule, so its id is deterministic: `CompilerState` hands
    // out ids starting at 0.
    let patch_id = 0u64;
    let locations = vec![
        MachineLocation::Register(0),
        MachineLocation::Register(1),
        MachineLocation::FrameSlot(-8),
        MachineLocation::Register(2),
        MachineLocation::Register(3),
        MachineLocation::Register(4),
    ];
    let mut backend = RecordingBackend::new();
    backend.stack_map_section = Some(encode_stack_map_section(patch_id, &locations));

    // Property 6: stack-map completeness, exercised end-to-end through
    // `run`'s real `.llvm_stackmaps` parsing/binding path (`spec.md` §4.7)
    // rather than by calling the binder directly with a synthetic record.
    let compiled = run(backend, &schedule, &CallDescriptor::empty(false), "s5", CodeKind::Stub).unwrap();
    assert!(compiled.needs_frame);
    assert_eq!(compiled.stack_map_info.len(), 1);
    let patch = compiled.stack_map_info.values().next().unwrap();
    assert_eq!(patch.kind, PatchKind::Indirect);
    assert_eq!(patch.call_arg_count, 2);
    assert_eq!(patch.live_value_count, 4);
    assert_eq!(patch.locations, locations);
}

/// S6: a patched indirect call; the recorded descriptor matches kind/size,
/// and patch ids stay unique across more than one patch site in one
/// compile (property 5).
#[test]
fn s6_patched_call_records_descriptor_and_unique_ids() {
    let schedule = Schedule {
        blocks: vec![ScheduledBlock {
            id: b(0),
            is_deferred: false,
            predecessors: vec![],
            nodes: vec![
                (n(0), NodeOp::Parameter(0)),
                (n(1), NodeOp::Parameter(1)),
                (
                    n(2),
                    NodeOp::Call {
                        descriptor: CallSiteDescriptor {
                            kind: PatchKind::Indirect,
                            expected_patch_size: 16,
                            direct_target: None,
                            callee_descriptor: CallDescriptor::empty(false),
                        },
                        callee: n(0),
                        args: vec![n(1)],
                    },
                ),
                (
                    n(3),
                    NodeOp::Call {
                        descriptor: CallSiteDescriptor {
                            kind: PatchKind::Direct,
                            expected_patch_size: 8,
                            direct_target: Some(0x4000),
                            callee_descriptor: CallDescriptor::empty(false),
                        },
                        callee: n(0),
                        args: vec![n(2)],
                    },
                ),
            ],
            terminator: Terminator::Return {
                pop_count: n(0),
                values: vec![n(3)],
            },
        }],
    };
    let compiled = run(
        RecordingBackend::new(),
        &schedule,
        &CallDescriptor::empty(false),
        "s6",
        CodeKind::Builtin,
    )
    .unwrap();
    assert_eq!(compiled.stack_map_info.len(), 2);
    let ids: std::collections::HashSet<_> = compiled.stack_map_info.keys().copied().collect();
    assert_eq!(ids.len(), 2, "patch ids must be unique within one compile");

    let indirect = compiled
        .stack_map_info
        .values()
        .find(|p| p.kind == PatchKind::Indirect)
        .unwrap();
    assert_eq!(indirect.expected_patch_size, 16);
    assert_eq!(indirect.call_arg_count, 1);

    let direct = compiled
        .stack_map_info
        .values()
        .find(|p| p.kind == PatchKind::Direct)
        .unwrap();
    assert_eq!(direct.callee_target, Some(0x4000));
}

/// Property 7: the entry section is the first one appended.
#[test]
fn entry_section_is_first_code_section() {
    let schedule = Schedule {
        blocks: vec![ScheduledBlock {
            id: b(0),
            is_deferred: false,
            predecessors: vec![],
            nodes: vec![(n(0), NodeOp::Int32Constant(1))],
            terminator: Terminator::Return {
                pop_count: n(0),
                values: vec![n(0)],
            },
        }],
    };
    let compiled = run(
        RecordingBackend::new(),
        &schedule,
        &CallDescriptor::empty(false),
        "entry",
        CodeKind::Stub,
    )
    .unwrap();
    assert_eq!(compiled.entry_section().unwrap(), &compiled.code_sections[0]);
}

/// Property 8: `needs_frame` is true iff a write-barrier store or a generic
/// call was visited; a schedule with neither must leave it false.
#[test]
fn needs_frame_is_false_without_calls_or_barriers() {
    let schedule = Schedule {
        blocks: vec![ScheduledBlock {
            id: b(0),
            is_deferred: false,
            predecessors: vec![],
            nodes: vec![
                (n(0), NodeOp::Parameter(0)),
                (n(1), NodeOp::Int32Constant(1)),
                (n(2), NodeOp::Int32Add(n(0), n(1))),
            ],
            terminator: Terminator::Return {
                pop_count: n(0),
                values: vec![n(2)],
            },
        }],
    };
    let compiled = run(
        RecordingBackend::new(),
        &schedule,
        &CallDescriptor::empty(false),
        "no_frame",
        CodeKind::Stub,
    )
    .unwrap();
    assert!(!compiled.needs_frame);
    assert_eq!(compiled.prologue_kind, PrologueKind::CFunction);
}

/// A dangling-successor schedule must surface as an error rather than
/// panic or silently miscompile.
#[test]
fn dangling_edge_is_a_malformed_schedule_error() {
    init_logging();
    let schedule = Schedule {
        blocks: vec![ScheduledBlock {
            id: b(0),
            is_deferred: false,
            predecessors: vec![],
            nodes: vec![],
            terminator: Terminator::Goto(b(1)),
        }],
    };
    let result = run(
        RecordingBackend::new(),
        &schedule,
        &CallDescriptor::empty(false),
        "dangling",
        CodeKind::Stub,
    );
    assert!(result.is_err());
}
