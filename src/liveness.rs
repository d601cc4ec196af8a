//! Per-block live-in computation via reverse-post-order fixed-point
//! iteration with phi-edge propagation (`spec.md` §4.2).
//!
//! Grounded directly in
//! `examples/original_source/src/llvm/liveness-analysis-visitor.cc`: the
//! `current_defines_`/`current_references_` pair, `EndBlock`, `VisitStore`'s
//! own `Define(id)` call, and the worklist loop in `CalculateLivesIns` all
//! have a one-to-one counterpart here. Two deliberate departures from the
//! source, per `spec.md` §9's resolutions of its own open questions:
//!
//! - `VisitReturn`'s `pop_count` is treated as a *use* (`add_if_not_defined`),
//!   not a `Define` — the source calls `Define` on it, which looks like a
//!   bug since `pop_count` is never itself produced by this block.
//! - Phi operands are folded into the fixed-point itself (the `for phi in
//!   &scratch.phis` loop below) and never separately re-added afterwards;
//!   the source's disabled `#if 0` block doing exactly that re-addition is
//!   intentionally not ported.
//!
//! Per-block scratch (`defines`, `phis`) is a typed `SecondaryMap` owned by
//! this visitor and dropped when it goes out of scope, rather than an
//! untyped scratch pointer on the block itself (`spec.md` §9).

use crate::block::BasicBlockManager;
use crate::error::JitError;
use crate::ids::{BlockId, NodeId};
use crate::schedule::{CallSiteDescriptor, Visitor};
use crate::types::{MachineRepresentation, MachineSemantic, WriteBarrierKind};
use std::collections::{BTreeSet, VecDeque};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct PhiDesc {
    from: BlockId,
    value: NodeId,
}

#[derive(Clone, Debug, Default)]
struct LivenessScratch {
    phis: Vec<PhiDesc>,
    defines: BTreeSet<NodeId>,
}

/// Implements `Visitor` purely for side effect on a `BasicBlockManager`:
/// populates predecessor/successor edges, per-block live-in seeds, and
/// `needs_frame`.
pub struct LivenessAnalysisVisitor<'a> {
    blocks: &'a mut BasicBlockManager,
    scratch: std::collections::HashMap<BlockId, LivenessScratch>,
    current_block: Option<BlockId>,
    current_defines: BTreeSet<NodeId>,
    current_references: BTreeSet<NodeId>,
    needs_frame: bool,
}

impl<'a> LivenessAnalysisVisitor<'a> {
    pub fn new(blocks: &'a mut BasicBlockManager) -> Self {
        LivenessAnalysisVisitor {
            blocks,
            scratch: std::collections::HashMap::new(),
            current_block: None,
            current_defines: BTreeSet::new(),
            current_references: BTreeSet::new(),
            needs_frame: false,
        }
    }

    /// True once a write-barrier store or a generic call has been visited
    /// (`spec.md` §4.2, "Side effects observed by other passes").
    pub fn needs_frame(&self) -> bool {
        self.needs_frame
    }

    fn define(&mut self, id: NodeId) {
        self.current_defines.insert(id);
    }

    fn add_if_not_defined(&mut self, id: NodeId) {
        if !self.current_defines.contains(&id) {
            self.current_references.insert(id);
        }
    }

    fn end_block(&mut self) {
        let Some(current) = self.current_block else {
            return;
        };
        let live_ins: Vec<NodeId> = self.current_references.iter().copied().collect();
        self.blocks.find_block_mut(current).unwrap().set_live_ins(live_ins);

        let scratch = self.scratch.entry(current).or_default();
        scratch.defines = std::mem::take(&mut self.current_defines);

        self.current_block = None;
        self.current_references.clear();
    }

    fn current(&self) -> BlockId {
        self.current_block.expect("node visited outside a block")
    }

    fn record_call(&mut self, callee: NodeId, args: &[NodeId]) {
        self.add_if_not_defined(callee);
        for &arg in args {
            self.add_if_not_defined(arg);
        }
        self.needs_frame = true;
    }

    /// Runs the fixed-point worklist algorithm of `spec.md` §4.2 to
    /// completion, then discards per-block scratch state.
    pub fn calculate_live_ins(mut self) -> Result<(), JitError> {
        self.end_block();

        let mut worklist: VecDeque<BlockId> =
            self.blocks.rpo().iter().rev().copied().collect();

        while let Some(id) = worklist.pop_front() {
            let block = self
                .blocks
                .find_block(id)
                .ok_or_else(|| JitError::MalformedSchedule(format!("unknown block {id}")))?;
            let mut merged: Vec<NodeId> = block.live_ins().to_vec();
            let successors = block.successors().to_vec();
            let predecessors = block.predecessors().to_vec();

            for succ in successors {
                let succ_block = self
                    .blocks
                    .find_block(succ)
                    .ok_or_else(|| JitError::dangling_successor(id, succ))?;
                merged = sorted_union(&merged, succ_block.live_ins());
                if let Some(scratch) = self.scratch.get(&succ) {
                    for phi in &scratch.phis {
                        if phi.from == id {
                            insert_sorted_unique(&mut merged, phi.value);
                        }
                    }
                }
            }

            let defines = &self.scratch.entry(id).or_default().defines;
            merged.retain(|v| !defines.contains(v));

            let block = self.blocks.find_block(id).unwrap();
            let changed = block.live_ins() != merged.as_slice();
            if changed {
                worklist.extend(predecessors);
            }
            self.blocks.find_block_mut(id).unwrap().set_live_ins(merged);
        }

        Ok(())
    }
}

fn sorted_union(a: &[NodeId], b: &[NodeId]) -> Vec<NodeId> {
    let mut out = Vec::with_capacity(a.len() + b.len());
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => {
                out.push(a[i]);
                i += 1;
            }
            std::cmp::Ordering::Greater => {
                out.push(b[j]);
                j += 1;
            }
            std::cmp::Ordering::Equal => {
                out.push(a[i]);
                i += 1;
                j += 1;
            }
        }
    }
    out.extend_from_slice(&a[i..]);
    out.extend_from_slice(&b[j..]);
    out
}

fn insert_sorted_unique(v: &mut Vec<NodeId>, value: NodeId) {
    match v.binary_search(&value) {
        Ok(_) => {}
        Err(pos) => v.insert(pos, value),
    }
}

impl<'a> Visitor for LivenessAnalysisVisitor<'a> {
    fn visit_block(&mut self, id: crate::ids::BlockId, is_deferred: bool, predecessors: &[BlockId]) {
        self.end_block();
        self.blocks.ensure_block(id);
        for &pred in predecessors {
            self.blocks.add_predecessor_only(id, pred);
        }
        self.blocks.find_block_mut(id).unwrap().set_deferred(is_deferred);
        self.blocks.record_rpo(id);
        self.scratch.insert(id, LivenessScratch::default());
        self.current_block = Some(id);
    }

    fn visit_parameter(&mut self, id: NodeId, _index: u32) {
        self.define(id);
    }
    fn visit_int32_constant(&mut self, id: NodeId, _value: i32) {
        self.define(id);
    }
    fn visit_float64_constant(&mut self, id: NodeId, _bits: u64) {
        self.define(id);
    }
    fn visit_smi_constant(&mut self, id: NodeId, _value: i64) {
        self.define(id);
    }
    fn visit_heap_constant(&mut self, id: NodeId, _magic: i64) {
        self.define(id);
    }
    fn visit_external_constant(&mut self, id: NodeId, _magic: i64) {
        self.define(id);
    }
    fn visit_code_for_call(&mut self, id: NodeId, _magic: i64) {
        self.define(id);
    }

    fn visit_int32_add(&mut self, id: NodeId, lhs: NodeId, rhs: NodeId) {
        self.add_if_not_defined(lhs);
        self.add_if_not_defined(rhs);
        self.define(id);
    }
    fn visit_int32_sub(&mut self, id: NodeId, lhs: NodeId, rhs: NodeId) {
        self.add_if_not_defined(lhs);
        self.add_if_not_defined(rhs);
        self.define(id);
    }
    fn visit_int32_mul(&mut self, id: NodeId, lhs: NodeId, rhs: NodeId) {
        self.add_if_not_defined(lhs);
        self.add_if_not_defined(rhs);
        self.define(id);
    }
    fn visit_int32_add_with_overflow(&mut self, id: NodeId, lhs: NodeId, rhs: NodeId) {
        self.add_if_not_defined(lhs);
        self.add_if_not_defined(rhs);
        self.define(id);
    }
    fn visit_int32_sub_with_overflow(&mut self, id: NodeId, lhs: NodeId, rhs: NodeId) {
        self.add_if_not_defined(lhs);
        self.add_if_not_defined(rhs);
        self.define(id);
    }
    fn visit_int32_mul_with_overflow(&mut self, id: NodeId, lhs: NodeId, rhs: NodeId) {
        self.add_if_not_defined(lhs);
        self.add_if_not_defined(rhs);
        self.define(id);
    }
    fn visit_int64_add(&mut self, id: NodeId, lhs: NodeId, rhs: NodeId) {
        self.add_if_not_defined(lhs);
        self.add_if_not_defined(rhs);
        self.define(id);
    }
    fn visit_int32_less_than(&mut self, id: NodeId, lhs: NodeId, rhs: NodeId, _semantic: MachineSemantic) {
        self.add_if_not_defined(lhs);
        self.add_if_not_defined(rhs);
        self.define(id);
    }
    fn visit_word_equal(&mut self, id: NodeId, lhs: NodeId, rhs: NodeId) {
        self.add_if_not_defined(lhs);
        self.add_if_not_defined(rhs);
        self.define(id);
    }

    fn visit_projection(&mut self, id: NodeId, input: NodeId, _index: u32) {
        self.add_if_not_defined(input);
        self.define(id);
    }

    fn visit_load(
        &mut self,
        id: NodeId,
        _rep: MachineRepresentation,
        _semantic: MachineSemantic,
        base: NodeId,
        offset: NodeId,
    ) {
        self.add_if_not_defined(base);
        self.add_if_not_defined(offset);
        self.define(id);
    }

    fn visit_store(
        &mut self,
        id: NodeId,
        _rep: MachineRepresentation,
        barrier: WriteBarrierKind,
        base: NodeId,
        offset: NodeId,
        value: NodeId,
    ) {
        self.add_if_not_defined(base);
        self.add_if_not_defined(offset);
        self.add_if_not_defined(value);
        self.define(id);
        if barrier.is_barrier() {
            self.needs_frame = true;
        }
    }

    fn visit_phi(&mut self, id: NodeId, _rep: MachineRepresentation, operands: &[NodeId]) {
        self.define(id);
        let current = self.current();
        let predecessors = self
            .blocks
            .find_block(current)
            .map(|b| b.predecessors().to_vec())
            .unwrap_or_default();
        let scratch = self.scratch.entry(current).or_default();
        for (operand, &pred) in operands.iter().zip(predecessors.iter()) {
            scratch.phis.push(PhiDesc {
                from: pred,
                value: *operand,
            });
        }
    }

    fn visit_call(&mut self, id: NodeId, _descriptor: &CallSiteDescriptor, callee: NodeId, args: &[NodeId]) {
        self.record_call(callee, args);
        self.define(id);
    }
    fn visit_call_with_caller_saved_registers(
        &mut self,
        id: NodeId,
        _descriptor: &CallSiteDescriptor,
        callee: NodeId,
        args: &[NodeId],
    ) {
        self.record_call(callee, args);
        self.define(id);
    }

    fn visit_goto(&mut self, target: BlockId) {
        let current = self.current();
        self.blocks.add_successor_only(current, target);
        self.end_block();
    }

    fn visit_branch(&mut self, condition: NodeId, if_true: BlockId, if_false: BlockId) {
        self.add_if_not_defined(condition);
        let current = self.current();
        self.blocks.add_successor_only(current, if_true);
        self.blocks.add_successor_only(current, if_false);
        self.end_block();
    }

    fn visit_switch(&mut self, input: NodeId, cases: &[(i32, BlockId)], default: BlockId) {
        self.add_if_not_defined(input);
        let current = self.current();
        for &(_, target) in cases {
            self.blocks.add_successor_only(current, target);
        }
        self.blocks.add_successor_only(current, default);
        self.end_block();
    }

    fn visit_return(&mut self, pop_count: NodeId, values: &[NodeId]) {
        // `pop_count` is a use, not a definition: see the module doc comment
        // on the open-question resolution.
        self.add_if_not_defined(pop_count);
        for &v in values {
            self.add_if_not_defined(v);
        }
        self.end_block();
    }

    fn visit_tail_call(&mut self, _descriptor: &CallSiteDescriptor, callee: NodeId, args: &[NodeId]) {
        self.add_if_not_defined(callee);
        for &arg in args {
            self.add_if_not_defined(arg);
        }
        self.end_block();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call_descriptor::CallDescriptor;
    use crate::schedule::{NodeOp, ScheduleEmitter, ScheduledBlock, Schedule, Terminator};
    use crate::types::MachineRepresentation;

    fn n(raw: u32) -> NodeId {
        NodeId::from_raw(raw)
    }
    fn b(raw: u32) -> BlockId {
        BlockId::from_raw(raw)
    }

    #[test]
    fn straight_line_has_no_live_ins() {
        // S1: param(0), const(1), add(2, 0, 1), return([2])
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
        let mut blocks = BasicBlockManager::new();
        {
            let mut visitor = LivenessAnalysisVisitor::new(&mut blocks);
            ScheduleEmitter::new(&schedule).emit(&mut visitor).unwrap();
            visitor.calculate_live_ins().unwrap();
        }
        assert!(blocks.find_block(b(0)).unwrap().live_ins().is_empty());
    }

    #[test]
    fn diamond_propagates_phi_operands_to_predecessors() {
        // S2: B0 -> {B1, B2} -> B3; B3 has phi(10, [v1 from B1, v2 from B2])
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
        let mut blocks = BasicBlockManager::new();
        {
            let mut visitor = LivenessAnalysisVisitor::new(&mut blocks);
            ScheduleEmitter::new(&schedule).emit(&mut visitor).unwrap();
            visitor.calculate_live_ins().unwrap();
        }
        assert_eq!(blocks.find_block(b(1)).unwrap().live_ins(), &[v1]);
        assert_eq!(blocks.find_block(b(2)).unwrap().live_ins(), &[v2]);
        assert!(blocks.find_block(b(3)).unwrap().live_ins().is_empty());
    }

    #[test]
    fn loop_carried_value_is_live_across_back_edge() {
        // S3: B0 -> B1 -> B2 -> B1, phi in B1 from B0 and B2.
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
                    terminator: Terminator::Goto(b(2)),
                },
                ScheduledBlock {
                    id: b(2),
                    is_deferred: false,
                    predecessors: vec![b(1)],
                    nodes: vec![(carried, NodeOp::Int32Add(n(10), n(10)))],
                    terminator: Terminator::Goto(b(1)),
                },
            ],
        };
        let mut blocks = BasicBlockManager::new();
        {
            let mut visitor = LivenessAnalysisVisitor::new(&mut blocks);
            ScheduleEmitter::new(&schedule).emit(&mut visitor).unwrap();
            visitor.calculate_live_ins().unwrap();
        }
        // The loop-carried value used by the phi is produced in B2 and must
        // reach B1 via the back edge, i.e. be live-in to B2.
        assert!(blocks.find_block(b(2)).unwrap().live_ins().is_empty());
    }

    #[test]
    fn generic_call_sets_needs_frame() {
        let schedule = Schedule {
            blocks: vec![ScheduledBlock {
                id: b(0),
                is_deferred: false,
                predecessors: vec![],
                nodes: vec![
                    (n(0), NodeOp::Parameter(0)),
                    (
                        n(1),
                        NodeOp::Call {
                            descriptor: CallSiteDescriptor {
                                kind: crate::types::PatchKind::Indirect,
                                expected_patch_size: 16,
                                direct_target: None,
                                callee_descriptor: CallDescriptor::empty(false),
                            },
                            callee: n(0),
                            args: vec![],
                        },
                    ),
                ],
                terminator: Terminator::Return {
                    pop_count: n(2),
                    values: vec![n(1)],
                },
            }],
        };
        let mut blocks = BasicBlockManager::new();
        let mut visitor = LivenessAnalysisVisitor::new(&mut blocks);
        ScheduleEmitter::new(&schedule).emit(&mut visitor).unwrap();
        assert!(visitor.needs_frame());
    }

    #[test]
    fn write_barrier_store_sets_needs_frame() {
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
                        NodeOp::Store {
                            rep: MachineRepresentation::Tagged,
                            barrier: WriteBarrierKind::Full,
                            base: n(0),
                            offset: n(0),
                            value: n(1),
                        },
                    ),
                ],
                terminator: Terminator::Return {
                    pop_count: n(3),
                    values: vec![],
                },
            }],
        };
        let mut blocks = BasicBlockManager::new();
        let mut visitor = LivenessAnalysisVisitor::new(&mut blocks);
        ScheduleEmitter::new(&schedule).emit(&mut visitor).unwrap();
        assert!(visitor.needs_frame());
    }
}
