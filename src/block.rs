//! In-memory CFG: blocks keyed by integer id, predecessor/successor edges,
//! RPO order (`spec.md` §3, "Basic Block").
//!
//! Grounded in `examples/original_source/src/llvm/basic-block.h`: the
//! original keeps predecessor/successor vectors of raw `BasicBlock*`
//! alongside an untyped `impl_` scratch pointer the currently running pass
//! owns. We keep the edges (as `BlockId`s, never owning references, per
//! `spec.md` §9's design note) but drop the untyped scratch pointer — every
//! pass that needs per-block side state owns its own typed side table
//! instead (see `liveness.rs`'s `LivenessScratch` and `builder.rs`'s
//! per-block SSA value map).

use crate::ids::{BlockId, NodeId};
use std::collections::HashMap;

/// One basic block's CFG metadata.
#[derive(Clone, Debug)]
pub struct BasicBlock {
    id: BlockId,
    predecessors: Vec<BlockId>,
    successors: Vec<BlockId>,
    /// Sorted, deduplicated live-in node ids (`spec.md` §3 invariant 2).
    live_ins: Vec<NodeId>,
    /// Position in the function-global RPO list.
    rpo_slot: usize,
    started: bool,
    ended: bool,
    deferred: bool,
}

impl BasicBlock {
    fn new(id: BlockId, rpo_slot: usize) -> Self {
        BasicBlock {
            id,
            predecessors: Vec::new(),
            successors: Vec::new(),
            live_ins: Vec::new(),
            rpo_slot,
            started: false,
            ended: false,
            deferred: false,
        }
    }

    pub fn id(&self) -> BlockId {
        self.id
    }

    pub fn predecessors(&self) -> &[BlockId] {
        &self.predecessors
    }

    pub fn successors(&self) -> &[BlockId] {
        &self.successors
    }

    pub fn live_ins(&self) -> &[NodeId] {
        &self.live_ins
    }

    pub fn set_live_ins(&mut self, mut live_ins: Vec<NodeId>) {
        live_ins.sort_unstable();
        live_ins.dedup();
        self.live_ins = live_ins;
    }

    pub fn rpo_slot(&self) -> usize {
        self.rpo_slot
    }

    pub fn is_deferred(&self) -> bool {
        self.deferred
    }

    pub fn set_deferred(&mut self, deferred: bool) {
        self.deferred = deferred;
    }

    pub fn started(&self) -> bool {
        self.started
    }

    pub fn ended(&self) -> bool {
        self.ended
    }

    pub fn start_build(&mut self) {
        self.started = true;
    }

    pub fn end_build(&mut self) {
        self.ended = true;
    }
}

/// Owns the blocks of one function's CFG, keyed by the scheduler-assigned
/// `BlockId`. Blocks are created on first reference (`ensure_block`), since
/// a successor or phi source may be mentioned before its own `VisitBlock`
/// call runs.
#[derive(Default)]
pub struct BasicBlockManager {
    blocks: HashMap<BlockId, BasicBlock>,
    /// Block ids in the order the schedule emitter visited them; this is
    /// the RPO the fixed-point liveness iteration walks in reverse
    /// (`spec.md` §4.2).
    rpo: Vec<BlockId>,
}

impl BasicBlockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a block, creating an empty placeholder if it hasn't been
    /// visited yet (mirrors `ensureBB` in the original).
    pub fn ensure_block(&mut self, id: BlockId) -> &mut BasicBlock {
        let next_slot = self.rpo.len();
        self.blocks
            .entry(id)
            .or_insert_with(|| BasicBlock::new(id, next_slot))
    }

    pub fn find_block(&self, id: BlockId) -> Option<&BasicBlock> {
        self.blocks.get(&id)
    }

    pub fn find_block_mut(&mut self, id: BlockId) -> Option<&mut BasicBlock> {
        self.blocks.get_mut(&id)
    }

    /// Record `id` as the next block visited in schedule order.
    pub fn record_rpo(&mut self, id: BlockId) {
        self.rpo.push(id);
    }

    pub fn rpo(&self) -> &[BlockId] {
        &self.rpo
    }

    pub fn add_edge(&mut self, from: BlockId, to: BlockId) {
        self.ensure_block(from).successors.push(to);
        self.ensure_block(to).predecessors.push(from);
    }

    /// Record `pred` as a predecessor of `of`, without touching `pred`'s own
    /// successor list. Used by the liveness visitor's `VisitBlock`, which
    /// learns a block's predecessors up front from the schedule but only
    /// learns a predecessor's successors later, when that predecessor's own
    /// terminator is visited (it may not have been visited yet, in the case
    /// of a loop back-edge).
    pub fn add_predecessor_only(&mut self, of: BlockId, pred: BlockId) {
        self.ensure_block(of).predecessors.push(pred);
    }

    /// Record `succ` as a successor of `of`, without touching `succ`'s own
    /// predecessor list (see `add_predecessor_only`).
    pub fn add_successor_only(&mut self, of: BlockId, succ: BlockId) {
        self.ensure_block(of).successors.push(succ);
    }

    /// Verify `spec.md` §3 invariant 1: every successor of a block lists
    /// that block as a predecessor, and vice versa.
    pub fn verify_edges_consistent(&self) -> Result<(), crate::error::JitError> {
        for block in self.blocks.values() {
            for &succ in &block.successors {
                let Some(succ_block) = self.blocks.get(&succ) else {
                    return Err(crate::error::JitError::dangling_successor(block.id, succ));
                };
                if !succ_block.predecessors.contains(&block.id) {
                    return Err(crate::error::JitError::dangling_successor(block.id, succ));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_block_is_idempotent() {
        let mut mgr = BasicBlockManager::new();
        let id = BlockId::from_raw(3);
        mgr.ensure_block(id).set_deferred(true);
        assert!(mgr.find_block(id).unwrap().is_deferred());
    }

    #[test]
    fn add_edge_is_bidirectional() {
        let mut mgr = BasicBlockManager::new();
        let a = BlockId::from_raw(0);
        let b = BlockId::from_raw(1);
        mgr.add_edge(a, b);
        assert_eq!(mgr.find_block(a).unwrap().successors(), &[b]);
        assert_eq!(mgr.find_block(b).unwrap().predecessors(), &[a]);
        assert!(mgr.verify_edges_consistent().is_ok());
    }

    #[test]
    fn set_live_ins_sorts_and_dedupes() {
        let mut mgr = BasicBlockManager::new();
        let a = BlockId::from_raw(0);
        mgr.ensure_block(a).set_live_ins(vec![
            NodeId::from_raw(3),
            NodeId::from_raw(1),
            NodeId::from_raw(3),
        ]);
        assert_eq!(
            mgr.find_block(a).unwrap().live_ins(),
            &[NodeId::from_raw(1), NodeId::from_raw(3)]
        );
    }
}
