//! The TF Builder: the second schedule-emitter pass, translating each
//! scheduled node into backend IR via the `Output` facade (`spec.md` §4.6).
//!
//! Grounded in `spec.md` §4.6 and, structurally, in the same
//! `liveness-analysis-visitor.cc`/`tf-builder` split the original keeps:
//! this is the sibling visitor that runs *after* `LivenessAnalysisVisitor`
//! and consumes its live-in sets. Deferred phi filling follows `spec.md`
//! §9's design note directly: phi placeholders are created at block entry,
//! `(phi, predecessor, operand-node-id, owner-block)` triples queue on the
//! predecessor, and are resolved — or reported as
//! `JitError::unresolved_phi_operand` — exactly when that predecessor's
//! block closes.
//!
//! Per-block backend block handles are pre-allocated for the whole
//! schedule before emission starts (`TfBuilder::new`), rather than created
//! lazily as blocks are first visited: `spec.md` §4.6's phi construction
//! needs a `Backend::Block` for a predecessor that, on a loop back edge,
//! hasn't been visited by the emitter yet, and LLVM (like every backend
//! this crate's `Backend` trait models) allows blocks to be created in any
//! order and filled in later.

use crate::backend::{Backend, IntPredicate};
use crate::block::BasicBlockManager;
use crate::entity::SecondaryMap;
use crate::error::JitError;
use crate::ids::{BlockId, NodeId};
use crate::load_constant::{
    LoadConstantKind, ISOLATE_EXTERNAL_REFERENCE_MAGIC, MODULO_EXTERNAL_REFERENCE_MAGIC,
    RECORD_STUB_CODE_CONSTANT_MAGIC,
};
use crate::output::Output;
use crate::schedule::{CallSiteDescriptor, Schedule, Visitor};
use crate::types::{MachineRepresentation, MachineSemantic, PatchKind, WriteBarrierKind};
use std::collections::HashMap;

/// Shadow-byte size reserved for the write-barrier helper's patchpoint.
/// Real sizing is target-dependent and supplied by the call descriptor for
/// ordinary calls (`spec.md` §9, open question (a)); the write barrier has
/// no call descriptor of its own, so a fixed conservative size is used.
const WRITE_BARRIER_PATCH_SIZE: u32 = 16;

struct PendingPhiOperand<V> {
    phi: V,
    operand: NodeId,
    owner: BlockId,
}

/// Second-pass lowering visitor. Built once per `Run`, fed the live-in sets
/// [`crate::liveness::LivenessAnalysisVisitor`] already computed.
pub struct TfBuilder<'out, 'blocks, B: Backend> {
    output: Output<'out, B>,
    blocks: &'blocks mut BasicBlockManager,
    backend_blocks: SecondaryMap<BlockId, Option<B::Block>>,
    values: SecondaryMap<NodeId, Option<B::Value>>,
    current_block: Option<BlockId>,
    /// Every node id this block has defined so far, in emission order; used
    /// as the over-approximation of "locally defined live values still
    /// alive" a patchpoint's variadic tail carries alongside the block's
    /// live-ins (`spec.md` §4.6, "Call / CallWithCallerSavedRegisters").
    locally_defined: Vec<NodeId>,
    /// Deferred phi operands, keyed by the predecessor block whose closing
    /// will resolve them.
    pending_phis: HashMap<BlockId, Vec<PendingPhiOperand<B::Value>>>,
    next_heap_constant_index: u32,
    next_external_constant_index: u32,
    dummy_value: Option<B::Value>,
    error: Option<JitError>,
}

impl<'out, 'blocks, B: Backend> TfBuilder<'out, 'blocks, B> {
    /// Pre-allocates a backend block for every block the schedule names,
    /// then returns a builder ready to drive via `ScheduleEmitter::emit`.
    pub fn new(output: Output<'out, B>, blocks: &'blocks mut BasicBlockManager, schedule: &Schedule) -> Self {
        let mut builder = TfBuilder {
            output,
            blocks,
            backend_blocks: SecondaryMap::new(),
            values: SecondaryMap::new(),
            current_block: None,
            locally_defined: Vec::new(),
            pending_phis: HashMap::new(),
            next_heap_constant_index: 0,
            next_external_constant_index: 0,
            dummy_value: None,
            error: None,
        };
        for block in &schedule.blocks {
            let name = format!("block{}", block.id);
            let backend_block = builder.output.append_basic_block(&name);
            builder.backend_blocks.set(block.id, Some(backend_block));
        }
        builder
    }

    /// Surfaces the first error recorded during emission, if any. Call
    /// after `ScheduleEmitter::emit` returns.
    pub fn finish(self) -> Result<Output<'out, B>, JitError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.output),
        }
    }

    fn current(&self) -> BlockId {
        self.current_block.expect("node visited outside a block")
    }

    fn backend_block(&self, id: BlockId) -> B::Block {
        (*self.backend_blocks.get(id)).expect("every scheduled block has a pre-allocated backend block")
    }

    fn record_error(&mut self, err: JitError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    fn dummy(&mut self) -> B::Value {
        if let Some(v) = self.dummy_value {
            return v;
        }
        let v = self.output.const_iptr(0);
        self.dummy_value = Some(v);
        v
    }

    /// Resolves `id` to its backend value. Every non-phi use must already
    /// have a definition reachable from the current block (`spec.md` §3
    /// invariant 5): a miss here means the schedule violated SSA dominance.
    fn resolve(&mut self, id: NodeId) -> B::Value {
        if let Some(value) = *self.values.get(id) {
            return value;
        }
        self.record_error(JitError::MalformedSchedule(format!(
            "use of {id} has no definition reachable from block {}",
            self.current()
        )));
        self.dummy()
    }

    fn bind(&mut self, id: NodeId, value: B::Value) {
        self.values.set(id, Some(value));
        self.locally_defined.push(id);
    }

    /// The live set threaded through every patchpoint's variadic tail: the
    /// current block's live-ins (computed by pass 1) plus every value this
    /// block has defined so far (`spec.md` §4.6). Over-approximates true
    /// point-wise liveness — safe, since reporting an extra GC root merely
    /// costs a stack-map slot, never correctness.
    fn live_set(&self) -> smallvec::SmallVec<[NodeId; 8]> {
        let current = self.current();
        let mut live: smallvec::SmallVec<[NodeId; 8]> = self
            .blocks
            .find_block(current)
            .map(|b| smallvec::SmallVec::from_slice(b.live_ins()))
            .unwrap_or_default();
        for &id in &self.locally_defined {
            if !live.contains(&id) {
                live.push(id);
            }
        }
        live
    }

    fn resolve_live_values(&mut self) -> smallvec::SmallVec<[B::Value; 8]> {
        let ids = self.live_set();
        ids.into_iter().map(|id| self.resolve(id)).collect()
    }

    /// Registers a non-reserved magic with the load-constant recorder under
    /// `kind`, then binds `id` to a placeholder constant carrying the magic
    /// itself — the real value is patched in later, out of band, once the
    /// code object's constant tables are built (`spec.md` §4.6).
    fn bind_magic_constant(&mut self, id: NodeId, magic: i64, kind: LoadConstantKind) {
        let is_reserved = magic == ISOLATE_EXTERNAL_REFERENCE_MAGIC
            || magic == RECORD_STUB_CODE_CONSTANT_MAGIC
            || magic == MODULO_EXTERNAL_REFERENCE_MAGIC;
        if !is_reserved {
            self.output.state_mut().load_constant_recorder.register(magic, kind);
        }
        let value = self.output.const_iptr(magic);
        self.bind(id, value);
    }

    fn lower_call(
        &mut self,
        id: NodeId,
        descriptor: &CallSiteDescriptor,
        callee: NodeId,
        args: &[NodeId],
    ) {
        let resolved_args: smallvec::SmallVec<[B::Value; 4]> = args.iter().map(|&a| self.resolve(a)).collect();
        let live = self.resolve_live_values();
        let size = descriptor.expected_patch_size;
        let result = match descriptor.kind {
            PatchKind::Direct => {
                let Some(target) = descriptor.direct_target else {
                    self.record_error(JitError::MalformedSchedule(format!(
                        "call {id} marked direct but carries no resolved target"
                    )));
                    return;
                };
                self.output.build_direct_patch(target, size, &resolved_args, &live, true).0
            }
            PatchKind::Indirect => {
                let callee_value = self.resolve(callee);
                self.output
                    .build_indirect_patch(callee_value, size, &resolved_args, &live, true)
                    .0
            }
            PatchKind::Assist => {
                let callee_value = self.resolve(callee);
                self.output
                    .build_assist_patch(callee_value, size, &resolved_args, &live, true)
                    .0
            }
        };
        self.bind(id, result);
    }

    fn end_block(&mut self) {
        let Some(current) = self.current_block else {
            return;
        };
        if let Some(entries) = self.pending_phis.remove(&current) {
            let from_block = self.backend_block(current);
            for entry in entries {
                match *self.values.get(entry.operand) {
                    Some(value) => self.output.add_incoming(entry.phi, value, from_block),
                    None => self.record_error(JitError::unresolved_phi_operand(entry.owner, current, entry.operand)),
                }
            }
        }
        if let Some(block) = self.blocks.find_block_mut(current) {
            block.end_build();
        }
        self.current_block = None;
        self.locally_defined.clear();
    }
}

impl<'out, 'blocks, B: Backend> Visitor for TfBuilder<'out, 'blocks, B> {
    fn visit_block(&mut self, id: BlockId, _is_deferred: bool, _predecessors: &[BlockId]) {
        self.end_block();
        let backend_block = self.backend_block(id);
        self.output.position_to_bb_end(backend_block);
        if let Some(block) = self.blocks.find_block_mut(id) {
            block.start_build();
        }
        self.current_block = Some(id);
    }

    fn visit_parameter(&mut self, id: NodeId, index: u32) {
        let value = self.output.build_load_arg_index(index);
        self.bind(id, value);
    }
    fn visit_int32_constant(&mut self, id: NodeId, value: i32) {
        let v = self.output.const_int(MachineRepresentation::Word32, value as i64);
        self.bind(id, v);
    }
    fn visit_float64_constant(&mut self, id: NodeId, bits: u64) {
        let v = self.output.const_float(f64::from_bits(bits));
        self.bind(id, v);
    }
    fn visit_smi_constant(&mut self, id: NodeId, value: i64) {
        let v = self.output.const_int(MachineRepresentation::TaggedSigned, value);
        self.bind(id, v);
    }
    fn visit_heap_constant(&mut self, id: NodeId, magic: i64) {
        let index = self.next_heap_constant_index;
        self.next_heap_constant_index += 1;
        self.bind_magic_constant(id, magic, LoadConstantKind::HeapConstant(index));
    }
    fn visit_external_constant(&mut self, id: NodeId, magic: i64) {
        let index = self.next_external_constant_index;
        self.next_external_constant_index += 1;
        self.bind_magic_constant(id, magic, LoadConstantKind::ExternalConstant(index));
    }
    fn visit_code_for_call(&mut self, id: NodeId, magic: i64) {
        // Stub-code loads are bucketed with external constants absent a
        // dedicated reserved-magic variant in `LoadConstantKind` (`spec.md`
        // §3 already names `RecordStubCodeConstant` as one of the three
        // *reserved* magics; a non-reserved `CodeForCall` magic still needs
        // a table slot, so it shares `ExternalConstant`'s index space).
        let index = self.next_external_constant_index;
        self.next_external_constant_index += 1;
        self.bind_magic_constant(id, magic, LoadConstantKind::ExternalConstant(index));
    }

    fn visit_int32_add(&mut self, id: NodeId, lhs: NodeId, rhs: NodeId) {
        let (l, r) = (self.resolve(lhs), self.resolve(rhs));
        let v = self.output.build_add(l, r);
        self.bind(id, v);
    }
    fn visit_int32_sub(&mut self, id: NodeId, lhs: NodeId, rhs: NodeId) {
        let (l, r) = (self.resolve(lhs), self.resolve(rhs));
        let v = self.output.build_sub(l, r);
        self.bind(id, v);
    }
    fn visit_int32_mul(&mut self, id: NodeId, lhs: NodeId, rhs: NodeId) {
        let (l, r) = (self.resolve(lhs), self.resolve(rhs));
        let v = self.output.build_mul(l, r);
        self.bind(id, v);
    }
    fn visit_int64_add(&mut self, id: NodeId, lhs: NodeId, rhs: NodeId) {
        let (l, r) = (self.resolve(lhs), self.resolve(rhs));
        let v = self.output.build_add(l, r);
        self.bind(id, v);
    }
    fn visit_int32_add_with_overflow(&mut self, id: NodeId, lhs: NodeId, rhs: NodeId) {
        let (l, r) = (self.resolve(lhs), self.resolve(rhs));
        let intrinsic = self.output.intrinsic(crate::intrinsics::Intrinsic::AddWithOverflow32);
        let v = self.output.build_call(intrinsic, &[l, r]);
        self.bind(id, v);
    }
    fn visit_int32_sub_with_overflow(&mut self, id: NodeId, lhs: NodeId, rhs: NodeId) {
        let (l, r) = (self.resolve(lhs), self.resolve(rhs));
        let intrinsic = self.output.intrinsic(crate::intrinsics::Intrinsic::SubWithOverflow32);
        let v = self.output.build_call(intrinsic, &[l, r]);
        self.bind(id, v);
    }
    fn visit_int32_mul_with_overflow(&mut self, id: NodeId, lhs: NodeId, rhs: NodeId) {
        let (l, r) = (self.resolve(lhs), self.resolve(rhs));
        let intrinsic = self.output.intrinsic(crate::intrinsics::Intrinsic::MulWithOverflow32);
        let v = self.output.build_call(intrinsic, &[l, r]);
        self.bind(id, v);
    }
    fn visit_int32_less_than(&mut self, id: NodeId, lhs: NodeId, rhs: NodeId, semantic: MachineSemantic) {
        let (l, r) = (self.resolve(lhs), self.resolve(rhs));
        let v = self.output.build_icmp(IntPredicate::less_than(semantic), l, r);
        self.bind(id, v);
    }
    fn visit_word_equal(&mut self, id: NodeId, lhs: NodeId, rhs: NodeId) {
        let (l, r) = (self.resolve(lhs), self.resolve(rhs));
        let v = self.output.build_icmp(IntPredicate::Equal, l, r);
        self.bind(id, v);
    }

    fn visit_projection(&mut self, id: NodeId, input: NodeId, index: u32) {
        let v = self.resolve(input);
        let extracted = self.output.build_extract_value(v, index);
        self.bind(id, extracted);
    }

    fn visit_load(
        &mut self,
        id: NodeId,
        rep: MachineRepresentation,
        _semantic: MachineSemantic,
        base: NodeId,
        offset: NodeId,
    ) {
        let (b, o) = (self.resolve(base), self.resolve(offset));
        let addr = self.output.build_add(b, o);
        let ptr = self.output.build_cast(addr, rep);
        let v = self.output.build_load(rep, ptr);
        self.bind(id, v);
    }

    fn visit_store(
        &mut self,
        id: NodeId,
        rep: MachineRepresentation,
        barrier: WriteBarrierKind,
        base: NodeId,
        offset: NodeId,
        value: NodeId,
    ) {
        let (base_value, offset_value, value_value) = (self.resolve(base), self.resolve(offset), self.resolve(value));
        let addr = self.output.build_add(base_value, offset_value);
        let ptr = self.output.build_cast(addr, rep);
        let stored = self.output.build_store(value_value, ptr);
        self.bind(id, stored);
        if barrier.is_barrier() {
            let live = self.resolve_live_values();
            self.output.build_indirect_patch(
                base_value,
                WRITE_BARRIER_PATCH_SIZE,
                &[base_value, value_value],
                &live,
                false,
            );
        }
    }

    fn visit_phi(&mut self, id: NodeId, rep: MachineRepresentation, operands: &[NodeId]) {
        let current = self.current();
        let backend_block = self.backend_block(current);
        let phi_value = self.output.build_phi(rep, backend_block);
        self.bind(id, phi_value);

        let predecessors = self
            .blocks
            .find_block(current)
            .map(|b| b.predecessors().to_vec())
            .unwrap_or_default();
        if predecessors.len() != operands.len() {
            self.record_error(JitError::phi_arity_mismatch(current, predecessors.len(), operands.len()));
            return;
        }
        for (&operand, &pred) in operands.iter().zip(predecessors.iter()) {
            if let Some(value) = *self.values.get(operand) {
                let pred_block = self.backend_block(pred);
                self.output.add_incoming(phi_value, value, pred_block);
            } else {
                self.pending_phis.entry(pred).or_default().push(PendingPhiOperand {
                    phi: phi_value,
                    operand,
                    owner: current,
                });
            }
        }
    }

    fn visit_call(&mut self, id: NodeId, descriptor: &CallSiteDescriptor, callee: NodeId, args: &[NodeId]) {
        self.lower_call(id, descriptor, callee, args);
    }
    fn visit_call_with_caller_saved_registers(
        &mut self,
        id: NodeId,
        descriptor: &CallSiteDescriptor,
        callee: NodeId,
        args: &[NodeId],
    ) {
        // Caller-saved-registers calls differ from `Call` only in the
        // clobber set the real backend's calling-convention lowering
        // applies; the patchpoint protocol itself is identical (`spec.md`
        // §4.6).
        self.lower_call(id, descriptor, callee, args);
    }

    fn visit_goto(&mut self, target: BlockId) {
        let backend_target = self.backend_block(target);
        self.output.build_br(backend_target);
        self.end_block();
    }

    fn visit_branch(&mut self, condition: NodeId, if_true: BlockId, if_false: BlockId) {
        let cond = self.resolve(condition);
        let (t, f) = (self.backend_block(if_true), self.backend_block(if_false));
        self.output.build_cond_br(cond, t, f);
        self.end_block();
    }

    fn visit_switch(&mut self, input: NodeId, cases: &[(i32, BlockId)], default: BlockId) {
        let input_value = self.resolve(input);
        let default_block = self.backend_block(default);
        let resolved_cases: Vec<(i64, B::Block)> = cases
            .iter()
            .map(|&(value, target)| (value as i64, self.backend_block(target)))
            .collect();
        self.output.build_switch(input_value, default_block, &resolved_cases);
        self.end_block();
    }

    fn visit_return(&mut self, pop_count: NodeId, values: &[NodeId]) {
        // `pop_count` is a use (`spec.md` §9, open question (b)): resolved
        // for its liveness effect even though the epilogue's pop-count
        // handling itself is the opaque backend's responsibility.
        let _ = self.resolve(pop_count);
        match values.first() {
            Some(&first) => {
                let v = self.resolve(first);
                self.output.build_ret(v);
            }
            None => {
                self.output.build_ret_void();
            }
        }
        self.end_block();
    }

    fn visit_tail_call(&mut self, descriptor: &CallSiteDescriptor, callee: NodeId, args: &[NodeId]) {
        let resolved_args: smallvec::SmallVec<[B::Value; 4]> = args.iter().map(|&a| self.resolve(a)).collect();
        let live = self.resolve_live_values();
        let size = descriptor.expected_patch_size;
        let result = match descriptor.kind {
            PatchKind::Direct => match descriptor.direct_target {
                Some(target) => {
                    self.output.build_direct_patch(target, size, &resolved_args, &live, true).0
                }
                None => {
                    self.record_error(JitError::MalformedSchedule(
                        "tail call marked direct but carries no resolved target".to_string(),
                    ));
                    self.dummy()
                }
            },
            PatchKind::Indirect => {
                let callee_value = self.resolve(callee);
                self.output
                    .build_indirect_patch(callee_value, size, &resolved_args, &live, true)
                    .0
            }
            PatchKind::Assist => {
                let callee_value = self.resolve(callee);
                self.output
                    .build_assist_patch(callee_value, size, &resolved_args, &live, true)
                    .0
            }
        };
        // A tail call reuses the current frame rather than returning
        // through a fresh epilogue; we still need a backend terminator to
        // close the block, so we model it as returning the patch result
        // directly (`spec.md` §4.6: "TailCall emits a patch-site that
        // reuses the current frame").
        self.output.build_ret(result);
        self.end_block();
    }
}
