//! The scheduled IR handed to this crate by the upstream optimizer, and the
//! `Visitor` interface the two passes (liveness, lowering) implement against
//! it (`spec.md` §4.1).
//!
//! Node kinds are a closed enum (`NodeOp`) rather than open inheritance, per
//! `spec.md` §9's design note; `Visitor` is a trait with default no-op
//! bodies so a pass overrides only the handful of kinds it cares about, and
//! `ScheduleEmitter::emit` is the single place that matches `NodeOp`
//! exhaustively and dispatches to the right method — the two design options
//! `spec.md` §9 calls equivalent, combined so there is one source of truth
//! for "what node kinds exist."

use crate::call_descriptor::CallDescriptor;
use crate::error::JitError;
use crate::ids::{BlockId, NodeId};
use crate::types::{MachineRepresentation, MachineSemantic, PatchKind, WriteBarrierKind};

/// Static call-site metadata threaded through `Call`/`TailCall` nodes:
/// the patch kind to emit and (for direct patches) the resolved callee
/// address (`spec.md` §4.5).
#[derive(Clone, Debug, PartialEq)]
pub struct CallSiteDescriptor {
    pub kind: PatchKind,
    pub expected_patch_size: u32,
    pub direct_target: Option<u64>,
    pub callee_descriptor: CallDescriptor,
}

/// One scheduled IR node's operation and operands. Every id used here must
/// already have appeared either as a prior node in this block or as a
/// live-in computed by the liveness pass.
#[derive(Clone, Debug, PartialEq)]
pub enum NodeOp {
    /// The `index`-th incoming parameter, per the function's call
    /// descriptor.
    Parameter(u32),
    Int32Constant(i32),
    Float64Constant(u64), // bit pattern, so NodeOp stays Eq
    SmiConstant(i64),
    /// `spec.md` §3/§6: embeds a magic constant later classified by the
    /// load-constant recorder.
    HeapConstant(i64),
    ExternalConstant(i64),
    CodeForCall(i64),

    Int32Add(NodeId, NodeId),
    Int32Sub(NodeId, NodeId),
    Int32Mul(NodeId, NodeId),
    Int32AddWithOverflow(NodeId, NodeId),
    Int32SubWithOverflow(NodeId, NodeId),
    Int32MulWithOverflow(NodeId, NodeId),
    Int64Add(NodeId, NodeId),
    /// Ordering comparison producing a `Bit`-represented value; the
    /// semantic hint picks signed vs. unsigned `buildICmp` (`spec.md` §4.3).
    Int32LessThan {
        lhs: NodeId,
        rhs: NodeId,
        semantic: MachineSemantic,
    },
    /// Raw bitwise/pointer equality, used for null checks on tagged values.
    WordEqual(NodeId, NodeId),

    /// Selects field `index` of a struct-returning value (an overflow pair
    /// or a paired gc-result).
    Projection { input: NodeId, index: u32 },

    Load {
        rep: MachineRepresentation,
        semantic: MachineSemantic,
        base: NodeId,
        offset: NodeId,
    },
    Store {
        rep: MachineRepresentation,
        barrier: WriteBarrierKind,
        base: NodeId,
        offset: NodeId,
        value: NodeId,
    },

    /// One incoming slot per predecessor, in the same order as the block's
    /// predecessor list.
    Phi {
        rep: MachineRepresentation,
        operands: Vec<NodeId>,
    },

    Call {
        descriptor: CallSiteDescriptor,
        callee: NodeId,
        args: Vec<NodeId>,
    },
    CallWithCallerSavedRegisters {
        descriptor: CallSiteDescriptor,
        callee: NodeId,
        args: Vec<NodeId>,
    },
}

/// How a block ends. Terminators are emitted after all of a block's nodes
/// (`spec.md` §4.1).
#[derive(Clone, Debug, PartialEq)]
pub enum Terminator {
    Goto(BlockId),
    Branch {
        condition: NodeId,
        if_true: BlockId,
        if_false: BlockId,
    },
    Switch {
        input: NodeId,
        cases: Vec<(i32, BlockId)>,
        default: BlockId,
    },
    /// `pop_count` is a node id referencing a *use*, not a new definition
    /// (`spec.md` §9, open question (b)).
    Return {
        pop_count: NodeId,
        values: Vec<NodeId>,
    },
    TailCall {
        descriptor: CallSiteDescriptor,
        callee: NodeId,
        args: Vec<NodeId>,
    },
}

/// One scheduled block: its id, deferred-placement hint, predecessors (given
/// by the scheduler, not yet validated against anyone's successor list), its
/// nodes in emission order, and its terminator.
#[derive(Clone, Debug)]
pub struct ScheduledBlock {
    pub id: BlockId,
    pub is_deferred: bool,
    pub predecessors: Vec<BlockId>,
    pub nodes: Vec<(NodeId, NodeOp)>,
    pub terminator: Terminator,
}

/// The full scheduled function body: an ordered list of blocks forming the
/// SSA graph (`spec.md` §3, "Schedule").
#[derive(Clone, Debug, Default)]
pub struct Schedule {
    pub blocks: Vec<ScheduledBlock>,
}

/// Implemented by each pass that walks the schedule. Every method has a
/// no-op default so a visitor overrides only the node kinds it cares about.
#[allow(unused_variables)]
pub trait Visitor {
    fn visit_block(&mut self, id: BlockId, is_deferred: bool, predecessors: &[BlockId]) {}

    fn visit_parameter(&mut self, id: NodeId, index: u32) {}
    fn visit_int32_constant(&mut self, id: NodeId, value: i32) {}
    fn visit_float64_constant(&mut self, id: NodeId, bits: u64) {}
    fn visit_smi_constant(&mut self, id: NodeId, value: i64) {}
    fn visit_heap_constant(&mut self, id: NodeId, magic: i64) {}
    fn visit_external_constant(&mut self, id: NodeId, magic: i64) {}
    fn visit_code_for_call(&mut self, id: NodeId, magic: i64) {}

    fn visit_int32_add(&mut self, id: NodeId, lhs: NodeId, rhs: NodeId) {}
    fn visit_int32_sub(&mut self, id: NodeId, lhs: NodeId, rhs: NodeId) {}
    fn visit_int32_mul(&mut self, id: NodeId, lhs: NodeId, rhs: NodeId) {}
    fn visit_int32_add_with_overflow(&mut self, id: NodeId, lhs: NodeId, rhs: NodeId) {}
    fn visit_int32_sub_with_overflow(&mut self, id: NodeId, lhs: NodeId, rhs: NodeId) {}
    fn visit_int32_mul_with_overflow(&mut self, id: NodeId, lhs: NodeId, rhs: NodeId) {}
    fn visit_int64_add(&mut self, id: NodeId, lhs: NodeId, rhs: NodeId) {}
    fn visit_int32_less_than(&mut self, id: NodeId, lhs: NodeId, rhs: NodeId, semantic: MachineSemantic) {}
    fn visit_word_equal(&mut self, id: NodeId, lhs: NodeId, rhs: NodeId) {}

    fn visit_projection(&mut self, id: NodeId, input: NodeId, index: u32) {}

    fn visit_load(
        &mut self,
        id: NodeId,
        rep: MachineRepresentation,
        semantic: MachineSemantic,
        base: NodeId,
        offset: NodeId,
    ) {
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
    }

    fn visit_phi(&mut self, id: NodeId, rep: MachineRepresentation, operands: &[NodeId]) {}

    fn visit_call(&mut self, id: NodeId, descriptor: &CallSiteDescriptor, callee: NodeId, args: &[NodeId]) {}
    fn visit_call_with_caller_saved_registers(
        &mut self,
        id: NodeId,
        descriptor: &CallSiteDescriptor,
        callee: NodeId,
        args: &[NodeId],
    ) {
    }

    fn visit_goto(&mut self, target: BlockId) {}
    fn visit_branch(&mut self, condition: NodeId, if_true: BlockId, if_false: BlockId) {}
    fn visit_switch(&mut self, input: NodeId, cases: &[(i32, BlockId)], default: BlockId) {}
    fn visit_return(&mut self, pop_count: NodeId, values: &[NodeId]) {}
    fn visit_tail_call(&mut self, descriptor: &CallSiteDescriptor, callee: NodeId, args: &[NodeId]) {}
}

/// Walks a `Schedule`, dispatching each node and terminator to a `Visitor`.
/// Does not reorder blocks or nodes: the schedule's given order is assumed
/// to already be a valid RPO (`spec.md` §4.1 contract).
pub struct ScheduleEmitter<'a> {
    schedule: &'a Schedule,
}

impl<'a> ScheduleEmitter<'a> {
    pub fn new(schedule: &'a Schedule) -> Self {
        ScheduleEmitter { schedule }
    }

    pub fn emit(&self, visitor: &mut impl Visitor) -> Result<(), JitError> {
        for block in &self.schedule.blocks {
            visitor.visit_block(block.id, block.is_deferred, &block.predecessors);

            let mut past_phis = false;
            for (id, op) in &block.nodes {
                if matches!(op, NodeOp::Phi { .. }) {
                    if past_phis {
                        return Err(JitError::MalformedSchedule(format!(
                            "block {}: phi {} does not appear at block head",
                            block.id, id
                        )));
                    }
                } else {
                    past_phis = true;
                }
                dispatch_node(visitor, *id, op);
            }

            dispatch_terminator(visitor, &block.terminator);
        }
        Ok(())
    }
}

fn dispatch_node(visitor: &mut impl Visitor, id: NodeId, op: &NodeOp) {
    match op {
        NodeOp::Parameter(index) => visitor.visit_parameter(id, *index),
        NodeOp::Int32Constant(v) => visitor.visit_int32_constant(id, *v),
        NodeOp::Float64Constant(bits) => visitor.visit_float64_constant(id, *bits),
        NodeOp::SmiConstant(v) => visitor.visit_smi_constant(id, *v),
        NodeOp::HeapConstant(magic) => visitor.visit_heap_constant(id, *magic),
        NodeOp::ExternalConstant(magic) => visitor.visit_external_constant(id, *magic),
        NodeOp::CodeForCall(magic) => visitor.visit_code_for_call(id, *magic),
        NodeOp::Int32Add(l, r) => visitor.visit_int32_add(id, *l, *r),
        NodeOp::Int32Sub(l, r) => visitor.visit_int32_sub(id, *l, *r),
        NodeOp::Int32Mul(l, r) => visitor.visit_int32_mul(id, *l, *r),
        NodeOp::Int32AddWithOverflow(l, r) => visitor.visit_int32_add_with_overflow(id, *l, *r),
        NodeOp::Int32SubWithOverflow(l, r) => visitor.visit_int32_sub_with_overflow(id, *l, *r),
        NodeOp::Int32MulWithOverflow(l, r) => visitor.visit_int32_mul_with_overflow(id, *l, *r),
        NodeOp::Int64Add(l, r) => visitor.visit_int64_add(id, *l, *r),
        NodeOp::Int32LessThan { lhs, rhs, semantic } => {
            visitor.visit_int32_less_than(id, *lhs, *rhs, *semantic)
        }
        NodeOp::WordEqual(l, r) => visitor.visit_word_equal(id, *l, *r),
        NodeOp::Projection { input, index } => visitor.visit_projection(id, *input, *index),
        NodeOp::Load {
            rep,
            semantic,
            base,
            offset,
        } => visitor.visit_load(id, *rep, *semantic, *base, *offset),
        NodeOp::Store {
            rep,
            barrier,
            base,
            offset,
            value,
        } => visitor.visit_store(id, *rep, *barrier, *base, *offset, *value),
        NodeOp::Phi { rep, operands } => visitor.visit_phi(id, *rep, operands),
        NodeOp::Call {
            descriptor,
            callee,
            args,
        } => visitor.visit_call(id, descriptor, *callee, args),
        NodeOp::CallWithCallerSavedRegisters {
            descriptor,
            callee,
            args,
        } => visitor.visit_call_with_caller_saved_registers(id, descriptor, *callee, args),
    }
}

fn dispatch_terminator(visitor: &mut impl Visitor, terminator: &Terminator) {
    match terminator {
        Terminator::Goto(target) => visitor.visit_goto(*target),
        Terminator::Branch {
            condition,
            if_true,
            if_false,
        } => visitor.visit_branch(*condition, *if_true, *if_false),
        Terminator::Switch {
            input,
            cases,
            default,
        } => visitor.visit_switch(*input, cases, *default),
        Terminator::Return { pop_count, values } => visitor.visit_return(*pop_count, values),
        Terminator::TailCall {
            descriptor,
            callee,
            args,
        } => visitor.visit_tail_call(descriptor, *callee, args),
    }
}
