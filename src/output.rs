//! Typed IR builder facade wrapping a `Backend` (`spec.md` §4.3).
//!
//! Grounded in `examples/original_source/llvm/Output.h`: block creation,
//! constants, memory ops, arithmetic/control, the `arg()`/`buildLoadArgIndex`
//! parameter accessors, and the three patch-site builders all have a
//! one-to-one counterpart here. `initializeBuild` becomes
//! [`Output::initialize_build`]; `m_stackMapsId` becomes
//! `CompilerState::next_patch_id` (kept on `CompilerState` rather than
//! `Output` itself so `TfBuilder` and `Output` share one counter and one
//! `stack_map_info` map without a borrow-splitting dance).

use crate::backend::{Backend, IntPredicate};
use crate::call_descriptor::CallDescriptor;
use crate::common_values::{CommonTypes, CommonValues};
use crate::compiler_state::CompilerState;
use crate::ids::PatchId;
use crate::intrinsics::{Intrinsic, IntrinsicRepository};
use crate::patch::PatchDescriptor;
use crate::types::{MachineRepresentation, PatchKind, PrologueKind};

/// Typed wrapper around a `Backend`, generic over it the same way the
/// source's `Output` is generic over a fixed LLVM `LBuilder` (`spec.md`
/// §4.3a, expansion).
pub struct Output<'a, B: Backend> {
    state: &'a mut CompilerState<B>,
    pub types: CommonTypes<B>,
    pub values: CommonValues<B>,
    intrinsics: IntrinsicRepository<B>,
    prologue: B::Block,
    arg_value: B::Value,
}

impl<'a, B: Backend> Output<'a, B> {
    /// `initializeBuild(params_desc, allow_all_registers)` (`spec.md`
    /// §4.3): creates the function type, installs the prologue block,
    /// emits parameter pickups per the call descriptor's register/stack
    /// locations, and pre-computes the `arg()` value.
    pub fn initialize_build(state: &'a mut CompilerState<B>, call_descriptor: &CallDescriptor) -> Self {
        let types = CommonTypes::new(&mut state.backend);
        let values = CommonValues::new(&mut state.backend, &types);
        let prologue = state.backend.append_basic_block("prologue");
        state.backend.position_to_bb_end(prologue);
        let arg_value = state.backend.arg();

        // Emit the parameter pickups the prologue is responsible for
        // (`spec.md` §4.3: "emits parameter-register/stack pickups
        // following the register-parameter descriptor"). The pickups
        // themselves are opaque to the core; we just materialize one load
        // per parameter so a JS-function prologue and a C prologue both
        // leave every declared parameter addressable via
        // `build_load_arg_index`.
        for (index, _parameter) in call_descriptor.parameters.iter().enumerate() {
            // Location (register or caller frame slot) only matters to the
            // backend's real prologue codegen; the core just needs every
            // parameter addressable afterwards.
            let _ = state.backend.build_load_arg_index(index as u32);
        }

        Output {
            state,
            types,
            values,
            intrinsics: IntrinsicRepository::new(),
            prologue,
            arg_value,
        }
    }

    pub fn prologue(&self) -> B::Block {
        self.prologue
    }

    pub fn arg(&self) -> B::Value {
        self.arg_value
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.state.backend
    }

    pub fn state_mut(&mut self) -> &mut CompilerState<B> {
        self.state
    }

    // -- Block creation ----------------------------------------------------
    pub fn append_basic_block(&mut self, name: &str) -> B::Block {
        self.state.backend.append_basic_block(name)
    }

    pub fn position_to_bb_end(&mut self, block: B::Block) {
        self.state.backend.position_to_bb_end(block);
    }

    // -- Constants ----------------------------------------------------------
    pub fn const_int(&mut self, rep: MachineRepresentation, value: i64) -> B::Value {
        let ty = self.types.representation_type(rep);
        self.state.backend.const_int(ty, value)
    }

    pub fn const_float(&mut self, value: f64) -> B::Value {
        self.state.backend.const_float(self.types.f64, value)
    }

    pub fn const_iptr(&mut self, value: i64) -> B::Value {
        self.state.backend.const_int(self.types.iptr, value)
    }

    pub fn tagged_null(&mut self) -> B::Value {
        self.state.backend.const_null(self.types.tagged)
    }

    // -- Memory ---------------------------------------------------------
    pub fn build_struct_gep(&mut self, aggregate: B::Value, field: u32) -> B::Value {
        self.state.backend.build_struct_gep(aggregate, field)
    }

    pub fn build_load(&mut self, rep: MachineRepresentation, pointer: B::Value) -> B::Value {
        let ty = self.types.representation_type(rep);
        self.state.backend.build_load(ty, pointer)
    }

    pub fn build_store(&mut self, value: B::Value, pointer: B::Value) -> B::Value {
        self.state.backend.build_store(value, pointer)
    }

    pub fn build_cast(&mut self, value: B::Value, to: MachineRepresentation) -> B::Value {
        let ty = self.types.representation_type(to);
        self.state.backend.build_cast(value, ty)
    }

    // -- Arithmetic & control ------------------------------------------------
    pub fn build_add(&mut self, lhs: B::Value, rhs: B::Value) -> B::Value {
        self.state.backend.build_add(lhs, rhs)
    }
    pub fn build_sub(&mut self, lhs: B::Value, rhs: B::Value) -> B::Value {
        self.state.backend.build_sub(lhs, rhs)
    }
    pub fn build_mul(&mut self, lhs: B::Value, rhs: B::Value) -> B::Value {
        self.state.backend.build_mul(lhs, rhs)
    }
    pub fn build_icmp(&mut self, pred: IntPredicate, lhs: B::Value, rhs: B::Value) -> B::Value {
        self.state.backend.build_icmp(pred, lhs, rhs)
    }
    pub fn build_select(&mut self, condition: B::Value, if_true: B::Value, if_false: B::Value) -> B::Value {
        self.state.backend.build_select(condition, if_true, if_false)
    }
    pub fn build_br(&mut self, target: B::Block) -> B::Value {
        self.state.backend.build_br(target)
    }
    pub fn build_cond_br(&mut self, condition: B::Value, if_true: B::Block, if_false: B::Block) -> B::Value {
        self.state.backend.build_cond_br(condition, if_true, if_false)
    }
    pub fn build_switch(&mut self, input: B::Value, default: B::Block, cases: &[(i64, B::Block)]) -> B::Value {
        self.state.backend.build_switch(input, default, cases)
    }
    pub fn build_ret(&mut self, value: B::Value) -> B::Value {
        self.state.backend.build_ret(value)
    }
    pub fn build_ret_void(&mut self) -> B::Value {
        self.state.backend.build_ret_void()
    }

    // -- Phis -----------------------------------------------------------
    pub fn build_phi(&mut self, rep: MachineRepresentation, block: B::Block) -> B::Value {
        let ty = self.types.representation_type(rep);
        self.state.backend.build_phi(ty, block)
    }
    pub fn add_incoming(&mut self, phi: B::Value, value: B::Value, from: B::Block) {
        self.state.backend.add_incoming(phi, value, from);
    }

    // -- Calls ------------------------------------------------------------
    pub fn build_call(&mut self, callee: B::Value, args: &[B::Value]) -> B::Value {
        self.state.backend.build_call(callee, args)
    }
    pub fn build_extract_value(&mut self, aggregate: B::Value, index: u32) -> B::Value {
        self.state.backend.build_extract_value(aggregate, index)
    }

    // -- Parameters -------------------------------------------------------
    pub fn build_load_arg_index(&mut self, index: u32) -> B::Value {
        self.state.backend.build_load_arg_index(index)
    }
    pub fn build_store_arg_index(&mut self, value: B::Value, index: u32) -> B::Value {
        self.state.backend.build_store_arg_index(value, index)
    }

    // -- Intrinsics -------------------------------------------------------
    pub fn intrinsic(&mut self, which: Intrinsic) -> B::Value {
        self.intrinsics.get(&mut self.state.backend, &self.types, which)
    }

    /// Shared implementation for the three patch-site builders: allocates a
    /// fresh patch id, emits the right patchpoint intrinsic call with the
    /// variadic tail `call_args ++ live`, and records the `PatchDescriptor`
    /// (`spec.md` §4.5).
    fn build_patch_common(
        &mut self,
        kind: PatchKind,
        where_value: B::Value,
        expected_patch_size: u32,
        call_args: &[B::Value],
        live: &[B::Value],
        returns_value: bool,
    ) -> (B::Value, PatchId) {
        let id = self.state.next_patch_id();
        let intrinsic = if returns_value {
            self.intrinsic(Intrinsic::PatchpointInt64)
        } else {
            self.intrinsic(Intrinsic::PatchpointVoid)
        };

        let id_value = self.const_int(MachineRepresentation::Word64, id.raw() as i64);
        let shadow_bytes = self.const_int(MachineRepresentation::Word32, expected_patch_size as i64);
        let num_call_args = self.const_int(MachineRepresentation::Word32, call_args.len() as i64);

        // The patchpoint's variadic tail (`spec.md` §4.5, item 5) is almost
        // always a handful of values; `SmallVec` keeps the common case on
        // the stack the way `cranelift-codegen` does for instruction operand
        // buffers built during lowering.
        let mut args: smallvec::SmallVec<[B::Value; 8]> = smallvec::SmallVec::with_capacity(4 + call_args.len() + live.len());
        args.push(id_value);
        args.push(shadow_bytes);
        args.push(where_value);
        args.push(num_call_args);
        args.extend_from_slice(call_args);
        args.extend_from_slice(live);

        let result = self.build_call(intrinsic, &args);

        let callee_target = match kind {
            PatchKind::Direct => Some(0),
            _ => None,
        };
        self.state.record_patch(PatchDescriptor::new(
            id,
            expected_patch_size,
            kind,
            callee_target,
            call_args.len() as u32,
            live.len() as u32,
        ));
        (result, id)
    }

    /// `buildDirectPatch(where)` (`spec.md` §4.5): the site is later
    /// overwritten with a direct branch to a callee known by address.
    pub fn build_direct_patch(
        &mut self,
        direct_target: u64,
        expected_patch_size: u32,
        call_args: &[B::Value],
        live: &[B::Value],
        returns_value: bool,
    ) -> (B::Value, PatchId) {
        let target = self.const_iptr(direct_target as i64);
        let (result, id) = self.build_patch_common(
            PatchKind::Direct,
            target,
            expected_patch_size,
            call_args,
            live,
            returns_value,
        );
        if let Some(descriptor) = self.state.stack_map_info.get_mut(&id) {
            descriptor.callee_target = Some(direct_target);
        }
        (result, id)
    }

    /// `buildIndirectPatch(where)`: the site is overwritten with an
    /// indirect call through the register holding `where` at runtime.
    pub fn build_indirect_patch(
        &mut self,
        where_value: B::Value,
        expected_patch_size: u32,
        call_args: &[B::Value],
        live: &[B::Value],
        returns_value: bool,
    ) -> (B::Value, PatchId) {
        self.build_patch_common(
            PatchKind::Indirect,
            where_value,
            expected_patch_size,
            call_args,
            live,
            returns_value,
        )
    }

    /// `buildAssistPatch(where)`: a thunk/trampoline entry for
    /// runtime-resolved targets; `where` is a cookie interpreted by the
    /// assist handler.
    pub fn build_assist_patch(
        &mut self,
        cookie: B::Value,
        expected_patch_size: u32,
        call_args: &[B::Value],
        live: &[B::Value],
        returns_value: bool,
    ) -> (B::Value, PatchId) {
        self.build_patch_common(
            PatchKind::Assist,
            cookie,
            expected_patch_size,
            call_args,
            live,
            returns_value,
        )
    }

    pub fn prologue_kind(&self) -> PrologueKind {
        self.state.prologue_kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RecordingBackend;

    fn new_state() -> CompilerState<RecordingBackend> {
        CompilerState::new(RecordingBackend::new(), PrologueKind::CFunction)
    }

    #[test]
    fn direct_patch_records_callee_target() {
        let mut state = new_state();
        let descriptor = CallDescriptor::empty(false);
        let mut output = Output::initialize_build(&mut state, &descriptor);
        let (_, id) = output.build_direct_patch(0xdead_beef, 16, &[], &[], false);
        assert_eq!(
            output.state_mut().stack_map_info[&id].callee_target,
            Some(0xdead_beef)
        );
    }

    #[test]
    fn indirect_patch_has_no_callee_target() {
        let mut state = new_state();
        let descriptor = CallDescriptor::empty(false);
        let mut output = Output::initialize_build(&mut state, &descriptor);
        let cookie = output.const_iptr(7);
        let (_, id) = output.build_indirect_patch(cookie, 16, &[], &[], false);
        assert_eq!(output.state_mut().stack_map_info[&id].callee_target, None);
    }

    #[test]
    fn patch_ids_are_unique_across_builders() {
        let mut state = new_state();
        let descriptor = CallDescriptor::empty(false);
        let mut output = Output::initialize_build(&mut state, &descriptor);
        let cookie = output.const_iptr(1);
        let (_, a) = output.build_assist_patch(cookie, 8, &[], &[], false);
        let (_, b) = output.build_direct_patch(0x1000, 8, &[], &[], false);
        assert_ne!(a, b);
    }

    #[test]
    fn patch_live_value_count_matches_stack_map_info() {
        let mut state = new_state();
        let descriptor = CallDescriptor::empty(false);
        let mut output = Output::initialize_build(&mut state, &descriptor);
        let live1 = output.const_int(MachineRepresentation::Word32, 1);
        let live2 = output.const_int(MachineRepresentation::Word32, 2);
        let (_, id) = output.build_indirect_patch(live1, 16, &[], &[live1, live2], true);
        assert_eq!(output.state_mut().stack_map_info[&id].live_value_count, 2);
    }
}
