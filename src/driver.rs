//! The `Run` entry point: composes the two schedule-emitter passes and the
//! backend compile step into the single call this crate exposes (`spec.md`
//! §4.8, "Pass Driver").
//!
//! Ordering mirrors `spec.md` §5's guarantee directly: pass 1 (liveness)
//! runs to completion — including `BasicBlockManager::verify_edges_consistent`
//! as a post-condition check on the CFG it built — before pass 2 (lowering)
//! starts. `needs_frame` and the edge/block structure pass 1 produced are the
//! only state pass 2 reads back from it; nothing else survives between them.

use crate::backend::{Backend, CodeSection};
use crate::block::BasicBlockManager;
use crate::call_descriptor::CallDescriptor;
use crate::compiler_state::CompilerState;
use crate::ids::PatchId;
use crate::liveness::LivenessAnalysisVisitor;
use crate::load_constant::LoadConstantRecord;
use crate::lowering::TfBuilder;
use crate::output::Output;
use crate::patch::PatchDescriptor;
use crate::schedule::{Schedule, ScheduleEmitter};
use crate::stackmap::{self, StackMapRecord};
use crate::types::PrologueKind;
use std::collections::HashMap;

/// What kind of code object this compile produces. Threaded through from the
/// input tuple to the output unchanged (`spec.md` §6): the core never
/// branches on it, it is purely metadata for whatever builds the final
/// installed code object from a `CompiledFunction`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CodeKind {
    JsFunction,
    Wasm,
    Builtin,
    Stub,
}

/// Everything one `Run` call hands back (`spec.md` §6, "Output"): the
/// contiguous code bytes (as one section per allocation, first is the
/// function entry), the stack-map info keyed by patch id, the load-constant
/// bindings, and the prologue-kind/frame-needed pair the liveness pass
/// decided.
#[derive(Debug)]
pub struct CompiledFunction {
    pub name: String,
    pub kind: CodeKind,
    pub code_sections: Vec<CodeSection>,
    pub stack_map_info: HashMap<PatchId, PatchDescriptor>,
    pub load_constants: Vec<LoadConstantRecord>,
    pub prologue_kind: PrologueKind,
    pub needs_frame: bool,
}

impl CompiledFunction {
    /// `spec.md` §8, testable property 7: "the function's entry pointer
    /// equals the first code section's base address." We never map the code
    /// bytes into executable memory ourselves (`spec.md` §1's backend
    /// boundary owns that), so this exposes the entry section directly
    /// rather than a raw pointer.
    pub fn entry_section(&self) -> Option<&CodeSection> {
        self.code_sections.first()
    }
}

/// Runs both passes over `schedule` against `call_descriptor`, then compiles
/// through `backend`, returning the finished `CompiledFunction` (`spec.md`
/// §4.8). `name`/`kind` are opaque labels carried through to the output; the
/// isolate handle `spec.md` §6 mentions is used only by whatever constructs
/// the final installed code object from a `CompiledFunction`, a step outside
/// this crate's scope, so it does not appear in this signature.
pub fn run<B: Backend>(
    backend: B,
    schedule: &Schedule,
    call_descriptor: &CallDescriptor,
    name: &str,
    kind: CodeKind,
) -> anyhow::Result<CompiledFunction> {
    log::debug!("compiling '{name}': {} blocks", schedule.blocks.len());

    let mut blocks = BasicBlockManager::new();
    let needs_frame_from_liveness = {
        let mut visitor = LivenessAnalysisVisitor::new(&mut blocks);
        ScheduleEmitter::new(schedule).emit(&mut visitor)?;
        let needs_frame = visitor.needs_frame();
        log::trace!("pass 1 (liveness): needs_frame={needs_frame}");
        visitor.calculate_live_ins()?;
        needs_frame
    };
    blocks.verify_edges_consistent()?;

    let prologue_kind = if call_descriptor.is_js_function_call {
        PrologueKind::JsFunction
    } else {
        PrologueKind::CFunction
    };
    let mut state = CompilerState::new(backend, prologue_kind);
    state.set_needs_frame(needs_frame_from_liveness);

    {
        let output = Output::initialize_build(&mut state, call_descriptor);
        let mut builder = TfBuilder::new(output, &mut blocks, schedule);
        log::trace!("pass 2 (lowering): emitting schedule");
        ScheduleEmitter::new(schedule).emit(&mut builder)?;
        // `Output` borrows `state` mutably; drop it before reclaiming that
        // borrow below for `compile`.
        builder.finish()?;
    }

    let load_constants = state.load_constant_recorder.records();
    let prologue_kind = state.prologue_kind;
    let needs_frame = state.needs_frame();
    let (artifact, mut stack_map_info) = state.compile()?;

    // The one named `.llvm_stackmaps` (`stackmap::STACK_MAP_SECTION_NAME`)
    // carries the backend's patchpoint locations in LLVM's wire format;
    // decode it into records and bind them onto the patch table (`spec.md`
    // §4.7). `RecordingBackend` only emits this section when a test asks it
    // to via its `stack_map_section` hook, so most test fixtures see `None`
    // and bind zero records.
    let records: Vec<StackMapRecord> = match &artifact.stack_map_section {
        Some(bytes) => stackmap::parse_stack_map_section(bytes)?,
        None => Vec::new(),
    };
    log::trace!("binding {} stack-map records", records.len());
    stackmap::bind_stack_map_records(&mut stack_map_info, records)?;

    log::debug!(
        "compiled '{name}': {} code sections, {} patch sites, needs_frame={needs_frame}",
        artifact.code_sections.len(),
        stack_map_info.len()
    );

    Ok(CompiledFunction {
        name: name.to_string(),
        kind,
        code_sections: artifact.code_sections,
        stack_map_info,
        load_constants,
        prologue_kind,
        needs_frame,
    })
}
