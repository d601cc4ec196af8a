//! Per-function compiler state: owns the backend, the code/stack-map
//! sections once compiled, the stack-map info map, the load-constant
//! recorder, and the frame/prologue decisions the liveness pass feeds
//! forward (`spec.md` §3, "Compiler state").
//!
//! Lifetime: created at the start of `Run` (see `driver.rs`) and consumed
//! when `Run` returns the finalized `CompiledFunction`; nothing here
//! persists across invocations except the process-wide one-shot backend
//! initialization flag (`init.rs`).

use crate::backend::{Backend, CodeSection, CompiledArtifact};
use crate::error::JitError;
use crate::ids::PatchId;
use crate::load_constant::LoadConstantRecorder;
use crate::patch::PatchDescriptor;
use crate::types::PrologueKind;
use std::collections::HashMap;

/// `spec.md` §7.4: a section allocation must satisfy its requested
/// alignment, or the liveness/lowering work already done is thrown away
/// rather than installing misaligned code.
fn validate_section_alignment(section: &CodeSection) -> Result<(), JitError> {
    let align = section.align.max(1);
    if !align.is_power_of_two() || section.bytes.len() % align != 0 {
        return Err(JitError::MisalignedSectionAllocation {
            requested: section.bytes.len(),
            align: section.align,
        });
    }
    Ok(())
}

/// One function compile's mutable state, threaded through `Output` and the
/// `TfBuilder` lowering visitor.
pub struct CompilerState<B: Backend> {
    pub backend: B,
    /// `PatchId -> PatchDescriptor`, populated as patch sites are built and
    /// augmented with machine locations during stack-map post-processing.
    pub stack_map_info: HashMap<PatchId, PatchDescriptor>,
    pub load_constant_recorder: LoadConstantRecorder,
    pub prologue_kind: PrologueKind,
    /// Set by the liveness pass: true once a write-barrier store or a
    /// generic call has been visited (`spec.md` §4.2, "Side effects
    /// observed by other passes").
    needs_frame: bool,
    next_patch_id: u64,
}

impl<B: Backend> CompilerState<B> {
    pub fn new(backend: B, prologue_kind: PrologueKind) -> Self {
        CompilerState {
            backend,
            stack_map_info: HashMap::new(),
            load_constant_recorder: LoadConstantRecorder::new(),
            prologue_kind,
            needs_frame: false,
            next_patch_id: 0,
        }
    }

    pub fn needs_frame(&self) -> bool {
        self.needs_frame
    }

    /// Called by the liveness pass once it observes a write-barrier store
    /// or generic call; never unset.
    pub fn set_needs_frame(&mut self, needs_frame: bool) {
        self.needs_frame = self.needs_frame || needs_frame;
    }

    /// Draws the next stable patch id, mirroring `Output`'s
    /// `m_stackMapsId` counter (`spec.md` §4.3).
    pub fn next_patch_id(&mut self) -> PatchId {
        let id = PatchId::from_raw(self.next_patch_id);
        self.next_patch_id += 1;
        id
    }

    pub fn record_patch(&mut self, descriptor: PatchDescriptor) {
        self.stack_map_info.insert(descriptor.id, descriptor);
    }

    /// Runs the backend's compile step, consuming the owned backend
    /// (`spec.md` §5: the execution engine is disposed right after code
    /// bytes are copied out), then checks every returned section against
    /// the alignment it was allocated under (`spec.md` §5/§7.4, "Resource
    /// policy": "allocations must satisfy the requested alignment"). This
    /// crate never maps sections into real addressable memory itself, so
    /// "satisfies its alignment" is checked the only way it can be here: the
    /// section's length must itself be a multiple of the alignment the
    /// memory manager was asked to honor.
    pub fn compile(self) -> Result<(CompiledArtifact, HashMap<PatchId, PatchDescriptor>), crate::error::JitError> {
        let artifact = self.backend.compile()?;
        for section in &artifact.code_sections {
            validate_section_alignment(section)?;
        }
        Ok((artifact, self.stack_map_info))
    }
}
