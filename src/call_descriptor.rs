//! The call descriptor handed in by the upstream optimizer (`spec.md` §3,
//! "Call descriptor"). Out of scope for construction — the core only reads
//! it — but its shape drives the prologue `Output` builds and the register
//! numbers the lowering visitor threads through patchpoints.

use crate::types::MachineRepresentation;
use target_lexicon::{Architecture, Triple};

/// Where a single incoming parameter lives at function entry.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ParameterLocation {
    /// Architecture register number, as assigned by the upstream optimizer.
    Register(u16),
    /// Offset (in words) into the caller's frame.
    CallerFrameSlot(i32),
}

/// A single input parameter: its machine type and where it lives.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Parameter {
    pub machine_type: MachineRepresentation,
    pub location: ParameterLocation,
}

/// Describes one function's calling convention, frame policy and register
/// constraints (`spec.md` §3).
#[derive(Clone, Debug)]
pub struct CallDescriptor {
    pub parameters: Vec<Parameter>,
    /// Determines prologue kind: JS-function calls materialize the JS
    /// calling-convention prologue; otherwise a plain C prologue is used.
    pub is_js_function_call: bool,
    /// When true, the lowering visitor must not assume every allocatable
    /// register is available to it (some are reserved by the caller's ABI).
    pub has_restricted_allocatable_registers: bool,
    /// The target architecture `Parameter::location`'s register numbers are
    /// relative to (`spec.md` §1: "we... specify how the lowering is
    /// parameterized by architecture-specific register numbers carried in
    /// the call descriptor"). The core never branches on this beyond
    /// threading it through to an embedder's own register-name tables; it
    /// is not used to pick a code path here.
    pub architecture: Architecture,
}

impl CallDescriptor {
    /// A minimal descriptor with no parameters, used by tests.
    pub fn empty(is_js_function_call: bool) -> Self {
        CallDescriptor {
            parameters: Vec::new(),
            is_js_function_call,
            has_restricted_allocatable_registers: false,
            architecture: Triple::host().architecture,
        }
    }
}
