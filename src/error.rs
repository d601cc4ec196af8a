//! Error kinds for the four failure modes of `spec.md` §7.
//!
//! The source this system is reimplemented from treats all four as hard
//! assertions that abort the process. As documented in `SPEC_FULL.md` §7
//! (and `DESIGN.md`), a library crate cannot do that to its host process: we
//! return these as `Err(JitError)` so a caller can fall back to a non-JIT
//! tier, exactly as `spec.md` §7's own recovery policy describes, while
//! `debug_assert!`s alongside the checks still catch the underlying bug
//! loudly in debug builds.

use crate::ids::{BlockId, NodeId};
use thiserror::Error;

/// Everything that can go wrong lowering one scheduled function.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JitError {
    /// The backend rejected the IR we built, or hit an internal assertion.
    /// `spec.md` §7.1: "Backend fatal."
    #[error("backend rejected generated IR: {0}")]
    BackendFatal(String),

    /// The schedule violates one of the CFG invariants of `spec.md` §3, or
    /// the liveness/lowering pass found a use that no live-in set or local
    /// definition accounts for. `spec.md` §7.2: "Schedule malformed."
    #[error("malformed schedule: {0}")]
    MalformedSchedule(String),

    /// A `HeapConstant`/`ExternalConstant` magic was not registered with the
    /// load-constant recorder and isn't one of the three reserved magics.
    /// `spec.md` §7.3 / §6 "Reserved load-constant magics."
    #[error("unregistered load-constant magic: 0x{0:x}")]
    UnknownLoadConstantMagic(i64),

    /// A section allocation request did not satisfy its requested
    /// alignment. `spec.md` §7.4 / §5 "Resource policy."
    #[error("section allocation of {requested} bytes violates alignment {align}")]
    MisalignedSectionAllocation { requested: usize, align: usize },
}

impl JitError {
    /// A block successor lists a predecessor that doesn't, in turn, list it
    /// back (`spec.md` §3 invariant 1).
    pub fn dangling_successor(from: BlockId, to: BlockId) -> Self {
        JitError::MalformedSchedule(format!(
            "block {from} has successor {to} that does not list {from} as a predecessor"
        ))
    }

    /// A phi's operand count did not match its block's predecessor count.
    pub fn phi_arity_mismatch(block: BlockId, expected: usize, got: usize) -> Self {
        JitError::MalformedSchedule(format!(
            "block {block} phi expects {expected} operands (one per predecessor), got {got}"
        ))
    }

    /// A deferred phi operand was never resolved because its predecessor
    /// never defined the referenced node (`spec.md` §9, "Deferred phi
    /// filling").
    pub fn unresolved_phi_operand(block: BlockId, predecessor: BlockId, operand: NodeId) -> Self {
        JitError::MalformedSchedule(format!(
            "block {block}: predecessor {predecessor} closed without ever defining {operand}, \
             needed for a phi operand"
        ))
    }
}
