//! Shared scalar types used across the schedule, the liveness pass and the
//! lowering visitor (`spec.md` §3).

use std::fmt;

/// Bit width and taggedness of a value. Tagged representations are pointers
/// into the GC-managed address space and require relocation tracking.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
pub enum MachineRepresentation {
    Word8,
    Word16,
    Word32,
    Word64,
    Float32,
    Float64,
    TaggedSigned,
    TaggedPointer,
    Tagged,
    Bit,
}

impl MachineRepresentation {
    /// True for any of the three tagged representations: these are
    /// GC-managed pointers that require relocation tracking at every
    /// safepoint (`spec.md` §3, glossary "Tagged").
    pub fn is_tagged(self) -> bool {
        matches!(
            self,
            MachineRepresentation::TaggedSigned
                | MachineRepresentation::TaggedPointer
                | MachineRepresentation::Tagged
        )
    }

    /// Bit width of this representation, where meaningful.
    pub fn bit_width(self) -> u32 {
        use MachineRepresentation::*;
        match self {
            Word8 | Bit => 8,
            Word16 => 16,
            Word32 | TaggedSigned | Float32 => 32,
            Word64 | Float64 | TaggedPointer | Tagged => 64,
        }
    }
}

/// Signed/unsigned/any hint used for loads and comparisons.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
pub enum MachineSemantic {
    Signed,
    Unsigned,
    Any,
}

/// Write-barrier strength recorded on a tagged store (`spec.md` §4.6,
/// "Memory").
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
pub enum WriteBarrierKind {
    /// No barrier: the stored value is known not to require GC tracking.
    None,
    /// A full write barrier helper call must run after the store.
    Full,
}

impl WriteBarrierKind {
    pub fn is_barrier(self) -> bool {
        matches!(self, WriteBarrierKind::Full)
    }
}

/// Kind of patch site a patchpoint records (`spec.md` §3, "Patch descriptor",
/// and §4.5).
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
pub enum PatchKind {
    /// Overwritten with a direct branch to a callee known by address at
    /// patch time.
    Direct,
    /// Overwritten with an indirect call through a register.
    Indirect,
    /// A thunk/trampoline entry for runtime-resolved targets.
    Assist,
}

impl fmt::Display for PatchKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            PatchKind::Direct => "direct",
            PatchKind::Indirect => "indirect",
            PatchKind::Assist => "assist",
        };
        f.write_str(s)
    }
}

/// Prologue shape selected from `CallDescriptor::is_js_function_call`
/// (`spec.md` §3, "Compiler state").
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
pub enum PrologueKind {
    JsFunction,
    CFunction,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tagged_representations_are_flagged() {
        assert!(MachineRepresentation::Tagged.is_tagged());
        assert!(MachineRepresentation::TaggedSigned.is_tagged());
        assert!(MachineRepresentation::TaggedPointer.is_tagged());
        assert!(!MachineRepresentation::Word32.is_tagged());
    }

    #[test]
    fn bit_widths_match_representation() {
        assert_eq!(MachineRepresentation::Word8.bit_width(), 8);
        assert_eq!(MachineRepresentation::Float64.bit_width(), 64);
    }
}
