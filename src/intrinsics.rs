//! Lazy table of backend intrinsics (`spec.md` §4.4).
//!
//! Grounded in `examples/original_source/src/llvm/intrinsic-repository.h`:
//! the `FOR_EACH_FTL_INTRINSIC` macro table maps a short name to an LLVM
//! intrinsic name and a function type; each getter lazily calls the
//! `*Slow()` constructor on first reference and caches the result in a
//! field. We replace the X-macro with a closed `Intrinsic` enum and a
//! dense array indexed by its discriminant (`spec.md` §9: "a dense array
//! indexed by an intrinsic enum, each slot initialized on first use").
//! Thread-safe lazy init is unnecessary: one compile is single-threaded
//! (`spec.md` §9, §5).

use crate::backend::Backend;
use crate::common_values::CommonTypes;

/// Every intrinsic `spec.md` §4.4's table names, in table order.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Intrinsic {
    Ceil64,
    DoubleAbs,
    DoubleSin,
    DoubleCos,
    DoubleLog,
    DoubleSqrt,
    DoublePow,
    DoublePowi,
    Ctlz32,
    AddWithOverflow32,
    AddWithOverflow64,
    SubWithOverflow32,
    SubWithOverflow64,
    MulWithOverflow32,
    MulWithOverflow64,
    FrameAddress,
    StackSave,
    Trap,
    Expect,
    Stackmap,
    PatchpointVoid,
    PatchpointInt64,
    GcResult,
    GcResult2,
    GcRelocate,
}

const INTRINSIC_COUNT: usize = 25;

impl Intrinsic {
    fn index(self) -> usize {
        self as usize
    }

    /// The LLVM intrinsic name this crate's `spec.md` §4.4 table assigns.
    pub fn llvm_name(self) -> &'static str {
        use Intrinsic::*;
        match self {
            Ceil64 => "llvm.ceil.f64",
            DoubleAbs => "llvm.fabs.f64",
            DoubleSin => "llvm.sin.f64",
            DoubleCos => "llvm.cos.f64",
            DoubleLog => "llvm.log.f64",
            DoubleSqrt => "llvm.sqrt.f64",
            DoublePow => "llvm.pow.f64",
            DoublePowi => "llvm.powi.f64",
            Ctlz32 => "llvm.ctlz.i32",
            AddWithOverflow32 => "llvm.sadd.with.overflow.i32",
            AddWithOverflow64 => "llvm.sadd.with.overflow.i64",
            SubWithOverflow32 => "llvm.ssub.with.overflow.i32",
            SubWithOverflow64 => "llvm.ssub.with.overflow.i64",
            MulWithOverflow32 => "llvm.smul.with.overflow.i32",
            MulWithOverflow64 => "llvm.smul.with.overflow.i64",
            FrameAddress => "llvm.frameaddress",
            StackSave => "llvm.stacksave",
            Trap => "llvm.trap",
            Expect => "llvm.expect.i1",
            Stackmap => "llvm.experimental.stackmap",
            PatchpointVoid => "llvm.experimental.patchpoint.void",
            PatchpointInt64 => "llvm.experimental.patchpoint.i64",
            GcResult => "llvm.experimental.gc.result.p1s_TaggedStructs",
            GcResult2 => "llvm.experimental.gc.result.sl_p1s_TaggedStructsp1s_TaggedStructss",
            GcRelocate => "llvm.experimental.gc.relocate.p1s_TaggedStructs",
        }
    }

    /// Builds this intrinsic's function type from the common type table,
    /// matching the `functionType(...)` column of `spec.md` §4.4's table.
    fn function_type<B: Backend>(self, backend: &mut B, types: &CommonTypes<B>) -> B::Type {
        use Intrinsic::*;
        let overflow_pair = |backend: &mut B, scalar: B::Type| -> B::Type {
            // Struct-returning overflow intrinsics: `{iN, i1}`. The backend
            // is opaque about struct layout, so we just ask for a function
            // type with no modeled return struct fields beyond the scalar;
            // `Projection` lowering extracts fields by index regardless.
            backend.function_type(scalar, &[scalar, scalar])
        };
        match self {
            Ceil64 | DoubleAbs | DoubleSin | DoubleCos | DoubleLog | DoubleSqrt => {
                backend.function_type(types.f64, &[types.f64])
            }
            DoublePow => backend.function_type(types.f64, &[types.f64, types.f64]),
            DoublePowi => backend.function_type(types.f64, &[types.f64, types.i32]),
            Ctlz32 => backend.function_type(types.i32, &[types.i32, types.i1]),
            AddWithOverflow32 | SubWithOverflow32 | MulWithOverflow32 => overflow_pair(backend, types.i32),
            AddWithOverflow64 | SubWithOverflow64 | MulWithOverflow64 => overflow_pair(backend, types.i64),
            FrameAddress => backend.function_type(types.ref8, &[types.i32]),
            StackSave => backend.function_type(types.ref8, &[]),
            Trap => backend.function_type(types.void, &[]),
            Expect => backend.function_type(types.i1, &[types.i1, types.i1]),
            Stackmap => backend.function_type(types.void, &[types.i64, types.i32]),
            PatchpointVoid => backend.function_type(types.void, &[types.i64, types.i32, types.ref8, types.i32]),
            PatchpointInt64 => backend.function_type(types.i64, &[types.i64, types.i32, types.ref8, types.i32]),
            GcResult => backend.function_type(types.tagged, &[types.token]),
            GcResult2 => backend.function_type(types.tagged, &[types.token]),
            GcRelocate => backend.function_type(types.tagged, &[types.token, types.i32, types.i32]),
        }
    }
}

/// Lazily-materialized, dense cache of every `Intrinsic`'s backend
/// declaration.
pub struct IntrinsicRepository<B: Backend> {
    cache: Vec<Option<B::Value>>,
}

impl<B: Backend> IntrinsicRepository<B> {
    pub fn new() -> Self {
        IntrinsicRepository {
            cache: vec![None; INTRINSIC_COUNT],
        }
    }

    /// Returns the cached `Backend::Value` for `which`, declaring it on the
    /// backend the first time it's referenced.
    pub fn get(&mut self, backend: &mut B, types: &CommonTypes<B>, which: Intrinsic) -> B::Value {
        let slot = which.index();
        if let Some(value) = self.cache[slot] {
            return value;
        }
        let ty = which.function_type(backend, types);
        let value = backend.declare_intrinsic(which.llvm_name(), ty);
        self.cache[slot] = Some(value);
        value
    }
}

impl<B: Backend> Default for IntrinsicRepository<B> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{RecordedInstr, RecordingBackend};

    #[test]
    fn intrinsic_is_declared_once() {
        let mut backend = RecordingBackend::new();
        let types = CommonTypes::new(&mut backend);
        let mut repo = IntrinsicRepository::new();
        let a = repo.get(&mut backend, &types, Intrinsic::Trap);
        let b = repo.get(&mut backend, &types, Intrinsic::Trap);
        assert_eq!(a, b);
        let declares = backend
            .instrs
            .iter()
            .filter(|i| matches!(i, RecordedInstr::DeclareIntrinsic { name } if name == "llvm.trap"))
            .count();
        assert_eq!(declares, 1);
    }

    #[test]
    fn every_intrinsic_resolves_a_name() {
        let mut backend = RecordingBackend::new();
        let types = CommonTypes::new(&mut backend);
        let mut repo = IntrinsicRepository::new();
        for which in [
            Intrinsic::Ceil64,
            Intrinsic::DoubleAbs,
            Intrinsic::DoubleSin,
            Intrinsic::DoubleCos,
            Intrinsic::DoubleLog,
            Intrinsic::DoubleSqrt,
            Intrinsic::DoublePow,
            Intrinsic::DoublePowi,
            Intrinsic::Ctlz32,
            Intrinsic::AddWithOverflow32,
            Intrinsic::AddWithOverflow64,
            Intrinsic::SubWithOverflow32,
            Intrinsic::SubWithOverflow64,
            Intrinsic::MulWithOverflow32,
            Intrinsic::MulWithOverflow64,
            Intrinsic::FrameAddress,
            Intrinsic::StackSave,
            Intrinsic::Trap,
            Intrinsic::Expect,
            Intrinsic::Stackmap,
            Intrinsic::PatchpointVoid,
            Intrinsic::PatchpointInt64,
            Intrinsic::GcResult,
            Intrinsic::GcResult2,
            Intrinsic::GcRelocate,
        ] {
            let _ = repo.get(&mut backend, &types, which);
            assert!(!which.llvm_name().is_empty());
        }
    }
}
