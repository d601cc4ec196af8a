//! Canonical typed constants and type handles, materialized once per
//! compile (`spec.md` §4, "Common Values").
//!
//! Grounded in `examples/original_source/llvm/common-values.cc`:
//! `CommonValues`'s constructor builds every scalar type and a handful of
//! canonical constants (`booleanTrue`, `int32Zero`, `intPtrOne`, ...) up
//! front from a single `LContext`. We do the same against a generic
//! `Backend`, and add `representation_type`/`tagged` so the lowering
//! visitor can map a `MachineRepresentation` straight to a `Backend::Type`
//! instead of re-deriving bit widths at every use (`spec.md` §3).

use crate::backend::Backend;
use crate::types::MachineRepresentation;

/// Every scalar `Backend::Type` this crate ever needs, built once in
/// [`CommonTypes::new`].
pub struct CommonTypes<B: Backend> {
    pub void: B::Type,
    /// `i1`, used both as `boolean` and as the bit representation.
    pub i1: B::Type,
    pub i8: B::Type,
    pub i16: B::Type,
    pub i32: B::Type,
    pub i64: B::Type,
    /// Pointer-sized integer (`intPtr` in the source).
    pub iptr: B::Type,
    pub f32: B::Type,
    pub f64: B::Type,
    pub token: B::Type,
    pub ref8: B::Type,
    /// A tagged pointer: address space 1, the GC-managed space (`spec.md`
    /// glossary, "Tagged").
    pub tagged: B::Type,
}

impl<B: Backend> CommonTypes<B> {
    pub fn new(backend: &mut B) -> Self {
        let i8 = backend.int_type(8);
        let iptr = backend.int_type(64);
        CommonTypes {
            void: backend.void_type(),
            i1: backend.int_type(1),
            i8,
            i16: backend.int_type(16),
            i32: backend.int_type(32),
            i64: backend.int_type(64),
            iptr,
            f32: backend.float_type(32),
            f64: backend.float_type(64),
            token: backend.token_type(),
            ref8: backend.pointer_type(i8, 0),
            tagged: backend.pointer_type(iptr, 1),
        }
    }

    /// Maps a `MachineRepresentation` to its `Backend::Type`, the
    /// generalization of `spec.md` §3's bit-width/taggedness enum into a
    /// concrete backend handle (`spec.md` §4.6, used by every constant and
    /// load/store lowering).
    pub fn representation_type(&self, rep: MachineRepresentation) -> B::Type {
        use MachineRepresentation::*;
        match rep {
            Word8 => self.i8,
            Word16 => self.i16,
            Word32 => self.i32,
            Word64 => self.i64,
            Float32 => self.f32,
            Float64 => self.f64,
            Bit => self.i1,
            TaggedSigned | TaggedPointer | Tagged => self.tagged,
        }
    }
}

/// Canonical constants built from [`CommonTypes`], mirroring
/// `common-values.cc`'s `booleanTrue`/`int32Zero`/`intPtrOne` fields.
pub struct CommonValues<B: Backend> {
    pub boolean_true: B::Value,
    pub boolean_false: B::Value,
    pub int32_zero: B::Value,
    pub int32_one: B::Value,
    pub int64_zero: B::Value,
    pub intptr_zero: B::Value,
    pub double_zero: B::Value,
}

impl<B: Backend> CommonValues<B> {
    pub fn new(backend: &mut B, types: &CommonTypes<B>) -> Self {
        CommonValues {
            boolean_true: backend.const_int(types.i1, 1),
            boolean_false: backend.const_int(types.i1, 0),
            int32_zero: backend.const_int(types.i32, 0),
            int32_one: backend.const_int(types.i32, 1),
            int64_zero: backend.const_int(types.i64, 0),
            intptr_zero: backend.const_int(types.iptr, 0),
            double_zero: backend.const_float(types.f64, 0.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RecordingBackend;

    #[test]
    fn representation_type_covers_every_variant() {
        let mut backend = RecordingBackend::new();
        let types = CommonTypes::new(&mut backend);
        for rep in [
            MachineRepresentation::Word8,
            MachineRepresentation::Word16,
            MachineRepresentation::Word32,
            MachineRepresentation::Word64,
            MachineRepresentation::Float32,
            MachineRepresentation::Float64,
            MachineRepresentation::TaggedSigned,
            MachineRepresentation::TaggedPointer,
            MachineRepresentation::Tagged,
            MachineRepresentation::Bit,
        ] {
            let _ = types.representation_type(rep);
        }
    }

    #[test]
    fn tagged_representations_share_the_tagged_type() {
        let mut backend = RecordingBackend::new();
        let types = CommonTypes::new(&mut backend);
        assert_eq!(
            types.representation_type(MachineRepresentation::Tagged),
            types.representation_type(MachineRepresentation::TaggedPointer)
        );
    }
}
