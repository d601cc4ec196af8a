//! Maps "magic" 64-bit constants embedded in `HeapConstant`/`ExternalConstant`
//! nodes back to the semantic category a later post-processing pass needs
//! (`spec.md` §3, "Load constant record"; §6, "Reserved load-constant
//! magics").
//!
//! Grounded in
//! `examples/original_source/src/llvm/load-constant-recorder.cc`:
//! `Register`/`Query` and the three fixed reserved magics port directly.
//! `EMASSERT(found != map_.end())` becomes a typed
//! `JitError::UnknownLoadConstantMagic` (`spec.md` §7.3) instead of an
//! abort, per this crate's library-safe error-handling stance
//! (`SPEC_FULL.md` §7).

use crate::error::JitError;
use std::collections::HashMap;

/// `spec.md` §6, "Reserved load-constant magics".
pub const ISOLATE_EXTERNAL_REFERENCE_MAGIC: i64 = 0xfdfdfdfdu32 as i64;
pub const RECORD_STUB_CODE_CONSTANT_MAGIC: i64 = 0xfefefefeu32 as i64;
pub const MODULO_EXTERNAL_REFERENCE_MAGIC: i64 = 0xdfdfdfdfu32 as i64;

/// The semantic category a magic constant resolves to (`spec.md` §3, "Load
/// constant record").
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum LoadConstantKind {
    IsolateExternalReference,
    RecordStubCodeConstant,
    ModuloExternalReference,
    /// Index into the code object's heap-constant table.
    HeapConstant(u32),
    /// Index into the code object's external-reference table.
    ExternalConstant(u32),
}

/// One binding from an embedded magic to its semantic kind, as handed to the
/// final code object (`spec.md` §3, "Load constant record"; §6, output (c)).
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct LoadConstantRecord {
    pub magic: i64,
    pub kind: LoadConstantKind,
}

/// Registered non-reserved magics, plus the three fixed reserved ones
/// (queried without consulting the map, per `spec.md` §4.6: "Reserved
/// magics must be classified via their fixed values without consulting the
/// recorder map").
#[derive(Default)]
pub struct LoadConstantRecorder {
    map: HashMap<i64, LoadConstantKind>,
}

impl LoadConstantRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associates `magic` with `kind`. Called by the TF Builder when it
    /// lowers a `HeapConstant`/`ExternalConstant`/`CodeForCall` node whose
    /// magic isn't one of the three reserved values.
    pub fn register(&mut self, magic: i64, kind: LoadConstantKind) {
        self.map.insert(magic, kind);
    }

    /// Resolves `magic` to its semantic kind. Reserved magics always
    /// resolve without a lookup; anything else must have been `register`ed
    /// first, or this returns `JitError::UnknownLoadConstantMagic`
    /// (`spec.md` §7.3).
    pub fn query(&self, magic: i64) -> Result<LoadConstantKind, JitError> {
        if magic == ISOLATE_EXTERNAL_REFERENCE_MAGIC {
            return Ok(LoadConstantKind::IsolateExternalReference);
        }
        if magic == RECORD_STUB_CODE_CONSTANT_MAGIC {
            return Ok(LoadConstantKind::RecordStubCodeConstant);
        }
        if magic == MODULO_EXTERNAL_REFERENCE_MAGIC {
            return Ok(LoadConstantKind::ModuloExternalReference);
        }
        self.map
            .get(&magic)
            .copied()
            .ok_or(JitError::UnknownLoadConstantMagic(magic))
    }

    /// Every magic registered so far, for the final code object's
    /// load-constant record list (`spec.md` §6, output (c)). Reserved magics
    /// never pass through `register`, so they never appear here.
    pub fn records(&self) -> Vec<LoadConstantRecord> {
        self.map
            .iter()
            .map(|(&magic, &kind)| LoadConstantRecord { magic, kind })
            .collect()
    }
}
