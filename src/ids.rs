//! Dense entity references used throughout the compiler.
//!
//! Grounded in `cranelift_codegen::ir::entities`: each reference is a
//! newtype around a `u32` rather than a pointer, so blocks and values can be
//! cloned and compared cheaply and side tables can be dense vectors instead
//! of hash maps.

use crate::entity::{entity_impl, EntityRef};
use std::fmt;

/// An opaque reference to an SSA value produced by the upstream scheduler.
///
/// Every produced value and every block has a `NodeId`; ids are assigned by
/// the scheduler, not by this crate, so `NodeId` does not implement
/// `EntityRef::new` as an allocator the way `BlockId` does — it is only ever
/// constructed from a scheduler-assigned number via [`NodeId::from_raw`].
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    /// Wrap a raw scheduler-assigned id.
    pub fn from_raw(raw: u32) -> Self {
        NodeId(raw)
    }

    /// The raw numeric id, for sorting and magic-value comparisons.
    pub fn raw(self) -> u32 {
        self.0
    }
}

entity_impl!(NodeId, "n");

/// An opaque reference to a basic block, keyed by the block id the schedule
/// assigns it (see `spec.md` §3, "Basic Block / Identity").
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(u32);

impl BlockId {
    /// Wrap a raw scheduler-assigned block id.
    pub fn from_raw(raw: u32) -> Self {
        BlockId(raw)
    }

    /// The raw numeric id.
    pub fn raw(self) -> u32 {
        self.0
    }
}

entity_impl!(BlockId, "b");

/// A stable patch id drawn from `Output`'s monotonic counter
/// (`spec.md` §4.3, `m_stackMapsId`).
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PatchId(u64);

impl PatchId {
    pub(crate) fn from_raw(raw: u64) -> Self {
        PatchId(raw)
    }

    /// The raw 64-bit id carried into the patchpoint/statepoint intrinsic.
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PatchId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "patch{}", self.0)
    }
}

impl fmt::Debug for PatchId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        (self as &dyn fmt::Display).fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_roundtrips_raw() {
        let n = NodeId::from_raw(42);
        assert_eq!(n.raw(), 42);
        assert_eq!(n.to_string(), "n42");
    }

    #[test]
    fn block_id_roundtrips_raw() {
        let b = BlockId::from_raw(7);
        assert_eq!(b.raw(), 7);
        assert_eq!(b.to_string(), "b7");
    }
}
