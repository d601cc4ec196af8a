//! Patch descriptors: metadata attached to every patchpoint, keyed by the
//! stable patch id drawn from `Output`'s monotonic counter (`spec.md` §3,
//! "Patch descriptor"; §4.5, "Patch-site protocol").

use crate::ids::PatchId;
use crate::types::PatchKind;

/// One patch site's static metadata, recorded into the compiler state's
/// stack-map info map when the patch is built and later augmented with
/// machine locations during stack-map post-processing (`spec.md` §4.7).
#[derive(Clone, Debug, PartialEq)]
pub struct PatchDescriptor {
    pub id: PatchId,
    pub expected_patch_size: u32,
    pub kind: PatchKind,
    /// Resolved callee address, present only for direct patches.
    pub callee_target: Option<u64>,
    /// Number of actual call arguments carried in the patchpoint's variadic
    /// tail before the live-value arguments (`spec.md` §4.5, item 4).
    pub call_arg_count: u32,
    /// Count of live SSA values passed through the patchpoint's variadic
    /// tail; used to check stack-map completeness (`spec.md` §8, property 6).
    pub live_value_count: u32,
    /// Machine locations bound in by stack-map post-processing (`spec.md`
    /// §4.7); empty until `bind_locations` runs.
    pub locations: Vec<crate::stackmap::MachineLocation>,
}

impl PatchDescriptor {
    pub fn new(
        id: PatchId,
        expected_patch_size: u32,
        kind: PatchKind,
        callee_target: Option<u64>,
        call_arg_count: u32,
        live_value_count: u32,
    ) -> Self {
        PatchDescriptor {
            id,
            expected_patch_size,
            kind,
            callee_target,
            call_arg_count,
            live_value_count,
            locations: Vec::new(),
        }
    }
}
