//! Stack-map post-processing (`spec.md` §4.7): parses the backend's
//! `.llvm_stackmaps` section and binds machine locations back onto the
//! `PatchDescriptor` each patch id was recorded under.
//!
//! `spec.md` §1's Non-goals place *encoding* a stack-map section out of
//! scope — we never produce `.llvm_stackmaps` bytes ourselves, since that's
//! the concrete backend's job. Parsing the bytes a real backend hands back
//! and binding them onto the `PatchDescriptor` table is explicitly in scope
//! (`spec.md` §4.7), so `parse_stack_map_section` below decodes LLVM's actual
//! wire format (version 3, documented in LLVM's `StackMaps.rst`): a header,
//! one `StkSizeRecord` per function, a constant pool, then one `StkMapRecord`
//! per patchpoint with its location list.

use crate::error::JitError;
use crate::ids::PatchId;
use crate::patch::PatchDescriptor;
use std::collections::HashMap;

/// A bounds-checked little-endian cursor over a stack-map section's bytes.
/// Every read fails closed with `BackendFatal` rather than panicking — a
/// truncated or corrupt section is a backend bug, not a crate bug, but we
/// still can't let it take the process down.
struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Cursor { bytes, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], JitError> {
        let end = self.pos.checked_add(len).ok_or_else(|| truncated())?;
        let slice = self.bytes.get(self.pos..end).ok_or_else(truncated)?;
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, JitError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, JitError> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn u32(&mut self) -> Result<u32, JitError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64, JitError> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn i32(&mut self) -> Result<i32, JitError> {
        Ok(self.u32()? as i32)
    }

    fn skip(&mut self, len: usize) -> Result<(), JitError> {
        self.take(len)?;
        Ok(())
    }
}

fn truncated() -> JitError {
    JitError::BackendFatal("stack map section truncated".to_string())
}

/// LLVM `StackMaps.rst` location `Kind` values we know how to translate into
/// a [`MachineLocation`]. `Direct`/`Indirect`/`Constant`/`ConstIndex` never
/// appear in the live-value portion of a record this crate builds (we only
/// ever ask the backend to report where a live SSA value ended up), so they
/// are treated as a backend-fatal surprise rather than silently accepted.
const LOCATION_KIND_REGISTER: u8 = 1;
const LOCATION_KIND_DIRECT: u8 = 2;
const LOCATION_KIND_INDIRECT: u8 = 3;
const LOCATION_KIND_CONSTANT: u8 = 4;
const LOCATION_KIND_CONST_INDEX: u8 = 5;

/// Parses a `.llvm_stackmaps`-format section into one [`StackMapRecord`] per
/// patchpoint it describes. `patch_id` is LLVM's `PatchPointID` field
/// reinterpreted as this crate's `PatchId` — the same value `Output` handed
/// the backend when it built the patchpoint (`spec.md` §4.6).
pub fn parse_stack_map_section(bytes: &[u8]) -> Result<Vec<StackMapRecord>, JitError> {
    let mut cursor = Cursor::new(bytes);

    let _version = cursor.u8()?;
    cursor.skip(1)?; // Reserved (should be 0).
    cursor.u16()?; // Reserved (should be 0).
    let num_functions = cursor.u32()?;
    let num_constants = cursor.u32()?;
    let num_records = cursor.u32()?;

    // StkSizeRecord: FunctionAddress (u64), StackSize (u64), RecordCount (u64).
    for _ in 0..num_functions {
        cursor.u64()?;
        cursor.u64()?;
        cursor.u64()?;
    }

    // Constants: one u64 each, referenced by StkMapRecord locations of kind
    // ConstIndex. This crate never emits ConstIndex locations for live
    // values, but the pool must still be walked to stay aligned with the
    // record table that follows.
    for _ in 0..num_constants {
        cursor.u64()?;
    }

    let mut records = Vec::with_capacity(num_records as usize);
    for _ in 0..num_records {
        let patch_point_id = cursor.u64()?;
        cursor.u32()?; // InstructionOffset.
        cursor.u16()?; // Reserved.
        let num_locations = cursor.u16()?;

        let mut locations = Vec::with_capacity(num_locations as usize);
        for _ in 0..num_locations {
            let kind = cursor.u8()?;
            cursor.u8()?; // Reserved.
            cursor.u16()?; // LocationSize.
            let dwarf_reg_num = cursor.u16()?;
            cursor.u16()?; // Reserved.
            let offset_or_small_constant = cursor.i32()?;
            let location = match kind {
                LOCATION_KIND_REGISTER => MachineLocation::Register(dwarf_reg_num),
                LOCATION_KIND_INDIRECT => MachineLocation::FrameSlot(offset_or_small_constant),
                LOCATION_KIND_DIRECT | LOCATION_KIND_CONSTANT | LOCATION_KIND_CONST_INDEX => {
                    return Err(JitError::BackendFatal(format!(
                        "stack map location kind {kind} is not a live-value location"
                    )));
                }
                other => {
                    return Err(JitError::BackendFatal(format!(
                        "unrecognized stack map location kind {other}"
                    )));
                }
            };
            locations.push(location);
        }

        cursor.skip(2)?; // Padding.
        let num_live_outs = cursor.u16()?;
        for _ in 0..num_live_outs {
            cursor.u16()?; // DwarfRegNum.
            cursor.u8()?; // Reserved.
            cursor.u8()?; // SizeInBytes.
        }
        // Records are padded to 8-byte alignment; the live-outs table ends
        // on a 4-byte boundary relative to the record start, so one
        // conditional 4-byte pad closes the gap when there's an odd number
        // of live-outs entries (each entry is 4 bytes, the header before
        // them is not 8-byte aligned on its own).
        if num_live_outs % 2 == 1 {
            cursor.skip(4)?;
        }

        records.push(StackMapRecord {
            patch_id: PatchId::from_raw(patch_point_id),
            locations,
        });
    }

    Ok(records)
}

/// Where one live value lives at a patchpoint's instruction, as reported by
/// the backend's stack-map record (`spec.md` glossary, "Stack map").
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum MachineLocation {
    Register(u16),
    FrameSlot(i32),
}

/// One stack-map record: a patch id and the machine locations of every live
/// value passed through that patchpoint, in argument order.
#[derive(Clone, Debug, PartialEq)]
pub struct StackMapRecord {
    pub patch_id: PatchId,
    pub locations: Vec<MachineLocation>,
}

/// The section name the memory-manager contract reserves for the stack map
/// (`spec.md` §6, "Section naming").
pub const STACK_MAP_SECTION_NAME: &str = ".llvm_stackmaps";

/// Binds every record's locations onto the matching `PatchDescriptor`,
/// failing if a record's location count doesn't match the number of live
/// values that patch was built with (`spec.md` §8, property 6: "one
/// machine-location entry per live value passed").
pub fn bind_stack_map_records(
    descriptors: &mut HashMap<PatchId, PatchDescriptor>,
    records: Vec<StackMapRecord>,
) -> Result<(), JitError> {
    for record in records {
        let Some(descriptor) = descriptors.get_mut(&record.patch_id) else {
            return Err(JitError::MalformedSchedule(format!(
                "stack map references unknown patch id {}",
                record.patch_id
            )));
        };
        let expected = descriptor.call_arg_count + descriptor.live_value_count;
        if record.locations.len() as u32 != expected {
            return Err(JitError::BackendFatal(format!(
                "stack map for patch {} has {} locations, expected {expected}",
                record.patch_id,
                record.locations.len()
            )));
        }
        descriptor.locations = record.locations;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PatchKind;

    #[test]
    fn binding_rejects_location_count_mismatch() {
        let id = PatchId::from_raw(1);
        let mut descriptors = HashMap::new();
        descriptors.insert(id, PatchDescriptor::new(id, 16, PatchKind::Indirect, None, 0, 2));
        let records = vec![StackMapRecord {
            patch_id: id,
            locations: vec![MachineLocation::Register(0)],
        }];
        assert!(bind_stack_map_records(&mut descriptors, records).is_err());
    }

    #[test]
    fn binding_rejects_unknown_patch_id() {
        let mut descriptors = HashMap::new();
        let records = vec![StackMapRecord {
            patch_id: PatchId::from_raw(42),
            locations: vec![],
        }];
        assert!(bind_stack_map_records(&mut descriptors, records).is_err());
    }

    #[test]
    fn binding_fills_locations_on_match() {
        let id = PatchId::from_raw(1);
        let mut descriptors = HashMap::new();
        descriptors.insert(id, PatchDescriptor::new(id, 16, PatchKind::Direct, Some(0x1000), 1, 1));
        let records = vec![StackMapRecord {
            patch_id: id,
            locations: vec![MachineLocation::Register(3), MachineLocation::FrameSlot(-8)],
        }];
        bind_stack_map_records(&mut descriptors, records).unwrap();
        assert_eq!(descriptors[&id].locations.len(), 2);
    }

    fn push_record_with_one_register_and_one_frame_slot(bytes: &mut Vec<u8>, patch_id: u64) {
        bytes.extend_from_slice(&patch_id.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes()); // InstructionOffset.
        bytes.extend_from_slice(&0u16.to_le_bytes()); // Reserved.
        bytes.extend_from_slice(&2u16.to_le_bytes()); // NumLocations.

        // Location 0: Register, dwarf reg 5.
        bytes.push(LOCATION_KIND_REGISTER);
        bytes.push(0);
        bytes.extend_from_slice(&0u16.to_le_bytes());
        bytes.extend_from_slice(&5u16.to_le_bytes());
        bytes.extend_from_slice(&0u16.to_le_bytes());
        bytes.extend_from_slice(&0i32.to_le_bytes());

        // Location 1: Indirect (frame slot), offset -16.
        bytes.push(LOCATION_KIND_INDIRECT);
        bytes.push(0);
        bytes.extend_from_slice(&0u16.to_le_bytes());
        bytes.extend_from_slice(&0u16.to_le_bytes());
        bytes.extend_from_slice(&0u16.to_le_bytes());
        bytes.extend_from_slice(&(-16i32).to_le_bytes());

        bytes.extend_from_slice(&0u16.to_le_bytes()); // Padding.
        bytes.extend_from_slice(&0u16.to_le_bytes()); // NumLiveOuts.
    }

    #[test]
    fn parse_decodes_one_record_with_mixed_locations() {
        let mut bytes = Vec::new();
        bytes.push(3u8); // Version.
        bytes.push(0u8);
        bytes.extend_from_slice(&0u16.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes()); // NumFunctions.
        bytes.extend_from_slice(&0u32.to_le_bytes()); // NumConstants.
        bytes.extend_from_slice(&1u32.to_le_bytes()); // NumRecords.
        push_record_with_one_register_and_one_frame_slot(&mut bytes, 7);

        let records = parse_stack_map_section(&bytes).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].patch_id, PatchId::from_raw(7));
        assert_eq!(
            records[0].locations,
            vec![MachineLocation::Register(5), MachineLocation::FrameSlot(-16)]
        );
    }

    #[test]
    fn parse_rejects_a_truncated_section() {
        let bytes = vec![3u8, 0, 0, 0, 1, 0, 0, 0];
        assert!(parse_stack_map_section(&bytes).is_err());
    }

    #[test]
    fn parse_rejects_an_unrecognized_location_kind() {
        let mut bytes = Vec::new();
        bytes.push(3u8);
        bytes.push(0u8);
        bytes.extend_from_slice(&0u16.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&0u64.to_le_bytes()); // PatchPointID.
        bytes.extend_from_slice(&0u32.to_le_bytes()); // InstructionOffset.
        bytes.extend_from_slice(&0u16.to_le_bytes()); // Reserved.
        bytes.extend_from_slice(&1u16.to_le_bytes()); // NumLocations.
        bytes.push(LOCATION_KIND_CONSTANT);
        bytes.push(0);
        bytes.extend_from_slice(&0u16.to_le_bytes());
        bytes.extend_from_slice(&0u16.to_le_bytes());
        bytes.extend_from_slice(&0u16.to_le_bytes());
        bytes.extend_from_slice(&0i32.to_le_bytes());
        assert!(parse_stack_map_section(&bytes).is_err());
    }
}
