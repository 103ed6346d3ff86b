//! Per-PC GC metadata tables.
//!
//! The code generator emits, for every function, a blob of records sorted
//! by ascending PC offset (measured from the function object's base
//! address). Each record describes the frame state in effect just before
//! that offset: whether a frame pointer is live, how many values sit above
//! the stack pointer, which stack slots hold tagged references (the layout
//! bitmap), and the interrupt-only enrichments (extra registers, the
//! multiple-value count, register-borne argument counts, NLX thunks).
//!
//! Lookup selects the record with the greatest offset less than or equal
//! to the query. Both the encoder (the emit side of the artifact) and the
//! decoder live here so the two can never drift apart.
//!
//! ## Record layout
//!
//! ```text
//! u16 pc_offset
//! u16 flags          bit 0     frame pointer live
//!                    bit 1     interrupt frame
//!                    bit 2     pushed-value count is augmented by rcx
//!                    bit 3     NLX thunk: live sp/fp are in the block at rax
//!                    bits 4-5  extra registers (0 none, 1 rax, 2 +rcx, 3 +rdx)
//!                    bit 6     incoming-argument count present
//!                    bit 7     incoming-argument count lives in rcx
//!                    bits 8-11 multiple-value count + 1 (0 = none)
//! u16 incoming-argument stack slot (when present and not in rcx)
//! u16 pushed values
//! u16 layout length in bits
//! u8 × ceil(len / 8) layout bitmap
//! ```

use crate::memory::MemoryMap;
use crate::tagged::{
    ObjectHeader, TaggedWord, function_gc_info_size, function_machine_code_size,
    function_pool_size,
};

const FLAG_FRAMEP: u16 = 1 << 0;
const FLAG_INTERRUPTP: u16 = 1 << 1;
const FLAG_PUSHED_VALUES_REGISTER: u16 = 1 << 2;
const FLAG_BLOCK_OR_TAGBODY_THUNK: u16 = 1 << 3;
const FLAG_INCOMING_PRESENT: u16 = 1 << 6;
const FLAG_INCOMING_RCX: u16 = 1 << 7;
const EXTRA_REGISTERS_SHIFT: u16 = 4;
const MULTIPLE_VALUES_SHIFT: u16 = 8;

/// Where a frame finds its incoming-argument count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncomingArguments {
    /// A stack slot index holding the count as a fixnum.
    Slot(u16),
    /// The count is live in rcx; only valid in full-save frames.
    Rcx,
}

/// Scratch registers holding live values at an interrupt boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExtraRegisters {
    /// No scratch registers are live.
    #[default]
    None,
    /// rax is live.
    Rax,
    /// rax and rcx are live.
    RaxRcx,
    /// rax, rcx and rdx are live.
    RaxRcxRdx,
}

/// Decoded frame state for one PC, as consumed by the stack walker.
#[derive(Debug, Clone)]
pub struct FrameState {
    /// The frame pointer chain is intact; layout slots are fp-relative.
    pub framep: bool,
    /// The frame is an interrupt frame. Never valid on a walked stack.
    pub interruptp: bool,
    /// Count of value words pushed above the stack pointer.
    pub pushed_values: u16,
    /// `pushed_values` is augmented by the count in rcx (full-save only).
    pub pushed_values_register: bool,
    /// Canonical address of the layout bitmap.
    pub layout_address: u64,
    /// Number of valid bits in the layout bitmap.
    pub layout_length: u16,
    /// Multiple values are live in the thread's MV area (full-save only).
    pub multiple_values: Option<u16>,
    /// Where the incoming-argument count lives, if tracked here.
    pub incoming_arguments: Option<IncomingArguments>,
    /// Live sp/fp must be recovered from the NLX block at rax
    /// (full-save only).
    pub block_or_tagbody_thunk: bool,
    /// Scratch registers live at this point (full-save only).
    pub extra_registers: ExtraRegisters,
}

/// One metadata record on the emit side.
#[derive(Debug, Clone, Default)]
pub struct GcMetadataEntry {
    /// Offset from the function object's base address.
    pub pc_offset: u16,
    /// See [`FrameState::framep`].
    pub framep: bool,
    /// See [`FrameState::interruptp`].
    pub interruptp: bool,
    /// See [`FrameState::pushed_values`].
    pub pushed_values: u16,
    /// See [`FrameState::pushed_values_register`].
    pub pushed_values_register: bool,
    /// One bit per stack slot; `true` means the slot holds a tagged
    /// reference.
    pub layout: Vec<bool>,
    /// See [`FrameState::multiple_values`].
    pub multiple_values: Option<u16>,
    /// See [`FrameState::incoming_arguments`].
    pub incoming_arguments: Option<IncomingArguments>,
    /// See [`FrameState::block_or_tagbody_thunk`].
    pub block_or_tagbody_thunk: bool,
    /// See [`FrameState::extra_registers`].
    pub extra_registers: ExtraRegisters,
}

/// Encode metadata records into the blob stored after a function's
/// constant pool. Entries must be sorted by ascending `pc_offset`.
pub fn encode_gc_metadata(entries: &[GcMetadataEntry]) -> Vec<u8> {
    let mut blob = Vec::new();
    let mut last_offset = None;
    for entry in entries {
        if let Some(last) = last_offset {
            assert!(entry.pc_offset > last, "metadata entries must ascend");
        }
        last_offset = Some(entry.pc_offset);

        let mut flags = 0u16;
        if entry.framep {
            flags |= FLAG_FRAMEP;
        }
        if entry.interruptp {
            flags |= FLAG_INTERRUPTP;
        }
        if entry.pushed_values_register {
            flags |= FLAG_PUSHED_VALUES_REGISTER;
        }
        if entry.block_or_tagbody_thunk {
            flags |= FLAG_BLOCK_OR_TAGBODY_THUNK;
        }
        flags |= (entry.extra_registers as u16) << EXTRA_REGISTERS_SHIFT;
        let mut incoming_slot = 0u16;
        match entry.incoming_arguments {
            None => {}
            Some(IncomingArguments::Slot(slot)) => {
                flags |= FLAG_INCOMING_PRESENT;
                incoming_slot = slot;
            }
            Some(IncomingArguments::Rcx) => {
                flags |= FLAG_INCOMING_PRESENT | FLAG_INCOMING_RCX;
            }
        }
        if let Some(count) = entry.multiple_values {
            assert!(count < 15, "multiple-value count field overflow");
            flags |= (count + 1) << MULTIPLE_VALUES_SHIFT;
        }

        blob.extend_from_slice(&entry.pc_offset.to_le_bytes());
        blob.extend_from_slice(&flags.to_le_bytes());
        blob.extend_from_slice(&incoming_slot.to_le_bytes());
        blob.extend_from_slice(&entry.pushed_values.to_le_bytes());
        blob.extend_from_slice(&(entry.layout.len() as u16).to_le_bytes());
        let mut byte = 0u8;
        for (i, bit) in entry.layout.iter().enumerate() {
            if *bit {
                byte |= 1 << (i % 8);
            }
            if i % 8 == 7 {
                blob.push(byte);
                byte = 0;
            }
        }
        if !entry.layout.len().is_multiple_of(8) {
            blob.push(byte);
        }
    }
    blob
}

/// Enumerate the metadata records of `function` in ascending PC-offset
/// order, passing each offset and decoded state to `f`.
pub fn map_function_gc_metadata<F>(memory: &MemoryMap, function: TaggedWord, mut f: F)
where
    F: FnMut(u16, FrameState),
{
    let addr = function.pointer_address();
    let data = ObjectHeader::from_raw(memory.read_word(addr)).data();
    let base = addr + function_machine_code_size(data) + function_pool_size(data);
    let end = base + function_gc_info_size(data);
    let mut cursor = base;
    while cursor < end {
        let pc_offset = memory.read_u16(cursor);
        let flags = memory.read_u16(cursor + 2);
        let incoming_slot = memory.read_u16(cursor + 4);
        let pushed_values = memory.read_u16(cursor + 6);
        let layout_length = memory.read_u16(cursor + 8);
        let layout_address = cursor + 10;
        cursor = layout_address + (layout_length as u64).div_ceil(8);

        let incoming_arguments = if flags & FLAG_INCOMING_PRESENT != 0 {
            if flags & FLAG_INCOMING_RCX != 0 {
                Some(IncomingArguments::Rcx)
            } else {
                Some(IncomingArguments::Slot(incoming_slot))
            }
        } else {
            None
        };
        let multiple_values = match (flags >> MULTIPLE_VALUES_SHIFT) & 0xF {
            0 => None,
            n => Some(n - 1),
        };
        let extra_registers = match (flags >> EXTRA_REGISTERS_SHIFT) & 3 {
            0 => ExtraRegisters::None,
            1 => ExtraRegisters::Rax,
            2 => ExtraRegisters::RaxRcx,
            _ => ExtraRegisters::RaxRcxRdx,
        };

        f(
            pc_offset,
            FrameState {
                framep: flags & FLAG_FRAMEP != 0,
                interruptp: flags & FLAG_INTERRUPTP != 0,
                pushed_values,
                pushed_values_register: flags & FLAG_PUSHED_VALUES_REGISTER != 0,
                layout_address,
                layout_length,
                multiple_values,
                incoming_arguments,
                block_or_tagbody_thunk: flags & FLAG_BLOCK_OR_TAGBODY_THUNK != 0,
                extra_registers,
            },
        );
    }
}

/// Find the frame state in effect at `pc_offset`: the record with the
/// greatest offset at or below it. `None` means the table does not cover
/// the offset, which the walker treats as fatal.
pub fn lookup_frame_state(
    memory: &MemoryMap,
    function: TaggedWord,
    pc_offset: u64,
) -> Option<FrameState> {
    let mut best: Option<(u16, FrameState)> = None;
    map_function_gc_metadata(memory, function, |offset, state| {
        if offset as u64 <= pc_offset && best.as_ref().is_none_or(|(b, _)| *b <= offset) {
            best = Some((offset, state));
        }
    });
    best.map(|(_, state)| state)
}
