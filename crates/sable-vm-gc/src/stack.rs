//! Precise stack walking.
//!
//! A walk starts from a `(sp, fp, return_pc)` triple and visits one frame
//! per iteration: resolve the function behind the return address, look up
//! the frame state for that PC, scavenge the function itself, scan the
//! slots named by the layout bitmap, then step to the caller through the
//! frame-pointer chain.
//!
//! Dynamic-extent roots are stack-resident objects referenced through a
//! dedicated primary tag. A stack may be interrupted mid-nonlocal-exit, in
//! which case DX slots below the live stack pointer dangle; the
//! `payload >= sp` scope test is the sole guard against scanning them, so
//! it must never be weakened.

use crate::collector::{Collector, Supervisor};
use crate::metadata::{self, ExtraRegisters, FrameState, IncomingArguments};
use crate::tagged::{Region, TaggedWord, tag};

impl Collector {
    /// Walk a mid-call stack: every frame on it was suspended at an
    /// ordinary call site, so the enriched interrupt-only metadata forms
    /// are invalid here and the frame-pointer chain must be intact.
    pub(crate) fn scavenge_stack(
        &mut self,
        mut sp: u64,
        mut fp: u64,
        mut pc: u64,
        sup: &dyn Supervisor,
    ) {
        loop {
            if pc == 0 {
                break;
            }
            let func = sup.return_address_to_function(pc);
            let state = self.frame_state_at(func, pc);
            self.validate_mid_call_frame(&state, sp, fp, pc);
            self.scavenge(func, sup);
            self.scan_frame(&state, sp, fp, 0, sup);
            self.scavenge_incoming_arguments(&state, sp, fp, fp + 16, None, sup);
            if fp == 0 {
                break;
            }
            let caller_fp = self.heap.memory.read_word(fp);
            let caller_pc = self.heap.memory.read_word(fp + 8);
            sp = fp + 16;
            fp = caller_fp;
            pc = caller_pc;
        }
    }

    /// Resolve the frame state for `pc` inside `func`. The function must
    /// live in the pinned region (a relocated function would strand its
    /// return addresses) and its metadata table must cover the offset.
    pub(crate) fn frame_state_at(&self, func: TaggedWord, pc: u64) -> FrameState {
        let addr = func.pointer_address();
        assert!(
            func.is_object() && Region::of_address(addr) == Region::Pinned,
            "function {func:?} for return address {pc:#x} is not pinned"
        );
        let offset = pc - addr;
        metadata::lookup_frame_state(self.heap.memory(), func, offset).unwrap_or_else(|| {
            panic!("no metadata covers offset {offset:#x} of function {func:?} (pc {pc:#x})")
        })
    }

    /// Reject metadata forms that only make sense at interrupt-precise
    /// points when they show up in an ordinary call frame.
    fn validate_mid_call_frame(&self, state: &FrameState, sp: u64, fp: u64, pc: u64) {
        let offense = if state.interruptp {
            Some("interrupt frame")
        } else if !state.framep {
            Some("frameless frame")
        } else if state.pushed_values_register {
            Some("register-borne pushed-value count")
        } else if state.multiple_values.is_some() {
            Some("live multiple values")
        } else if state.block_or_tagbody_thunk {
            Some("NLX thunk")
        } else if state.incoming_arguments == Some(IncomingArguments::Rcx) {
            Some("register-borne argument count")
        } else if state.extra_registers != ExtraRegisters::None {
            Some("live scratch registers")
        } else {
            None
        };
        if let Some(what) = offense {
            panic!("{what} in a call frame: sp={sp:#x} fp={fp:#x} pc={pc:#x} state={state:?}");
        }
    }

    /// Scan one frame: the layout bitmap's tagged slots (fp-relative when
    /// a frame pointer is live, sp-relative otherwise) and the pushed
    /// values above the stack pointer.
    pub(crate) fn scan_frame(
        &mut self,
        state: &FrameState,
        sp: u64,
        fp: u64,
        pushed_extra: u64,
        sup: &dyn Supervisor,
    ) {
        for i in 0..state.layout_length as u64 {
            let byte = self.heap.memory.read_u8(state.layout_address + i / 8);
            if byte & (1 << (i % 8)) == 0 {
                continue;
            }
            let slot_addr = if state.framep {
                fp - (i + 1) * 8
            } else {
                sp + i * 8
            };
            let value = TaggedWord::from_raw(self.heap.memory.read_word(slot_addr));
            if value.is_dx_root() {
                self.scan_dx_root(value, sp, sup);
            } else {
                self.scavenge_slot(slot_addr, sup);
            }
        }
        let pushed = state.pushed_values as u64 + pushed_extra;
        self.scavenge_many(sp, pushed, sup);
    }

    /// Scan the inline payload of a dynamic-extent root. The slot itself
    /// is never rewritten, and payloads below the stack pointer were
    /// abandoned by an in-progress nonlocal exit and must not be touched.
    fn scan_dx_root(&mut self, value: TaggedWord, sp: u64, sup: &dyn Supervisor) {
        let payload = value.pointer_address();
        if payload >= sp {
            let obj = TaggedWord::from_parts(payload, tag::OBJECT);
            self.scan_object(obj, sup);
        }
    }

    /// Scavenge the caller's outgoing-argument strip when this frame
    /// tracks its incoming-argument count. The first five arguments travel
    /// in registers; only the surplus lives above the return address at
    /// `args_base`.
    pub(crate) fn scavenge_incoming_arguments(
        &mut self,
        state: &FrameState,
        sp: u64,
        fp: u64,
        args_base: u64,
        rcx: Option<u64>,
        sup: &dyn Supervisor,
    ) {
        let n_args = match state.incoming_arguments {
            None => return,
            Some(IncomingArguments::Slot(slot)) => {
                let slot_addr = if state.framep {
                    fp - (slot as u64 + 1) * 8
                } else {
                    sp + slot as u64 * 8
                };
                TaggedWord::from_raw(self.heap.memory.read_word(slot_addr)).as_fixnum()
            }
            Some(IncomingArguments::Rcx) => {
                let raw = rcx.expect("register argument counts require a register image");
                TaggedWord::from_raw(raw).as_fixnum()
            }
        };
        let surplus = (n_args - 5).max(0) as u64;
        self.scavenge_many(args_base, surplus, sup);
    }
}
