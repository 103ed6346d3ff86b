//! Thread objects and thread scanning.
//!
//! A thread is a 512-word pinned object. The first slots are ordinary
//! tagged references (name, state, lists); a block of raw slots holds the
//! saved machine state (stack/frame/instruction pointers and the register
//! image); fixed ranges hold the multiple-value area and the TLS slots.
//!
//! A stopped thread is either **mid-call** (it yielded at an ordinary call
//! site, so only its sp/fp matter and the walker takes over) or
//! **full-save** (it was stopped by a precise interrupt, so the whole
//! register image is live and the enriched metadata forms apply to its
//! innermost frame).

use crate::collector::{Collector, Supervisor};
use crate::heap::{Heap, PinnedArea};
use crate::metadata::ExtraRegisters;
use crate::tagged::{ObjectTag, TaggedWord};

/// Thread name slot.
pub const THREAD_NAME: u64 = 1;
/// Thread state slot (a fixnum, see `THREAD_STATE_*`).
pub const THREAD_STATE: u64 = 2;
/// Thread lock slot.
pub const THREAD_LOCK: u64 = 3;
/// Stack object slot.
pub const THREAD_STACK: u64 = 4;
/// Special-stack pointer slot.
pub const THREAD_SPECIAL_STACK_POINTER: u64 = 5;
/// Wait-item slot.
pub const THREAD_WAIT_ITEM: u64 = 6;
/// Next thread in the all-threads list.
pub const THREAD_NEXT: u64 = 7;
/// Previous thread in the all-threads list.
pub const THREAD_PREV: u64 = 8;
/// Pending footholds slot.
pub const THREAD_PENDING_FOOTHOLDS: u64 = 9;
/// Mutex stack slot.
pub const THREAD_MUTEX_STACK: u64 = 10;

/// Nonzero when the full register image below is valid.
pub const THREAD_FULL_SAVE_P: u64 = 16;
/// Saved stack pointer (raw).
pub const THREAD_STATE_RSP: u64 = 17;
/// Saved frame pointer (raw).
pub const THREAD_STATE_RBP: u64 = 18;
/// Saved instruction pointer (raw).
pub const THREAD_STATE_RIP: u64 = 19;
/// Saved rax.
pub const THREAD_STATE_RAX: u64 = 20;
/// Saved rcx.
pub const THREAD_STATE_RCX: u64 = 21;
/// Saved rdx.
pub const THREAD_STATE_RDX: u64 = 22;
/// Saved rbx.
pub const THREAD_STATE_RBX: u64 = 23;
/// Saved r8; r9..r13 follow consecutively.
pub const THREAD_STATE_R8: u64 = 24;
/// Saved r13, the last of the data registers.
pub const THREAD_STATE_R13: u64 = 29;

/// First slot of the multiple-value area.
pub const THREAD_MV_SLOTS_START: u64 = 32;
/// One past the last slot of the multiple-value area.
pub const THREAD_MV_SLOTS_END: u64 = 96;
/// First TLS slot.
pub const THREAD_TLS_SLOTS_START: u64 = 128;
/// One past the last TLS slot.
pub const THREAD_TLS_SLOTS_END: u64 = 512;

/// State of a thread still running its initialization: only registers and
/// TLS hold references.
pub const THREAD_STATE_PARTIALLY_INITIALIZED: i64 = 0;
/// State of a runnable (or blocked) thread.
pub const THREAD_STATE_RUNNABLE: i64 = 1;
/// State of a dead thread; nothing beyond the admin slots is scanned.
pub const THREAD_STATE_DEAD: i64 = 2;

impl Heap {
    /// Allocate a thread object in the wired area. TLS slots start out
    /// holding the unbound-TLS sentinel; everything else is nil or zero.
    pub fn allocate_thread(&mut self, name: TaggedWord) -> TaggedWord {
        let thread = self.allocate_pinned(PinnedArea::Wired, ObjectTag::Thread, 0);
        let nil = self.nil();
        self.set_object_slot(thread, THREAD_NAME, name);
        self.set_object_slot(thread, THREAD_STATE, TaggedWord::fixnum(THREAD_STATE_RUNNABLE));
        for slot in THREAD_LOCK..=THREAD_MUTEX_STACK {
            self.set_object_slot(thread, slot, nil);
        }
        for slot in THREAD_MV_SLOTS_START..THREAD_MV_SLOTS_END {
            self.set_object_slot(thread, slot, nil);
        }
        let unbound = self.unbound_tls_slot();
        for slot in THREAD_TLS_SLOTS_START..THREAD_TLS_SLOTS_END {
            self.set_object_slot(thread, slot, unbound);
        }
        thread
    }
}

impl Collector {
    /// Scan a thread object: admin slots always, registers and TLS by
    /// state, and the stack unless it belongs to the current thread
    /// (already walked inline) or to a system thread that only references
    /// wired objects.
    pub(crate) fn scan_thread(&mut self, thread: TaggedWord, sup: &dyn Supervisor) {
        let addr = thread.pointer_address();
        self.scavenge_many(addr + THREAD_NAME * 8, 10, sup);

        let state = self.heap.object_slot(thread, THREAD_STATE);
        if state == TaggedWord::fixnum(THREAD_STATE_DEAD) {
            return;
        }
        if state == TaggedWord::fixnum(THREAD_STATE_PARTIALLY_INITIALIZED) {
            self.scavenge_data_registers(thread, sup);
            self.scavenge_many(
                addr + THREAD_TLS_SLOTS_START * 8,
                THREAD_TLS_SLOTS_END - THREAD_TLS_SLOTS_START,
                sup,
            );
            return;
        }

        self.scavenge_many(
            addr + THREAD_TLS_SLOTS_START * 8,
            THREAD_TLS_SLOTS_END - THREAD_TLS_SLOTS_START,
            sup,
        );
        if sup.current_thread() == Some(thread) {
            return;
        }
        if sup.thread_stack_is_wired(thread) {
            return;
        }
        if self.heap.memory.read_word(addr + THREAD_FULL_SAVE_P * 8) != 0 {
            self.scavenge_full_save_thread(thread, sup);
        } else {
            let sp = self.heap.memory.read_word(addr + THREAD_STATE_RSP * 8);
            if sp == 0 {
                return;
            }
            let fp = self.heap.memory.read_word(addr + THREAD_STATE_RBP * 8);
            let pc = self.heap.memory.read_word(sp);
            self.scavenge_stack(sp + 8, fp, pc, sup);
        }
    }

    /// Walk the stack of the current thread from its saved sp/fp. Called
    /// during root scavenging; the thread scanner skips this stack later.
    pub(crate) fn scavenge_current_thread_stack(
        &mut self,
        thread: TaggedWord,
        sup: &dyn Supervisor,
    ) {
        let addr = thread.pointer_address();
        let sp = self.heap.memory.read_word(addr + THREAD_STATE_RSP * 8);
        if sp == 0 {
            return;
        }
        let fp = self.heap.memory.read_word(addr + THREAD_STATE_RBP * 8);
        let pc = self.heap.memory.read_word(sp);
        self.scavenge_stack(sp + 8, fp, pc, sup);
    }

    /// rbx and r8..r13 hold tagged values whenever a register image is
    /// live.
    fn scavenge_data_registers(&mut self, thread: TaggedWord, sup: &dyn Supervisor) {
        let addr = thread.pointer_address();
        self.scavenge_slot(addr + THREAD_STATE_RBX * 8, sup);
        for reg in THREAD_STATE_R8..=THREAD_STATE_R13 {
            self.scavenge_slot(addr + reg * 8, sup);
        }
    }

    /// Scan the innermost frame of a thread stopped at an interrupt
    /// boundary, then continue walking its callers mid-call.
    fn scavenge_full_save_thread(&mut self, thread: TaggedWord, sup: &dyn Supervisor) {
        let addr = thread.pointer_address();
        let mut sp = self.heap.memory.read_word(addr + THREAD_STATE_RSP * 8);
        let mut fp = self.heap.memory.read_word(addr + THREAD_STATE_RBP * 8);
        let pc = self.heap.memory.read_word(addr + THREAD_STATE_RIP * 8);
        let rcx = self.heap.memory.read_word(addr + THREAD_STATE_RCX * 8);
        if pc == 0 {
            return;
        }

        let func = sup.return_address_to_function(pc);
        let state = self.frame_state_at(func, pc);
        assert!(
            !state.interruptp,
            "interrupt frame on a walked stack: thread={thread:?} pc={pc:#x} state={state:?}"
        );

        self.scavenge_data_registers(thread, sup);
        match state.extra_registers {
            ExtraRegisters::None => {}
            ExtraRegisters::Rax => {
                self.scavenge_slot(addr + THREAD_STATE_RAX * 8, sup);
            }
            ExtraRegisters::RaxRcx => {
                self.scavenge_slot(addr + THREAD_STATE_RAX * 8, sup);
                self.scavenge_slot(addr + THREAD_STATE_RCX * 8, sup);
            }
            ExtraRegisters::RaxRcxRdx => {
                self.scavenge_slot(addr + THREAD_STATE_RAX * 8, sup);
                self.scavenge_slot(addr + THREAD_STATE_RCX * 8, sup);
                self.scavenge_slot(addr + THREAD_STATE_RDX * 8, sup);
            }
        }

        if state.block_or_tagbody_thunk {
            // Mid-nonlocal-exit: the live sp/fp are words 2 and 3 of the
            // NLX info block rax points at.
            let nlx = self.heap.memory.read_word(addr + THREAD_STATE_RAX * 8);
            sp = self.heap.memory.read_word(nlx + 16);
            fp = self.heap.memory.read_word(nlx + 24);
        }

        if state.multiple_values.is_some() {
            // The MV area is the fixed slot range inside the thread
            // object itself. Slots beyond the live count are dead but
            // harmless to scavenge.
            self.scavenge_many(
                addr + THREAD_MV_SLOTS_START * 8,
                THREAD_MV_SLOTS_END - THREAD_MV_SLOTS_START,
                sup,
            );
        }

        self.scavenge(func, sup);
        let pushed_extra = if state.pushed_values_register {
            TaggedWord::from_raw(rcx).as_fixnum().max(0) as u64
        } else {
            0
        };
        self.scan_frame(&state, sp, fp, pushed_extra, sup);

        if state.framep {
            self.scavenge_incoming_arguments(&state, sp, fp, fp + 16, Some(rcx), sup);
            if fp == 0 {
                return;
            }
            let caller_fp = self.heap.memory.read_word(fp);
            let caller_pc = self.heap.memory.read_word(fp + 8);
            self.scavenge_stack(fp + 16, caller_fp, caller_pc, sup);
        } else {
            // No frame was built: the frame occupies the layout slots plus
            // any pushed values, and the caller's return address is the
            // next word up.
            let frame_words = state.layout_length as u64 + state.pushed_values as u64 + pushed_extra;
            let ra_slot = sp + frame_words * 8;
            self.scavenge_incoming_arguments(&state, sp, fp, ra_slot + 8, Some(rcx), sup);
            let caller_pc = self.heap.memory.read_word(ra_slot);
            self.scavenge_stack(ra_slot + 8, fp, caller_pc, sup);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::tests::TestSupervisor;
    use crate::heap::GcConfig;

    fn begin_cycle(gc: &mut Collector) {
        gc.heap_mut().flip();
        gc.heap_mut().reprotect_newspace();
    }

    #[test]
    fn test_thread_layout() {
        let mut gc = Collector::new(GcConfig::default());
        let name = gc.heap_mut().allocate_string("worker");
        let thread = gc.heap_mut().allocate_thread(name);
        let heap = gc.heap();
        assert_eq!(heap.object_header(thread).object_tag(), Some(ObjectTag::Thread));
        assert_eq!(heap.object_slot(thread, THREAD_NAME), name);
        assert_eq!(
            heap.object_slot(thread, THREAD_STATE),
            TaggedWord::fixnum(THREAD_STATE_RUNNABLE)
        );
        assert_eq!(heap.object_slot(thread, THREAD_LOCK), heap.nil());
        assert_eq!(
            heap.object_slot(thread, THREAD_TLS_SLOTS_START),
            heap.unbound_tls_slot()
        );
    }

    #[test]
    fn test_dead_thread_scans_only_admin_slots() {
        let mut gc = Collector::new(GcConfig::default());
        let name = gc.heap_mut().allocate_string("ghost");
        let thread = gc.heap_mut().allocate_thread(name);
        gc.heap_mut()
            .set_object_slot(thread, THREAD_STATE, TaggedWord::fixnum(THREAD_STATE_DEAD));
        // A live value parked in a TLS slot must NOT keep anything alive.
        let c = gc
            .heap_mut()
            .allocate_cons(TaggedWord::fixnum(1), TaggedWord::fixnum(2));
        gc.heap_mut().set_object_slot(thread, THREAD_TLS_SLOTS_START, c);
        begin_cycle(&mut gc);

        let sup = TestSupervisor::default();
        gc.scan_thread(thread, &sup);

        // Name moved (admin slot scavenged); TLS slot untouched.
        let moved_name = gc.heap().object_slot(thread, THREAD_NAME);
        assert!(gc.heap().in_dynamic_newspace(moved_name.pointer_address()));
        assert_eq!(gc.heap().object_slot(thread, THREAD_TLS_SLOTS_START), c);
    }

    #[test]
    fn test_partially_initialized_thread_skips_stack() {
        let mut gc = Collector::new(GcConfig::default());
        let name = gc.heap_mut().allocate_string("init");
        let thread = gc.heap_mut().allocate_thread(name);
        gc.heap_mut().set_object_slot(
            thread,
            THREAD_STATE,
            TaggedWord::fixnum(THREAD_STATE_PARTIALLY_INITIALIZED),
        );
        let env = gc
            .heap_mut()
            .allocate_cons(TaggedWord::fixnum(3), TaggedWord::fixnum(4));
        gc.heap_mut().set_object_slot(thread, THREAD_STATE_RBX, env);
        // Garbage sp; the scan must never read it.
        let addr = thread.pointer_address();
        gc.heap_mut().write_raw_word(addr + THREAD_STATE_RSP * 8, 0xDEAD_0000);
        begin_cycle(&mut gc);

        let sup = TestSupervisor::default();
        gc.scan_thread(thread, &sup);

        let moved = gc.heap().object_slot(thread, THREAD_STATE_RBX);
        assert!(gc.heap().in_dynamic_newspace(moved.pointer_address()));
    }

    #[test]
    fn test_tls_slots_scavenged_for_runnable_thread() {
        let mut gc = Collector::new(GcConfig::default());
        let name = gc.heap_mut().allocate_string("tls");
        let thread = gc.heap_mut().allocate_thread(name);
        let v = gc.heap_mut().allocate_vector(&[TaggedWord::fixnum(8)]);
        gc.heap_mut()
            .set_object_slot(thread, THREAD_TLS_SLOTS_START + 3, v);
        begin_cycle(&mut gc);

        // Marked wired-stack so the (empty) stack is skipped.
        let mut sup = TestSupervisor::default();
        sup.wired_stack_threads.push(thread);
        gc.scan_thread(thread, &sup);

        let moved = gc.heap().object_slot(thread, THREAD_TLS_SLOTS_START + 3);
        assert!(gc.heap().in_dynamic_newspace(moved.pointer_address()));
        assert_eq!(gc.heap().object_slot(moved, 1).as_fixnum(), 8);
    }
}
