//! GC correctness tests.
//!
//! These tests seed small heaps, run full collection cycles through a mock
//! supervisor and check relocation counts, weak-pointer semantics, pinned
//! freelist reconstruction and stack scanning end to end.

use sable_vm_gc::heap::PinnedArea;
use sable_vm_gc::metadata::{GcMetadataEntry, IncomingArguments, encode_gc_metadata};
use sable_vm_gc::tagged::{self, ObjectHeader, function_machine_code_size};
use sable_vm_gc::thread::{
    THREAD_FULL_SAVE_P, THREAD_MV_SLOTS_START, THREAD_STATE_RAX, THREAD_STATE_RBP,
    THREAD_STATE_RBX, THREAD_STATE_RCX, THREAD_STATE_RIP, THREAD_STATE_RSP,
};
use sable_vm_gc::{Collector, ExtraRegisters, GcConfig, ObjectTag, Supervisor, TaggedWord};

/// Supervisor mock: records world-stop balance, finalizer invocations and
/// the PC-to-function map for stack walking.
#[derive(Default)]
struct MockSupervisor {
    stops: usize,
    resumes: usize,
    finalized: Vec<TaggedWord>,
    functions: Vec<(u64, u64, TaggedWord)>,
    current_thread: Option<TaggedWord>,
}

impl MockSupervisor {
    fn register_function(&mut self, gc: &Collector, func: TaggedWord) {
        let base = func.pointer_address();
        let mc = function_machine_code_size(gc.heap().object_header(func).data());
        self.functions.push((base, base + mc, func));
    }
}

impl Supervisor for MockSupervisor {
    fn stop_the_world(&mut self) {
        self.stops += 1;
    }

    fn resume_the_world(&mut self) {
        self.resumes += 1;
    }

    fn current_thread(&self) -> Option<TaggedWord> {
        self.current_thread
    }

    fn return_address_to_function(&self, pc: u64) -> TaggedWord {
        for &(start, end, func) in &self.functions {
            if pc >= start && pc < end {
                return func;
            }
        }
        panic!("no function covers return address {pc:#x}");
    }

    fn run_finalizer(&mut self, finalizer: TaggedWord) {
        self.finalized.push(finalizer);
    }
}

/// Walk every reachable word from `root` and assert it is already in
/// newspace or pinned: nothing a second scavenge could change.
fn assert_settled(gc: &Collector, root: TaggedWord) {
    let mut worklist = vec![root];
    let mut seen = std::collections::HashSet::new();
    while let Some(w) = worklist.pop() {
        if !w.is_pointer() || !seen.insert(w.raw()) {
            continue;
        }
        let addr = w.pointer_address();
        match tagged::Region::of_address(addr) {
            tagged::Region::General | tagged::Region::Cons => {
                assert!(
                    gc.heap().in_dynamic_newspace(addr),
                    "dangling oldspace pointer {w:?}"
                );
            }
            tagged::Region::Pinned => {
                let header_addr = if w.is_cons() { addr - 16 } else { addr };
                let header = ObjectHeader::from_raw(gc.heap().read_raw_word(header_addr));
                assert_eq!(
                    header.mark_bit(),
                    gc.heap().pinned_mark_bit(),
                    "unmarked pinned object {w:?}"
                );
            }
            tagged::Region::Stack => {}
        }
        if w.is_cons() {
            worklist.push(gc.heap().cons_car(w));
            worklist.push(gc.heap().cons_cdr(w));
        } else if gc.heap().object_header(w).object_tag() == Some(ObjectTag::ArrayT) {
            let len = gc.heap().object_header(w).data();
            for i in 0..len {
                worklist.push(gc.heap().object_slot(w, 1 + i));
            }
        }
    }
}

#[test]
fn test_live_graph_relocates_once() {
    let mut gc = Collector::new(GcConfig::default());
    let mut sup = MockSupervisor::default();
    let nil = gc.heap().nil();

    // A: cons(B, nil); B: vector of four fixnums.
    let b = gc.heap_mut().allocate_vector(&[
        TaggedWord::fixnum(10),
        TaggedWord::fixnum(11),
        TaggedWord::fixnum(12),
        TaggedWord::fixnum(13),
    ]);
    let a = gc.heap_mut().allocate_cons(b, nil);

    let mut roots = [a];
    gc.collect(&mut roots, &mut sup).unwrap();

    let a = roots[0];
    assert!(gc.heap().in_dynamic_newspace(a.pointer_address()));
    let b = gc.heap().cons_car(a);
    assert!(gc.heap().in_dynamic_newspace(b.pointer_address()));
    assert_eq!(gc.heap().cons_cdr(a), gc.heap().nil());
    for i in 0..4 {
        assert_eq!(gc.heap().object_slot(b, 1 + i).as_fixnum(), 10 + i as i64);
    }
    // One cons (2 words) and one five-word vector.
    assert_eq!(gc.stats().words_copied, 7);
    assert_eq!(gc.stats().objects_copied, 2);
    assert_settled(&gc, a);
}

#[test]
fn test_unreachable_garbage_is_not_copied() {
    let mut gc = Collector::new(GcConfig::default());
    let mut sup = MockSupervisor::default();
    let nil = gc.heap().nil();

    let b = gc.heap_mut().allocate_vector(&[
        TaggedWord::fixnum(10),
        TaggedWord::fixnum(11),
        TaggedWord::fixnum(12),
        TaggedWord::fixnum(13),
    ]);
    let a = gc.heap_mut().allocate_cons(b, nil);
    // Unreachable: G: cons(H, H); H: a one-character string.
    let h = gc.heap_mut().allocate_string("x");
    let g = gc.heap_mut().allocate_cons(h, h);

    let mut roots = [a];
    gc.collect(&mut roots, &mut sup).unwrap();

    // Same copy volume as the reachable-only heap.
    assert_eq!(gc.stats().words_copied, 7);
    // The oldspace pages holding G and H are gone.
    assert!(!gc.heap().memory().is_mapped(g.pointer_address()));
    assert!(!gc.heap().memory().is_mapped(h.pointer_address()));
}

#[test]
fn test_cyclic_structure_copies_each_object_once() {
    let mut gc = Collector::new(GcConfig::default());
    let mut sup = MockSupervisor::default();
    let nil = gc.heap().nil();

    // A: cons(nil, B); B: cons(A, A).
    let a = gc.heap_mut().allocate_cons(nil, nil);
    let b = gc.heap_mut().allocate_cons(a, a);
    gc.heap_mut().set_cons_cdr(a, b);

    let mut roots = [a];
    gc.collect(&mut roots, &mut sup).unwrap();

    let a = roots[0];
    let b = gc.heap().cons_cdr(a);
    assert_eq!(gc.heap().cons_car(b), a, "cycle must converge on one copy");
    assert_eq!(gc.heap().cons_cdr(b), a);
    assert_eq!(gc.stats().words_copied, 4);
    assert_eq!(gc.stats().objects_copied, 2);
}

#[test]
fn test_weak_pointer_with_live_key_survives() {
    let mut gc = Collector::new(GcConfig::default());
    let mut sup = MockSupervisor::default();
    let nil = gc.heap().nil();

    let key = gc.heap_mut().allocate_cons(TaggedWord::fixnum(1), nil);
    let value = gc.heap_mut().allocate_vector(&[TaggedWord::fixnum(2)]);
    let w = gc.heap_mut().allocate_weak_pointer(key, value, nil);

    let mut roots = [key, w];
    gc.collect(&mut roots, &mut sup).unwrap();

    let key = roots[0];
    let w = roots[1];
    let (value, live) = gc.heap().weak_pointer_value(w);
    assert!(live);
    assert_eq!(
        gc.heap().object_slot(w, sable_vm_gc::weak::WEAK_POINTER_KEY),
        key,
        "weak key rewritten to the relocated object"
    );
    assert!(gc.heap().in_dynamic_newspace(value.pointer_address()));
    assert_eq!(gc.heap().object_slot(value, 1).as_fixnum(), 2);
}

#[test]
fn test_weak_pointer_with_dead_key_is_cleared() {
    let mut gc = Collector::new(GcConfig::default());
    let mut sup = MockSupervisor::default();
    let nil = gc.heap().nil();

    let key = gc.heap_mut().allocate_cons(TaggedWord::fixnum(1), nil);
    let value = gc.heap_mut().allocate_vector(&[TaggedWord::fixnum(2)]);
    let finalizer = gc.heap_mut().allocate_string("cleanup");
    let w = gc.heap_mut().allocate_weak_pointer(key, value, finalizer);

    // Only the weak pointer is rooted; the key dies.
    let mut roots = [w];
    gc.collect(&mut roots, &mut sup).unwrap();

    let w = roots[0];
    let (value, live) = gc.heap().weak_pointer_value(w);
    assert!(!live);
    assert_eq!(value, gc.heap().nil());
    assert_eq!(
        gc.heap().object_slot(w, sable_vm_gc::weak::WEAK_POINTER_KEY),
        gc.heap().nil()
    );
    // The finalizer ran exactly once and its slot was dropped.
    assert_eq!(sup.finalized.len(), 1);
    assert_eq!(
        gc.heap().object_slot(w, sable_vm_gc::weak::WEAK_POINTER_FINALIZER),
        gc.heap().nil()
    );

    // A second cycle must not requeue it.
    gc.collect(&mut roots, &mut sup).unwrap();
    assert_eq!(sup.finalized.len(), 1);
}

#[test]
fn test_weak_chain_resolves_by_fixpoint() {
    let mut gc = Collector::new(GcConfig::default());
    let mut sup = MockSupervisor::default();
    let nil = gc.heap().nil();

    // K2 is reachable only through W1's value; W1's key K1 is rooted. The
    // first pass makes W1's value (and so K2) live, the second pass then
    // finds W2's key alive.
    let k1 = gc.heap_mut().allocate_cons(TaggedWord::fixnum(1), nil);
    let k2 = gc.heap_mut().allocate_cons(TaggedWord::fixnum(2), nil);
    let v2 = gc.heap_mut().allocate_vector(&[TaggedWord::fixnum(22)]);
    let w2 = gc.heap_mut().allocate_weak_pointer(k2, v2, nil);
    let w1 = gc.heap_mut().allocate_weak_pointer(k1, k2, nil);

    let mut roots = [k1, w1, w2];
    gc.collect(&mut roots, &mut sup).unwrap();

    let (v1, live1) = gc.heap().weak_pointer_value(roots[1]);
    let (v2, live2) = gc.heap().weak_pointer_value(roots[2]);
    assert!(live1 && live2, "both keys are transitively live");
    assert!(gc.heap().in_dynamic_newspace(v1.pointer_address()));
    assert_eq!(gc.heap().object_slot(v2, 1).as_fixnum(), 22);
}

#[test]
fn test_dead_weak_chain_clears_both() {
    let mut gc = Collector::new(GcConfig::default());
    let mut sup = MockSupervisor::default();
    let nil = gc.heap().nil();

    // K2 is reachable only through W1's value, but W1's key is dead, so
    // neither value may be resurrected.
    let k1 = gc.heap_mut().allocate_cons(TaggedWord::fixnum(1), nil);
    let k2 = gc.heap_mut().allocate_cons(TaggedWord::fixnum(2), nil);
    let w1 = gc.heap_mut().allocate_weak_pointer(k1, k2, nil);
    let w2 = gc.heap_mut().allocate_weak_pointer(k2, TaggedWord::fixnum(9), nil);

    let mut roots = [w1, w2];
    gc.collect(&mut roots, &mut sup).unwrap();

    let (_, live1) = gc.heap().weak_pointer_value(roots[0]);
    let (_, live2) = gc.heap().weak_pointer_value(roots[1]);
    assert!(!live1);
    assert!(!live2);
}

#[test]
fn test_pinned_sweep_coalesces_freelist() {
    let mut gc = Collector::new(GcConfig::default());
    let mut sup = MockSupervisor::default();

    // Five contiguous 4-word objects; P1 and P3 stay reachable.
    let objs: Vec<TaggedWord> = (0..5)
        .map(|_| {
            gc.heap_mut()
                .allocate_pinned(PinnedArea::Pinned, ObjectTag::StdInstance, 0)
        })
        .collect();
    let mut roots = [objs[0], objs[2]];
    gc.collect(&mut roots, &mut sup).unwrap();

    let heap = gc.heap();
    let head = heap.pinned_freelist();
    // First entry covers exactly P2.
    assert_eq!(head.pointer_address(), objs[1].pointer_address());
    assert_eq!(heap.object_header(head).data(), 4);
    // Second entry starts at P4 and swallows P5 and the area tail; no
    // entry spans a live object.
    let second = heap.object_slot(head, 1);
    assert_eq!(second.pointer_address(), objs[3].pointer_address());
    assert_eq!(heap.object_slot(second, 1), heap.nil());
    // Live objects carry the current mark parity.
    for obj in [objs[0], objs[2]] {
        assert_eq!(heap.object_header(obj).mark_bit(), heap.pinned_mark_bit());
    }
    // Freelist entries carry it too.
    assert_eq!(heap.object_header(head).mark_bit(), heap.pinned_mark_bit());
}

#[test]
fn test_pinned_cons_and_interior_pointers_survive_cycles() {
    let mut gc = Collector::new(GcConfig::default());
    let mut sup = MockSupervisor::default();
    let nil = gc.heap().nil();

    let inner = gc.heap_mut().allocate_vector(&[TaggedWord::fixnum(5)]);
    let pc = gc.heap_mut().allocate_pinned_cons(PinnedArea::Pinned, inner, nil);

    let mut roots = [pc];
    gc.collect(&mut roots, &mut sup).unwrap();

    // The pinned cons did not move, its car was relocated.
    assert_eq!(roots[0], pc);
    let inner = gc.heap().cons_car(pc);
    assert!(gc.heap().in_dynamic_newspace(inner.pointer_address()));
    assert_eq!(gc.heap().object_slot(inner, 1).as_fixnum(), 5);
    assert_eq!(
        gc.heap().base_address_of_internal_pointer(pc.pointer_address() + 8),
        Some(pc)
    );
}

#[test]
fn test_mid_call_thread_stack_scanned() {
    let mut gc = Collector::new(GcConfig::default());
    let mut sup = MockSupervisor::default();
    let nil = gc.heap().nil();

    // One framep frame holding a cons in its first local.
    let blob = encode_gc_metadata(&[GcMetadataEntry {
        pc_offset: 0,
        framep: true,
        layout: vec![true],
        ..GcMetadataEntry::default()
    }]);
    let func = gc.heap_mut().allocate_function(32, &[], &blob);
    sup.register_function(&gc, func);

    let local = gc.heap_mut().allocate_cons(TaggedWord::fixnum(42), nil);
    let stack = gc.heap_mut().allocate_stack(8192);
    let fp = stack + 1024;
    gc.heap_mut().write_raw_word(fp - 8, local.raw());
    gc.heap_mut().write_raw_word(fp, 0); // terminal saved fp
    gc.heap_mut().write_raw_word(fp + 8, 0); // terminal return address
    let sp = fp - 8;
    // The yield point: return address on top of the stack.
    let yield_sp = sp - 8;
    gc.heap_mut()
        .write_raw_word(yield_sp, func.pointer_address() + 8);

    let name = gc.heap_mut().allocate_string("mutator");
    let thread = gc.heap_mut().allocate_thread(name);
    let taddr = thread.pointer_address();
    gc.heap_mut().write_raw_word(taddr + THREAD_STATE_RSP * 8, yield_sp);
    gc.heap_mut().write_raw_word(taddr + THREAD_STATE_RBP * 8, fp);

    let mut roots = [thread];
    gc.collect(&mut roots, &mut sup).unwrap();

    // The local was rewritten in place to the relocated cons.
    let moved = TaggedWord::from_raw(gc.heap().read_raw_word(fp - 8));
    assert_ne!(moved, local);
    assert!(gc.heap().in_dynamic_newspace(moved.pointer_address()));
    assert_eq!(gc.heap().cons_car(moved).as_fixnum(), 42);
}

#[test]
fn test_full_save_frameless_leaf_and_caller() {
    let mut gc = Collector::new(GcConfig::default());
    let mut sup = MockSupervisor::default();
    let nil = gc.heap().nil();

    // Leaf: frameless, one layout slot above sp, rax live as an extra
    // register. Caller: framep with one tagged local.
    let leaf_blob = encode_gc_metadata(&[GcMetadataEntry {
        pc_offset: 0,
        framep: false,
        layout: vec![true],
        extra_registers: ExtraRegisters::Rax,
        ..GcMetadataEntry::default()
    }]);
    let leaf = gc.heap_mut().allocate_function(32, &[], &leaf_blob);
    sup.register_function(&gc, leaf);
    let caller_blob = encode_gc_metadata(&[GcMetadataEntry {
        pc_offset: 0,
        framep: true,
        layout: vec![true],
        ..GcMetadataEntry::default()
    }]);
    let caller = gc.heap_mut().allocate_function(32, &[], &caller_blob);
    sup.register_function(&gc, caller);

    let slot_obj = gc.heap_mut().allocate_cons(TaggedWord::fixnum(1), nil);
    let rax_obj = gc.heap_mut().allocate_cons(TaggedWord::fixnum(2), nil);
    let rbx_obj = gc.heap_mut().allocate_cons(TaggedWord::fixnum(3), nil);
    let caller_local = gc.heap_mut().allocate_cons(TaggedWord::fixnum(4), nil);

    let stack = gc.heap_mut().allocate_stack(8192);
    let fp = stack + 2048;
    // Caller frame: local below fp, terminal linkage above.
    gc.heap_mut().write_raw_word(fp - 8, caller_local.raw());
    gc.heap_mut().write_raw_word(fp, 0);
    gc.heap_mut().write_raw_word(fp + 8, 0);
    // Leaf frame below: one tracked slot, then the return address into
    // the caller.
    let sp = fp - 24;
    gc.heap_mut().write_raw_word(sp, slot_obj.raw());
    gc.heap_mut()
        .write_raw_word(sp + 8, caller.pointer_address() + 8);

    let name = gc.heap_mut().allocate_string("interrupted");
    let thread = gc.heap_mut().allocate_thread(name);
    let taddr = thread.pointer_address();
    gc.heap_mut().write_raw_word(taddr + THREAD_FULL_SAVE_P * 8, 1);
    gc.heap_mut().write_raw_word(taddr + THREAD_STATE_RSP * 8, sp);
    gc.heap_mut().write_raw_word(taddr + THREAD_STATE_RBP * 8, fp);
    gc.heap_mut()
        .write_raw_word(taddr + THREAD_STATE_RIP * 8, leaf.pointer_address() + 8);
    gc.heap_mut().set_object_slot(thread, THREAD_STATE_RAX, rax_obj);
    gc.heap_mut().set_object_slot(thread, THREAD_STATE_RBX, rbx_obj);

    let mut roots = [thread];
    gc.collect(&mut roots, &mut sup).unwrap();

    let heap = gc.heap();
    // Leaf layout slot, rax, rbx and the caller's local all relocated.
    for (addr, original) in [
        (sp, slot_obj),
        (taddr + THREAD_STATE_RAX * 8, rax_obj),
        (taddr + THREAD_STATE_RBX * 8, rbx_obj),
        (fp - 8, caller_local),
    ] {
        let now = TaggedWord::from_raw(heap.read_raw_word(addr));
        assert_ne!(now, original);
        assert!(heap.in_dynamic_newspace(now.pointer_address()));
    }
    // Both functions were kept live by the walk.
    assert_eq!(
        heap.object_header(leaf).mark_bit(),
        heap.pinned_mark_bit()
    );
    assert_eq!(
        heap.object_header(caller).mark_bit(),
        heap.pinned_mark_bit()
    );
}

#[test]
fn test_full_save_multiple_values_and_rcx_arguments() {
    let mut gc = Collector::new(GcConfig::default());
    let mut sup = MockSupervisor::default();
    let nil = gc.heap().nil();

    let blob = encode_gc_metadata(&[GcMetadataEntry {
        pc_offset: 0,
        framep: true,
        layout: vec![],
        multiple_values: Some(2),
        incoming_arguments: Some(IncomingArguments::Rcx),
        ..GcMetadataEntry::default()
    }]);
    let func = gc.heap_mut().allocate_function(32, &[], &blob);
    sup.register_function(&gc, func);

    let mv_obj = gc.heap_mut().allocate_cons(TaggedWord::fixnum(1), nil);
    let arg1 = gc.heap_mut().allocate_cons(TaggedWord::fixnum(2), nil);
    let arg2 = gc.heap_mut().allocate_cons(TaggedWord::fixnum(3), nil);

    let stack = gc.heap_mut().allocate_stack(8192);
    let fp = stack + 1024;
    gc.heap_mut().write_raw_word(fp, 0);
    gc.heap_mut().write_raw_word(fp + 8, 0);
    // Seven incoming arguments: two surplus words above the return
    // address.
    gc.heap_mut().write_raw_word(fp + 16, arg1.raw());
    gc.heap_mut().write_raw_word(fp + 24, arg2.raw());

    let name = gc.heap_mut().allocate_string("mv");
    let thread = gc.heap_mut().allocate_thread(name);
    let taddr = thread.pointer_address();
    gc.heap_mut().write_raw_word(taddr + THREAD_FULL_SAVE_P * 8, 1);
    gc.heap_mut().write_raw_word(taddr + THREAD_STATE_RSP * 8, fp - 64);
    gc.heap_mut().write_raw_word(taddr + THREAD_STATE_RBP * 8, fp);
    gc.heap_mut()
        .write_raw_word(taddr + THREAD_STATE_RIP * 8, func.pointer_address() + 8);
    gc.heap_mut()
        .set_object_slot(thread, THREAD_STATE_RCX, TaggedWord::fixnum(7));
    gc.heap_mut()
        .set_object_slot(thread, THREAD_MV_SLOTS_START + 5, mv_obj);

    let mut roots = [thread];
    gc.collect(&mut roots, &mut sup).unwrap();

    let heap = gc.heap();
    for (addr, original) in [
        (taddr + (THREAD_MV_SLOTS_START + 5) * 8, mv_obj),
        (fp + 16, arg1),
        (fp + 24, arg2),
    ] {
        let now = TaggedWord::from_raw(heap.read_raw_word(addr));
        assert_ne!(now, original, "slot at {addr:#x} was not scavenged");
        assert!(heap.in_dynamic_newspace(now.pointer_address()));
    }
}

#[test]
fn test_current_thread_stack_scanned_inline() {
    let mut gc = Collector::new(GcConfig::default());
    let mut sup = MockSupervisor::default();
    let nil = gc.heap().nil();

    let blob = encode_gc_metadata(&[GcMetadataEntry {
        pc_offset: 0,
        framep: true,
        layout: vec![true],
        ..GcMetadataEntry::default()
    }]);
    let func = gc.heap_mut().allocate_function(32, &[], &blob);
    sup.register_function(&gc, func);

    let local = gc.heap_mut().allocate_cons(TaggedWord::fixnum(9), nil);
    let stack = gc.heap_mut().allocate_stack(8192);
    let fp = stack + 512;
    gc.heap_mut().write_raw_word(fp - 8, local.raw());
    gc.heap_mut().write_raw_word(fp, 0);
    gc.heap_mut().write_raw_word(fp + 8, 0);
    let yield_sp = fp - 16;
    gc.heap_mut()
        .write_raw_word(yield_sp, func.pointer_address() + 8);

    let name = gc.heap_mut().allocate_string("gc-thread");
    let thread = gc.heap_mut().allocate_thread(name);
    let taddr = thread.pointer_address();
    gc.heap_mut().write_raw_word(taddr + THREAD_STATE_RSP * 8, yield_sp);
    gc.heap_mut().write_raw_word(taddr + THREAD_STATE_RBP * 8, fp);
    sup.current_thread = Some(thread);

    gc.collect(&mut [], &mut sup).unwrap();

    let moved = TaggedWord::from_raw(gc.heap().read_raw_word(fp - 8));
    assert!(gc.heap().in_dynamic_newspace(moved.pointer_address()));
    assert_eq!(gc.heap().cons_car(moved).as_fixnum(), 9);
}

#[test]
fn test_collection_is_idempotent_for_settled_heap() {
    let mut gc = Collector::new(GcConfig::default());
    let mut sup = MockSupervisor::default();
    let nil = gc.heap().nil();

    let b = gc.heap_mut().allocate_vector(&[TaggedWord::fixnum(1)]);
    let a = gc.heap_mut().allocate_cons(b, nil);
    let mut roots = [a];
    gc.collect(&mut roots, &mut sup).unwrap();
    let first_words = gc.stats().words_copied;
    assert_settled(&gc, roots[0]);

    // A second cycle copies the same live volume and settles again.
    gc.collect(&mut roots, &mut sup).unwrap();
    assert_eq!(gc.stats().words_copied, first_words);
    assert_settled(&gc, roots[0]);
    assert_eq!(gc.stats().gc_epoch, 2);
}

#[test]
fn test_world_stop_brackets_every_cycle() {
    let mut gc = Collector::new(GcConfig::default());
    let mut sup = MockSupervisor::default();
    for _ in 0..3 {
        gc.collect(&mut [], &mut sup).unwrap();
    }
    assert_eq!(sup.stops, 3);
    assert_eq!(sup.resumes, 3);
}
